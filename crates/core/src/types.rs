/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Position of an entry in a stream. Assigned by the stream store and
/// strictly increasing in append order.
pub type EntryId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
