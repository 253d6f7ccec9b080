//! Rows of the stream log and its consumer-group bookkeeping.

use courier_core::types::{DbId, EntryId, Timestamp};
use sqlx::FromRow;

/// A row from `stream_entries`.
#[derive(Debug, Clone, FromRow)]
pub struct StreamEntryRow {
    pub id: EntryId,
    pub stream: String,
    pub recipient_id: DbId,
    pub category: String,
    pub body: String,
    pub enqueued_at: Timestamp,
}

/// A `stream_pending` row joined with the entry it references.
#[derive(Debug, Clone, FromRow)]
pub struct PendingRow {
    pub entry_id: EntryId,
    pub recipient_id: DbId,
    pub category: String,
    pub body: String,
    pub enqueued_at: Timestamp,
    pub consumer: String,
    pub delivered_at: Timestamp,
    pub delivery_count: i32,
}
