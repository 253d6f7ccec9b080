//! Durable notification store: the record written after a successful
//! dispatch, plus the dead-letter table for entries that never succeeded.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use courier_core::types::{DbId, EntryId};
use courier_db::models::dead_letter::NewDeadLetter;
use courier_db::models::notification::{NewNotificationRecord, NotificationRecord};
use courier_db::repositories::{DeadLetterRepo, NotificationRepo};
use courier_db::DbPool;

/// Default page size for [`NotificationStore::list`].
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// The store rejected or failed a write or read.
#[derive(Debug, thiserror::Error)]
#[error("Notification store error: {0}")]
pub struct RecordError(pub String);

impl From<sqlx::Error> for RecordError {
    fn from(err: sqlx::Error) -> Self {
        RecordError(err.to_string())
    }
}

/// Where processed notifications are recorded.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert the record for a processed entry. Inserting the same
    /// `(stream, stream_entry_id)` twice returns the existing id.
    async fn insert(&self, record: &NewNotificationRecord) -> Result<DbId, RecordError>;

    /// The record produced from a given stream entry, if any.
    async fn find_by_entry(
        &self,
        stream: &str,
        entry_id: EntryId,
    ) -> Result<Option<NotificationRecord>, RecordError>;

    /// A recipient's records, newest first.
    async fn list(
        &self,
        recipient_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationRecord>, RecordError>;

    /// Park an entry that exhausted its delivery attempts. Returns `false`
    /// if it was already parked.
    async fn dead_letter(&self, letter: &NewDeadLetter) -> Result<bool, RecordError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// Records in the `notifications` and `dead_letters` tables.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: DbPool,
}

impl PgNotificationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert(&self, record: &NewNotificationRecord) -> Result<DbId, RecordError> {
        Ok(NotificationRepo::insert(&self.pool, record).await?)
    }

    async fn find_by_entry(
        &self,
        stream: &str,
        entry_id: EntryId,
    ) -> Result<Option<NotificationRecord>, RecordError> {
        Ok(NotificationRepo::find_by_stream_entry(&self.pool, stream, entry_id).await?)
    }

    async fn list(
        &self,
        recipient_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationRecord>, RecordError> {
        Ok(NotificationRepo::list_for_recipient(&self.pool, recipient_id, limit, offset).await?)
    }

    async fn dead_letter(&self, letter: &NewDeadLetter) -> Result<bool, RecordError> {
        Ok(DeadLetterRepo::insert(&self.pool, letter).await?)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryRecords {
    records: Vec<NotificationRecord>,
    dead_letters: Vec<NewDeadLetter>,
    failing: bool,
}

/// In-process store with the same uniqueness rules as the tables.
#[derive(Debug, Default)]
pub struct MemoryNotificationStore {
    inner: Mutex<MemoryRecords>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Snapshot of all records, oldest first.
    pub fn records(&self) -> Vec<NotificationRecord> {
        self.lock().records.clone()
    }

    /// Snapshot of all dead letters.
    pub fn dead_letters(&self) -> Vec<NewDeadLetter> {
        self.lock().dead_letters.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryRecords> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn checked(&self) -> Result<std::sync::MutexGuard<'_, MemoryRecords>, RecordError> {
        let inner = self.lock();
        if inner.failing {
            return Err(RecordError("store unavailable".into()));
        }
        Ok(inner)
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, record: &NewNotificationRecord) -> Result<DbId, RecordError> {
        let mut inner = self.checked()?;
        if let Some(existing) = inner.records.iter().find(|r| {
            r.stream.as_deref() == Some(record.stream.as_str())
                && r.stream_entry_id == Some(record.stream_entry_id)
        }) {
            return Ok(existing.id);
        }

        let id = inner.records.len() as DbId + 1;
        inner.records.push(NotificationRecord {
            id,
            recipient_id: record.recipient_id,
            category: record.category.clone(),
            body: record.body.clone(),
            is_read: false,
            stream: Some(record.stream.clone()),
            stream_entry_id: Some(record.stream_entry_id),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn find_by_entry(
        &self,
        stream: &str,
        entry_id: EntryId,
    ) -> Result<Option<NotificationRecord>, RecordError> {
        let inner = self.checked()?;
        Ok(inner
            .records
            .iter()
            .find(|r| r.stream.as_deref() == Some(stream) && r.stream_entry_id == Some(entry_id))
            .cloned())
    }

    async fn list(
        &self,
        recipient_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationRecord>, RecordError> {
        let inner = self.checked()?;
        Ok(inner
            .records
            .iter()
            .rev()
            .filter(|r| r.recipient_id == recipient_id)
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn dead_letter(&self, letter: &NewDeadLetter) -> Result<bool, RecordError> {
        let mut inner = self.checked()?;
        let exists = inner.dead_letters.iter().any(|d| {
            d.stream == letter.stream
                && d.group_name == letter.group_name
                && d.entry_id == letter.entry_id
        });
        if exists {
            return Ok(false);
        }
        inner.dead_letters.push(letter.clone());
        Ok(true)
    }
}
