//! The durable stream abstraction.
//!
//! A [`StreamStore`] is an append-only log of [`NotificationEvent`]s with
//! consumer-group bookkeeping: a per-group delivery cursor and a pending set
//! of delivered-but-unacknowledged entries, each owned by exactly one
//! consumer. All pending state lives in the store; nothing in this crate
//! keeps a second copy.
//!
//! Two backends are provided:
//!
//! - [`PgStreamStore`]: PostgreSQL tables, long-poll via `LISTEN/NOTIFY`.
//! - [`MemoryStreamStore`]: in-process, for tests and local runs.

use std::time::Duration;

use async_trait::async_trait;
use courier_core::event::NotificationEvent;
use courier_core::types::{EntryId, Timestamp};
use courier_db::models::stream::PendingRow;

use crate::error::StreamError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStreamStore;
pub use postgres::PgStreamStore;

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

/// An event as stored in the stream, with its store-assigned position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub event: NotificationEvent,
    pub enqueued_at: Timestamp,
}

/// A delivered entry that has not been acknowledged yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub entry: StreamEntry,
    /// Consumer currently owning the entry.
    pub consumer: String,
    /// When the entry was last delivered (or reclaimed).
    pub delivered_at: Timestamp,
    /// Number of deliveries so far, starting at 1.
    pub attempts: u32,
}

impl PendingEntry {
    pub fn id(&self) -> EntryId {
        self.entry.id
    }

    /// Time since the last delivery. Zero if the clock went backwards.
    pub fn idle(&self) -> Duration {
        (chrono::Utc::now() - self.delivered_at)
            .to_std()
            .unwrap_or_default()
    }
}

impl TryFrom<PendingRow> for PendingEntry {
    type Error = StreamError;

    fn try_from(row: PendingRow) -> Result<Self, Self::Error> {
        let id = row.entry_id;
        let malformed = |reason: String| StreamError::Malformed { id, reason };

        let event = NotificationEvent {
            recipient_id: row.recipient_id,
            category: row.category,
            body: row.body,
        };
        event.validate().map_err(|e| malformed(e.to_string()))?;

        let attempts = u32::try_from(row.delivery_count)
            .map_err(|_| malformed(format!("negative delivery count {}", row.delivery_count)))?;

        Ok(Self {
            entry: StreamEntry {
                id,
                event,
                enqueued_at: row.enqueued_at,
            },
            consumer: row.consumer,
            delivered_at: row.delivered_at,
            attempts,
        })
    }
}

pub(crate) fn rows_to_pending(rows: Vec<PendingRow>) -> Result<Vec<PendingEntry>, StreamError> {
    rows.into_iter().map(PendingEntry::try_from).collect()
}

// ---------------------------------------------------------------------------
// StreamStore
// ---------------------------------------------------------------------------

/// Append-only event log with consumer groups.
///
/// Implementations guarantee:
///
/// - ids are strictly increasing per stream and become visible in id order;
/// - an entry has at most one owning consumer within a group at any time;
/// - `ack` is idempotent;
/// - `claim` re-checks idleness atomically, so two racing claimers never
///   both win the same entry.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Cheap connectivity probe.
    async fn ping(&self) -> Result<(), StreamError>;

    /// Durably append an event, returning its id.
    async fn append(&self, stream: &str, event: &NotificationEvent) -> Result<EntryId, StreamError>;

    /// Create `group` with its cursor at the current tail of `stream`.
    ///
    /// Returns `true` if created, `false` if it already existed.
    async fn create_group(&self, stream: &str, group: &str) -> Result<bool, StreamError>;

    /// Redeliver up to `count` entries already owned by `consumer` with ids
    /// greater than `after`, in id order. Each counts as a new attempt.
    async fn read_owned(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        after: EntryId,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError>;

    /// Deliver up to `count` never-delivered entries to `consumer`, waiting
    /// at most `block` for at least one to arrive. An empty result means the
    /// wait timed out.
    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<PendingEntry>, StreamError>;

    /// Remove `ids` from the pending set, returning how many were pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, StreamError>;

    /// Mark the entries among `ids` still owned by `consumer` as freshly
    /// delivered, without counting a new attempt. Returns how many were
    /// refreshed.
    async fn touch(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        ids: &[EntryId],
    ) -> Result<u64, StreamError>;

    /// Pending entries idle for at least `min_idle`, in id order.
    async fn stale(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError>;

    /// All pending entries of the group, in id order.
    async fn pending(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError>;

    /// Transfer the entries among `ids` that are still idle for at least
    /// `min_idle` to `consumer`, incrementing their attempt count.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<PendingEntry>, StreamError>;
}
