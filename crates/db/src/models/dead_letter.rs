//! Entries that exhausted their delivery attempts.

use courier_core::types::{DbId, EntryId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `dead_letters` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DeadLetter {
    pub id: DbId,
    pub stream: String,
    pub group_name: String,
    pub entry_id: EntryId,
    pub recipient_id: DbId,
    pub category: String,
    pub body: String,
    pub attempts: i32,
    pub reason: String,
    pub created_at: Timestamp,
}

/// DTO for routing an entry to the dead-letter table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeadLetter {
    pub stream: String,
    pub group_name: String,
    pub entry_id: EntryId,
    pub recipient_id: DbId,
    pub category: String,
    pub body: String,
    pub attempts: i32,
    pub reason: String,
}
