//! Processed-notification records.

use courier_core::types::{DbId, EntryId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `notifications` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct NotificationRecord {
    pub id: DbId,
    pub recipient_id: DbId,
    pub category: String,
    pub body: String,
    pub is_read: bool,
    /// Stream the record was produced from, `None` for records created
    /// outside the pipeline.
    pub stream: Option<String>,
    pub stream_entry_id: Option<EntryId>,
    pub created_at: Timestamp,
}

/// DTO for inserting a record after a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotificationRecord {
    pub recipient_id: DbId,
    pub category: String,
    pub body: String,
    pub stream: String,
    pub stream_entry_id: EntryId,
}
