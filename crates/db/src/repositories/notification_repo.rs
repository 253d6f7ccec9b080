//! Repository for the `notifications` table.

use courier_core::types::{DbId, EntryId};
use sqlx::PgPool;

use crate::models::notification::{NewNotificationRecord, NotificationRecord};

/// Column list for `notifications` queries.
const COLUMNS: &str =
    "id, recipient_id, category, body, is_read, stream, stream_entry_id, created_at";

/// Provides write-once and listing operations for notification records.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Insert a record for a processed stream entry, returning its ID.
    ///
    /// Idempotent per `(stream, stream_entry_id)`: inserting the same entry
    /// twice returns the ID of the existing row.
    pub async fn insert(
        pool: &PgPool,
        input: &NewNotificationRecord,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO notifications (recipient_id, category, body, stream, stream_entry_id) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT ON CONSTRAINT uq_notifications_stream_entry \
             DO UPDATE SET stream_entry_id = EXCLUDED.stream_entry_id \
             RETURNING id",
        )
        .bind(input.recipient_id)
        .bind(&input.category)
        .bind(&input.body)
        .bind(&input.stream)
        .bind(input.stream_entry_id)
        .fetch_one(pool)
        .await
    }

    /// Find the record produced from a given stream entry, if any.
    pub async fn find_by_stream_entry(
        pool: &PgPool,
        stream: &str,
        entry_id: EntryId,
    ) -> Result<Option<NotificationRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notifications WHERE stream = $1 AND stream_entry_id = $2"
        );
        sqlx::query_as::<_, NotificationRecord>(&query)
            .bind(stream)
            .bind(entry_id)
            .fetch_optional(pool)
            .await
    }

    /// List a recipient's notifications, newest first.
    pub async fn list_for_recipient(
        pool: &PgPool,
        recipient_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NotificationRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE recipient_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, NotificationRecord>(&query)
            .bind(recipient_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}
