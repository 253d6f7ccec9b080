//! Repository for the stream log (`stream_entries`) and its consumer-group
//! bookkeeping (`stream_groups`, `stream_pending`).
//!
//! Pending state lives only in these tables. Every transition that can race
//! between consumers runs inside a transaction that holds the group row lock
//! (new deliveries) or re-checks its predicate under the pending row lock
//! (reclaims), so an entry never has two owners.

use courier_core::types::{DbId, EntryId};
use sqlx::{PgConnection, PgPool};

use crate::models::stream::{PendingRow, StreamEntryRow};

/// `LISTEN`/`NOTIFY` channel signalled on every append. The payload is the
/// stream name.
pub const APPEND_CHANNEL: &str = "courier_stream_appended";

/// Column list for `stream_entries` queries.
const ENTRY_COLUMNS: &str = "id, stream, recipient_id, category, body, enqueued_at";

/// Pending rows joined with their entries.
const PENDING_SELECT: &str = "\
    SELECT p.entry_id, e.recipient_id, e.category, e.body, e.enqueued_at, \
           p.consumer, p.delivered_at, p.delivery_count \
    FROM stream_pending p \
    JOIN stream_entries e ON e.id = p.entry_id";

/// Provides append, group-read, acknowledge and reclaim operations.
pub struct StreamRepo;

impl StreamRepo {
    /// Append an entry and wake any long-polling readers.
    ///
    /// Appends to the same stream are serialized with a transaction-scoped
    /// advisory lock so that ids become visible in increasing order; a
    /// reader's cursor can never skip over a late-committing lower id.
    pub async fn append(
        pool: &PgPool,
        stream: &str,
        recipient_id: DbId,
        category: &str,
        body: &str,
    ) -> Result<StreamEntryRow, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(stream)
            .execute(&mut *tx)
            .await?;

        let query = format!(
            "INSERT INTO stream_entries (stream, recipient_id, category, body) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {ENTRY_COLUMNS}"
        );
        let row = sqlx::query_as::<_, StreamEntryRow>(&query)
            .bind(stream)
            .bind(recipient_id)
            .bind(category)
            .bind(body)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(APPEND_CHANNEL)
            .bind(stream)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row)
    }

    /// Create a consumer group whose cursor starts at the current tail.
    ///
    /// Returns `true` if the group was created, `false` if it already existed.
    pub async fn create_group(pool: &PgPool, stream: &str, group: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO stream_groups (stream, group_name, last_delivered_id) \
             VALUES ($1, $2, COALESCE((SELECT MAX(id) FROM stream_entries WHERE stream = $1), 0)) \
             ON CONFLICT (stream, group_name) DO NOTHING",
        )
        .bind(stream)
        .bind(group)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deliver up to `count` never-delivered entries to `consumer`.
    ///
    /// Advances the group cursor and creates one pending row per entry
    /// (delivery count 1). Returns `None` if the group does not exist.
    pub async fn deliver_new(
        pool: &PgPool,
        stream: &str,
        group: &str,
        consumer: &str,
        count: i64,
    ) -> Result<Option<Vec<PendingRow>>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let cursor: Option<EntryId> = sqlx::query_scalar(
            "SELECT last_delivered_id FROM stream_groups \
             WHERE stream = $1 AND group_name = $2 \
             FOR UPDATE",
        )
        .bind(stream)
        .bind(group)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(cursor) = cursor else {
            return Ok(None);
        };

        let ids: Vec<EntryId> = sqlx::query_scalar(
            "SELECT id FROM stream_entries \
             WHERE stream = $1 AND id > $2 \
             ORDER BY id \
             LIMIT $3",
        )
        .bind(stream)
        .bind(cursor)
        .bind(count)
        .fetch_all(&mut *tx)
        .await?;

        let Some(&last) = ids.last() else {
            tx.commit().await?;
            return Ok(Some(Vec::new()));
        };

        sqlx::query(
            "INSERT INTO stream_pending (stream, group_name, entry_id, consumer) \
             SELECT $1, $2, UNNEST($3::BIGINT[]), $4",
        )
        .bind(stream)
        .bind(group)
        .bind(&ids)
        .bind(consumer)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE stream_groups SET last_delivered_id = $3 \
             WHERE stream = $1 AND group_name = $2",
        )
        .bind(stream)
        .bind(group)
        .bind(last)
        .execute(&mut *tx)
        .await?;

        let rows = pending_rows(&mut *tx, stream, group, &ids).await?;
        tx.commit().await?;
        Ok(Some(rows))
    }

    /// Redeliver entries already owned by `consumer` with ids above `after`.
    ///
    /// Used for crash recovery: each redelivery refreshes `delivered_at` and
    /// counts as a delivery attempt.
    pub async fn redeliver_owned(
        pool: &PgPool,
        stream: &str,
        group: &str,
        consumer: &str,
        after: EntryId,
        count: i64,
    ) -> Result<Vec<PendingRow>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let ids: Vec<EntryId> = sqlx::query_scalar(
            "UPDATE stream_pending \
             SET delivery_count = delivery_count + 1, delivered_at = NOW() \
             WHERE stream = $1 AND group_name = $2 AND consumer = $3 \
               AND entry_id IN ( \
                   SELECT entry_id FROM stream_pending \
                   WHERE stream = $1 AND group_name = $2 AND consumer = $3 AND entry_id > $4 \
                   ORDER BY entry_id \
                   LIMIT $5 \
                   FOR UPDATE \
               ) \
             RETURNING entry_id",
        )
        .bind(stream)
        .bind(group)
        .bind(consumer)
        .bind(after)
        .bind(count)
        .fetch_all(&mut *tx)
        .await?;

        let rows = pending_rows(&mut *tx, stream, group, &ids).await?;
        tx.commit().await?;
        Ok(rows)
    }

    /// Remove entries from the pending set.
    ///
    /// Returns how many were actually pending; acknowledging an id twice is
    /// not an error.
    pub async fn ack(
        pool: &PgPool,
        stream: &str,
        group: &str,
        ids: &[EntryId],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM stream_pending \
             WHERE stream = $1 AND group_name = $2 AND entry_id = ANY($3)",
        )
        .bind(stream)
        .bind(group)
        .bind(ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Reset the idle clock of entries `consumer` still owns.
    ///
    /// Entries that were acknowledged or taken over by another consumer are
    /// skipped. Returns how many were refreshed.
    pub async fn touch(
        pool: &PgPool,
        stream: &str,
        group: &str,
        consumer: &str,
        ids: &[EntryId],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE stream_pending SET delivered_at = NOW() \
             WHERE stream = $1 AND group_name = $2 AND consumer = $3 AND entry_id = ANY($4)",
        )
        .bind(stream)
        .bind(group)
        .bind(consumer)
        .bind(ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// List pending entries delivered at least `min_idle_secs` ago.
    pub async fn list_stale(
        pool: &PgPool,
        stream: &str,
        group: &str,
        min_idle_secs: f64,
        count: i64,
    ) -> Result<Vec<PendingRow>, sqlx::Error> {
        let query = format!(
            "{PENDING_SELECT} \
             WHERE p.stream = $1 AND p.group_name = $2 \
               AND p.delivered_at <= NOW() - make_interval(secs => $3) \
             ORDER BY p.entry_id \
             LIMIT $4"
        );
        sqlx::query_as::<_, PendingRow>(&query)
            .bind(stream)
            .bind(group)
            .bind(min_idle_secs)
            .bind(count)
            .fetch_all(pool)
            .await
    }

    /// List the group's pending entries in entry order.
    pub async fn list_pending(
        pool: &PgPool,
        stream: &str,
        group: &str,
        count: i64,
    ) -> Result<Vec<PendingRow>, sqlx::Error> {
        let query = format!(
            "{PENDING_SELECT} \
             WHERE p.stream = $1 AND p.group_name = $2 \
             ORDER BY p.entry_id \
             LIMIT $3"
        );
        sqlx::query_as::<_, PendingRow>(&query)
            .bind(stream)
            .bind(group)
            .bind(count)
            .fetch_all(pool)
            .await
    }

    /// Transfer ownership of still-idle entries to `consumer`.
    ///
    /// The idle predicate is re-evaluated under the row lock, so when two
    /// consumers race for the same entry only the first one wins. Each
    /// claimed entry's delivery count is incremented.
    pub async fn claim(
        pool: &PgPool,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_secs: f64,
        ids: &[EntryId],
    ) -> Result<Vec<PendingRow>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let claimed: Vec<EntryId> = sqlx::query_scalar(
            "UPDATE stream_pending \
             SET consumer = $3, delivered_at = NOW(), delivery_count = delivery_count + 1 \
             WHERE stream = $1 AND group_name = $2 AND entry_id = ANY($4) \
               AND delivered_at <= NOW() - make_interval(secs => $5) \
             RETURNING entry_id",
        )
        .bind(stream)
        .bind(group)
        .bind(consumer)
        .bind(ids)
        .bind(min_idle_secs)
        .fetch_all(&mut *tx)
        .await?;

        let rows = pending_rows(&mut *tx, stream, group, &claimed).await?;
        tx.commit().await?;
        Ok(rows)
    }
}

/// Fetch joined pending rows for `ids`, in entry order.
async fn pending_rows(
    conn: &mut PgConnection,
    stream: &str,
    group: &str,
    ids: &[EntryId],
) -> Result<Vec<PendingRow>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let query = format!(
        "{PENDING_SELECT} \
         WHERE p.stream = $1 AND p.group_name = $2 AND p.entry_id = ANY($3) \
         ORDER BY p.entry_id"
    );
    sqlx::query_as::<_, PendingRow>(&query)
        .bind(stream)
        .bind(group)
        .bind(ids)
        .fetch_all(conn)
        .await
}
