//! Repository for the `dead_letters` table.

use sqlx::PgPool;

use crate::models::dead_letter::{DeadLetter, NewDeadLetter};

/// Column list for `dead_letters` queries.
const COLUMNS: &str = "id, stream, group_name, entry_id, recipient_id, category, body, \
                       attempts, reason, created_at";

/// Stores entries that exceeded their delivery attempts.
pub struct DeadLetterRepo;

impl DeadLetterRepo {
    /// Record a dead letter. Writing the same entry twice is a no-op.
    ///
    /// Returns `true` if a new row was inserted.
    pub async fn insert(pool: &PgPool, input: &NewDeadLetter) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO dead_letters \
                 (stream, group_name, entry_id, recipient_id, category, body, attempts, reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT ON CONSTRAINT uq_dead_letters_entry DO NOTHING",
        )
        .bind(&input.stream)
        .bind(&input.group_name)
        .bind(input.entry_id)
        .bind(input.recipient_id)
        .bind(&input.category)
        .bind(&input.body)
        .bind(input.attempts)
        .bind(&input.reason)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List the dead letters of a stream, oldest entry first.
    pub async fn list_for_stream(
        pool: &PgPool,
        stream: &str,
        limit: i64,
    ) -> Result<Vec<DeadLetter>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM dead_letters WHERE stream = $1 ORDER BY entry_id LIMIT $2"
        );
        sqlx::query_as::<_, DeadLetter>(&query)
            .bind(stream)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}
