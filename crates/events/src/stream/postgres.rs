//! PostgreSQL-backed [`StreamStore`].
//!
//! Entries and pending state live in `stream_entries`, `stream_groups` and
//! `stream_pending` (see [`StreamRepo`]). Blocking reads subscribe to the
//! append channel with `LISTEN` and re-query whenever a notification
//! arrives, falling back to a periodic poll if the listener drops.

use std::time::Duration;

use async_trait::async_trait;
use courier_core::event::NotificationEvent;
use courier_core::types::EntryId;
use courier_db::repositories::stream_repo::APPEND_CHANNEL;
use courier_db::repositories::StreamRepo;
use courier_db::DbPool;
use sqlx::postgres::PgListener;
use tokio::time::Instant;

use super::{rows_to_pending, PendingEntry, StreamStore};
use crate::error::StreamError;

/// Upper bound on how long a blocked read sleeps between re-queries when no
/// notification arrives.
const FALLBACK_POLL: Duration = Duration::from_secs(1);

/// Stream store over the shared connection pool.
#[derive(Clone)]
pub struct PgStreamStore {
    pool: DbPool,
}

impl PgStreamStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn listen(&self) -> Option<PgListener> {
        let result = async {
            let mut listener = PgListener::connect_with(&self.pool).await?;
            listener.listen(APPEND_CHANNEL).await?;
            Ok::<_, sqlx::Error>(listener)
        }
        .await;

        match result {
            Ok(listener) => Some(listener),
            Err(e) => {
                tracing::warn!(error = %e, "Append listener unavailable, falling back to polling");
                None
            }
        }
    }
}

fn as_limit(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

#[async_trait]
impl StreamStore for PgStreamStore {
    async fn ping(&self) -> Result<(), StreamError> {
        courier_db::health_check(&self.pool).await?;
        Ok(())
    }

    async fn append(&self, stream: &str, event: &NotificationEvent) -> Result<EntryId, StreamError> {
        let row = StreamRepo::append(
            &self.pool,
            stream,
            event.recipient_id,
            &event.category,
            &event.body,
        )
        .await?;
        Ok(row.id)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<bool, StreamError> {
        Ok(StreamRepo::create_group(&self.pool, stream, group).await?)
    }

    async fn read_owned(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        after: EntryId,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let rows =
            StreamRepo::redeliver_owned(&self.pool, stream, group, consumer, after, as_limit(count))
                .await?;
        rows_to_pending(rows)
    }

    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let deadline = Instant::now() + block;
        // Subscribe before the first query so an append that commits in
        // between is not missed.
        let mut listener = if block.is_zero() {
            None
        } else {
            self.listen().await
        };

        loop {
            let delivered =
                StreamRepo::deliver_new(&self.pool, stream, group, consumer, as_limit(count))
                    .await?
                    .ok_or_else(|| StreamError::NoSuchGroup {
                        stream: stream.to_string(),
                        group: group.to_string(),
                    })?;

            if !delivered.is_empty() {
                return rows_to_pending(delivered);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let wait = (deadline - now).min(FALLBACK_POLL);

            match listener.as_mut() {
                Some(l) => match tokio::time::timeout(wait, l.recv()).await {
                    Ok(Ok(_)) | Err(_) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Append listener failed");
                        listener = None;
                    }
                },
                None => tokio::time::sleep(wait).await,
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, StreamError> {
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(StreamRepo::ack(&self.pool, stream, group, ids).await?)
    }

    async fn touch(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        ids: &[EntryId],
    ) -> Result<u64, StreamError> {
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(StreamRepo::touch(&self.pool, stream, group, consumer, ids).await?)
    }

    async fn stale(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let rows = StreamRepo::list_stale(
            &self.pool,
            stream,
            group,
            min_idle.as_secs_f64(),
            as_limit(count),
        )
        .await?;
        rows_to_pending(rows)
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let rows = StreamRepo::list_pending(&self.pool, stream, group, as_limit(count)).await?;
        rows_to_pending(rows)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<PendingEntry>, StreamError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = StreamRepo::claim(
            &self.pool,
            stream,
            group,
            consumer,
            min_idle.as_secs_f64(),
            ids,
        )
        .await?;
        rows_to_pending(rows)
    }
}
