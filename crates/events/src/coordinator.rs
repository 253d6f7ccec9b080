//! Consumer-group coordination: who gets which entry, and when it is done.
//!
//! [`ConsumerGroup`] is a thin layer over a
//! [`StreamStore`]. The only thing it remembers is, per consumer, how far it
//! has got through re-reading its own backlog after a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use courier_core::types::EntryId;
use tokio::sync::Mutex;

use crate::error::StreamError;
use crate::retry::{with_retry, RetryPolicy};
use crate::stream::{PendingEntry, StreamStore};

/// Largest batch a single claim may return.
pub const MAX_CLAIM_BATCH: usize = 100;

/// Default long-poll window for new entries.
pub const DEFAULT_BLOCK: Duration = Duration::from_secs(5);

/// Progress of a consumer through its own pending backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    /// Still re-reading owned entries with ids above the cursor.
    Draining { after: EntryId },
    /// Backlog exhausted; only new entries from now on.
    Done,
}

/// One consumer group on one stream.
pub struct ConsumerGroup {
    store: Arc<dyn StreamStore>,
    stream: String,
    group: String,
    retry: RetryPolicy,
    block: Duration,
    recovery: Mutex<HashMap<String, Recovery>>,
}

impl ConsumerGroup {
    pub fn new(
        store: Arc<dyn StreamStore>,
        stream: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            store,
            stream: stream.into(),
            group: group.into(),
            retry: RetryPolicy::default(),
            block: DEFAULT_BLOCK,
            recovery: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the long-poll window used by [`claim_next`](Self::claim_next).
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Create the group if it does not exist yet. Safe to call from every
    /// process on startup.
    pub async fn ensure_group(&self) -> Result<(), StreamError> {
        let created = with_retry(&self.retry, "create_group", || {
            self.store.create_group(&self.stream, &self.group)
        })
        .await?;

        if created {
            tracing::info!(stream = %self.stream, group = %self.group, "Consumer group created");
        } else {
            tracing::debug!(stream = %self.stream, group = %self.group, "Consumer group exists");
        }
        Ok(())
    }

    /// Claim the next batch for `consumer`.
    ///
    /// The consumer's own backlog (entries it was given before a restart and
    /// never acknowledged) is replayed first, in id order. After that, waits
    /// for new entries until at least one arrives. `max_batch` is clamped to
    /// `1..=`[`MAX_CLAIM_BATCH`].
    pub async fn claim_next(
        &self,
        consumer: &str,
        max_batch: usize,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let batch = max_batch.clamp(1, MAX_CLAIM_BATCH);

        {
            let mut recovery = self.recovery.lock().await;
            let state = recovery
                .entry(consumer.to_string())
                .or_insert(Recovery::Draining { after: 0 });

            if let Recovery::Draining { after } = *state {
                let owned = with_retry(&self.retry, "read_owned", || {
                    self.store
                        .read_owned(&self.stream, &self.group, consumer, after, batch)
                })
                .await?;

                match owned.last() {
                    Some(last) => {
                        *state = Recovery::Draining { after: last.id() };
                        tracing::info!(
                            consumer,
                            count = owned.len(),
                            "Redelivering pending backlog"
                        );
                        return Ok(owned);
                    }
                    None => *state = Recovery::Done,
                }
            }
        }

        loop {
            let fresh = with_retry(&self.retry, "read_new", || {
                self.store
                    .read_new(&self.stream, &self.group, consumer, batch, self.block)
            })
            .await?;

            if !fresh.is_empty() {
                return Ok(fresh);
            }
        }
    }

    /// Acknowledge an entry. Returns `false` if it was no longer pending.
    pub async fn acknowledge(&self, entry_id: EntryId) -> Result<bool, StreamError> {
        let ids = [entry_id];
        let removed = with_retry(&self.retry, "ack", || {
            self.store.ack(&self.stream, &self.group, &ids)
        })
        .await?;
        Ok(removed > 0)
    }

    /// Keep entries `consumer` is still working on from looking stale.
    /// Not retried; the next heartbeat tries again.
    pub async fn touch(&self, consumer: &str, ids: &[EntryId]) -> Result<u64, StreamError> {
        self.store
            .touch(&self.stream, &self.group, consumer, ids)
            .await
    }

    /// Pending entries idle for at least `min_idle`.
    pub async fn stale_entries(
        &self,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        self.store
            .stale(&self.stream, &self.group, min_idle, count)
            .await
    }

    /// Take over the entries among `ids` that are still idle for at least
    /// `min_idle`. Entries touched by another consumer in the meantime are
    /// left alone.
    pub async fn reclaim(
        &self,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<PendingEntry>, StreamError> {
        self.store
            .claim(&self.stream, &self.group, consumer, min_idle, ids)
            .await
    }

    /// The group's pending entries, oldest first.
    pub async fn pending(&self, count: usize) -> Result<Vec<PendingEntry>, StreamError> {
        self.store.pending(&self.stream, &self.group, count).await
    }
}

#[cfg(test)]
mod tests {
    use courier_core::event::NotificationEvent;

    use super::*;
    use crate::stream::MemoryStreamStore;

    const STREAM: &str = "notifications";
    const GROUP: &str = "notification-group";

    async fn setup() -> (Arc<MemoryStreamStore>, ConsumerGroup) {
        let store = Arc::new(MemoryStreamStore::new());
        let group = ConsumerGroup::new(store.clone(), STREAM, GROUP)
            .with_block(Duration::from_millis(20))
            .with_retry_policy(RetryPolicy::linear(3, Duration::from_millis(1)));
        group.ensure_group().await.unwrap();
        (store, group)
    }

    async fn append(store: &MemoryStreamStore, n: i64) -> EntryId {
        let event = NotificationEvent::new(n, "new_message", format!("m{n}")).unwrap();
        store.append(STREAM, &event).await.unwrap()
    }

    #[tokio::test]
    async fn ensure_group_is_idempotent() {
        let (_store, group) = setup().await;
        group.ensure_group().await.unwrap();
        group.ensure_group().await.unwrap();
    }

    #[tokio::test]
    async fn batch_size_is_clamped() {
        let (store, group) = setup().await;
        for n in 1..=3 {
            append(&store, n).await;
        }
        let first = group.claim_next("c1", 0).await.unwrap();
        assert_eq!(first.len(), 1);
        let rest = group.claim_next("c1", 1_000).await.unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn acknowledge_reports_whether_entry_was_pending() {
        let (store, group) = setup().await;
        let id = append(&store, 1).await;
        group.claim_next("c1", 10).await.unwrap();

        assert!(group.acknowledge(id).await.unwrap());
        assert!(!group.acknowledge(id).await.unwrap());
        assert!(group.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restarted_consumer_drains_backlog_first() {
        let (store, group) = setup().await;
        let a = append(&store, 1).await;
        let b = append(&store, 2).await;
        group.claim_next("c1", 10).await.unwrap();

        // A fresh coordinator stands in for the restarted process.
        let restarted = ConsumerGroup::new(store.clone(), STREAM, GROUP)
            .with_block(Duration::from_millis(20));
        let c = append(&store, 3).await;

        let backlog = restarted.claim_next("c1", 10).await.unwrap();
        let ids: Vec<_> = backlog.iter().map(PendingEntry::id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(backlog.iter().all(|p| p.attempts == 2));

        let fresh = restarted.claim_next("c1", 10).await.unwrap();
        assert_eq!(fresh.iter().map(PendingEntry::id).collect::<Vec<_>>(), vec![c]);
    }
}
