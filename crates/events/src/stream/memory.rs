//! In-process [`StreamStore`] for tests and local runs.
//!
//! Behaves like the PostgreSQL backend: ids are assigned from one counter,
//! groups start at the tail, and every mutation happens under a single lock
//! so ownership transfers are atomic. Two fault hooks simulate an
//! unreachable store: [`MemoryStreamStore::set_offline`] and
//! [`MemoryStreamStore::fail_next`].

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use courier_core::event::NotificationEvent;
use courier_core::types::{EntryId, Timestamp};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{PendingEntry, StreamEntry, StreamStore};
use crate::error::StreamError;

#[derive(Debug)]
struct PendingState {
    consumer: String,
    delivered_at: Timestamp,
    attempts: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingState>,
}

#[derive(Debug, Default)]
struct StreamLog {
    entries: BTreeMap<EntryId, StreamEntry>,
    groups: HashMap<String, GroupState>,
}

impl StreamLog {
    fn tail(&self) -> EntryId {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }

    fn pending_entry(&self, id: EntryId, state: &PendingState) -> Option<PendingEntry> {
        let entry = self.entries.get(&id)?;
        Some(PendingEntry {
            entry: entry.clone(),
            consumer: state.consumer.clone(),
            delivered_at: state.delivered_at,
            attempts: state.attempts,
        })
    }
}

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<String, StreamLog>,
    last_id: EntryId,
    offline: bool,
    fail_next: u32,
}

impl Inner {
    fn check_reachable(&mut self) -> Result<(), StreamError> {
        if self.offline {
            return Err(StreamError::Unavailable("store offline".into()));
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(StreamError::Unavailable("injected connection failure".into()));
        }
        Ok(())
    }
}

/// In-memory stream store.
#[derive(Debug, Default)]
pub struct MemoryStreamStore {
    inner: Mutex<Inner>,
    appended: Notify,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StreamError::Unavailable`] until
    /// switched back.
    pub async fn set_offline(&self, offline: bool) {
        self.inner.lock().await.offline = offline;
    }

    /// Fail the next `n` operations with [`StreamError::Unavailable`].
    pub async fn fail_next(&self, n: u32) {
        self.inner.lock().await.fail_next = n;
    }

    /// Number of entries ever appended to `stream`.
    pub async fn len(&self, stream: &str) -> usize {
        self.inner
            .lock()
            .await
            .streams
            .get(stream)
            .map_or(0, |log| log.entries.len())
    }

    /// Shift the delivery time of every pending entry in the group back by
    /// `by`, as if the consumers had been idle that long.
    pub async fn age_pending(&self, stream: &str, group: &str, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner
            .streams
            .get_mut(stream)
            .and_then(|log| log.groups.get_mut(group))
        {
            for pending in state.pending.values_mut() {
                pending.delivered_at -= by;
            }
        }
    }

    async fn deliver_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let mut inner = self.inner.lock().await;
        inner.check_reachable()?;

        let no_group = || StreamError::NoSuchGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };
        let log = inner.streams.get_mut(stream).ok_or_else(no_group)?;
        let state = log.groups.get_mut(group).ok_or_else(no_group)?;

        let now = Utc::now();
        let mut delivered = Vec::new();
        for (&id, entry) in log
            .entries
            .range(state.last_delivered + 1..)
            .take(count)
        {
            state.pending.insert(
                id,
                PendingState {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    attempts: 1,
                },
            );
            state.last_delivered = id;
            delivered.push(PendingEntry {
                entry: entry.clone(),
                consumer: consumer.to_string(),
                delivered_at: now,
                attempts: 1,
            });
        }
        Ok(delivered)
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn ping(&self) -> Result<(), StreamError> {
        self.inner.lock().await.check_reachable()
    }

    async fn append(&self, stream: &str, event: &NotificationEvent) -> Result<EntryId, StreamError> {
        let id = {
            let mut inner = self.inner.lock().await;
            inner.check_reachable()?;
            inner.last_id += 1;
            let id = inner.last_id;
            inner.streams.entry(stream.to_string()).or_default().entries.insert(
                id,
                StreamEntry {
                    id,
                    event: event.clone(),
                    enqueued_at: Utc::now(),
                },
            );
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<bool, StreamError> {
        let mut inner = self.inner.lock().await;
        inner.check_reachable()?;
        let log = inner.streams.entry(stream.to_string()).or_default();
        if log.groups.contains_key(group) {
            return Ok(false);
        }
        let tail = log.tail();
        log.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered: tail,
                pending: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn read_owned(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        after: EntryId,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let mut inner = self.inner.lock().await;
        inner.check_reachable()?;
        let Some(log) = inner.streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let Some(state) = log.groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let mut redelivered = Vec::new();
        for (&id, pending) in state.pending.range_mut(after + 1..) {
            if redelivered.len() == count {
                break;
            }
            if pending.consumer != consumer {
                continue;
            }
            pending.attempts += 1;
            pending.delivered_at = now;
            if let Some(entry) = log.entries.get(&id) {
                redelivered.push(PendingEntry {
                    entry: entry.clone(),
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    attempts: pending.attempts,
                });
            }
        }
        Ok(redelivered)
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
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let delivered = self.deliver_new(stream, group, consumer, count).await?;
            if !delivered.is_empty() {
                return Ok(delivered);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, StreamError> {
        let mut inner = self.inner.lock().await;
        inner.check_reachable()?;
        let Some(state) = inner
            .streams
            .get_mut(stream)
            .and_then(|log| log.groups.get_mut(group))
        else {
            return Ok(0);
        };
        let removed = ids
            .iter()
            .filter(|&&id| state.pending.remove(&id).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn touch(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        ids: &[EntryId],
    ) -> Result<u64, StreamError> {
        let mut inner = self.inner.lock().await;
        inner.check_reachable()?;
        let Some(state) = inner
            .streams
            .get_mut(stream)
            .and_then(|log| log.groups.get_mut(group))
        else {
            return Ok(0);
        };

        let now = Utc::now();
        let mut touched = 0;
        for id in ids {
            if let Some(pending) = state.pending.get_mut(id) {
                if pending.consumer == consumer {
                    pending.delivered_at = now;
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    async fn stale(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let mut inner = self.inner.lock().await;
        inner.check_reachable()?;
        let Some(log) = inner.streams.get(stream) else {
            return Ok(Vec::new());
        };
        let Some(state) = log.groups.get(group) else {
            return Ok(Vec::new());
        };
        Ok(state
            .pending
            .iter()
            .filter_map(|(&id, p)| log.pending_entry(id, p))
            .filter(|p| p.idle() >= min_idle)
            .take(count)
            .collect())
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let mut inner = self.inner.lock().await;
        inner.check_reachable()?;
        let Some(log) = inner.streams.get(stream) else {
            return Ok(Vec::new());
        };
        let Some(state) = log.groups.get(group) else {
            return Ok(Vec::new());
        };
        Ok(state
            .pending
            .iter()
            .filter_map(|(&id, p)| log.pending_entry(id, p))
            .take(count)
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<PendingEntry>, StreamError> {
        let mut inner = self.inner.lock().await;
        inner.check_reachable()?;
        let Some(log) = inner.streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let Some(state) = log.groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let mut claimed = Vec::new();
        for (&id, pending) in state.pending.iter_mut() {
            if !ids.contains(&id) {
                continue;
            }
            let idle = (now - pending.delivered_at).to_std().unwrap_or_default();
            if idle < min_idle {
                continue;
            }
            pending.consumer = consumer.to_string();
            pending.delivered_at = now;
            pending.attempts += 1;
            if let Some(entry) = log.entries.get(&id) {
                claimed.push(PendingEntry {
                    entry: entry.clone(),
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    attempts: pending.attempts,
                });
            }
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const STREAM: &str = "notifications";
    const GROUP: &str = "workers";

    fn event(n: i64) -> NotificationEvent {
        NotificationEvent::new(n, "new_message", format!("message {n}")).unwrap()
    }

    #[tokio::test]
    async fn group_starts_at_tail() {
        let store = MemoryStreamStore::new();
        store.append(STREAM, &event(1)).await.unwrap();
        assert!(store.create_group(STREAM, GROUP).await.unwrap());
        assert!(!store.create_group(STREAM, GROUP).await.unwrap());

        let early = store
            .read_new(STREAM, GROUP, "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(early.is_empty());

        let id = store.append(STREAM, &event(2)).await.unwrap();
        let delivered = store
            .read_new(STREAM, GROUP, "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].id(), id);
        assert_eq!(delivered[0].attempts, 1);
    }

    #[tokio::test]
    async fn read_without_group_fails() {
        let store = MemoryStreamStore::new();
        assert_matches!(
            store.read_new(STREAM, GROUP, "c1", 1, Duration::ZERO).await,
            Err(StreamError::NoSuchGroup { .. })
        );
    }

    #[tokio::test]
    async fn blocked_read_wakes_on_append() {
        let store = std::sync::Arc::new(MemoryStreamStore::new());
        store.create_group(STREAM, GROUP).await.unwrap();

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .read_new(STREAM, GROUP, "c1", 10, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.append(STREAM, &event(1)).await.unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivered.len(), 1);
    }

    #[tokio::test]
    async fn claim_rechecks_idleness() {
        let store = MemoryStreamStore::new();
        store.create_group(STREAM, GROUP).await.unwrap();
        let id = store.append(STREAM, &event(1)).await.unwrap();
        store
            .read_new(STREAM, GROUP, "c1", 10, Duration::ZERO)
            .await
            .unwrap();

        let fresh = store
            .claim(STREAM, GROUP, "c2", Duration::from_secs(60), &[id])
            .await
            .unwrap();
        assert!(fresh.is_empty());

        store.age_pending(STREAM, GROUP, Duration::from_secs(120)).await;
        let won = store
            .claim(STREAM, GROUP, "c2", Duration::from_secs(60), &[id])
            .await
            .unwrap();
        assert_eq!(won.len(), 1);
        assert_eq!(won[0].consumer, "c2");
        assert_eq!(won[0].attempts, 2);

        // The claim refreshed the delivery time, so a second claimer loses.
        let lost = store
            .claim(STREAM, GROUP, "c3", Duration::from_secs(60), &[id])
            .await
            .unwrap();
        assert!(lost.is_empty());
    }

    #[tokio::test]
    async fn touch_refreshes_only_the_owners_entries() {
        let store = MemoryStreamStore::new();
        store.create_group(STREAM, GROUP).await.unwrap();
        let id = store.append(STREAM, &event(1)).await.unwrap();
        store
            .read_new(STREAM, GROUP, "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        store.age_pending(STREAM, GROUP, Duration::from_secs(120)).await;

        assert_eq!(store.touch(STREAM, GROUP, "c2", &[id]).await.unwrap(), 0);
        let stale = store
            .stale(STREAM, GROUP, Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);

        assert_eq!(store.touch(STREAM, GROUP, "c1", &[id, 999]).await.unwrap(), 1);
        let stale = store
            .stale(STREAM, GROUP, Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(stale.is_empty());

        let pending = store.pending(STREAM, GROUP, 10).await.unwrap();
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].consumer, "c1");
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let store = MemoryStreamStore::new();
        store.fail_next(1).await;
        assert_matches!(store.ping().await, Err(StreamError::Unavailable(_)));
        assert!(store.ping().await.is_ok());

        store.set_offline(true).await;
        assert_matches!(
            store.append(STREAM, &event(1)).await,
            Err(StreamError::Unavailable(_))
        );
        store.set_offline(false).await;
        assert_eq!(store.len(STREAM).await, 0);
    }
}
