//! Periodic recovery of entries abandoned by crashed or stuck consumers.
//!
//! Every tick, [`ReclaimLoop`] lists pending entries that have been idle for
//! at least `stale_after`, takes them over for the running consumer and
//! feeds them to the worker pool through the same channel as fresh claims.
//! Entries that have exceeded `max_attempts` deliveries are parked in the
//! dead-letter table and acknowledged instead. Entries this process still
//! holds (queued or being handled) are never taken back.

use std::sync::Arc;
use std::time::Duration;

use courier_db::models::dead_letter::NewDeadLetter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::coordinator::ConsumerGroup;
use crate::error::StreamError;
use crate::held::HeldEntries;
use crate::records::NotificationStore;
use crate::stream::PendingEntry;

/// Default time between sweeps.
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(15);

/// Default idle time after which an entry is considered abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Default delivery ceiling before an entry is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default number of stale entries examined per sweep.
pub const DEFAULT_RECLAIM_BATCH: usize = 100;

/// Tuning for the reclaim loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimConfig {
    pub interval: Duration,
    pub stale_after: Duration,
    pub max_attempts: u32,
    pub batch: usize,
}

impl ReclaimConfig {
    /// How often held entries are refreshed. Three heartbeats fit in one
    /// staleness window.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.stale_after / 3).max(Duration::from_millis(10))
    }
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECLAIM_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            batch: DEFAULT_RECLAIM_BATCH,
        }
    }
}

/// Counts from a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries taken over from their previous owner.
    pub reclaimed: usize,
    /// Reclaimed entries handed to the worker pool.
    pub requeued: usize,
    /// Reclaimed entries parked in the dead-letter table.
    pub dead_lettered: usize,
}

/// Background task that redelivers stale pending entries.
pub struct ReclaimLoop {
    group: Arc<ConsumerGroup>,
    records: Arc<dyn NotificationStore>,
    consumer: String,
    config: ReclaimConfig,
    tx: mpsc::Sender<PendingEntry>,
    held: HeldEntries,
}

impl ReclaimLoop {
    pub fn new(
        group: Arc<ConsumerGroup>,
        records: Arc<dyn NotificationStore>,
        consumer: impl Into<String>,
        config: ReclaimConfig,
        tx: mpsc::Sender<PendingEntry>,
    ) -> Self {
        Self {
            group,
            records,
            consumer: consumer.into(),
            config,
            tx,
            held: HeldEntries::new(),
        }
    }

    /// Share the set of entries this process holds, so they are skipped and
    /// requeued entries are tracked.
    pub fn with_held(mut self, held: HeldEntries) -> Self {
        self.held = held;
        self
    }

    /// Run until `cancel` is triggered.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            consumer = %self.consumer,
            interval_secs = self.config.interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            max_attempts = self.config.max_attempts,
            "Reclaim loop started"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.sweep() => match result {
                    Ok(report) if report.reclaimed > 0 => {
                        tracing::info!(
                            reclaimed = report.reclaimed,
                            requeued = report.requeued,
                            dead_lettered = report.dead_lettered,
                            "Reclaim sweep complete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Reclaim sweep failed"),
                },
            }
        }

        tracing::info!("Reclaim loop stopping");
    }

    /// Run one sweep.
    ///
    /// Entries claimed but not handed over (because the worker pool went
    /// away) stay pending under this consumer and are picked up again once
    /// stale.
    pub async fn sweep(&self) -> Result<SweepReport, StreamError> {
        let mut report = SweepReport::default();

        let stale = self
            .group
            .stale_entries(self.config.stale_after, self.config.batch)
            .await?;
        if stale.is_empty() {
            return Ok(report);
        }

        let ids: Vec<_> = stale
            .iter()
            .map(PendingEntry::id)
            .filter(|&id| !self.held.contains(id))
            .collect();
        if ids.is_empty() {
            return Ok(report);
        }
        let claimed = self
            .group
            .reclaim(&self.consumer, self.config.stale_after, &ids)
            .await?;
        report.reclaimed = claimed.len();

        for pending in claimed {
            if pending.attempts > self.config.max_attempts {
                if self.dead_letter(&pending).await {
                    report.dead_lettered += 1;
                }
                continue;
            }

            tracing::debug!(
                entry_id = pending.id(),
                attempt = pending.attempts,
                "Requeueing stale entry"
            );
            let entry_id = pending.id();
            self.held.hold(entry_id);
            if self.tx.send(pending).await.is_err() {
                self.held.release(entry_id);
                tracing::warn!("Worker queue closed, remaining reclaimed entries left pending");
                break;
            }
            report.requeued += 1;
        }

        Ok(report)
    }

    /// Park an entry and acknowledge it. Returns `false` if either step
    /// failed; the entry then stays pending for a later sweep.
    async fn dead_letter(&self, pending: &PendingEntry) -> bool {
        let entry_id = pending.id();
        let event = &pending.entry.event;
        let letter = NewDeadLetter {
            stream: self.group.stream().to_string(),
            group_name: self.group.group().to_string(),
            entry_id,
            recipient_id: event.recipient_id,
            category: event.category.clone(),
            body: event.body.clone(),
            attempts: i32::try_from(pending.attempts).unwrap_or(i32::MAX),
            reason: format!(
                "exceeded {} delivery attempts",
                self.config.max_attempts
            ),
        };

        if let Err(e) = self.records.dead_letter(&letter).await {
            tracing::error!(entry_id, error = %e, "Dead-letter write failed, entry left pending");
            return false;
        }
        if let Err(e) = self.group.acknowledge(entry_id).await {
            tracing::error!(entry_id, error = %e, "Dead-lettered entry could not be acknowledged");
            return false;
        }

        tracing::warn!(
            entry_id,
            recipient_id = event.recipient_id,
            attempts = pending.attempts,
            "Entry dead-lettered"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use courier_core::event::NotificationEvent;

    use super::*;
    use crate::records::MemoryNotificationStore;
    use crate::retry::RetryPolicy;
    use crate::stream::{MemoryStreamStore, StreamStore};

    const STREAM: &str = "notifications";
    const GROUP: &str = "notification-group";
    const STALE: Duration = Duration::from_secs(60);

    struct Fixture {
        store: Arc<MemoryStreamStore>,
        group: Arc<ConsumerGroup>,
        records: Arc<MemoryNotificationStore>,
        reclaim: ReclaimLoop,
        held: HeldEntries,
        rx: mpsc::Receiver<PendingEntry>,
    }

    async fn fixture(max_attempts: u32) -> Fixture {
        let store = Arc::new(MemoryStreamStore::new());
        let group = Arc::new(
            ConsumerGroup::new(store.clone(), STREAM, GROUP)
                .with_block(Duration::from_millis(20))
                .with_retry_policy(RetryPolicy::linear(2, Duration::from_millis(1))),
        );
        group.ensure_group().await.unwrap();
        let records = Arc::new(MemoryNotificationStore::new());
        let (tx, rx) = mpsc::channel(16);
        let config = ReclaimConfig {
            stale_after: STALE,
            max_attempts,
            ..Default::default()
        };
        let held = HeldEntries::new();
        let reclaim = ReclaimLoop::new(group.clone(), records.clone(), "rescuer", config, tx)
            .with_held(held.clone());
        Fixture {
            store,
            group,
            records,
            reclaim,
            held,
            rx,
        }
    }

    async fn deliver_to(f: &Fixture, consumer: &str) -> PendingEntry {
        let event = NotificationEvent::new(1, "new_message", "hi").unwrap();
        f.store.append(STREAM, &event).await.unwrap();
        f.group.claim_next(consumer, 1).await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn fresh_entries_are_left_alone() {
        let mut f = fixture(5).await;
        deliver_to(&f, "crashed").await;

        let report = f.reclaim.sweep().await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_entries_are_requeued_with_next_attempt() {
        let mut f = fixture(5).await;
        let original = deliver_to(&f, "crashed").await;
        f.store.age_pending(STREAM, GROUP, STALE * 2).await;

        let report = f.reclaim.sweep().await.unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.requeued, 1);

        let requeued = f.rx.try_recv().unwrap();
        assert_eq!(requeued.id(), original.id());
        assert_eq!(requeued.consumer, "rescuer");
        assert_eq!(requeued.attempts, 2);
        assert!(f.held.contains(original.id()));
    }

    #[tokio::test]
    async fn held_entries_are_never_reclaimed() {
        let mut f = fixture(5).await;
        let queued = deliver_to(&f, "rescuer").await;
        f.held.hold(queued.id());
        f.store.age_pending(STREAM, GROUP, STALE * 2).await;

        let report = f.reclaim.sweep().await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(f.rx.try_recv().is_err());
        assert_eq!(f.group.pending(10).await.unwrap()[0].attempts, 1);

        // Once its handler lets go, the entry is fair game again.
        f.held.release(queued.id());
        let report = f.reclaim.sweep().await.unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(f.rx.try_recv().unwrap().attempts, 2);
    }

    #[test]
    fn heartbeat_fits_three_times_in_stale_window() {
        let config = ReclaimConfig {
            stale_after: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(20));

        let tiny = ReclaimConfig {
            stale_after: Duration::from_millis(3),
            ..Default::default()
        };
        assert_eq!(tiny.heartbeat_interval(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn entries_over_the_ceiling_are_dead_lettered() {
        let mut f = fixture(1).await;
        let original = deliver_to(&f, "crashed").await;
        f.store.age_pending(STREAM, GROUP, STALE * 2).await;

        let report = f.reclaim.sweep().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert!(f.rx.try_recv().is_err());

        let letters = f.records.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].entry_id, original.id());
        assert_eq!(letters[0].attempts, 2);
        assert!(f.group.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_dead_letter_write_keeps_entry_pending() {
        let f = fixture(1).await;
        deliver_to(&f, "crashed").await;
        f.store.age_pending(STREAM, GROUP, STALE * 2).await;
        f.records.set_failing(true);

        let report = f.reclaim.sweep().await.unwrap();
        assert_eq!(report.dead_lettered, 0);
        assert_eq!(f.group.pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let f = fixture(5).await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(f.reclaim.run(cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
