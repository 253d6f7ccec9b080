//! The consumer runtime: claim task, reclaim task and a bounded worker pool.
//!
//! ```text
//!  claim task ──┐
//!               ├──► mpsc (queue_capacity) ──► dispatcher ──► JoinSet of handlers
//!  reclaim task ┘                                              (max_in_flight)
//!
//!  heartbeat task: touches every held entry each `stale_after / 3`
//! ```
//!
//! The claim task is the only caller of the long-poll, so backpressure from
//! the channel naturally pauses claiming when handlers fall behind. Every
//! claimed entry is held in a [`HeldEntries`] set until its handler returns;
//! the heartbeat keeps held entries fresh in the store while they wait in the
//! queue or run, so no other process reclaims them. On shutdown, queued
//! entries that never started are dropped (they stay pending in the store)
//! and in-flight handlers get `shutdown_grace` to finish before they are
//! aborted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::coordinator::ConsumerGroup;
use crate::held::HeldEntries;
use crate::processor::NotificationProcessor;
use crate::reclaim::{ReclaimConfig, ReclaimLoop};
use crate::records::NotificationStore;
use crate::stream::PendingEntry;

/// Default number of entries requested per claim.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default number of handlers running at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Default capacity of the claim-to-dispatcher channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Default time in-flight handlers get to finish on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Pause after a failed claim before polling again.
const CLAIM_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Runtime settings for one consumer process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub consumer_id: String,
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub queue_capacity: usize,
    pub shutdown_grace: Duration,
    pub reclaim: ReclaimConfig,
}

impl ConsumerConfig {
    pub fn new(consumer_id: impl Into<String>) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            reclaim: ReclaimConfig::default(),
        }
    }
}

/// A consumer ready to be started.
pub struct NotificationConsumer {
    group: Arc<ConsumerGroup>,
    processor: Arc<NotificationProcessor>,
    records: Arc<dyn NotificationStore>,
    config: ConsumerConfig,
}

impl NotificationConsumer {
    pub fn new(
        group: Arc<ConsumerGroup>,
        processor: Arc<NotificationProcessor>,
        records: Arc<dyn NotificationStore>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            group,
            processor,
            records,
            config,
        }
    }

    /// Start the claim, reclaim, dispatcher and heartbeat tasks.
    ///
    /// They stop when `cancel` is triggered or when
    /// [`ConsumerHandle::shutdown`] is called. The heartbeat outlives the
    /// others until the dispatcher has drained its handlers.
    pub fn spawn(self, cancel: CancellationToken) -> ConsumerHandle {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));

        tracing::info!(
            consumer = %self.config.consumer_id,
            stream = %self.group.stream(),
            group = %self.group.group(),
            batch_size = self.config.batch_size,
            max_in_flight = self.config.max_in_flight,
            "Notification consumer starting"
        );

        let held = HeldEntries::new();
        let dispatcher_done = CancellationToken::new();

        let reclaim = ReclaimLoop::new(
            Arc::clone(&self.group),
            Arc::clone(&self.records),
            self.config.consumer_id.clone(),
            self.config.reclaim,
            tx.clone(),
        )
        .with_held(held.clone());

        let claim_task = tokio::spawn(claim_loop(
            Arc::clone(&self.group),
            self.config.consumer_id.clone(),
            self.config.batch_size,
            tx,
            held.clone(),
            cancel.clone(),
        ));
        let reclaim_task = tokio::spawn(reclaim.run(cancel.clone()));
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.group),
            self.config.consumer_id.clone(),
            held.clone(),
            self.config.reclaim.heartbeat_interval(),
            dispatcher_done.clone(),
        ));
        let dispatcher_task = tokio::spawn(dispatch_loop(
            self.processor,
            rx,
            held,
            self.config.max_in_flight.max(1),
            self.config.shutdown_grace,
            cancel.clone(),
            dispatcher_done,
        ));

        ConsumerHandle {
            cancel,
            tasks: vec![
                ("claim", claim_task),
                ("reclaim", reclaim_task),
                ("dispatcher", dispatcher_task),
                ("heartbeat", heartbeat_task),
            ],
        }
    }
}

/// Owns the consumer's background tasks.
pub struct ConsumerHandle {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ConsumerHandle {
    /// Whether every task has exited.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|(_, task)| task.is_finished())
    }

    /// Stop claiming, wait for in-flight handlers (up to the grace period)
    /// and join every task.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(task = name, error = %e, "Consumer task ended abnormally");
            }
        }
        tracing::info!("Notification consumer stopped");
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn claim_loop(
    group: Arc<ConsumerGroup>,
    consumer: String,
    batch_size: usize,
    tx: mpsc::Sender<PendingEntry>,
    held: HeldEntries,
    cancel: CancellationToken,
) {
    loop {
        let claimed = tokio::select! {
            _ = cancel.cancelled() => break,
            result = group.claim_next(&consumer, batch_size) => result,
        };

        match claimed {
            Ok(batch) => {
                tracing::debug!(count = batch.len(), "Claimed entries");
                for pending in &batch {
                    held.hold(pending.id());
                }

                let mut queue = batch.into_iter();
                while let Some(pending) = queue.next() {
                    let entry_id = pending.id();
                    let sent = tokio::select! {
                        _ = cancel.cancelled() => false,
                        sent = tx.send(pending) => sent.is_ok(),
                    };
                    if !sent {
                        held.release(entry_id);
                        queue.for_each(|rest| held.release(rest.id()));
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Claim failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(CLAIM_ERROR_BACKOFF) => {}
                }
            }
        }
    }
    tracing::debug!("Claim task stopping");
}

async fn dispatch_loop(
    processor: Arc<NotificationProcessor>,
    mut rx: mpsc::Receiver<PendingEntry>,
    held: HeldEntries,
    max_in_flight: usize,
    grace: Duration,
    cancel: CancellationToken,
    heartbeat_stop: CancellationToken,
) {
    // Stops the heartbeat once every handler has returned or been aborted.
    let _stop_heartbeat = heartbeat_stop.drop_guard();
    let semaphore = Arc::new(Semaphore::new(max_in_flight));
    let mut in_flight = JoinSet::new();

    loop {
        while let Some(done) = in_flight.try_join_next() {
            log_handler_exit(done);
        }

        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let pending = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(pending) => pending,
                None => break,
            },
        };

        let processor = Arc::clone(&processor);
        let release = held.release_on_drop(pending.id());
        in_flight.spawn(async move {
            let _permit = permit;
            let _release = release;
            processor.process(&pending).await;
        });
    }

    // Unstarted entries stay pending in the store.
    rx.close();
    let dropped = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|pending| held.release(pending.id()))
        .count();
    if dropped > 0 {
        tracing::info!(dropped, "Dropped queued entries on shutdown");
    }

    let running = in_flight.len();
    if running > 0 {
        tracing::info!(running, grace_secs = grace.as_secs(), "Waiting for in-flight handlers");
    }
    let drained = tokio::time::timeout(grace, async {
        while let Some(done) = in_flight.join_next().await {
            log_handler_exit(done);
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            remaining = in_flight.len(),
            "Shutdown grace elapsed, aborting handlers"
        );
        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}
    }
    tracing::debug!("Dispatcher stopping");
}

async fn heartbeat_loop(
    group: Arc<ConsumerGroup>,
    consumer: String,
    held: HeldEntries,
    period: Duration,
    stop: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {}
        }

        let ids = held.snapshot();
        if ids.is_empty() {
            continue;
        }
        match group.touch(&consumer, &ids).await {
            Ok(touched) => {
                tracing::trace!(held = ids.len(), touched, "Heartbeat");
            }
            Err(e) => tracing::warn!(error = %e, held = ids.len(), "Heartbeat failed"),
        }
    }
    tracing::debug!("Heartbeat task stopping");
}

fn log_handler_exit(done: Result<(), tokio::task::JoinError>) {
    if let Err(e) = done {
        if e.is_panic() {
            tracing::error!(error = %e, "Handler panicked");
        }
    }
}
