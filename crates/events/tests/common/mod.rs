#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use courier_events::{
    ConsumerGroup, DispatchChannel, EventProducer, MemoryNotificationStore, MemoryStreamStore,
    NotificationProcessor, RetryPolicy, StaticDirectory, TransportError,
};

pub const STREAM: &str = "notifications";
pub const GROUP: &str = "notification-group";

/// Retry policy that keeps tests fast.
pub const FAST_RETRY: RetryPolicy = RetryPolicy::linear(3, Duration::from_millis(1));

/// Dispatch channel that remembers every send and can be told to fail or
/// stall.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(String, String)>>,
    failures_left: AtomicU32,
    delay: Duration,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` sends.
    pub fn failing(n: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(n),
            ..Self::default()
        }
    }

    /// Sleep for `delay` before every send.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl DispatchChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, address: &str, body: &str) -> Result<(), TransportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(TransportError::new("recording", "relay refused message"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), body.to_string()));
        Ok(())
    }
}

/// Directory knowing recipients 1, 2 and 3.
pub fn directory() -> StaticDirectory {
    StaticDirectory::new()
        .with(1, "a@b.com")
        .with(2, "user2@example.com")
        .with(3, "user3@example.com")
}

/// Everything one consumer process needs, wired over in-memory stores.
pub struct Harness {
    pub store: Arc<MemoryStreamStore>,
    pub group: Arc<ConsumerGroup>,
    pub records: Arc<MemoryNotificationStore>,
    pub channel: Arc<RecordingChannel>,
    pub producer: EventProducer,
    pub processor: Arc<NotificationProcessor>,
}

impl Harness {
    pub async fn new(channel: RecordingChannel, directory: StaticDirectory) -> Self {
        let store = Arc::new(MemoryStreamStore::new());
        let records = Arc::new(MemoryNotificationStore::new());
        Self::with_stores(store, records, channel, directory).await
    }

    /// Build a harness sharing the given stores, as a second process would.
    pub async fn with_stores(
        store: Arc<MemoryStreamStore>,
        records: Arc<MemoryNotificationStore>,
        channel: RecordingChannel,
        directory: StaticDirectory,
    ) -> Self {
        let group = Arc::new(
            ConsumerGroup::new(store.clone(), STREAM, GROUP)
                .with_block(Duration::from_millis(50))
                .with_retry_policy(FAST_RETRY),
        );
        group.ensure_group().await.unwrap();

        let channel = Arc::new(channel);
        let processor = Arc::new(
            NotificationProcessor::new(
                group.clone(),
                Arc::new(directory),
                channel.clone(),
                records.clone(),
            )
            .with_io_timeout(Duration::from_millis(500)),
        );
        let producer = EventProducer::new(store.clone(), STREAM).with_retry_policy(FAST_RETRY);

        Self {
            store,
            group,
            records,
            channel,
            producer,
            processor,
        }
    }
}

/// Poll `check` every 10 ms until it returns true or `within` elapses.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
