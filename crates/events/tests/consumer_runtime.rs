//! The spawned consumer runtime: claim, reclaim, worker pool, shutdown.

mod common;

use std::time::Duration;

use courier_events::{ConsumerConfig, NotificationConsumer, ReclaimConfig};
use tokio_util::sync::CancellationToken;

use common::{directory, eventually, Harness, RecordingChannel};

fn config(stale_after: Duration, shutdown_grace: Duration) -> ConsumerConfig {
    ConsumerConfig {
        batch_size: 5,
        max_in_flight: 2,
        queue_capacity: 4,
        shutdown_grace,
        reclaim: ReclaimConfig {
            interval: Duration::from_millis(50),
            stale_after,
            ..Default::default()
        },
        ..ConsumerConfig::new("c1")
    }
}

fn consumer(h: &Harness, config: ConsumerConfig) -> NotificationConsumer {
    NotificationConsumer::new(
        h.group.clone(),
        h.processor.clone(),
        h.records.clone(),
        config,
    )
}

#[tokio::test]
async fn processes_published_notifications() {
    let h = Harness::new(RecordingChannel::new(), directory()).await;
    let handle = consumer(&h, config(Duration::from_secs(30), Duration::from_secs(1)))
        .spawn(CancellationToken::new());

    for n in 0..6 {
        h.producer
            .publish(n % 3 + 1, "new_message", &format!("m{n}"))
            .await
            .unwrap();
    }

    assert!(eventually(Duration::from_secs(5), || async { h.records.records().len() == 6 }).await);
    assert!(h.group.pending(10).await.unwrap().is_empty());
    assert_eq!(h.channel.sent_count(), 6);

    handle.shutdown().await;
}

#[tokio::test]
async fn failed_dispatch_is_retried_by_reclaim() {
    let h = Harness::new(RecordingChannel::failing(1), directory()).await;
    let handle = consumer(
        &h,
        config(Duration::from_millis(200), Duration::from_secs(1)),
    )
    .spawn(CancellationToken::new());

    h.producer.publish(1, "new_message", "hi").await.unwrap();

    assert!(eventually(Duration::from_secs(5), || async { h.records.records().len() == 1 }).await);
    assert_eq!(h.channel.sent_count(), 1);
    assert!(h.group.pending(10).await.unwrap().is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_lets_in_flight_handlers_finish() {
    let h = Harness::new(
        RecordingChannel::slow(Duration::from_millis(300)),
        directory(),
    )
    .await;
    let handle = consumer(&h, config(Duration::from_secs(30), Duration::from_secs(5)))
        .spawn(CancellationToken::new());

    h.producer.publish(1, "new_message", "hi").await.unwrap();
    assert!(
        eventually(Duration::from_secs(2), || async {
            h.group.pending(10).await.unwrap().len() == 1
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.shutdown().await;

    assert_eq!(h.records.records().len(), 1);
    assert!(h.group.pending(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_aborts_handlers_after_grace() {
    let h = Harness::new(RecordingChannel::slow(Duration::from_secs(30)), directory()).await;
    let handle = consumer(
        &h,
        config(Duration::from_secs(30), Duration::from_millis(100)),
    )
    .spawn(CancellationToken::new());

    h.producer.publish(1, "new_message", "hi").await.unwrap();
    assert!(
        eventually(Duration::from_secs(2), || async {
            h.group.pending(10).await.unwrap().len() == 1
        })
        .await
    );

    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("shutdown should not wait for the stalled handler");

    // Not acknowledged: still pending for a later reclaim.
    assert_eq!(h.group.pending(10).await.unwrap().len(), 1);
    assert!(h.records.records().is_empty());
}

#[tokio::test]
async fn external_cancel_stops_every_task() {
    let h = Harness::new(RecordingChannel::new(), directory()).await;
    let cancel = CancellationToken::new();
    let handle = consumer(&h, config(Duration::from_secs(30), Duration::from_secs(1)))
        .spawn(cancel.clone());

    cancel.cancel();
    assert!(eventually(Duration::from_secs(2), || async { handle.is_finished() }).await);
    handle.shutdown().await;
}

#[tokio::test]
async fn queued_entries_are_handled_exactly_once() {
    let h = Harness::new(
        RecordingChannel::slow(Duration::from_millis(150)),
        directory(),
    )
    .await;
    // The backlog takes several stale windows to work through two at a time.
    let config = ConsumerConfig {
        batch_size: 10,
        max_in_flight: 2,
        queue_capacity: 16,
        shutdown_grace: Duration::from_secs(1),
        reclaim: ReclaimConfig {
            interval: Duration::from_millis(25),
            stale_after: Duration::from_millis(300),
            max_attempts: 1,
            ..Default::default()
        },
        ..ConsumerConfig::new("c1")
    };
    let handle = consumer(&h, config).spawn(CancellationToken::new());

    for n in 0..12 {
        h.producer
            .publish(n % 3 + 1, "new_message", &format!("m{n}"))
            .await
            .unwrap();
    }

    assert!(eventually(Duration::from_secs(5), || async { h.records.records().len() == 12 }).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let sent = h.channel.sent();
    assert_eq!(sent.len(), 12);
    let bodies: std::collections::HashSet<_> = sent.iter().map(|(_, body)| body.clone()).collect();
    assert_eq!(bodies.len(), 12);
    assert!(h.records.dead_letters().is_empty());
    assert!(h.group.pending(20).await.unwrap().is_empty());

    handle.shutdown().await;
}
