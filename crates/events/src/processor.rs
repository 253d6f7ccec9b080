//! Side-effect processing for one delivered stream entry.
//!
//! Steps, in order:
//!
//! 1. Skip entries that already have a record (crash between persist and
//!    ack); just acknowledge them.
//! 2. Resolve the recipient's address. Unknown recipients are acknowledged
//!    and dropped.
//! 3. Dispatch through the configured channel.
//! 4. Persist the notification record. Failure here is logged, not fatal.
//! 5. Acknowledge.
//!
//! Any failure before step 5 that is worth retrying leaves the entry pending;
//! the reclaim loop redelivers it once it goes stale. A crash between steps
//! 3 and 4 can still repeat a dispatch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use courier_core::types::{DbId, EntryId};
use courier_db::models::notification::NewNotificationRecord;

use crate::coordinator::ConsumerGroup;
use crate::delivery::DispatchChannel;
use crate::directory::RecipientDirectory;
use crate::error::ProcessError;
use crate::records::NotificationStore;
use crate::stream::PendingEntry;

/// Default per-call timeout for directory, dispatch and record calls.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// What happened to an entry that was handled successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Dispatched and acknowledged. `record_id` is `None` if the record
    /// could not be written.
    Delivered { record_id: Option<DbId> },
    /// A record already existed; acknowledged without dispatching again.
    AlreadyRecorded { record_id: DbId },
}

/// Runs the side effects for delivered entries.
pub struct NotificationProcessor {
    group: Arc<ConsumerGroup>,
    directory: Arc<dyn RecipientDirectory>,
    channel: Arc<dyn DispatchChannel>,
    records: Arc<dyn NotificationStore>,
    io_timeout: Duration,
}

impl NotificationProcessor {
    pub fn new(
        group: Arc<ConsumerGroup>,
        directory: Arc<dyn RecipientDirectory>,
        channel: Arc<dyn DispatchChannel>,
        records: Arc<dyn NotificationStore>,
    ) -> Self {
        Self {
            group,
            directory,
            channel,
            records,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Process one entry end to end.
    pub async fn handle(&self, pending: &PendingEntry) -> Result<Outcome, ProcessError> {
        let entry_id = pending.id();
        let event = &pending.entry.event;
        let stream = self.group.stream();

        match self
            .bounded(self.records.find_by_entry(stream, entry_id))
            .await
        {
            Ok(Ok(Some(existing))) => {
                self.ack(entry_id).await?;
                return Ok(Outcome::AlreadyRecorded {
                    record_id: existing.id,
                });
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                tracing::warn!(entry_id, error = %e, "Record lookup failed, processing anyway");
            }
            Err(_) => {
                tracing::warn!(entry_id, "Record lookup timed out, processing anyway");
            }
        }

        let address = match self.bounded(self.directory.lookup(event.recipient_id)).await {
            Ok(Ok(Some(address))) => address,
            Ok(Ok(None)) => {
                self.ack(entry_id).await?;
                return Err(ProcessError::RecipientNotFound(event.recipient_id));
            }
            Ok(Err(e)) => return Err(ProcessError::DirectoryUnavailable(e.to_string())),
            Err(_) => {
                return Err(ProcessError::DirectoryUnavailable(format!(
                    "lookup timed out after {:?}",
                    self.io_timeout
                )))
            }
        };

        match self.bounded(self.channel.send(&address, &event.body)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ProcessError::DispatchFailed(e.to_string())),
            Err(_) => {
                return Err(ProcessError::DispatchFailed(format!(
                    "{} dispatch timed out after {:?}",
                    self.channel.name(),
                    self.io_timeout
                )))
            }
        }

        let record = NewNotificationRecord {
            recipient_id: event.recipient_id,
            category: event.category.clone(),
            body: event.body.clone(),
            stream: stream.to_string(),
            stream_entry_id: entry_id,
        };
        let record_id = match self.bounded(self.records.insert(&record)).await {
            Ok(Ok(id)) => Some(id),
            Ok(Err(e)) => {
                tracing::error!(entry_id, error = %e, "RecordPersistFailed");
                None
            }
            Err(_) => {
                tracing::error!(entry_id, error = "timed out", "RecordPersistFailed");
                None
            }
        };

        self.ack(entry_id).await?;
        Ok(Outcome::Delivered { record_id })
    }

    /// [`handle`](Self::handle) with the outcome logged. Used by the worker
    /// pool, which has nowhere to return errors to.
    pub async fn process(&self, pending: &PendingEntry) {
        let entry_id = pending.id();
        let recipient_id = pending.entry.event.recipient_id;

        match self.handle(pending).await {
            Ok(Outcome::Delivered { record_id }) => {
                tracing::info!(
                    entry_id,
                    recipient_id,
                    ?record_id,
                    attempt = pending.attempts,
                    "Notification delivered"
                );
            }
            Ok(Outcome::AlreadyRecorded { record_id }) => {
                tracing::info!(entry_id, record_id, "Entry already recorded, acknowledged");
            }
            Err(e) if e.is_retriable() => {
                tracing::warn!(
                    entry_id,
                    recipient_id,
                    attempt = pending.attempts,
                    error = %e,
                    "Processing failed, entry left pending"
                );
            }
            Err(e) => {
                tracing::warn!(entry_id, error = %e, "Entry dropped");
            }
        }
    }

    async fn ack(&self, entry_id: EntryId) -> Result<(), ProcessError> {
        let removed = self
            .group
            .acknowledge(entry_id)
            .await
            .map_err(ProcessError::Ack)?;
        if !removed {
            tracing::debug!(entry_id, "Entry was already acknowledged");
        }
        Ok(())
    }

    async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output, tokio::time::error::Elapsed> {
        tokio::time::timeout(self.io_timeout, fut).await
    }
}
