//! Publishing side of the notification stream.

use std::sync::Arc;

use courier_core::event::NotificationEvent;
use courier_core::types::{DbId, EntryId};

use crate::error::{PublishError, StreamError};
use crate::retry::{with_retry, RetryPolicy};
use crate::stream::StreamStore;

/// Appends validated notification events to one well-known stream.
///
/// Cheap to clone; the store is shared.
#[derive(Clone)]
pub struct EventProducer {
    store: Arc<dyn StreamStore>,
    stream: String,
    retry: RetryPolicy,
}

impl EventProducer {
    pub fn new(store: Arc<dyn StreamStore>, stream: impl Into<String>) -> Self {
        Self {
            store,
            stream: stream.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// The underlying store, for health probes.
    pub fn store(&self) -> &Arc<dyn StreamStore> {
        &self.store
    }

    /// Validate and durably append a notification request.
    ///
    /// Returns once the store has committed the entry. Validation happens
    /// before any I/O; connectivity failures are retried per the producer's
    /// [`RetryPolicy`].
    pub async fn publish(
        &self,
        recipient_id: DbId,
        category: &str,
        body: &str,
    ) -> Result<EntryId, PublishError> {
        let event = NotificationEvent::new(recipient_id, category, body)?;

        let id = with_retry(&self.retry, "append", || self.store.append(&self.stream, &event))
            .await
            .map_err(|e| match e {
                StreamError::Unavailable(last_error) => PublishError::StoreUnavailable {
                    attempts: self.retry.max_attempts.max(1),
                    last_error,
                },
                other => PublishError::Stream(other),
            })?;

        tracing::debug!(
            stream = %self.stream,
            entry_id = id,
            recipient_id,
            category,
            "Notification published"
        );
        Ok(id)
    }
}
