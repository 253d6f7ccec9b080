//! Error types for the stream, the producer and the processor.

use courier_core::error::CoreError;
use courier_core::types::{DbId, EntryId};

// ---------------------------------------------------------------------------
// StreamError
// ---------------------------------------------------------------------------

/// Failure reported by a [`StreamStore`](crate::stream::StreamStore).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The store could not be reached (connection refused, pool exhausted,
    /// network I/O). Worth retrying.
    #[error("Stream store unavailable: {0}")]
    Unavailable(String),

    /// The consumer group has not been created on the stream.
    #[error("Consumer group '{group}' does not exist on stream '{stream}'")]
    NoSuchGroup { stream: String, group: String },

    /// A stored entry could not be turned back into an event.
    #[error("Stream entry {id} is malformed: {reason}")]
    Malformed { id: EntryId, reason: String },

    /// Any other store-side failure. Not retried.
    #[error("Stream store error: {0}")]
    Store(String),
}

impl StreamError {
    /// Whether the failure is a connectivity problem that a retry can fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, StreamError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StreamError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StreamError::Unavailable(err.to_string()),
            other => StreamError::Store(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// PublishError
// ---------------------------------------------------------------------------

/// Failure returned by [`EventProducer::publish`](crate::producer::EventProducer::publish).
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The event violated its invariants; nothing was sent to the store.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Every append attempt failed with a connectivity error.
    #[error("Stream store unavailable after {attempts} attempts: {last_error}")]
    StoreUnavailable { attempts: u32, last_error: String },

    /// The store rejected the append for a non-connectivity reason.
    #[error(transparent)]
    Stream(StreamError),
}

impl From<CoreError> for PublishError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => PublishError::InvalidEvent(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessError
// ---------------------------------------------------------------------------

/// Failure of a single [`NotificationProcessor::handle`](crate::processor::NotificationProcessor::handle) call.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The directory has no such recipient. The entry was acknowledged.
    #[error("Recipient {0} not found")]
    RecipientNotFound(DbId),

    /// The directory could not be queried. The entry stays pending.
    #[error("Recipient directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// The dispatch channel failed or timed out. The entry stays pending.
    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    /// Processing finished but the acknowledgement did not reach the store.
    /// The entry will be redelivered.
    #[error("Acknowledgement failed: {0}")]
    Ack(#[source] StreamError),
}

impl ProcessError {
    /// Whether the entry was left pending so the reclaim loop redelivers it.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ProcessError::RecipientNotFound(_))
    }
}
