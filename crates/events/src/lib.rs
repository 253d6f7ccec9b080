//! Courier notification pipeline.
//!
//! This crate provides the durable, at-least-once notification flow:
//!
//! - [`StreamStore`]: append-only log with consumer groups, backed by
//!   PostgreSQL ([`PgStreamStore`]) or memory ([`MemoryStreamStore`]).
//! - [`EventProducer`]: validates and appends notification requests.
//! - [`ConsumerGroup`]: claim, acknowledge and reclaim on one group.
//! - [`NotificationProcessor`]: lookup, dispatch, record, acknowledge.
//! - [`ReclaimLoop`]: redelivers entries abandoned by dead consumers.
//! - [`NotificationConsumer`]: the task runtime tying it all together.
//! - [`delivery`]: dispatch channels (SMTP email, log-only).

pub mod consumer;
pub mod coordinator;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod held;
pub mod processor;
pub mod producer;
pub mod reclaim;
pub mod records;
pub mod retry;
pub mod stream;

pub use consumer::{ConsumerConfig, ConsumerHandle, NotificationConsumer};
pub use coordinator::ConsumerGroup;
pub use delivery::email::{EmailConfig, EmailDelivery};
pub use delivery::log::LogDelivery;
pub use delivery::{DispatchChannel, TransportError};
pub use directory::{PgRecipientDirectory, RecipientDirectory, StaticDirectory};
pub use error::{ProcessError, PublishError, StreamError};
pub use held::HeldEntries;
pub use processor::{NotificationProcessor, Outcome};
pub use producer::EventProducer;
pub use reclaim::{ReclaimConfig, ReclaimLoop};
pub use records::{MemoryNotificationStore, NotificationStore, PgNotificationStore};
pub use retry::RetryPolicy;
pub use stream::{MemoryStreamStore, PendingEntry, PgStreamStore, StreamEntry, StreamStore};
