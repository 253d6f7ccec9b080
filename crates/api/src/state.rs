use std::sync::Arc;

use courier_events::{EventProducer, NotificationStore};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Appends notification requests to the stream.
    pub producer: Arc<EventProducer>,
    /// Processed notification records.
    pub records: Arc<dyn NotificationStore>,
}
