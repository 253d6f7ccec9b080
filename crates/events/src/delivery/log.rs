//! Development dispatch channel that only logs.

use async_trait::async_trait;

use super::{render_body, DispatchChannel, TransportError, NOTIFICATION_SUBJECT};

/// Logs each notification instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDelivery;

#[async_trait]
impl DispatchChannel for LogDelivery {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, address: &str, body: &str) -> Result<(), TransportError> {
        tracing::info!(
            to = address,
            subject = NOTIFICATION_SUBJECT,
            body = %render_body(body),
            "Notification dispatched (log only)"
        );
        Ok(())
    }
}
