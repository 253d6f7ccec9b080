//! Dispatch channels that carry a notification to its recipient.
//!
//! - [`EmailDelivery`](email::EmailDelivery) sends mail over SMTP.
//! - [`LogDelivery`](log::LogDelivery) only writes a log line, for
//!   environments without an SMTP relay.

use async_trait::async_trait;

pub mod email;
pub mod log;

/// Subject line of every notification message.
pub const NOTIFICATION_SUBJECT: &str = "New Notification";

/// Render the text a recipient sees for a notification body.
pub fn render_body(body: &str) -> String {
    format!("Hello, you have a new notification: {body}")
}

/// A dispatch attempt failed.
#[derive(Debug, thiserror::Error)]
#[error("{channel} delivery failed: {message}")]
pub struct TransportError {
    pub channel: &'static str,
    pub message: String,
}

impl TransportError {
    pub fn new(channel: &'static str, message: impl Into<String>) -> Self {
        Self {
            channel,
            message: message.into(),
        }
    }
}

/// An external side-effect channel (SMTP, push, ...).
#[async_trait]
pub trait DispatchChannel: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Deliver `body` to `address`.
    async fn send(&self, address: &str, body: &str) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_uses_greeting_format() {
        assert_eq!(
            render_body("alice sent you a message"),
            "Hello, you have a new notification: alice sent you a message"
        );
    }

    #[test]
    fn transport_error_names_channel() {
        let err = TransportError::new("email", "connection refused");
        assert_eq!(err.to_string(), "email delivery failed: connection refused");
    }
}
