//! The notification event carried by the stream (the unit of transport).
//!
//! Events are validated once, at construction, and are immutable afterwards.
//! The stream store assigns the entry id and enqueue time on append; neither
//! is part of the event itself.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

/// Maximum length of a category tag (width of the `category` column).
pub const MAX_CATEGORY_LEN: usize = 50;

/// A request to notify one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Opaque recipient identifier, resolved later by the recipient directory.
    pub recipient_id: DbId,
    /// Short classification tag, e.g. `"new_message"`.
    pub category: String,
    /// Human-readable payload. No length bound is enforced here.
    pub body: String,
}

impl NotificationEvent {
    /// Build a validated event.
    pub fn new(
        recipient_id: DbId,
        category: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let event = Self {
            recipient_id,
            category: category.into(),
            body: body.into(),
        };
        event.validate()?;
        Ok(event)
    }

    /// Check the field invariants without touching any I/O.
    ///
    /// - `recipient_id` must be positive
    /// - `category` must be non-blank and at most [`MAX_CATEGORY_LEN`] characters
    /// - `body` must be non-blank
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.recipient_id <= 0 {
            return Err(CoreError::Validation(format!(
                "recipient_id must be positive, got {}",
                self.recipient_id
            )));
        }
        if self.category.trim().is_empty() {
            return Err(CoreError::Validation("category must not be empty".into()));
        }
        if self.category.chars().count() > MAX_CATEGORY_LEN {
            return Err(CoreError::Validation(format!(
                "category must be at most {MAX_CATEGORY_LEN} characters"
            )));
        }
        if self.body.trim().is_empty() {
            return Err(CoreError::Validation("body must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn accepts_well_formed_event() {
        let event = NotificationEvent::new(1, "new_message", "hi").unwrap();
        assert_eq!(event.recipient_id, 1);
        assert_eq!(event.category, "new_message");
        assert_eq!(event.body, "hi");
    }

    #[test]
    fn rejects_non_positive_recipient() {
        assert_matches!(
            NotificationEvent::new(0, "new_message", "hi"),
            Err(CoreError::Validation(msg)) if msg.contains("recipient_id")
        );
        assert_matches!(
            NotificationEvent::new(-7, "new_message", "hi"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn rejects_blank_category_and_body() {
        assert_matches!(
            NotificationEvent::new(1, "", "hi"),
            Err(CoreError::Validation(msg)) if msg.contains("category")
        );
        assert_matches!(
            NotificationEvent::new(1, "new_message", "   "),
            Err(CoreError::Validation(msg)) if msg.contains("body")
        );
    }

    #[test]
    fn category_length_is_bounded_but_body_is_not() {
        let long_category = "c".repeat(MAX_CATEGORY_LEN + 1);
        assert_matches!(
            NotificationEvent::new(1, long_category, "hi"),
            Err(CoreError::Validation(_))
        );

        let long_body = "b".repeat(100_000);
        assert!(NotificationEvent::new(1, "new_message", long_body).is_ok());
    }

    #[test]
    fn serializes_with_field_names() {
        let event = NotificationEvent::new(3, "new_message", "hello").unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["recipient_id"], 3);
        assert_eq!(json["category"], "new_message");
        assert_eq!(json["body"], "hello");
    }
}
