//! The slice of the forum's `users` table the notification service reads.

use courier_core::types::DbId;
use sqlx::FromRow;

/// Contact details for a recipient.
#[derive(Debug, Clone, FromRow)]
pub struct UserContact {
    pub id: DbId,
    pub email: String,
}
