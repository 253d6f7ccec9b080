//! Read-only access to the forum's `users` table.

use courier_core::types::DbId;
use sqlx::PgPool;

use crate::models::user::UserContact;

/// Looks up recipients' contact details.
pub struct UserRepo;

impl UserRepo {
    /// Find the contact address for a user, `None` if the user does not exist.
    pub async fn find_contact(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Option<UserContact>, sqlx::Error> {
        sqlx::query_as::<_, UserContact>("SELECT id, email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }
}
