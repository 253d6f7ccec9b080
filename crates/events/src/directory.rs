//! Recipient directory: resolves a recipient id to a delivery address.

use std::collections::HashMap;

use async_trait::async_trait;
use courier_core::types::DbId;
use courier_db::repositories::UserRepo;
use courier_db::DbPool;

/// The directory could not answer the lookup.
#[derive(Debug, thiserror::Error)]
#[error("Recipient directory error: {0}")]
pub struct DirectoryError(pub String);

impl From<sqlx::Error> for DirectoryError {
    fn from(err: sqlx::Error) -> Self {
        DirectoryError(err.to_string())
    }
}

/// Looks up where a recipient's notifications go.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Return the address for `recipient_id`, or `None` if no such recipient
    /// exists.
    async fn lookup(&self, recipient_id: DbId) -> Result<Option<String>, DirectoryError>;
}

/// Directory backed by the forum's `users` table.
#[derive(Clone)]
pub struct PgRecipientDirectory {
    pool: DbPool,
}

impl PgRecipientDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    async fn lookup(&self, recipient_id: DbId) -> Result<Option<String>, DirectoryError> {
        let contact = UserRepo::find_contact(&self.pool, recipient_id).await?;
        Ok(contact.map(|c| c.email))
    }
}

/// Fixed in-memory directory.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    addresses: HashMap<DbId, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, recipient_id: DbId, address: impl Into<String>) -> Self {
        self.addresses.insert(recipient_id, address.into());
        self
    }
}

#[async_trait]
impl RecipientDirectory for StaticDirectory {
    async fn lookup(&self, recipient_id: DbId) -> Result<Option<String>, DirectoryError> {
        Ok(self.addresses.get(&recipient_id).cloned())
    }
}
