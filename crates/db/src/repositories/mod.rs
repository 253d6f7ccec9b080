//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` as the first argument.

pub mod dead_letter_repo;
pub mod notification_repo;
pub mod stream_repo;
pub mod user_repo;

pub use dead_letter_repo::DeadLetterRepo;
pub use notification_repo::NotificationRepo;
pub use stream_repo::StreamRepo;
pub use user_repo::UserRepo;
