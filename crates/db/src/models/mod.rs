//! Row models and insert DTOs.
//!
//! Each submodule contains a `FromRow` entity struct matching the database
//! row and, where the table is written to, a plain DTO for inserts.

pub mod dead_letter;
pub mod notification;
pub mod stream;
pub mod user;
