//! Shared domain vocabulary for the courier notification pipeline.
//!
//! Zero internal dependencies: every other crate in the workspace builds on
//! the types, errors and well-known names defined here.

pub mod error;
pub mod event;
pub mod streams;
pub mod types;
