//! Notification worker: claims entries from the stream, dispatches them and
//! records the outcome. The binary in `main.rs` wires the pieces together;
//! this library only exposes the configuration layer.

pub mod config;
