//! Core infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`error`] - Error types
//! - [`outbox`] - Ordered single-drainer hand-off queue

pub mod config;
pub mod error;
pub mod outbox;
