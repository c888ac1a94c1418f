//! # Loggers Module
//!
//! Structured logging for the server binaries.

/// Subscriber installation and log retention.
pub mod tracing_setup;

pub use tracing_setup::{cleanup_old_logs, setup_logging, LoggerError};
