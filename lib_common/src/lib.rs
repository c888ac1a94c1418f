//! # lib_common
//!
//! Ingestion core for the actor position tracking services. Readings posted by
//! simulated actors pass an admission gate and a range check, then are written
//! to a durable queue and relayed live to map clients under one deadline. A
//! background drain loop moves queued readings into long-term storage.
//!
//! Optional folders are gated behind cargo features (`connections`, `api`,
//! `loggers`, or `full` for everything) so that lightweight consumers only pay
//! for the core.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Domain records: readings, live position updates and long-term rows.
pub mod models;
/// The ingestion engine: admission, validation, dispatch, draining and relay.
pub mod core;

/// Storage backends (PostgreSQL, in-memory) and the WebSocket broadcaster.
#[cfg(feature = "connections")]
pub mod connections;

/// HTTP and WebSocket routers exposed by the servers.
#[cfg(feature = "api")]
pub mod api;

/// Tracing subscriber setup with console and rolling file output.
#[cfg(feature = "loggers")]
pub mod loggers;

// Re-export the most used types.
pub use models::{PositionUpdate, Reading, SensorDataRow};
