//! # API Module
//!
//! axum routers mounted by the server binaries. Each router carries its own state
//! and can be merged with the others into one application.

/// Handler error type and its HTTP mapping.
pub mod error;
/// Upload and health endpoints.
pub mod ingest_routes;
/// WebSocket endpoint of the relay hub.
pub mod relay_routes;

pub use error::ApiError;
pub use ingest_routes::{ingest_router, IngestState};
pub use relay_routes::{relay_router, REALTIME_PATH};
