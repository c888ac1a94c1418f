//! # Connections Module
//!
//! Backends that talk to external services: the PostgreSQL durable queue and
//! long-term store, and the WebSocket client for the real-time hub.

/// Pool construction and table bootstrap.
pub mod pg_pool;
/// The `stack` table as a durable queue.
pub mod pg_queue;
/// Bulk inserts into `sensor_data`.
pub mod pg_store;
/// WebSocket publisher for a remote relay hub.
pub mod ws_broadcaster;

pub use pg_pool::{create_pool, ensure_schema};
pub use pg_queue::{PgDurableQueue, PgQueueSession};
pub use pg_store::PgReadingStore;
pub use ws_broadcaster::WsBroadcaster;
