//! # Core Ingestion Engine
//!
//! The components every request and every background task goes through. Nothing in
//! here talks to a database or a socket directly; backends plug in through the
//! traits in `queue` and `broadcaster`.
//!
//! ## Core Components:
//!
//! - **`rate_limiter`**: Fixed-window admission control keyed by actor.
//!
//! - **`validator`**: Coordinate range checks on inbound readings.
//!
//! - **`dispatcher`**: Writes each reading to the durable queue and the live
//!   channel concurrently, under one deadline.
//!
//! - **`drain_worker`**: The background loop that moves queued readings into
//!   long-term storage in transactional batches.
//!
//! - **`relay_hub`**: Server-side fan-out of live updates to connected observers.
//!
//! - **`queue`**, **`memory_queue`**, **`broadcaster`**: The storage and publishing
//!   contracts, plus the in-process queue backend.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Publishing contract for live updates.
pub mod broadcaster;
/// Concurrent dual-path dispatch under a deadline.
pub mod dispatcher;
/// Background batch mover from queue to long-term storage.
pub mod drain_worker;
/// In-process queue and store backends.
pub mod memory_queue;
/// Durable queue, session and store contracts.
pub mod queue;
/// Per-actor fixed-window throttling.
pub mod rate_limiter;
/// Fan-out hub for the real-time channel.
pub mod relay_hub;
/// Coordinate validation.
pub mod validator;

// --- Public API Re-exports ---
pub use broadcaster::{BroadcastError, Broadcaster};
pub use dispatcher::{DispatchError, Dispatcher};
pub use drain_worker::{DrainConfig, DrainCycle, DrainStats, DrainStatsSnapshot, DrainWorker};
pub use memory_queue::{MemoryQueue, MemoryReadingStore};
pub use queue::{DurableQueue, QueueEntry, QueueProducer, QueueSession, ReadingStore, SessionState, StorageError};
pub use rate_limiter::{Admission, RateLimiter, ThrottleConfig};
pub use relay_hub::{HubBroadcaster, HubMessage, RelayHub};
pub use validator::{validate, InvalidReading};
