//! # Dual-Path Reading Dispatcher
//!
//! The `Dispatcher` is the per-request entry point of the ingestion engine. Every
//! accepted reading must land in two places: the durable queue (for later
//! historization) and the live channel (for map clients). Both writes run
//! concurrently and share one deadline.
//!
//! ## Core Design Principles:
//!
//! 1.  **One Logical Unit of Work**: The durable append and the live publish are
//!     treated as a single operation. The call succeeds only if *both* sinks report
//!     success. A reading that was queued but not broadcast (or the reverse) is a
//!     `PartialFailure`; the caller retries the whole reading and duplicates on
//!     either side are accepted.
//!
//! 2.  **Single Deadline**: The joined pair of operations is raced against one timer.
//!     If the timer wins, the shared `CancellationToken` is fired and both in-flight
//!     futures are dropped; the dispatcher does not wait for them to wind down. A
//!     sink that ignores cancellation can still hold its own resources until its
//!     own timeout, but it no longer holds up the request.
//!
//! 3.  **No Escaping Errors**: Sink errors are logged here and folded into a
//!     `DispatchError`. Nothing is retried at this level.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::core::broadcaster::Broadcaster;
use crate::core::queue::QueueProducer;
use crate::models::Reading;

/// Default budget for the combined append and publish.
pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(200);

/// Which sinks reported success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// The durable append succeeded.
    pub queued: bool,
    /// The live publish succeeded.
    pub broadcast: bool,
}

impl DispatchOutcome {
    /// Both sinks succeeded.
    pub fn succeeded(&self) -> bool {
        self.queued && self.broadcast
    }
}

/// Why a reading was not fully dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The deadline elapsed before both sinks finished.
    #[error("dispatch deadline of {0:?} exceeded")]
    Timeout(Duration),
    /// Both sinks finished but at least one failed.
    #[error("dispatch partially failed (queued: {queued}, broadcast: {broadcast})")]
    PartialFailure {
        /// The durable append succeeded.
        queued: bool,
        /// The live publish succeeded.
        broadcast: bool,
    },
    /// The reading could not be serialized for the queue.
    #[error("failed to serialize reading: {0}")]
    Encode(String),
}

/// # Core Dispatcher
///
/// Shared by every request handler; holds no per-request state.
pub struct Dispatcher {
    queue: Arc<dyn QueueProducer>,
    broadcaster: Arc<dyn Broadcaster>,
    deadline: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher over the given sinks.
    pub fn new(queue: Arc<dyn QueueProducer>, broadcaster: Arc<dyn Broadcaster>, deadline: Duration) -> Self {
        Self {
            queue,
            broadcaster,
            deadline,
        }
    }

    /// The configured deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// # Process
    ///
    /// Appends the serialized reading to the durable queue and publishes its
    /// position update, concurrently, within the deadline.
    ///
    /// ## Logic:
    /// 1.  Serializes the reading once for the queue.
    /// 2.  Creates one `CancellationToken` handed to both sinks.
    /// 3.  `select!`s between the joined sinks and a deadline timer.
    /// 4.  On timeout, fires the token and returns `Timeout` immediately.
    /// 5.  Otherwise, succeeds only if both sinks succeeded.
    pub async fn process(&self, reading: &Reading) -> Result<(), DispatchError> {
        let payload = reading.to_payload().map_err(|e| {
            error!(sensor_id = %reading.sensor_id, error = %e, "Failed to serialize reading");
            DispatchError::Encode(e.to_string())
        })?;
        let update = reading.position_update();

        let cancel = CancellationToken::new();
        // Fires if the caller drops this future mid-flight.
        let _cancel_on_drop = cancel.clone().drop_guard();

        let append = async {
            match self.queue.append(payload, cancel.clone()).await {
                Ok(()) => true,
                Err(e) => {
                    error!(sensor_id = %reading.sensor_id, error = %e, "Durable append failed");
                    false
                }
            }
        };
        let publish = async {
            match self.broadcaster.publish(&update, cancel.clone()).await {
                Ok(()) => true,
                Err(e) => {
                    error!(actor_id = %reading.actor_id, error = %e, "Live publish failed");
                    false
                }
            }
        };

        let outcome = tokio::select! {
            (queued, broadcast) = async { tokio::join!(append, publish) } => {
                DispatchOutcome { queued, broadcast }
            }
            _ = tokio::time::sleep(self.deadline) => {
                cancel.cancel();
                warn!(
                    sensor_id = %reading.sensor_id,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Dispatch deadline exceeded, in-flight operations cancelled"
                );
                return Err(DispatchError::Timeout(self.deadline));
            }
        };

        if outcome.succeeded() {
            debug!(sensor_id = %reading.sensor_id, "Reading queued and broadcast");
            Ok(())
        } else {
            Err(DispatchError::PartialFailure {
                queued: outcome.queued,
                broadcast: outcome.broadcast,
            })
        }
    }
}
