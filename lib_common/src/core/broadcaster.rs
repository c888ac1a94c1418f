//! Live publishing contract.
//!
//! A `Broadcaster` pushes one `PositionUpdate` onto the real-time channel. The
//! WebSocket client lives in `connections::ws_broadcaster`; the in-process variant
//! that feeds a local hub lives next to the hub in `core::relay_hub`.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::PositionUpdate;

/// Errors raised while publishing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    /// The hub could not be reached.
    #[error("failed to connect to the real-time hub: {0}")]
    Connect(String),
    /// The connection broke while sending.
    #[error("failed to send position update: {0}")]
    Send(String),
    /// The update could not be encoded.
    #[error("failed to encode position update: {0}")]
    Encode(String),
    /// The caller's cancellation token fired first.
    #[error("publish cancelled")]
    Cancelled,
}

/// Publishes live position updates.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Sends one update. Implementations stop promptly once `cancel` fires.
    async fn publish(&self, update: &PositionUpdate, cancel: CancellationToken) -> Result<(), BroadcastError>;
}
