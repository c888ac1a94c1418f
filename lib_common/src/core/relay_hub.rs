//! # Real-Time Relay Hub
//!
//! Server-side fan-out for live position updates. Every connection that sends a
//! `SendPositionUpdate` has it relayed as `ReceivePositionUpdate` to every *other*
//! connection. Nothing is persisted and nothing is retried.
//!
//! ## Core Design Principles:
//!
//! 1.  **Shared Fan-out**: A relayed update is wrapped in an `Arc` once; each
//!     subscriber's channel receives a pointer to the same value.
//!
//! 2.  **Per-Subscriber Channels**: Each connection owns the receiving half of a
//!     bounded MPSC channel and drains it from its own task. A slow socket never
//!     holds up the sender or the other subscribers; once its buffer is full it
//!     simply misses updates until it catches up.
//!
//! 3.  **Lazy Pruning**: A subscriber whose receiver is gone is dropped from the
//!     table the next time a relay tries to reach it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::broadcaster::{BroadcastError, Broadcaster};
use crate::models::PositionUpdate;

/// Identifies one hub connection.
pub type ConnectionId = u64;

/// Updates buffered per subscriber before newer ones are dropped for it.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Receiving half handed to each subscriber.
pub type UpdateReceiver = mpsc::Receiver<Arc<PositionUpdate>>;

type UpdateSender = mpsc::Sender<Arc<PositionUpdate>>;

/// A frame on the real-time channel.
///
/// Encoded as `{"method": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "payload")]
pub enum HubMessage {
    /// Inbound: a publisher reports a new position.
    SendPositionUpdate(PositionUpdate),
    /// Outbound: a position relayed from another connection.
    ReceivePositionUpdate(PositionUpdate),
}

/// # Relay Hub
#[derive(Debug)]
pub struct RelayHub {
    subscribers: Mutex<HashMap<ConnectionId, UpdateSender>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl RelayHub {
    /// Creates a hub with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a hub whose subscribers each buffer at most `buffer` updates.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            buffer: buffer.max(1),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<ConnectionId, UpdateSender>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// # Connect
    ///
    /// Registers a new connection and returns its id together with the receiver
    /// that will carry every update relayed to it.
    pub fn connect(&self) -> (ConnectionId, UpdateReceiver) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut table = self.table();
        table.insert(id, tx);
        info!(connection_id = id, subscribers = table.len(), "Hub connection opened");
        (id, rx)
    }

    /// Removes a connection. Unknown ids are ignored.
    pub fn disconnect(&self, id: ConnectionId) {
        let mut table = self.table();
        if table.remove(&id).is_some() {
            info!(connection_id = id, subscribers = table.len(), "Hub connection closed");
        }
    }

    /// # Relay
    ///
    /// Delivers `update` to every connection except `from`, pruning any whose
    /// receiver has been dropped. A subscriber with a full buffer misses this
    /// update. Returns the number of subscribers reached.
    pub fn relay(&self, from: ConnectionId, update: PositionUpdate) -> usize {
        let update = Arc::new(update);
        let mut delivered = 0;
        let mut table = self.table();

        table.retain(|&id, tx| {
            if id == from {
                return true;
            }
            match tx.try_send(Arc::clone(&update)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection_id = id, "Hub subscriber lagging, update dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection_id = id, "Pruning closed hub subscriber");
                    false
                }
            }
        });

        delivered
    }

    /// Number of registered connections.
    pub fn subscriber_count(&self) -> usize {
        self.table().len()
    }
}

/// A [`Broadcaster`] that relays straight into an in-process [`RelayHub`].
///
/// It holds a connection id of its own so the hub never echoes its updates back.
#[derive(Debug)]
pub struct HubBroadcaster {
    hub: Arc<RelayHub>,
    publisher_id: ConnectionId,
}

impl HubBroadcaster {
    /// Reserves a publisher id on `hub`. The id is never registered as a
    /// subscriber, so it receives nothing.
    pub fn new(hub: Arc<RelayHub>) -> Self {
        let publisher_id = hub.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Self { hub, publisher_id }
    }
}

#[async_trait]
impl Broadcaster for HubBroadcaster {
    async fn publish(&self, update: &PositionUpdate, cancel: CancellationToken) -> Result<(), BroadcastError> {
        if cancel.is_cancelled() {
            return Err(BroadcastError::Cancelled);
        }
        self.hub.relay(self.publisher_id, update.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn update() -> PositionUpdate {
        PositionUpdate {
            actor_id: Uuid::new_v4(),
            latitude: 48.85,
            longitude: 2.35,
            time_stamp: Utc::now(),
        }
    }

    #[test]
    fn update_reaches_every_other_subscriber_but_not_the_sender() {
        let hub = RelayHub::new();
        let (a, mut rx_a) = hub.connect();
        let (_b, mut rx_b) = hub.connect();
        let (_c, mut rx_c) = hub.connect();

        let sent = update();
        assert_eq!(hub.relay(a, sent.clone()), 2);

        assert_eq!(*rx_b.try_recv().unwrap(), sent);
        assert_eq!(*rx_c.try_recv().unwrap(), sent);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn closed_subscribers_are_pruned_on_relay() {
        let hub = RelayHub::new();
        let (a, _rx_a) = hub.connect();
        let (_b, rx_b) = hub.connect();
        drop(rx_b);

        assert_eq!(hub.subscriber_count(), 2);
        assert_eq!(hub.relay(a, update()), 0);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn disconnect_stops_delivery() {
        let hub = RelayHub::new();
        let (a, _rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        hub.disconnect(b);

        assert_eq!(hub.relay(a, update()), 0);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn lagging_subscriber_misses_updates_but_stays_connected() {
        let hub = RelayHub::with_buffer(2);
        let (a, _rx_a) = hub.connect();
        let (_b, mut rx_b) = hub.connect();

        let sent: Vec<_> = (0..3).map(|_| update()).collect();
        assert_eq!(hub.relay(a, sent[0].clone()), 1);
        assert_eq!(hub.relay(a, sent[1].clone()), 1);
        assert_eq!(hub.relay(a, sent[2].clone()), 0);
        assert_eq!(hub.subscriber_count(), 2);

        assert_eq!(*rx_b.try_recv().unwrap(), sent[0]);
        assert_eq!(*rx_b.try_recv().unwrap(), sent[1]);
        assert!(rx_b.try_recv().is_err());

        let next = update();
        assert_eq!(hub.relay(a, next.clone()), 1);
        assert_eq!(*rx_b.try_recv().unwrap(), next);
    }

    #[tokio::test]
    async fn hub_broadcaster_feeds_local_subscribers() {
        let hub = Arc::new(RelayHub::new());
        let (_id, mut rx) = hub.connect();
        let broadcaster = HubBroadcaster::new(Arc::clone(&hub));

        let sent = update();
        broadcaster.publish(&sent, CancellationToken::new()).await.unwrap();
        assert_eq!(*rx.recv().await.unwrap(), sent);
    }

    #[test]
    fn frames_use_method_and_payload_keys() {
        let sent = update();
        let json = serde_json::to_value(HubMessage::ReceivePositionUpdate(sent.clone())).unwrap();
        assert_eq!(json["method"], "ReceivePositionUpdate");
        assert_eq!(json["payload"]["actorId"], sent.actor_id.to_string());

        let inbound = format!(
            r#"{{"method":"SendPositionUpdate","payload":{}}}"#,
            serde_json::to_string(&sent).unwrap()
        );
        assert_eq!(
            serde_json::from_str::<HubMessage>(&inbound).unwrap(),
            HubMessage::SendPositionUpdate(sent)
        );
    }
}
