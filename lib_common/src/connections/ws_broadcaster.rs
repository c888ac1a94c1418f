//! # WebSocket Broadcaster
//!
//! Publishes position updates to a remote relay hub over one shared WebSocket.
//!
//! ## Connection Lifecycle:
//!
//! 1.  **Lazy Connect**: Nothing is dialled until the first publish.
//! 2.  **Serialized Sends**: The write half sits behind an async mutex; concurrent
//!     publishers queue on it and write one frame at a time.
//! 3.  **Reset on Failure**: A failed send drops the write half and the frame is
//!     retried once on a fresh connection.
//! 4.  **Inbound Drain**: The hub may push frames back; a background task reads
//!     and discards them so the socket never stalls on a full receive buffer.
//! 5.  **Close Detection**: When the read side sees a close frame, an error or the
//!     end of the stream it marks the connection closed, and the next publish
//!     dials again instead of writing into a dead socket.

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::broadcaster::{BroadcastError, Broadcaster};
use crate::core::relay_hub::HubMessage;
use crate::models::PositionUpdate;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct HubConnection {
    sink: WsSink,
    closed: CancellationToken,
}

/// Client side of the real-time channel.
pub struct WsBroadcaster {
    url: String,
    connection: Mutex<Option<HubConnection>>,
}

impl WsBroadcaster {
    /// Creates a broadcaster for `url` (e.g. `ws://hub:8081/realtime/positionupdates`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: Mutex::new(None),
        }
    }

    /// The hub address.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<HubConnection, BroadcastError> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| BroadcastError::Connect(e.to_string()))?;
        info!(url = %self.url, "Connected to real-time hub");

        let (sink, mut source) = stream.split();
        let closed = CancellationToken::new();
        let reader_closed = closed.clone();
        tokio::spawn(async move {
            let _closed = reader_closed.drop_guard();
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Close(_)) => {
                        debug!("Hub closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Hub connection read side closed");
                        break;
                    }
                }
            }
        });
        Ok(HubConnection { sink, closed })
    }

    async fn send_frame(&self, frame: String) -> Result<(), BroadcastError> {
        let mut guard = self.connection.lock().await;
        if guard.as_ref().is_some_and(|c| c.closed.is_cancelled()) {
            debug!(url = %self.url, "Hub connection closed, reconnecting");
            *guard = None;
        }

        let reused = guard.is_some();
        if !reused {
            *guard = Some(self.connect().await?);
        }
        let Some(connection) = guard.as_mut() else {
            return Err(BroadcastError::Connect("hub connection unavailable".into()));
        };

        let Err(e) = connection.sink.send(Message::Text(frame.clone().into())).await else {
            return Ok(());
        };
        warn!(url = %self.url, error = %e, "Hub send failed, connection reset");
        *guard = None;
        if !reused {
            return Err(BroadcastError::Send(e.to_string()));
        }

        let mut fresh = self.connect().await?;
        fresh
            .sink
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| BroadcastError::Send(e.to_string()))?;
        *guard = Some(fresh);
        Ok(())
    }

    /// Sends a close frame and forgets the connection, if one is open.
    pub async fn close(&self) {
        if let Some(mut connection) = self.connection.lock().await.take() {
            if let Err(e) = connection.sink.close().await {
                debug!(error = %e, "Hub connection close failed");
            }
        }
    }
}

#[async_trait]
impl Broadcaster for WsBroadcaster {
    async fn publish(&self, update: &PositionUpdate, cancel: CancellationToken) -> Result<(), BroadcastError> {
        let frame = serde_json::to_string(&HubMessage::SendPositionUpdate(update.clone()))
            .map_err(|e| BroadcastError::Encode(e.to_string()))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(BroadcastError::Cancelled),
            result = self.send_frame(frame) => result,
        }
    }
}
