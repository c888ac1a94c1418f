//! Real-time channel endpoint: `GET /realtime/positionupdates` upgraded to a WebSocket.
//!
//! Each socket is a hub connection. Inbound `SendPositionUpdate` frames are relayed
//! to every other socket; relayed updates go out as `ReceivePositionUpdate`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::relay_hub::{HubMessage, RelayHub};

/// Path of the real-time channel.
pub const REALTIME_PATH: &str = "/realtime/positionupdates";

/// Builds the relay router.
pub fn relay_router(hub: Arc<RelayHub>) -> Router {
    Router::new().route(REALTIME_PATH, get(ws_handler)).with_state(hub)
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<RelayHub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<RelayHub>) {
    let (connection_id, mut updates) = hub.connect();

    loop {
        tokio::select! {
            inbound = socket.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<HubMessage>(text.as_str()) {
                        Ok(HubMessage::SendPositionUpdate(update)) => {
                            let delivered = hub.relay(connection_id, update);
                            debug!(connection_id, delivered, "Relayed position update");
                        }
                        Ok(HubMessage::ReceivePositionUpdate(_)) => {
                            debug!(connection_id, "Ignoring server-bound ReceivePositionUpdate");
                        }
                        Err(e) => warn!(connection_id, error = %e, "Unrecognized hub frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(connection_id, error = %e, "Hub socket read failed");
                        break;
                    }
                }
            }
            outbound = updates.recv() => {
                let Some(update) = outbound else { break };
                let frame = match serde_json::to_string(&HubMessage::ReceivePositionUpdate((*update).clone())) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(connection_id, error = %e, "Failed to encode position update");
                        continue;
                    }
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.disconnect(connection_id);
}
