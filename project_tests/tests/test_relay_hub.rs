use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures_util::{SinkExt, StreamExt};
use lib_common::api::{ingest_router, relay_router, IngestState, REALTIME_PATH};
use lib_common::connections::WsBroadcaster;
use lib_common::core::{
    Broadcaster, Dispatcher, DrainStats, HubBroadcaster, HubMessage, MemoryQueue, RateLimiter, RelayHub,
    ThrottleConfig,
};
use lib_common::PositionUpdate;
use project_tests::{sample_reading, spawn_server, wait_until};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}{}", addr, REALTIME_PATH)).await.unwrap();
    client
}

async fn next_update(client: &mut Client) -> Option<PositionUpdate> {
    let frame = tokio::time::timeout(Duration::from_millis(500), client.next()).await.ok()??.ok()?;
    match frame {
        Message::Text(text) => match serde_json::from_str::<HubMessage>(text.as_str()).ok()? {
            HubMessage::ReceivePositionUpdate(update) => Some(update),
            HubMessage::SendPositionUpdate(_) => None,
        },
        _ => None,
    }
}

#[tokio::test]
async fn update_from_one_client_reaches_the_others_only() {
    let hub = Arc::new(RelayHub::new());
    let addr = spawn_server(relay_router(hub.clone())).await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    assert!(wait_until(|| hub.subscriber_count() == 3).await);

    let sent = sample_reading(Uuid::new_v4()).position_update();
    let frame = serde_json::to_string(&HubMessage::SendPositionUpdate(sent.clone())).unwrap();
    a.send(Message::Text(frame.into())).await.unwrap();

    assert_eq!(next_update(&mut b).await, Some(sent.clone()));
    assert_eq!(next_update(&mut c).await, Some(sent));
    assert_eq!(next_update(&mut a).await, None);

    drop(b);
    assert!(wait_until(|| hub.subscriber_count() == 2).await);
}

#[tokio::test]
async fn ws_broadcaster_publishes_into_a_remote_hub() {
    let hub = Arc::new(RelayHub::new());
    let addr = spawn_server(relay_router(hub.clone())).await;

    let mut observer = connect(addr).await;
    assert!(wait_until(|| hub.subscriber_count() == 1).await);

    let broadcaster = WsBroadcaster::new(format!("ws://{}{}", addr, REALTIME_PATH));
    let first = sample_reading(Uuid::new_v4()).position_update();
    let second = sample_reading(Uuid::new_v4()).position_update();
    broadcaster.publish(&first, CancellationToken::new()).await.unwrap();
    broadcaster.publish(&second, CancellationToken::new()).await.unwrap();

    // One shared connection for both publishes.
    assert!(wait_until(|| hub.subscriber_count() == 2).await);
    assert_eq!(next_update(&mut observer).await, Some(first));
    assert_eq!(next_update(&mut observer).await, Some(second));

    broadcaster.close().await;
}

/// A hub that closes its first connection after one frame and keeps every later
/// connection open. Received text frames are forwarded to the returned channel.
async fn hub_closing_first_connection() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut first = true;
        while let Ok((stream, _)) = listener.accept().await {
            let close_after_one = std::mem::replace(&mut first, false);
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                while let Some(Ok(frame)) = ws.next().await {
                    if let Message::Text(text) = frame {
                        let _ = tx.send(text.as_str().to_owned());
                        if close_after_one {
                            let _ = ws.close(None).await;
                            break;
                        }
                    }
                }
            });
        }
    });
    (addr, rx)
}

#[tokio::test]
async fn ws_broadcaster_reconnects_after_the_hub_closes_the_connection() {
    let (addr, mut received) = hub_closing_first_connection().await;
    let broadcaster = WsBroadcaster::new(format!("ws://{}{}", addr, REALTIME_PATH));

    let first = sample_reading(Uuid::new_v4()).position_update();
    broadcaster.publish(&first, CancellationToken::new()).await.unwrap();
    assert!(received.recv().await.unwrap().contains(&first.actor_id.to_string()));

    // Let the close frame reach the client's read side.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = sample_reading(Uuid::new_v4()).position_update();
    broadcaster.publish(&second, CancellationToken::new()).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(1), received.recv()).await.unwrap().unwrap();
    assert!(frame.contains(&second.actor_id.to_string()));

    broadcaster.close().await;
}

#[tokio::test]
async fn ws_broadcaster_reports_an_unreachable_hub() {
    let broadcaster = WsBroadcaster::new("ws://127.0.0.1:9/realtime/positionupdates");
    let update = sample_reading(Uuid::new_v4()).position_update();
    assert!(broadcaster.publish(&update, CancellationToken::new()).await.is_err());
}

#[tokio::test]
async fn uploaded_reading_is_relayed_through_the_embedded_hub() {
    let hub = Arc::new(RelayHub::new());
    let queue = MemoryQueue::new();
    let state = IngestState {
        limiter: Arc::new(RateLimiter::new(ThrottleConfig::default())),
        dispatcher: Arc::new(Dispatcher::new(
            Arc::new(queue.clone()),
            Arc::new(HubBroadcaster::new(hub.clone())),
            Duration::from_millis(200),
        )),
        queue: Arc::new(queue.clone()),
        drain_stats: Arc::new(DrainStats::new()),
        hub: Some(hub.clone()),
    };
    let app = ingest_router(state).merge(relay_router(hub.clone()));
    let addr = spawn_server(app.clone()).await;

    let mut observer = connect(addr).await;
    assert!(wait_until(|| hub.subscriber_count() == 1).await);

    let reading = sample_reading(Uuid::new_v4());
    let request = Request::builder()
        .method("POST")
        .uri(format!("/upload/{}", reading.actor_id))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&reading).unwrap()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(next_update(&mut observer).await, Some(reading.position_update()));
    assert_eq!(queue.len(), 1);
}
