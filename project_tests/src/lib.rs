//! Shared fixtures for the cross-crate integration tests in `tests/`.

use async_trait::async_trait;
use axum::Router;
use chrono::Utc;
use lib_common::core::{BroadcastError, Broadcaster};
use lib_common::{PositionUpdate, Reading};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A reading somewhere over Romania for `actor_id`, with a fresh sensor id.
pub fn sample_reading(actor_id: Uuid) -> Reading {
    Reading {
        sensor_id: Uuid::new_v4(),
        actor_id,
        time_stamp: Utc::now(),
        latitude: 45.94,
        longitude: 24.97,
    }
}

/// How a [`RecordingBroadcaster`] answers.
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Record and succeed.
    Succeed,
    /// Fail immediately.
    Fail,
    /// Wait this long (or until cancelled) before succeeding.
    Stall(Duration),
}

/// A broadcaster that remembers what it published.
#[derive(Debug)]
pub struct RecordingBroadcaster {
    behaviour: Behaviour,
    published: Mutex<Vec<PositionUpdate>>,
}

impl RecordingBroadcaster {
    /// Creates a broadcaster with the given behaviour.
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            published: Mutex::new(Vec::new()),
        }
    }

    /// Every update published successfully, in order.
    pub fn published(&self) -> Vec<PositionUpdate> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn publish(&self, update: &PositionUpdate, cancel: CancellationToken) -> Result<(), BroadcastError> {
        match self.behaviour {
            Behaviour::Succeed => {}
            Behaviour::Fail => return Err(BroadcastError::Send("hub unavailable".into())),
            Behaviour::Stall(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(BroadcastError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        self.published.lock().unwrap().push(update.clone());
        Ok(())
    }
}

/// Serves `app` on an ephemeral local port and returns its address.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Polls `condition` every 10 ms for up to two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
