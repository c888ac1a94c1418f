//! # Ingestion Endpoint
//!
//! `POST /upload/{actor_id}` accepts one reading per request and `GET /health`
//! reports queue depth and drain statistics.
//!
//! ## Request Pipeline:
//!
//! 1.  **Admission**: The route `actor_id` is charged against the rate limiter
//!     before the body is even parsed. Throttled requests cost no JSON work.
//! 2.  **Parse**: The body is decoded into a `Reading`.
//! 3.  **Validate**: Coordinates are range checked.
//! 4.  **Dispatch**: The reading is queued and broadcast under the deadline.
//!
//! The route segment is only the throttle key; the body's `actorId` is what gets
//! stored and relayed. A mismatch is logged but not rejected.

use axum::{
    body::Bytes,
    extract::{rejection::PathRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::ApiError;
use crate::core::dispatcher::Dispatcher;
use crate::core::drain_worker::DrainStats;
use crate::core::queue::DurableQueue;
use crate::core::rate_limiter::{Admission, RateLimiter};
use crate::core::relay_hub::RelayHub;
use crate::core::validator::validate;
use crate::models::Reading;

/// Shared handler state.
#[derive(Clone)]
pub struct IngestState {
    /// Per-actor admission gate.
    pub limiter: Arc<RateLimiter<Uuid>>,
    /// Dual-path dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// The durable queue, for depth reporting.
    pub queue: Arc<dyn DurableQueue>,
    /// Counters shared with the drain workers.
    pub drain_stats: Arc<DrainStats>,
    /// The embedded hub, when this process also serves the real-time channel.
    pub hub: Option<Arc<RelayHub>>,
}

/// Builds the ingestion router.
pub fn ingest_router(state: IngestState) -> Router {
    Router::new()
        .route("/upload/{actor_id}", post(upload_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn upload_handler(
    State(state): State<IngestState>,
    actor_id: Result<Path<Uuid>, PathRejection>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let Path(actor_id) = actor_id.map_err(|e| ApiError::InvalidActorId(e.body_text()))?;

    if let Admission::Throttled { retry_after } = state.limiter.admit(&actor_id) {
        return Err(ApiError::Throttled { retry_after });
    }

    let reading: Reading = serde_json::from_slice(&body).map_err(|e| ApiError::MalformedBody(e.to_string()))?;
    if reading.actor_id != actor_id {
        debug!(route_actor = %actor_id, body_actor = %reading.actor_id, "Route and body actor ids differ");
    }

    let reading = validate(reading)?;
    state.dispatcher.process(&reading).await?;

    Ok((StatusCode::OK, Json(json!({ "status": "accepted" }))))
}

async fn health_handler(State(state): State<IngestState>) -> impl IntoResponse {
    let queue_depth = match state.queue.size().await {
        Ok(depth) => Some(depth),
        Err(e) => {
            warn!(error = %e, "Queue depth unavailable");
            None
        }
    };

    Json(json!({
        "status": "ok",
        "queueDepth": queue_depth,
        "trackedActors": state.limiter.tracked_keys(),
        "hubSubscribers": state.hub.as_ref().map(|hub| hub.subscriber_count()),
        "drain": state.drain_stats.snapshot(),
    }))
}
