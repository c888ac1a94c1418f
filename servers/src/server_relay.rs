//! # Stand-alone Relay Hub
//!
//! Serves only the real-time channel. Ingestion servers started with `HUB_URL`
//! pointing here publish into it; map clients connect to the same endpoint to
//! receive updates.

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use lib_common::api::relay_router;
use lib_common::core::RelayHub;
use lib_common::loggers::setup_logging;
use servers::app_logic::config::load_config;
use servers::app_logic::lifecycle::{cancel_on_signal, serve};

const APP_NAME: &str = "server_relay";
const DEFAULT_PORT: u16 = 8081;

async fn health_handler(State(hub): State<Arc<RelayHub>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "subscribers": hub.subscriber_count() }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = load_config(APP_NAME, DEFAULT_PORT)?;
    let _log_guard = setup_logging(&settings.log_dir, &settings.log_level, APP_NAME)?;
    info!(port = settings.port, "Starting {}", APP_NAME);

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let hub = Arc::new(RelayHub::new());
    let health = Router::new().route("/health", get(health_handler)).with_state(hub.clone());
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = relay_router(hub).merge(health).layer(cors);

    serve(app, settings.port, settings.tls.as_ref(), shutdown).await?;

    info!("Shutdown complete");
    Ok(())
}
