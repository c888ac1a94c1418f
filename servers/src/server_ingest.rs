//! # Position Ingestion Server
//!
//! Accepts position readings over HTTP, queues them durably, relays them live, and
//! drains the queue into long-term storage in the background.
//!
//! ## Wiring:
//! - **Storage**: PostgreSQL when `DATABASE_URL` is set; in-memory otherwise.
//! - **Live channel**: a remote hub when `HUB_URL` is set; otherwise the hub is
//!   embedded and its WebSocket endpoint is served from this process.
//! - **Drain workers**: `DRAIN_WORKERS` loops sharing one set of statistics.
//! - **Lifecycle**: SIGINT/SIGTERM stop the HTTP server, then the drain workers,
//!   which finish their current cycle before exiting.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, info_span, warn, Instrument};

use lib_common::api::{ingest_router, relay_router, IngestState};
use lib_common::connections::{create_pool, ensure_schema, PgDurableQueue, PgReadingStore, WsBroadcaster};
use lib_common::core::{
    Broadcaster, Dispatcher, DrainStats, DrainWorker, DurableQueue, HubBroadcaster, MemoryQueue, MemoryReadingStore,
    QueueProducer, RateLimiter, ReadingStore, RelayHub,
};
use lib_common::loggers::setup_logging;
use servers::app_logic::config::{load_config, Settings};
use servers::app_logic::lifecycle::{cancel_on_signal, serve};

const APP_NAME: &str = "server_ingest";
const DEFAULT_PORT: u16 = 8080;

struct Storage {
    producer: Arc<dyn QueueProducer>,
    queue: Arc<dyn DurableQueue>,
    store: Arc<dyn ReadingStore>,
}

async fn build_storage(settings: &Settings) -> Result<Storage> {
    match &settings.database_url {
        Some(url) => {
            let pool = create_pool(url, settings.db_pool_size)?;
            ensure_schema(&pool).await?;
            info!(pool_size = settings.db_pool_size, "Using PostgreSQL queue and storage");

            let queue = Arc::new(PgDurableQueue::new(pool.clone()));
            Ok(Storage {
                producer: queue.clone(),
                queue,
                store: Arc::new(PgReadingStore::new(pool)),
            })
        }
        None => {
            warn!("DATABASE_URL not set, readings are kept in memory only");
            let queue = Arc::new(MemoryQueue::new());
            Ok(Storage {
                producer: queue.clone(),
                queue,
                store: Arc::new(MemoryReadingStore::new()),
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = load_config(APP_NAME, DEFAULT_PORT)?;
    let _log_guard = setup_logging(&settings.log_dir, &settings.log_level, APP_NAME)?;
    info!(port = settings.port, "Starting {}", APP_NAME);

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let storage = build_storage(&settings).await?;

    let (broadcaster, remote_hub, embedded_hub): (Arc<dyn Broadcaster>, Option<Arc<WsBroadcaster>>, Option<Arc<RelayHub>>) =
        match &settings.hub_url {
            Some(url) => {
                let client = Arc::new(WsBroadcaster::new(url.clone()));
                info!(url = client.url(), "Publishing to remote hub");
                (client.clone() as Arc<dyn Broadcaster>, Some(client), None)
            }
            None => {
                info!("Embedding the relay hub");
                let hub = Arc::new(RelayHub::new());
                (Arc::new(HubBroadcaster::new(hub.clone())) as Arc<dyn Broadcaster>, None, Some(hub))
            }
        };

    let drain_stats = Arc::new(DrainStats::new());
    let drain_shutdown = CancellationToken::new();
    let workers: Vec<_> = (0..settings.drain_workers)
        .map(|worker_id| {
            let worker = DrainWorker::with_stats(
                storage.queue.clone(),
                storage.store.clone(),
                settings.drain,
                drain_stats.clone(),
            );
            let token = drain_shutdown.clone();
            tokio::spawn(async move { worker.run(token).await }.instrument(info_span!("drain_worker", worker_id)))
        })
        .collect();

    let limiter = Arc::new(RateLimiter::new(settings.throttle));
    let dispatcher = Arc::new(Dispatcher::new(storage.producer.clone(), broadcaster, settings.dispatch_deadline));
    info!(
        throttle_window_ms = limiter.config().window.as_millis() as u64,
        throttle_limit = limiter.config().limit,
        dispatch_deadline_ms = dispatcher.deadline().as_millis() as u64,
        "Ingestion pipeline ready"
    );

    let state = IngestState {
        limiter,
        dispatcher,
        queue: storage.queue.clone(),
        drain_stats,
        hub: embedded_hub.clone(),
    };

    let mut app = ingest_router(state);
    if let Some(hub) = embedded_hub {
        app = app.merge(relay_router(hub));
    }
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = app.layer(cors);

    let served = serve(app, settings.port, settings.tls.as_ref(), shutdown.clone()).await;

    // HTTP is down, now stop draining.
    drain_shutdown.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            warn!(error = %e, "Drain worker task failed");
        }
    }
    if let Some(client) = remote_hub {
        client.close().await;
    }

    info!("Shutdown complete");
    served
}
