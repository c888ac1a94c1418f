//! Signal handling and HTTP serving with graceful shutdown.

use anyhow::{Context, Result};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::TlsPaths;

/// Grace period for in-flight requests once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Completes on SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, initiating shutdown"),
        _ = terminate => info!("SIGTERM received, initiating shutdown"),
    }
}

/// Cancels `shutdown` when a termination signal arrives.
pub fn cancel_on_signal(shutdown: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => shutdown.cancel(),
            _ = shutdown.cancelled() => {}
        }
    });
}

/// Serves `app` on all interfaces until `shutdown` fires.
///
/// With TLS paths the server terminates TLS itself through rustls; without them
/// it serves plain HTTP.
pub async fn serve(app: Router, port: u16, tls: Option<&TlsPaths>, shutdown: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    match tls {
        Some(paths) => {
            let tls_config = RustlsConfig::from_pem_file(&paths.cert, &paths.key)
                .await
                .with_context(|| format!("failed to load TLS configuration from {}", paths.cert.display()))?;

            let handle = axum_server::Handle::new();
            let signal_handle = handle.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                signal_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });

            info!(%addr, "Listening with TLS");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {}", addr))?;

            info!(%addr, "Listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await?;
        }
    }

    info!("HTTP server stopped");
    Ok(())
}
