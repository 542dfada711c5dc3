//! # Fleet API Server
//!
//! Main entry point for drone delivery fleet sync and order dispatch.
//! Serves the fleet view, alerts, assignments, checkout splitting and
//! emergency commands over REST, plus a live WebSocket stream.

mod config;
mod error;
mod handlers;
mod middleware;
mod routes;
mod state;

use crate::config::ApiConfig;
use crate::routes::create_router;
use crate::state::AppState;

use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Fleet Sync Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ApiConfig::load()?;
    info!("Configuration loaded");
    info!("   API Port: {}", config.api_port);
    if config.simulation_mode {
        info!("   Telemetry: simulated fleet");
    } else {
        info!("   Telemetry: {}", config.backend_url);
    }
    info!(
        "   Poll every {}ms, alerts every {}ms",
        config.poll_interval_ms, config.alert_interval_ms
    );

    // Initialize application state
    let state = AppState::new(config.clone())?;

    if config.autostart_tracking {
        state.tracker.start_tracking();
    }
    let metrics_task = state.spawn_metrics_updater();

    // Create router
    let app = create_router(state.clone());
    info!("Routes configured");

    // Start API server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("API server listening on http://{}", addr);
    info!("Stream available at ws://{}/api/v1/stream", addr);
    info!("Metrics available at http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.tracker.stop_tracking().await;
    metrics_task.abort();

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleet_api=debug,fleet_tracker=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        }
    }
}
