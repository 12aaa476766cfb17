//! # vizora-server
//!
//! Pairing backend for Vizora displays.
//!
//! This binary provides:
//! - **Pairing sessions**: short-lived codes a display shows and an operator
//!   types into the dashboard
//! - **REST API** (axum) for creating, claiming and polling sessions
//! - **WebSocket event channel** pushing pairing updates to waiting frontends
//! - **Expiry sweep** that retires unclaimed codes

mod api;
mod config;
mod error;
mod pairing;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use vizora_shared::clock::SystemClock;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::pairing::PairingManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vizora_server=debug")),
        )
        .init();

    info!("Starting Vizora pairing server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    config.validate()?;
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let pairing = Arc::new(PairingManager::new(
        config.pairing()?,
        Arc::new(SystemClock),
    ));

    let http_addr = config.http_addr;
    let sweep_interval = config.sweep_interval;
    let app_state = AppState::new(pairing.clone(), config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let sweeper = pairing.spawn_sweeper(sweep_interval);
    info!(interval_secs = sweep_interval.as_secs(), "Pairing sweeper running");

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let result = tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(ref e) = result {
                tracing::error!(error = %e, "HTTP server failed");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    sweeper.shutdown().await;
    result
}
