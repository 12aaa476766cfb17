//! # vizora-device
//!
//! Agent binary for a Vizora playback device. Pairs the device on first
//! boot, then keeps the content cache and the offline event queue running
//! until interrupted.

use tracing::info;
use tracing_subscriber::EnvFilter;

use vizora_device::{Agent, DeviceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vizora_device=debug,vizora_store=info")),
        )
        .with_target(true)
        .init();

    info!("Starting Vizora device agent v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = DeviceConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Boot (pairs first if needed; interruptible)
    // -----------------------------------------------------------------------
    let agent = tokio::select! {
        agent = Agent::boot(config) => agent?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C before boot completed");
            return Ok(());
        }
    };

    // -----------------------------------------------------------------------
    // 4. Run until shutdown
    // -----------------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");
    agent.shutdown().await;

    Ok(())
}
