//! # Beacon Server
//!
//! Realtime signaling and presence broker for peer-to-peer calls.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! beacond
//!
//! # Run with custom config
//! beacond  # reads beacon.toml from the usual locations
//!
//! # Run with environment variables
//! BEACON_PORT=8080 BEACON_HOST=0.0.0.0 beacond
//! ```

mod config;
mod gateway;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug,beacon_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Beacon server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
