//! Flight Relay Server - real-time multiplayer position relay
//!
//! Clients join over a WebSocket, stream their aircraft state, and receive
//! the aircraft within visibility range on a fixed schedule:
//! - Shared player registry with proximity queries
//! - Periodic per-player snapshots and staleness reaping
//! - Plain or TLS transport depending on the certificate files present

mod app;
mod config;
mod http;
mod relay;
mod util;
mod ws;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Flight Relay Server");
    info!("Server address: {}", config.server_addr);

    // Create application state and serve until shutdown
    let state = AppState::new(config);
    app::server::run(state).await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}
