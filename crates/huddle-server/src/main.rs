//! # Huddle Server
//!
//! Chat server delivering events over WebSocket push or HTTP long-polling.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Run with a config file in the working directory
//! cp huddle.example.toml huddle.toml && huddle
//!
//! # Run with an explicit config file
//! huddle /etc/huddle/huddle.toml
//!
//! # Run with environment variables
//! HUDDLE_PORT=8080 HUDDLE_POLL__TIMEOUT_MS=20000 huddle
//! ```

mod config;
mod error;
mod handlers;
mod metrics;
mod push;
mod room;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "huddle=debug,tenvis_huddle_core=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!(
        "Starting Huddle server on {}:{} (poll timeout {:?}, overlapping polls: {:?})",
        config.host,
        config.port,
        config.poll_timeout(),
        config.poll.waiter_policy
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
