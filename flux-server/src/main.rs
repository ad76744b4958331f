//! Flux messaging server.
//!
//! An axum server that authenticates WebSocket clients by bearer token,
//! persists their direct messages and delivers them live to every connection
//! of the recipient, alongside the REST messaging endpoints.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080
//! FLUX_JWT_SECRET=change-me cargo run --bin flux-server
//!
//! # Run on custom address
//! cargo run --bin flux-server -- --bind 127.0.0.1:9000 --jwt-secret change-me
//! ```

use clap::Parser;
use flux_server::config::{ServerCliArgs, ServerConfig};
use flux_server::gateway::MemoryGateway;
use flux_server::server;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting flux messaging server");

    let gateway = MemoryGateway::new();
    for seed in &config.seed_users {
        match gateway.create_user(&seed.username, &seed.email) {
            Ok(user) => tracing::info!(user_id = %user.id, username = %user.username, "seeded user"),
            Err(e) => tracing::warn!(username = %seed.username, error = %e, "skipping seed user"),
        }
    }

    match server::start_server(&config, gateway).await {
        Ok(running) => {
            tracing::info!(addr = %running.addr, "server listening");
            if let Err(e) = running.handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
