//! acrpc - AC/RPC reference responder
//!
//! Serves the built-in echo, sink and fail handlers over TCP.

use acrpc_server::handlers::{builtin_router, ops};
use acrpc_server::{Config, Server, ServerConfig};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if ACRPC_SERVER_CONFIG is set, then env overrides)
    let config_path = std::env::var("ACRPC_SERVER_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Invalid environment configuration ({}), using defaults", e);
            Config::default()
        }
    };

    tracing::info!("Starting acrpc responder");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  I/O timeout: {}s", config.network.io_timeout_secs);
    tracing::info!(
        "  Limits: payload {} bytes, content {} bytes",
        config.limits.max_payload_size,
        config.limits.max_content_size
    );
    tracing::info!(
        "  Operations: echo={}, sink={}, fail={}",
        ops::ECHO,
        ops::SINK,
        ops::FAIL
    );

    let server = Server::bind(ServerConfig::from(&config), Arc::new(builtin_router())).await?;
    let server = Arc::new(server);

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    let stats = server.stats();
    tracing::info!(
        "Server stopped ({} connections, {} requests, {} errors)",
        stats.connections_total.load(Ordering::Relaxed),
        stats.requests_total.load(Ordering::Relaxed),
        stats.errors_total.load(Ordering::Relaxed)
    );
    Ok(())
}
