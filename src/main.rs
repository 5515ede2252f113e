//! Presence hub - Entry Point
//!
//! Loads configuration, starts the Hub actor and the TCP listener, and
//! accepts connections.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use presence_hub::{serve, ConnectionContext, Hub, MemoryStore, ServerConfig, SessionTable};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=presence_hub=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("presence_hub=info")),
        )
        .init();

    // Environment, with the bind address optionally given on the command line
    let config = ServerConfig::from_env()?;

    let sessions = SessionTable::from_pairs(config.load_sessions()?);
    info!("Loaded {} sessions", sessions.len());

    // Start TCP listener
    let listener = TcpListener::bind(&config.addr).await?;
    info!("Presence hub listening on {}", config.addr);

    // Create Hub actor channel and start
    let (hub, actor) = Hub::channel(config.router_capacity);
    tokio::spawn(actor.run());

    info!("Hub actor started");

    let ctx = ConnectionContext::new(
        hub,
        Arc::new(MemoryStore::new()),
        Arc::new(sessions),
        &config,
    );

    // Connection accept loop
    serve(listener, ctx).await;

    Ok(())
}
