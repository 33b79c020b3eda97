//! Sudoku Duel Server
//!
//! Boots the WebSocket server over a fresh game service. Configuration comes
//! from `SUDOKU_*` environment variables, log filtering from `RUST_LOG`.

use std::sync::Arc;
use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sudoku_duel::{GameServer, ServerConfig, ServiceConfig, SudokuService, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Sudoku Duel Server v{}", VERSION);

    let service_config = ServiceConfig::from_env().context("invalid service configuration")?;
    let server_config = ServerConfig {
        poll_interval: service_config.poll_timeout,
        ..ServerConfig::from_env().context("invalid server configuration")?
    };

    info!(
        default_size = %service_config.default_size,
        queue_policy = ?service_config.queue_policy,
        max_connections = server_config.max_connections,
        "Configuration loaded"
    );

    let service = Arc::new(SudokuService::new(service_config));
    let server = Arc::new(GameServer::new(server_config, service));

    let running = server.clone();
    let mut handle = tokio::spawn(async move { running.run().await });

    tokio::select! {
        result = &mut handle => {
            result.context("server task panicked")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("Ctrl-C received, shutting down");
            server.shutdown();
            handle.await.context("server task panicked")??;
        }
    }

    info!("Server stopped");
    Ok(())
}
