//! RPS Arena Server
//!
//! Runs the match server until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rps_arena::{
    network::{AuthConfig, CoordinatorConfig, Fanout, GameServer, MatchCoordinator, ServerConfig},
    store::{GameStore, InMemoryStore},
    VERSION, WIN_THRESHOLD,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("RPS Arena Server v{}", VERSION);
    info!("Matches are first to {} round wins", WIN_THRESHOLD);

    let server_config = ServerConfig::from_env();
    let coordinator_config = CoordinatorConfig::from_env();
    let auth_config = AuthConfig::from_env();
    if !auth_config.is_configured() {
        warn!("No AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set, every login will be refused");
    }

    let store: Arc<dyn GameStore> = Arc::new(InMemoryStore::new());
    warn!("Using the in-memory store, nothing survives a restart");
    let (coordinator, writer) = MatchCoordinator::new(coordinator_config, store, Fanout::default());
    let coordinator = Arc::new(coordinator);

    // only finds matches once a durable GameStore replaces the in-memory one
    match coordinator.restore_open_matches().await {
        Ok(count) => info!("Open matches restored: {}", count),
        Err(e) => warn!("Could not restore open matches: {}", e),
    }

    let server = Arc::new(GameServer::new(server_config, auth_config, coordinator.clone()));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await.context("game server failed")?;

    // let connections send their shutdown frames and abandon their matches
    tokio::time::sleep(Duration::from_millis(500)).await;
    coordinator.flush().await;
    drop(server);
    drop(coordinator);
    if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
        warn!("Record writer did not drain in time");
    }

    info!("Server stopped");
    Ok(())
}
