//! Process entry point: reads configuration, builds the shared application
//! state, and runs the WebSocket and HTTP listeners side by side until a
//! shutdown signal arrives.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use turnkeeper::config::Config;
use turnkeeper::lifecycle::{self, AppState};
use turnkeeper::network::server::{GameServer, ServerConfig};
use turnkeeper::store::memory::MemoryStore;
use turnkeeper::store::redis::RedisStore;
use turnkeeper::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(
        instance_id = %config.instance_id,
        storage = ?config.storage_type,
        bind_addr = %config.bind_addr,
        http_addr = %config.http_addr,
        "starting turnkeeper"
    );

    let store: Arc<dyn Store> = match config.storage_type {
        turnkeeper::config::StorageType::Redis => {
            let redis_url = config
                .redis_url
                .clone()
                .ok_or("REDIS_URL must be set when STORAGE_TYPE resolves to redis")?;
            Arc::new(RedisStore::connect(&redis_url).await?)
        }
        turnkeeper::config::StorageType::Sqlite => {
            tracing::warn!("STORAGE_TYPE=sqlite has no dedicated Store backend; falling back to in-process memory");
            Arc::new(MemoryStore::new())
        }
        turnkeeper::config::StorageType::Memory => Arc::new(MemoryStore::new()),
    };

    let state = AppState::new(store, config.clone());
    lifecycle::restore_on_startup(&state).await?;

    let prometheus = turnkeeper::metrics::install_recorder();

    lifecycle::spawn_idle_cleanup(state.clone());
    turnkeeper::cache::spawn_janitor(state.cache.clone());
    lifecycle::spawn_tick_engine(state.clone());

    let game_server = Arc::new(GameServer::new(
        ServerConfig { bind_addr: config.bind_addr.clone(), ..ServerConfig::default() },
        state.clone(),
    ));

    let http_router = turnkeeper::http::router(state.clone(), prometheus);
    let http_listener = tokio::net::TcpListener::bind(&config.http_addr).await?;

    let ws_server = game_server.clone();
    let ws_handle = tokio::spawn(async move {
        if let Err(err) = ws_server.run().await {
            tracing::error!(error = %err, "websocket server exited");
        }
    });

    let http_handle = tokio::spawn(async move { axum::serve(http_listener, http_router).await });

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("ctrl-c received, shutting down");

    game_server.shutdown().await;
    ws_handle.abort();
    http_handle.abort();

    Ok(())
}
