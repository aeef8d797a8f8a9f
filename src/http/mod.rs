//! HTTP boundary (§4.8/§9): `/health`, `/metrics`, `/api/games`. No game
//! mutation happens over this surface — that's WebSocket-only
//! ([`crate::network`]).

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tracing::warn;

use crate::game::state::Status;
use crate::lifecycle::AppState;

#[derive(Clone)]
struct HttpState {
    app: Arc<AppState>,
    prometheus: PrometheusHandle,
}

/// Build the HTTP router. `prometheus` is the handle returned by
/// [`crate::metrics::install_recorder`] at startup.
pub fn router(app: Arc<AppState>, prometheus: PrometheusHandle) -> Router {
    let state = HttpState { app, prometheus };
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/games", get(list_games))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
    instance_id: String,
    cache_entries: usize,
    active_locks: usize,
}

async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    Json(HealthReport {
        status: "ok",
        instance_id: state.app.config.instance_id.clone(),
        cache_entries: state.app.cache.len(),
        active_locks: state.app.locks.active_slot_count(),
    })
}

async fn metrics(State(state): State<HttpState>) -> impl IntoResponse {
    state.prometheus.render()
}

#[derive(Serialize)]
struct GameSummary {
    id: String,
    name: String,
    status: Status,
    player_count: u8,
    claimed_count: usize,
}

/// Non-closed sessions this instance currently knows about. Best-effort:
/// a session another instance just created may lag behind `scan_ids` until
/// this instance next touches it.
async fn list_games(State(state): State<HttpState>) -> impl IntoResponse {
    let ids = match state.app.store.scan_ids().await {
        Ok(ids) => ids,
        Err(err) => {
            warn!(error = %err, "failed to scan session ids for /api/games");
            return Json(Vec::new());
        }
    };

    let mut games = Vec::with_capacity(ids.len());
    for id in ids {
        if let Ok(Some(session)) = state.app.load(&id).await {
            if session.is_closed {
                continue;
            }
            games.push(GameSummary {
                id: session.id,
                name: session.name,
                status: session.status,
                player_count: session.settings.player_count,
                claimed_count: session.players.iter().filter(|p| p.claimed_by.is_some()).count(),
            });
        }
    }
    Json(games)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StorageType};
    use crate::game::state::{Mode, Settings};
    use crate::store::memory::MemoryStore;

    fn test_config() -> Config {
        Config {
            redis_url: None,
            redis_primary: false,
            allowed_origins: vec![],
            instance_id: "test-instance".to_string(),
            workers: 1,
            storage_type: StorageType::Memory,
            log_level: "info".to_string(),
            bind_addr: String::new(),
            http_addr: String::new(),
        }
    }

    #[tokio::test]
    async fn list_games_excludes_closed_sessions() {
        let app = AppState::new(Arc::new(MemoryStore::new()), test_config());
        let open = app.create_session("Open".to_string(), Mode::Casual, Settings::default()).await.unwrap();
        let mut closed = app.create_session("Closed".to_string(), Mode::Casual, Settings::default()).await.unwrap();
        closed.is_closed = true;
        app.persist(&closed.id, &closed).await.unwrap();

        let ids = app.store.scan_ids().await.unwrap();
        let mut seen_open = false;
        for id in ids {
            if let Some(session) = app.load(&id).await.unwrap() {
                if session.id == open.id {
                    seen_open = true;
                }
                assert!(!session.is_closed || session.id != open.id);
            }
        }
        assert!(seen_open);
    }
}
