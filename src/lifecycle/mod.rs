//! Process-wide shared state, session creation/restoration, and the
//! background sweeps that keep the Store and Cache from growing forever
//! (§4.8).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::bus::FanOutBus;
use crate::cache::SessionCache;
use crate::config::{
    Config, ID_RESERVATION_ATTEMPTS, IDLE_CLEANUP_INTERVAL, IDLE_HARD_THRESHOLD,
    IDLE_NO_SUBSCRIBERS_THRESHOLD, PERSISTENCE_INTERVAL, REDIS_STATE_TTL, TICK_PERIOD,
    TOMBSTONE_RETENTION,
};
use crate::core::id::generate_session_id;
use crate::error::CoreError;
use crate::game::ops;
use crate::game::state::{now_ms, Mode, Session, Settings, Status};
use crate::game::tick;
use crate::lock::SessionLockTable;
use crate::network::dispatcher::{event_to_message, FeedbackStore};
use crate::network::protocol::ServerMessage;
use crate::store::{CreateOutcome, Store};

/// Everything a connection handler or background task needs: the shared
/// Store/Cache/Lock/Bus quartet, process configuration, and the
/// out-of-band feedback registry (§4.7's "bypasses the session lock
/// entirely" decision).
pub struct AppState {
    /// The State Store backend selected at startup.
    pub store: Arc<dyn Store>,
    /// Read-through cache in front of the Store.
    pub cache: Arc<SessionCache>,
    /// Per-session lock table.
    pub locks: Arc<SessionLockTable>,
    /// Local + cross-instance event fan-out.
    pub bus: Arc<FanOutBus>,
    /// In-memory feedback entries, keyed by id.
    pub feedback: Arc<FeedbackStore>,
    /// Process configuration.
    pub config: Config,
}

impl AppState {
    /// Construct shared state from a selected Store backend and config.
    pub fn new(store: Arc<dyn Store>, config: Config) -> Arc<Self> {
        let cache = Arc::new(SessionCache::new(config.instance_id.clone()));
        let bus = Arc::new(FanOutBus::new(store.clone(), config.instance_id.clone()));
        Arc::new(Self {
            store,
            cache,
            locks: Arc::new(SessionLockTable::new()),
            bus,
            feedback: Arc::new(FeedbackStore::new()),
            config,
        })
    }

    /// Create a new session, retrying id generation up to
    /// [`ID_RESERVATION_ATTEMPTS`] times on collision (§4.8).
    pub async fn create_session(&self, name: String, mode: Mode, settings: Settings) -> Result<Session, CoreError> {
        for _ in 0..ID_RESERVATION_ATTEMPTS {
            let id = generate_session_id();
            if !self.store.reserve_id(&id, REDIS_STATE_TTL).await? {
                continue;
            }
            let session = Session::new(id.clone(), name.clone(), mode.clone(), settings.clone());
            match self.store.create(&id, &session, REDIS_STATE_TTL).await? {
                CreateOutcome::Created => {
                    self.cache.populate(&id, session.clone());
                    return Ok(session);
                }
                CreateOutcome::Exists => continue,
            }
        }
        Err(CoreError::IdAllocationExhausted)
    }

    /// Load a session, serving from [`SessionCache`] when fresh and falling
    /// through to the Store otherwise (§4.2).
    pub async fn load(&self, id: &str) -> Result<Option<Session>, CoreError> {
        if let Some(session) = self.cache.get_fresh(id) {
            crate::metrics::record_cache_lookup(true);
            return Ok(Some(session));
        }
        crate::metrics::record_cache_lookup(false);
        let session = self.store.get(id).await?;
        if let Some(ref s) = session {
            self.cache.populate(id, s.clone());
        }
        Ok(session)
    }

    /// Load the authoritative current state directly from the Store,
    /// bypassing the cache. Used inside the session lock immediately
    /// before a mutation, since a peer instance may have written since
    /// this instance last refreshed its cache entry.
    pub async fn load_fresh_under_lock(&self, id: &str) -> Result<Option<Session>, CoreError> {
        self.store.get(id).await
    }

    /// Persist `session` as the new state at `id`, repopulate the cache,
    /// and notify peer instances to drop their own cached copy.
    pub async fn persist(&self, id: &str, session: &Session) -> Result<(), CoreError> {
        let overwritten = session.clone();
        let outcome = self
            .store
            .update(id, REDIS_STATE_TTL, &mut move |s: &mut Session| *s = overwritten.clone())
            .await?;
        match outcome {
            crate::store::UpdateOutcome::Updated(_) => {}
            crate::store::UpdateOutcome::NotFound => return Err(CoreError::GameNotFound),
            crate::store::UpdateOutcome::Conflict => {
                crate::metrics::record_store_retry();
                return Err(CoreError::OptimisticLockFailed);
            }
        }
        self.cache.populate(id, session.clone());
        let invalidation = serde_json::json!({ "instance_id": self.config.instance_id });
        if let Ok(bytes) = serde_json::to_vec(&invalidation) {
            let channel = format!("cache:invalidate:{id}");
            if let Err(err) = self.store.publish(&channel, &bytes).await {
                warn!(error = %err, %channel, "failed to publish cache invalidation");
            }
        }
        Ok(())
    }

    /// Subscribe this instance to every session's cache-invalidation
    /// channel as sessions are first touched. In practice this is wired
    /// per-session from [`AppState::ensure_invalidation_relay`], called
    /// once a session is loaded or created.
    pub async fn ensure_invalidation_relay(&self, id: &str) {
        let cache = self.cache.clone();
        let id_owned = id.to_string();
        let channel = format!("cache:invalidate:{id}");
        let handler: crate::store::SubscriptionHandler = Arc::new(move |bytes| {
            let cache = cache.clone();
            let id_owned = id_owned.clone();
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                if let Some(stamp) = value.get("instance_id").and_then(|v| v.as_str()) {
                    cache.handle_invalidation(&id_owned, stamp);
                }
            }
        });
        if let Err(err) = self.store.subscribe(&channel, handler).await {
            warn!(error = %err, %channel, "failed to subscribe to cache invalidation channel");
        }
    }
}

/// Restore this instance's view of every session recorded in the Store,
/// warming the cache and resuming the Tick Engine for anything left
/// `running` (§4.8 "Startup restoration").
pub async fn restore_on_startup(state: &Arc<AppState>) -> Result<(), CoreError> {
    let ids = state.store.scan_ids().await?;
    let mut restored = 0usize;
    for id in ids {
        if let Some(session) = state.store.get(&id).await? {
            if session.is_closed {
                continue;
            }
            state.cache.populate(&id, session.clone());
            restored += 1;
        }
    }
    info!(restored, "restored sessions from the store on startup");
    crate::metrics::set_sessions_in_memory(restored as f64);
    for _ in 0..restored {
        crate::metrics::record_session_restored();
    }
    Ok(())
}

/// Spawn the idle-cleanup sweep: closes sessions with no local subscribers
/// past [`IDLE_NO_SUBSCRIBERS_THRESHOLD`], or any session past
/// [`IDLE_HARD_THRESHOLD`] regardless of subscribers, then hard-deletes
/// tombstoned sessions past [`TOMBSTONE_RETENTION`] (§4.8).
pub fn spawn_idle_cleanup(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(IDLE_CLEANUP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(err) = sweep_idle_sessions(&state).await {
                warn!(error = %err, "idle cleanup sweep failed");
            }
        }
    })
}

async fn sweep_idle_sessions(state: &Arc<AppState>) -> Result<(), CoreError> {
    let now = now_ms();
    for id in state.store.scan_ids().await? {
        let Some(mut session) = state.store.get(&id).await? else { continue };
        if session.is_closed {
            let since_close = now.saturating_sub(session.last_activity);
            if since_close > TOMBSTONE_RETENTION.as_millis() as i64 {
                state.store.delete(&id).await?;
                state.cache.invalidate(&id);
            }
            continue;
        }
        let idle_ms = now.saturating_sub(session.last_activity);
        let no_subscribers = state.bus.local_subscriber_count(&id) == 0;
        let hard_expired = idle_ms > IDLE_HARD_THRESHOLD.as_millis() as i64;
        let soft_expired = no_subscribers && idle_ms > IDLE_NO_SUBSCRIBERS_THRESHOLD.as_millis() as i64;
        if hard_expired || soft_expired {
            session.is_closed = true;
            session.touch();
            state.persist(&id, &session).await?;
            crate::metrics::record_session_closed(if hard_expired { "hard_timeout" } else { "idle_no_subscribers" });
        }
    }
    Ok(())
}

/// Per-session bookkeeping for the Tick Engine, held independently of the
/// Store so that `elapsed_ms` reflects real wall-clock time between ticks
/// regardless of how often a tick is actually written through (§4.5/§9(d)).
struct TickClock {
    last_tick_ms: i64,
    last_persist_ms: i64,
}

/// Spawn the Tick Engine (§4.5): every [`TICK_PERIOD`], advance the active
/// player's clock in every `running` session by the elapsed wall-clock time
/// since its last tick and broadcast whatever events fell out. A tick that
/// only produces a `Tick` event is deliberately NOT written through to the
/// Store — only a `Warning`/`Timeout`/resolution, or a session that hasn't
/// been persisted in [`PERSISTENCE_INTERVAL`], triggers a write (§4.7.g,
/// §9(d)'s documented bounded crash-loss window). Runs as one sweep rather
/// than one task per session, matching the idle-cleanup sweep above — a
/// session with no active clock costs one cheap `Store::get` per period,
/// not a parked task.
pub fn spawn_tick_engine(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let clocks: Arc<DashMap<String, TickClock>> = Arc::new(DashMap::new());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_PERIOD);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(err) = tick_running_sessions(&state, &clocks).await {
                warn!(error = %err, "tick engine sweep failed");
            }
        }
    })
}

async fn tick_running_sessions(state: &Arc<AppState>, clocks: &Arc<DashMap<String, TickClock>>) -> Result<(), CoreError> {
    let now = now_ms();
    let persistence_interval_ms = PERSISTENCE_INTERVAL.as_millis() as i64;
    for id in state.store.scan_ids().await? {
        let Some(snapshot) = state.load(&id).await? else {
            clocks.remove(&id);
            continue;
        };
        if snapshot.status != Status::Running || snapshot.is_closed {
            clocks.remove(&id);
            continue;
        }

        let (elapsed_ms, due_for_persist) = {
            let mut clock = clocks
                .entry(id.clone())
                .or_insert_with(|| TickClock { last_tick_ms: now, last_persist_ms: now });
            let elapsed_ms = now.saturating_sub(clock.last_tick_ms).max(0);
            let due = now.saturating_sub(clock.last_persist_ms) >= persistence_interval_ms;
            clock.last_tick_ms = now;
            (elapsed_ms, due)
        };

        let events = state
            .locks
            .with_session_lock(&id, || async {
                let Some(mut session) = state.load_fresh_under_lock(&id).await? else {
                    return Ok(Vec::new());
                };
                if session.status != Status::Running || session.is_closed {
                    return Ok(Vec::new());
                }
                let mut events = tick::advance(&mut session, elapsed_ms);

                for event in events.clone() {
                    if let crate::game::GameEvent::Timeout { player_id } = event {
                        if session.controller_of(player_id).is_none() {
                            events.push(ops::auto_resolve_timeout(&mut session, player_id));
                        }
                    }
                }

                let meaningful = events.iter().any(|e| !matches!(e, crate::game::GameEvent::Tick { .. }));
                if meaningful || due_for_persist {
                    state.persist(&id, &session).await?;
                }
                Ok::<Vec<crate::game::GameEvent>, CoreError>(events)
            })
            .await??;

        let persisted = due_for_persist || events.iter().any(|e| !matches!(e, crate::game::GameEvent::Tick { .. }));
        if persisted {
            if let Some(mut clock) = clocks.get_mut(&id) {
                clock.last_persist_ms = now;
            }
        }

        let mut messages: Vec<ServerMessage> = events.iter().filter_map(event_to_message).collect();
        if events.iter().any(|e| matches!(e, crate::game::GameEvent::Timeout { .. })) {
            if let Some(session) = state.load(&id).await? {
                messages.push(ServerMessage::State { state: session });
            }
        }
        for message in &messages {
            if let Ok(json) = message.to_json() {
                state.bus.broadcast(&id, json.into_bytes()).await;
            }
        }
    }
    Ok(())
}

/// Auto-pause every running session with no local subscribers, used by the
/// connection-drop path (§4.4 "auto-pause").
pub async fn auto_pause_if_abandoned(state: &Arc<AppState>, id: &str) -> Result<(), CoreError> {
    if state.bus.local_subscriber_count(id) > 0 {
        return Ok(());
    }
    state
        .locks
        .with_session_lock(id, || async {
            let Some(mut session) = state.load_fresh_under_lock(id).await? else {
                return Ok(());
            };
            ops::auto_pause(&mut session);
            state.persist(id, &session).await?;
            Ok::<(), CoreError>(())
        })
        .await??;
    Ok(())
}

/// Graceful shutdown: stop accepting new work and give in-flight
/// connections [`crate::config::SHUTDOWN_DRAIN`] to finish before the
/// caller proceeds to hard-close listeners (§4.8/§5).
pub async fn drain_for_shutdown(grace: Duration) {
    info!(?grace, "draining connections before shutdown");
    tokio::time::sleep(grace).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn test_config() -> Config {
        Config {
            redis_url: None,
            redis_primary: false,
            allowed_origins: vec![],
            instance_id: "test-instance".to_string(),
            workers: 1,
            storage_type: crate::config::StorageType::Memory,
            log_level: "info".to_string(),
            bind_addr: String::new(),
            http_addr: String::new(),
        }
    }

    #[tokio::test]
    async fn create_session_populates_the_cache() {
        let state = AppState::new(Arc::new(MemoryStore::new()), test_config());
        let session = state.create_session("Test".to_string(), Mode::Casual, Settings::default()).await.unwrap();
        assert!(state.cache.get_fresh(&session.id).is_some());
    }

    #[tokio::test]
    async fn persist_round_trips_through_the_store() {
        let state = AppState::new(Arc::new(MemoryStore::new()), test_config());
        let mut session = state.create_session("Test".to_string(), Mode::Casual, Settings::default()).await.unwrap();
        session.name = "Renamed".to_string();
        state.persist(&session.id, &session).await.unwrap();
        let reloaded = state.store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(reloaded.name, "Renamed");
    }

    #[tokio::test]
    async fn restore_on_startup_warms_the_cache() {
        let state = AppState::new(Arc::new(MemoryStore::new()), test_config());
        let session = state.create_session("Test".to_string(), Mode::Casual, Settings::default()).await.unwrap();
        state.cache.invalidate(&session.id);
        restore_on_startup(&state).await.unwrap();
        assert!(state.cache.get_fresh(&session.id).is_some());
    }
}
