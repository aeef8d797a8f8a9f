//! Process configuration, read once at startup from the environment.

use std::time::Duration;

/// Which `Store` backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// In-process map; single instance only.
    Memory,
    /// Accepted for compatibility with `STORAGE_TYPE=sqlite` but not backed
    /// by a distinct `Store` impl (see DESIGN.md); falls back to `Memory`.
    Sqlite,
    /// Redis-primary, horizontally scalable.
    Redis,
}

/// Top-level process configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `REDIS_URL`. Presence alone enables the Redis-primary store.
    pub redis_url: Option<String>,
    /// `REDIS_PRIMARY`. Forces Redis-primary even without inferring it from
    /// `redis_url`, or can be used to force memory-only in a multi-node
    /// deployment that fronts Redis for some other reason (explicit wins).
    pub redis_primary: bool,
    /// `ALLOWED_ORIGINS`, comma-separated; `*.domain` matches subdomains.
    pub allowed_origins: Vec<String>,
    /// `INSTANCE_ID`; generated if unset.
    pub instance_id: String,
    /// `WORKERS`; advisory cluster size, defaults to 1.
    pub workers: usize,
    /// `STORAGE_TYPE`.
    pub storage_type: StorageType,
    /// `LOG_LEVEL`, passed straight to `tracing_subscriber::EnvFilter`.
    pub log_level: String,
    /// Bind address for the WebSocket acceptor.
    pub bind_addr: String,
    /// Bind address for the HTTP boundary (`/health`, `/metrics`, `/api/games`).
    pub http_addr: String,
}

/// Read-through cache TTL (§4.2).
pub const CACHE_TTL: Duration = Duration::from_secs(5);
/// Per-session lock acquisition timeout (§4.3/§5).
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
/// Store optimistic-update retry cap (§4.1/§5).
pub const STORE_RETRY_ATTEMPTS: u32 = 3;
/// Store optimistic-update backoff unit; actual sleep is this × attempt number.
pub const STORE_RETRY_BACKOFF_UNIT: Duration = Duration::from_millis(50);
/// Outbound per-subscriber buffer cap before eviction with code 1008 (§4.6).
pub const OUTBOUND_BUFFER_CAP_BYTES: usize = 1024 * 1024;
/// Tick Engine period (§4.5).
pub const TICK_PERIOD: Duration = Duration::from_millis(100);
/// Per-connection and per-IP rate limit window (§4.7).
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);
/// Per-connection and per-IP rate limit budget within the window (§4.7).
pub const RATE_LIMIT_MAX_MESSAGES: u32 = 20;
/// Idle cleanup sweep interval (§4.8).
pub const IDLE_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Idle threshold for closing a session with no local subscribers (§4.8).
pub const IDLE_NO_SUBSCRIBERS_THRESHOLD: Duration = Duration::from_secs(5 * 60);
/// Idle threshold for closing a session regardless of subscribers (§4.8).
pub const IDLE_HARD_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);
/// How long a closed (tombstoned) session survives in the Store before
/// being hard-deleted (§4.8).
pub const TOMBSTONE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
/// Graceful shutdown drain budget (§4.8/§5).
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);
/// Default Redis state-key TTL (§4.1).
pub const REDIS_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Reconnect token lifetime (§4.4/§4.9).
pub const RECONNECT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
/// Creation id-reservation attempt budget (§4.8).
pub const ID_RESERVATION_ATTEMPTS: u32 = 10;
/// Inbound frame size cap (§6).
pub const MAX_INBOUND_FRAME_BYTES: usize = 64 * 1024;
/// Player name length cap (§3/§6).
pub const MAX_NAME_LEN: usize = 50;
/// Periodic persistence interval, ADDED (§9 Open Question (d) resolution in
/// DESIGN.md) — bounds the crash-loss window for per-tick mutations that are
/// deliberately not written through.
pub const PERSISTENCE_INTERVAL: Duration = Duration::from_secs(30);

impl Config {
    /// Build configuration from the process environment. Unknown variables
    /// are ignored, as specified; missing ones take documented defaults.
    pub fn from_env() -> Self {
        let redis_url = std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty());
        let redis_primary = std::env::var("REDIS_PRIMARY")
            .ok()
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
            .unwrap_or(redis_url.is_some());

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let instance_id = std::env::var("INSTANCE_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let workers = std::env::var("WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&w: &usize| w > 0)
            .unwrap_or(1);

        let storage_type = match std::env::var("STORAGE_TYPE").ok().as_deref() {
            Some("redis") => StorageType::Redis,
            Some("sqlite") => StorageType::Sqlite,
            Some("memory") | None => {
                if redis_primary {
                    StorageType::Redis
                } else {
                    StorageType::Memory
                }
            }
            Some(_) => StorageType::Memory,
        };

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Self {
            redis_url,
            redis_primary,
            allowed_origins,
            instance_id,
            workers,
            storage_type,
            log_level,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            http_addr: std::env::var("HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:9090".to_string()),
        }
    }

    /// Whether an origin string is permitted under `ALLOWED_ORIGINS`,
    /// matching `*.domain` against any subdomain of `domain`.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        self.allowed_origins.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix("*.") {
                origin == suffix || origin.ends_with(&format!(".{suffix}"))
            } else {
                origin == pattern
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_origin_matches_subdomains() {
        let cfg = Config {
            redis_url: None,
            redis_primary: false,
            allowed_origins: vec!["*.example.com".to_string()],
            instance_id: "test".to_string(),
            workers: 1,
            storage_type: StorageType::Memory,
            log_level: "info".to_string(),
            bind_addr: String::new(),
            http_addr: String::new(),
        };

        assert!(cfg.origin_allowed("app.example.com"));
        assert!(cfg.origin_allowed("example.com"));
        assert!(!cfg.origin_allowed("example.org"));
    }

    #[test]
    fn empty_allowlist_permits_everything() {
        let cfg = Config {
            redis_url: None,
            redis_primary: false,
            allowed_origins: vec![],
            instance_id: "test".to_string(),
            workers: 1,
            storage_type: StorageType::Memory,
            log_level: "info".to_string(),
            bind_addr: String::new(),
            http_addr: String::new(),
        };
        assert!(cfg.origin_allowed("anything.example.net"));
    }
}
