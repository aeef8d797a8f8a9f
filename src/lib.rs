//! # Turnkeeper Coordination Server
//!
//! A horizontally-scalable real-time turn-timer coordination server: many
//! controllers attach to a shared session over WebSocket, one player's
//! clock ticks down at a time, and every instance in the cluster sees the
//! same state through a shared Store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      TURNKEEPER SERVER                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  core/        - Ids, reconnect tokens, name sanitization          │
//! │                                                                    │
//! │  game/         - Session/player data model and operations         │
//! │  ├── state.rs  - Session, Player, Settings                        │
//! │  ├── ops.rs    - Mutating operations, authorization                │
//! │  ├── tick.rs   - Per-tick clock advancement                       │
//! │  └── events.rs - Internal events emitted by ops/tick               │
//! │                                                                    │
//! │  store/        - State Store: memory or Redis-primary             │
//! │  cache/        - Read-through TTL cache in front of the Store      │
//! │  lock/         - Per-session named mutex                          │
//! │  bus/          - Local + cross-instance event fan-out             │
//! │                                                                    │
//! │  network/      - WebSocket transport and wire protocol            │
//! │  ├── server.rs     - Accept loop, per-connection tasks            │
//! │  ├── protocol.rs   - Inbound/outbound message shapes               │
//! │  ├── dispatcher.rs - Rate limiting, routing, authorization glue    │
//! │  └── ratelimit.rs  - Sliding-window limiter                        │
//! │                                                                    │
//! │  lifecycle/    - Creation, restoration, idle cleanup, shutdown     │
//! │  http/         - /health, /metrics, /api/games                    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutating inbound message flows: Dispatcher → session lock →
//! Cache/Store load → `game::ops` mutation → persist → Bus broadcast. The
//! Tick Engine (`game::tick`) runs independently per running session,
//! writing through the same lock.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod bus;
pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod game;
pub mod http;
pub mod lifecycle;
pub mod lock;
pub mod metrics;
pub mod network;
pub mod store;

pub use config::Config;
pub use error::CoreError;
pub use game::{GameEvent, Mode, Player, Session, Settings, Status};

/// Crate version, surfaced by `/health`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
