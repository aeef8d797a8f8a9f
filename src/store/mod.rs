//! State Store (§4.1): the single source of truth for session bytes.
//!
//! Two implementors share one contract so the rest of the crate never
//! branches on which is active: [`memory::MemoryStore`] for a single
//! instance, [`redis::RedisStore`] for a horizontally-scaled deployment.
//! Callers select one at startup via [`crate::config::Config`] and hold it
//! behind a `dyn Store`.

pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::game::state::Session;

/// Outcome of [`Store::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// No prior state existed at this id; `state` is now stored.
    Created,
    /// State already existed; the store was not modified.
    Exists,
}

/// Outcome of [`Store::update`].
#[derive(Debug)]
pub enum UpdateOutcome {
    /// The transform ran and the returned state is now persisted.
    Updated(Session),
    /// No state existed at this id.
    NotFound,
    /// The retry budget was exhausted racing a concurrent writer.
    Conflict,
}

/// A handler invoked for every message published on a subscribed channel.
/// Implementors must not block; dispatch is fire-and-forget from the
/// publisher's perspective (§4.1/§4.6).
pub type SubscriptionHandler = std::sync::Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// The State Store contract (§4.1). Every method returns a definite
/// success/failure; none silently coerce a backend error into an empty
/// result.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the current snapshot for `id`, or `None` if absent.
    async fn get(&self, id: &str) -> Result<Option<Session>, CoreError>;

    /// Atomic set-if-absent with `ttl`.
    async fn create(&self, id: &str, state: &Session, ttl: std::time::Duration) -> Result<CreateOutcome, CoreError>;

    /// Optimistic read-modify-write: fetch the current state, apply
    /// `transform`, and persist the result with `ttl`. Retries internally
    /// per §4.1; only exhaustion surfaces as [`UpdateOutcome::Conflict`].
    async fn update(
        &self,
        id: &str,
        ttl: std::time::Duration,
        transform: &mut (dyn FnMut(&mut Session) + Send),
    ) -> Result<UpdateOutcome, CoreError>;

    /// Remove `id` unconditionally.
    async fn delete(&self, id: &str) -> Result<(), CoreError>;

    /// Whether state exists at `id`.
    async fn exists(&self, id: &str) -> Result<bool, CoreError>;

    /// A non-blocking, possibly-inconsistent-across-batches snapshot of
    /// every stored session id. Reservation marker keys are excluded.
    async fn scan_ids(&self) -> Result<Vec<String>, CoreError>;

    /// Atomic set-if-absent on a distinct "reserved" marker key, used by
    /// the lifecycle manager to claim an id before the session itself
    /// exists (§4.8).
    async fn reserve_id(&self, id: &str, ttl: std::time::Duration) -> Result<bool, CoreError>;

    /// Publish `bytes` on `channel`. Failures are logged by the caller and
    /// must never fail the mutation that triggered them (§4.6/§7).
    async fn publish(&self, channel: &str, bytes: &[u8]) -> Result<(), CoreError>;

    /// Register `handler` to run for every message published on `channel`.
    async fn subscribe(&self, channel: &str, handler: SubscriptionHandler) -> Result<(), CoreError>;
}
