//! Read-through TTL cache in front of the [`crate::store::Store`] (§4.2).
//!
//! Every entry remembers the wall-clock time it was last refreshed from
//! the Store. A lookup within [`crate::config::CACHE_TTL`] of that refresh
//! is served from memory; anything older falls through to the Store and
//! re-populates the entry. A background janitor evicts entries past twice
//! the TTL so a cache that stops being read doesn't grow forever.
//!
//! Invalidation arrives from the Store's `cache:invalidate:{id}` channel
//! (subscribed by [`crate::lifecycle`]); this module only needs to drop
//! the entry and, per §4.2, ignore invalidations stamped by this same
//! instance to avoid a pointless immediate self-refetch.

use std::time::Instant;

use dashmap::DashMap;

use crate::config::CACHE_TTL;
use crate::game::state::Session;

struct Entry {
    session: Session,
    refreshed_at: Instant,
}

/// Read-through TTL cache keyed by session id.
pub struct SessionCache {
    entries: DashMap<String, Entry>,
    instance_id: String,
}

impl SessionCache {
    /// Construct an empty cache. `instance_id` is compared against the
    /// stamp on incoming invalidation messages to filter out this
    /// instance's own writes (§4.2).
    pub fn new(instance_id: String) -> Self {
        Self { entries: DashMap::new(), instance_id }
    }

    /// This cache's instance stamp, used when publishing invalidations.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Return a cached, unexpired snapshot for `id`, if any. Does not
    /// touch the Store — callers that get `None` are expected to load
    /// from the Store and call [`SessionCache::populate`].
    pub fn get_fresh(&self, id: &str) -> Option<Session> {
        let entry = self.entries.get(id)?;
        if entry.refreshed_at.elapsed() < CACHE_TTL {
            Some(entry.session.clone())
        } else {
            None
        }
    }

    /// Record a freshly loaded snapshot, marking it refreshed now.
    pub fn populate(&self, id: &str, session: Session) {
        self.entries.insert(id.to_string(), Entry { session, refreshed_at: Instant::now() });
    }

    /// Drop a cached entry, e.g. on invalidation or session close.
    pub fn invalidate(&self, id: &str) {
        self.entries.remove(id);
    }

    /// Handle a `cache:invalidate:{id}` message stamped with the
    /// publishing instance id. Self-stamped messages are ignored, since
    /// this instance already applied the write that triggered them.
    pub fn handle_invalidation(&self, id: &str, stamped_instance_id: &str) {
        if stamped_instance_id != self.instance_id {
            self.invalidate(id);
        }
    }

    /// Number of entries currently held, for the `/health` and metrics
    /// boundary.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict every entry older than twice the TTL. Intended to be driven
    /// by a periodic task at `CACHE_TTL * 2`.
    pub fn sweep_expired(&self) {
        let cutoff = CACHE_TTL * 2;
        self.entries.retain(|_, entry| entry.refreshed_at.elapsed() < cutoff);
    }
}

/// Spawn the janitor task that periodically calls [`SessionCache::sweep_expired`].
pub fn spawn_janitor(cache: std::sync::Arc<SessionCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_TTL * 2);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            cache.sweep_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Mode, Settings};

    fn sample(id: &str) -> Session {
        Session::new(id.to_string(), "Test".to_string(), Mode::Casual, Settings::default())
    }

    #[test]
    fn populate_then_get_fresh_returns_the_entry() {
        let cache = SessionCache::new("inst-a".to_string());
        cache.populate("ABCDEF", sample("ABCDEF"));
        assert!(cache.get_fresh("ABCDEF").is_some());
    }

    #[test]
    fn missing_entry_is_none() {
        let cache = SessionCache::new("inst-a".to_string());
        assert!(cache.get_fresh("ZZZZZZ").is_none());
    }

    #[test]
    fn invalidation_from_another_instance_drops_the_entry() {
        let cache = SessionCache::new("inst-a".to_string());
        cache.populate("ABCDEF", sample("ABCDEF"));
        cache.handle_invalidation("ABCDEF", "inst-b");
        assert!(cache.get_fresh("ABCDEF").is_none());
    }

    #[test]
    fn self_stamped_invalidation_is_ignored() {
        let cache = SessionCache::new("inst-a".to_string());
        cache.populate("ABCDEF", sample("ABCDEF"));
        cache.handle_invalidation("ABCDEF", "inst-a");
        assert!(cache.get_fresh("ABCDEF").is_some());
    }
}
