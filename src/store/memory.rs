//! In-process `Store` variant (§4.1): a `DashMap` guarded per-entry, used
//! for single-instance deployments and in tests. `update` runs the
//! transform in place; `publish` dispatches synchronously to local
//! handlers, since there is no wire between "publisher" and "subscriber"
//! on a single instance.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::CoreError;
use crate::game::state::Session;
use crate::store::{CreateOutcome, Store, SubscriptionHandler, UpdateOutcome};

/// In-process `Store` backing. TTLs are accepted for interface parity with
/// [`crate::store::redis::RedisStore`] but are not enforced here — a
/// single instance's idle-cleanup sweep (§4.8) is what actually reclaims
/// memory, not the store.
#[derive(Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Session>,
    reserved: DashMap<String, ()>,
    subscribers: DashMap<String, Vec<SubscriptionHandler>>,
}

impl MemoryStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, CoreError> {
        Ok(self.sessions.get(id).map(|entry| entry.value().clone()))
    }

    async fn create(&self, id: &str, state: &Session, _ttl: Duration) -> Result<CreateOutcome, CoreError> {
        match self.sessions.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(CreateOutcome::Exists),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(state.clone());
                Ok(CreateOutcome::Created)
            }
        }
    }

    async fn update(
        &self,
        id: &str,
        _ttl: Duration,
        transform: &mut (dyn FnMut(&mut Session) + Send),
    ) -> Result<UpdateOutcome, CoreError> {
        let Some(mut entry) = self.sessions.get_mut(id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        transform(entry.value_mut());
        Ok(UpdateOutcome::Updated(entry.value().clone()))
    }

    async fn delete(&self, id: &str) -> Result<(), CoreError> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, CoreError> {
        Ok(self.sessions.contains_key(id))
    }

    async fn scan_ids(&self) -> Result<Vec<String>, CoreError> {
        let seen: HashSet<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        Ok(seen.into_iter().collect())
    }

    async fn reserve_id(&self, id: &str, _ttl: Duration) -> Result<bool, CoreError> {
        match self.reserved.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Ok(true)
            }
        }
    }

    async fn publish(&self, channel: &str, bytes: &[u8]) -> Result<(), CoreError> {
        if let Some(handlers) = self.subscribers.get(channel) {
            for handler in handlers.value() {
                handler(bytes.to_vec());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: SubscriptionHandler) -> Result<(), CoreError> {
        self.subscribers.entry(channel.to_string()).or_default().push(handler);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Mode, Settings};

    fn sample_session(id: &str) -> Session {
        Session::new(id.to_string(), "Test".to_string(), Mode::Casual, Settings::default())
    }

    #[tokio::test]
    async fn create_then_create_again_reports_exists() {
        let store = MemoryStore::new();
        let s = sample_session("ABCDEF");
        assert_eq!(store.create("ABCDEF", &s, Duration::from_secs(1)).await.unwrap(), CreateOutcome::Created);
        assert_eq!(store.create("ABCDEF", &s, Duration::from_secs(1)).await.unwrap(), CreateOutcome::Exists);
    }

    #[tokio::test]
    async fn update_missing_id_reports_not_found() {
        let store = MemoryStore::new();
        let mut transform = |_: &mut Session| {};
        let outcome = store.update("ZZZZZZ", Duration::from_secs(1), &mut transform).await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::NotFound));
    }

    #[tokio::test]
    async fn update_applies_the_transform_in_place() {
        let store = MemoryStore::new();
        let s = sample_session("ABCDEF");
        store.create("ABCDEF", &s, Duration::from_secs(1)).await.unwrap();
        let mut transform = |session: &mut Session| session.name = "Renamed".to_string();
        let outcome = store.update("ABCDEF", Duration::from_secs(1), &mut transform).await.unwrap();
        match outcome {
            UpdateOutcome::Updated(updated) => assert_eq!(updated.name, "Renamed"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reserve_id_is_single_use() {
        let store = MemoryStore::new();
        assert!(store.reserve_id("ABCDEF", Duration::from_secs(1)).await.unwrap());
        assert!(!store.reserve_id("ABCDEF", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn publish_reaches_a_local_subscriber() {
        use std::sync::{Arc, Mutex};

        let store = MemoryStore::new();
        let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        store
            .subscribe("broadcast:ABCDEF", std::sync::Arc::new(move |bytes| sink.lock().unwrap().push(bytes)))
            .await
            .unwrap();
        store.publish("broadcast:ABCDEF", b"hello").await.unwrap();
        assert_eq!(received.lock().unwrap().as_slice(), [b"hello".to_vec()]);
    }
}
