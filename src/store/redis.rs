//! Redis-primary `Store` variant (§4.1).
//!
//! Keys: `game:{id}` (session JSON, TTL'd), `game:{id}:reserved` (id
//! reservation marker). `update` uses WATCH/MULTI/EXEC with a bounded
//! retry; iteration uses SCAN with `COUNT=100`, never `KEYS`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::config::{STORE_RETRY_ATTEMPTS, STORE_RETRY_BACKOFF_UNIT};
use crate::error::CoreError;
use crate::game::state::Session;
use crate::store::{CreateOutcome, Store, SubscriptionHandler, UpdateOutcome};

fn state_key(id: &str) -> String {
    format!("game:{id}")
}

fn reserved_key(id: &str) -> String {
    format!("game:{id}:reserved")
}

/// Redis-backed `Store`, built from a single multiplexed connection.
pub struct RedisStore {
    manager: ConnectionManager,
    client: redis::Client,
}

impl RedisStore {
    /// Connect to `redis_url` and build the connection manager used for
    /// every command. Reconnection/backoff is handled internally by
    /// `ConnectionManager`.
    pub async fn connect(redis_url: &str) -> Result<Self, CoreError> {
        let client = redis::Client::open(redis_url).map_err(|err| {
            warn!(error = %err, "failed to parse redis url");
            CoreError::StoreUnavailable
        })?;
        let manager = client.get_connection_manager().await.map_err(|err| {
            warn!(error = %err, "failed to connect to redis");
            CoreError::StoreUnavailable
        })?;
        Ok(Self { manager, client })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, CoreError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(state_key(id)).await.map_err(|err| {
            warn!(error = %err, %id, "redis get failed");
            CoreError::StoreUnavailable
        })?;
        match raw {
            Some(text) => {
                let session: Session = serde_json::from_str(&text).map_err(|_| CoreError::Internal)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn create(&self, id: &str, state: &Session, ttl: Duration) -> Result<CreateOutcome, CoreError> {
        let mut conn = self.conn();
        let body = serde_json::to_string(state).map_err(|_| CoreError::Internal)?;
        let set: bool = redis::cmd("SET")
            .arg(state_key(id))
            .arg(body)
            .arg("EX")
            .arg(ttl.as_secs())
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|err| {
                warn!(error = %err, %id, "redis create failed");
                CoreError::StoreUnavailable
            })?;
        Ok(if set { CreateOutcome::Created } else { CreateOutcome::Exists })
    }

    async fn update(
        &self,
        id: &str,
        ttl: Duration,
        transform: &mut (dyn FnMut(&mut Session) + Send),
    ) -> Result<UpdateOutcome, CoreError> {
        let key = state_key(id);
        for attempt in 1..=STORE_RETRY_ATTEMPTS {
            let mut conn = self.conn();
            let () = redis::cmd("WATCH").arg(&key).query_async(&mut conn).await.map_err(|err| {
                warn!(error = %err, %id, "redis watch failed");
                CoreError::StoreUnavailable
            })?;

            let raw: Option<String> = conn.get(&key).await.map_err(|err| {
                warn!(error = %err, %id, "redis get-under-watch failed");
                CoreError::StoreUnavailable
            })?;
            let Some(raw) = raw else {
                let () = redis::cmd("UNWATCH").query_async(&mut conn).await.ok().unwrap_or(());
                return Ok(UpdateOutcome::NotFound);
            };

            let mut session: Session = serde_json::from_str(&raw).map_err(|_| CoreError::Internal)?;
            transform(&mut session);
            let body = serde_json::to_string(&session).map_err(|_| CoreError::Internal)?;

            let mut pipe = redis::pipe();
            pipe.atomic().set_ex(&key, body, ttl.as_secs());
            let result: Option<()> = pipe.query_async(&mut conn).await.map_err(|err| {
                warn!(error = %err, %id, "redis exec failed");
                CoreError::StoreUnavailable
            })?;

            if result.is_some() {
                return Ok(UpdateOutcome::Updated(session));
            }

            debug!(%id, attempt, "optimistic update lost the race, retrying");
            tokio::time::sleep(STORE_RETRY_BACKOFF_UNIT * attempt).await;
        }
        Ok(UpdateOutcome::Conflict)
    }

    async fn delete(&self, id: &str) -> Result<(), CoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.del(state_key(id)).await.map_err(|err| {
            warn!(error = %err, %id, "redis delete failed");
            CoreError::StoreUnavailable
        })?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, CoreError> {
        let mut conn = self.conn();
        let exists: bool = conn.exists(state_key(id)).await.map_err(|err| {
            warn!(error = %err, %id, "redis exists failed");
            CoreError::StoreUnavailable
        })?;
        Ok(exists)
    }

    async fn scan_ids(&self) -> Result<Vec<String>, CoreError> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut ids = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("game:*")
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|err| {
                    warn!(error = %err, "redis scan failed");
                    CoreError::StoreUnavailable
                })?;
            for key in keys {
                if let Some(id) = key.strip_prefix("game:") {
                    if !id.ends_with(":reserved") {
                        ids.push(id.to_string());
                    }
                }
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(ids)
    }

    async fn reserve_id(&self, id: &str, ttl: Duration) -> Result<bool, CoreError> {
        let mut conn = self.conn();
        let set: bool = redis::cmd("SET")
            .arg(reserved_key(id))
            .arg(1)
            .arg("EX")
            .arg(ttl.as_secs())
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|err| {
                warn!(error = %err, %id, "redis reserve failed");
                CoreError::StoreUnavailable
            })?;
        Ok(set)
    }

    async fn publish(&self, channel: &str, bytes: &[u8]) -> Result<(), CoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.publish(channel, bytes).await.map_err(|err| {
            warn!(error = %err, %channel, "redis publish failed");
            CoreError::StoreUnavailable
        })?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: SubscriptionHandler) -> Result<(), CoreError> {
        let client = self.client.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                let conn = match client.get_async_pubsub().await {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, %channel, "failed to open pubsub connection, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };
                let mut pubsub = conn;
                if let Err(err) = pubsub.subscribe(&channel).await {
                    warn!(error = %err, %channel, "failed to subscribe, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                let mut stream = pubsub.on_message();
                use futures_util::StreamExt;
                while let Some(msg) = stream.next().await {
                    let payload: Vec<u8> = msg.get_payload_bytes().to_vec();
                    handler(payload);
                }
                warn!(%channel, "pubsub stream ended, resubscribing");
            }
        });
        Ok(())
    }
}
