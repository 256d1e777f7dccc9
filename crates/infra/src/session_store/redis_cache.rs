//! Redis-backed session cache.
//!
//! Records are stored as JSON under `{prefix}{session_id}` with a millisecond
//! TTL (`SET ... PX`). Redis expiry is the only eviction mechanism besides
//! explicit `DEL`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use forgeguard_auth::SessionRecord;
use forgeguard_core::SessionId;

use super::{SessionCache, StoreError};

const DEFAULT_KEY_PREFIX: &str = "forgeguard:session:";

#[derive(Debug, Clone)]
pub struct RedisSessionCache {
    client: Arc<redis::Client>,
    prefix: String,
}

impl RedisSessionCache {
    /// * `redis_url` - e.g. "redis://localhost:6379"
    /// * `prefix` - key prefix (default: "forgeguard:session:")
    pub fn new(redis_url: impl AsRef<str>, prefix: Option<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Unavailable(format!("redis connection: {e}")))?;

        Ok(Self {
            client: Arc::new(client),
            prefix: prefix.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
        })
    }

    fn key(&self, id: SessionId) -> String {
        format!("{}{}", self.prefix, id)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Unavailable(format!("redis connection: {e}")))
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn get(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(format!("redis GET: {e}")))?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| StoreError::Serialization(format!("session record: {e}")))
        })
        .transpose()
    }

    async fn set(&self, record: &SessionRecord, ttl: Duration) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)
            .map_err(|e| StoreError::Serialization(format!("session record: {e}")))?;
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(self.key(record.session.id))
            .arg(json)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(format!("redis SET: {e}")))
    }

    async fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(self.key(id))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(format!("redis DEL: {e}")))
    }
}
