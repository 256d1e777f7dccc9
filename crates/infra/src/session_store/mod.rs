//! Two-tier session storage.
//!
//! - `SessionRepository`: durable system of record (Postgres, in-memory for dev)
//! - `SessionCache`: fast, time-bounded copies (Redis, in-memory for dev)
//! - `SessionStore`: the cache → store → cache-fill pipeline on top of both

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use forgeguard_auth::{Session, SessionRecord};
use forgeguard_core::{PrincipalId, SessionId};

mod in_memory;
mod postgres;
#[cfg(feature = "redis")]
mod redis_cache;
mod store;

pub use in_memory::{InMemorySessionCache, InMemorySessionRepository};
pub use postgres::PostgresSessionRepository;
#[cfg(feature = "redis")]
pub use redis_cache::RedisSessionCache;
pub use store::SessionStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable session storage (system of record).
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    /// Insert or overwrite.
    async fn put(&self, session: &Session) -> Result<(), StoreError>;

    /// Idempotent.
    async fn delete(&self, id: SessionId) -> Result<(), StoreError>;

    async fn list_by_principal(&self, principal_id: PrincipalId)
    -> Result<Vec<Session>, StoreError>;

    /// Slide an existing session forward, never backwards.
    ///
    /// Returns `None` when the session no longer exists; a deleted session is
    /// never recreated by this call.
    async fn extend(
        &self,
        id: SessionId,
        expires_at: DateTime<Utc>,
        last_active_at: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Delete every other session of `session.principal_id`, then insert `session`.
    ///
    /// The default awaits every delete before issuing the insert and is only
    /// correct when calls for the same principal never overlap. Backends that
    /// can run concurrently must override it and serialize per principal
    /// (one lock, or a transaction holding a per-principal lock).
    async fn replace_for_principal(&self, session: &Session) -> Result<Vec<SessionId>, StoreError> {
        let existing = self.list_by_principal(session.principal_id).await?;

        let mut revoked = Vec::with_capacity(existing.len());
        for old in existing.into_iter().filter(|s| s.id != session.id) {
            self.delete(old.id).await?;
            revoked.push(old.id);
        }

        self.put(session).await?;
        Ok(revoked)
    }

    /// Remove sessions whose `expires_at <= now`; returns how many were removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Fast session cache. Entries are best-effort copies.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn get(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError>;

    async fn set(&self, record: &SessionRecord, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, id: SessionId) -> Result<(), StoreError>;
}
