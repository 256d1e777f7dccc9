use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use forgeguard_auth::{Session, SessionRecord};
use forgeguard_core::{Clock, PrincipalId, SessionId};

use super::{SessionCache, SessionRepository, StoreError};

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

/// In-memory durable session store.
///
/// Intended for tests/dev. `set_offline(true)` makes every call fail, to
/// exercise outage handling.
#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<SessionId, Session>>,
    offline: AtomicBool,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("session store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        self.check_online()?;
        let map = self.sessions.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        self.check_online()?;
        let mut map = self.sessions.write().map_err(|_| poisoned())?;
        map.insert(session.id, session.clone());
        Ok(())
    }

    async fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        self.check_online()?;
        let mut map = self.sessions.write().map_err(|_| poisoned())?;
        map.remove(&id);
        Ok(())
    }

    async fn list_by_principal(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Vec<Session>, StoreError> {
        self.check_online()?;
        let map = self.sessions.read().map_err(|_| poisoned())?;
        Ok(map
            .values()
            .filter(|s| s.principal_id == principal_id)
            .cloned()
            .collect())
    }

    async fn extend(
        &self,
        id: SessionId,
        expires_at: DateTime<Utc>,
        last_active_at: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        self.check_online()?;
        let mut map = self.sessions.write().map_err(|_| poisoned())?;
        let Some(session) = map.get_mut(&id) else {
            return Ok(None);
        };
        session.expires_at = session.expires_at.max(expires_at);
        session.last_active_at = session.last_active_at.max(last_active_at);
        Ok(Some(session.clone()))
    }

    async fn replace_for_principal(&self, session: &Session) -> Result<Vec<SessionId>, StoreError> {
        self.check_online()?;
        // Single write lock: no reader sees both the old and the new session.
        let mut map = self.sessions.write().map_err(|_| poisoned())?;
        let revoked: Vec<SessionId> = map
            .values()
            .filter(|s| s.principal_id == session.principal_id && s.id != session.id)
            .map(|s| s.id)
            .collect();
        for id in &revoked {
            map.remove(id);
        }
        map.insert(session.id, session.clone());
        Ok(revoked)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_online()?;
        let mut map = self.sessions.write().map_err(|_| poisoned())?;
        let before = map.len();
        map.retain(|_, s| !s.is_expired(now));
        Ok((before - map.len()) as u64)
    }
}

/// In-memory session cache with per-entry TTL, driven by a `Clock`.
pub struct InMemorySessionCache {
    entries: RwLock<HashMap<SessionId, (SessionRecord, DateTime<Utc>)>>,
    clock: Arc<dyn Clock>,
    offline: AtomicBool,
}

impl InMemorySessionCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Deadline of a live entry (tests use this to check TTL capping).
    pub fn deadline(&self, id: SessionId) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let map = self.entries.read().ok()?;
        map.get(&id)
            .filter(|(_, deadline)| *deadline > now)
            .map(|(_, deadline)| *deadline)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.deadline(id).is_some()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("session cache offline".to_string()));
        }
        Ok(())
    }
}

impl core::fmt::Debug for InMemorySessionCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemorySessionCache")
            .field("offline", &self.offline)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionCache for InMemorySessionCache {
    async fn get(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        self.check_online()?;
        let now = self.clock.now();
        let mut map = self.entries.write().map_err(|_| poisoned())?;
        match map.get(&id) {
            Some((record, deadline)) if *deadline > now => Ok(Some(record.clone())),
            Some(_) => {
                map.remove(&id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, record: &SessionRecord, ttl: Duration) -> Result<(), StoreError> {
        self.check_online()?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Serialization(format!("ttl out of range: {e}")))?;
        let deadline = self.clock.now() + ttl;
        let mut map = self.entries.write().map_err(|_| poisoned())?;
        map.insert(record.session.id, (record.clone(), deadline));
        Ok(())
    }

    async fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        self.check_online()?;
        let mut map = self.entries.write().map_err(|_| poisoned())?;
        map.remove(&id);
        Ok(())
    }
}
