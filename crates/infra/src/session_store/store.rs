use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use forgeguard_auth::{DeviceInfo, Principal, Session, SessionPolicy, SessionRecord};
use forgeguard_core::{Clock, PrincipalId, SessionId};

use super::{SessionCache, SessionRepository, StoreError};

/// Two-tier session store.
///
/// Reads go cache → durable store → cache fill. The durable store is
/// authoritative: its failures propagate, cache failures are logged and
/// swallowed. Removal deletes the row before evicting, and every cache fill
/// re-reads the row afterwards, so a fill racing a removal cannot leave a
/// copy behind. Renewal runs on spawned tasks and never reports back to the
/// request that triggered it.
pub struct SessionStore {
    cache: Arc<dyn SessionCache>,
    repository: Arc<dyn SessionRepository>,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(
        cache: Arc<dyn SessionCache>,
        repository: Arc<dyn SessionRepository>,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            repository,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Look a session up. `Ok(None)` means unknown or expired.
    pub async fn resolve(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let now = self.clock.now();

        if let Some(record) = self.cached(id, now).await {
            return Ok(Some(record));
        }

        let Some(session) = self.repository.get(id).await? else {
            debug!(session_id = %id, "session not in durable store");
            return Ok(None);
        };

        if session.is_expired(now) {
            debug!(session_id = %id, expires_at = %session.expires_at, "durable session expired");
            return Ok(None);
        }

        let record = SessionRecord::bare(session);
        if !self.fill(&record, now).await {
            return Ok(None);
        }
        if !self.still_live(id).await {
            debug!(session_id = %id, "session removed while resolving");
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Cache a resolved principal next to its session so later requests skip
    /// the directory lookup. Best-effort; nothing is left cached for a
    /// session that was destroyed or revoked in the meantime.
    pub async fn attach_principal(&self, session: &Session, principal: &Principal) {
        let record = SessionRecord {
            session: session.clone(),
            principal: Some(principal.clone()),
        };
        if self.fill(&record, self.clock.now()).await {
            self.still_live(session.id).await;
        }
    }

    /// Start a session for `principal_id`, revoking all of its other sessions.
    pub async fn create(
        &self,
        principal_id: PrincipalId,
        device: DeviceInfo,
    ) -> Result<Session, StoreError> {
        self.create_revoking(principal_id, device)
            .await
            .map(|(session, _)| session)
    }

    /// Like [`SessionStore::create`], also returning the ids it revoked.
    pub async fn create_revoking(
        &self,
        principal_id: PrincipalId,
        device: DeviceInfo,
    ) -> Result<(Session, Vec<SessionId>), StoreError> {
        let now = self.clock.now();
        let session = Session::start(principal_id, device, now, &self.policy);

        // Durable revoke + insert first; the cache must not outlive the rows.
        let revoked = self.repository.replace_for_principal(&session).await?;
        for old in &revoked {
            self.evict(*old).await;
        }
        if !revoked.is_empty() {
            info!(
                principal_id = %principal_id,
                revoked = revoked.len(),
                "previous sessions revoked by new login"
            );
        }

        if self.fill(&SessionRecord::bare(session.clone()), now).await {
            // A concurrent login may already have revoked this one.
            self.still_live(session.id).await;
        }
        Ok((session, revoked))
    }

    /// Remove a session from both tiers. Destroying a missing session is fine.
    ///
    /// The row goes first: evicting first would let a concurrent cache miss
    /// re-read the row and fill it back.
    pub async fn destroy(&self, id: SessionId) -> Result<(), StoreError> {
        self.repository.delete(id).await?;
        self.evict(id).await;
        Ok(())
    }

    /// Slide the session window forward from now.
    ///
    /// The durable write and the cache update are attempted independently.
    /// Returns the durable result; `Ok(None)` means the session is gone.
    pub async fn renew(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let now = self.clock.now();
        let expires_at = now + self.policy.sliding_window;

        let durable = self.repository.extend(id, expires_at, now).await;

        if let Ok(None) = durable {
            // Destroyed meanwhile; make sure no cached copy keeps it alive.
            self.evict(id).await;
            return Ok(None);
        }

        let cached = match self.cache.get(id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(session_id = %id, error = %e, "session cache read failed during renewal");
                None
            }
        };

        if let Some(mut record) = cached {
            match &durable {
                Ok(Some(session)) => record.session = session.clone(),
                _ => record.session.renew(now, self.policy.sliding_window),
            }
            if self.fill(&record, now).await {
                self.still_live(id).await;
            }
        }

        durable
    }

    /// Fire-and-forget renewal. The handle is only useful to tests.
    pub fn schedule_renewal(self: &Arc<Self>, id: SessionId) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            match store.renew(id).await {
                Ok(Some(session)) => {
                    debug!(session_id = %id, expires_at = %session.expires_at, "session renewed")
                }
                Ok(None) => debug!(session_id = %id, "renewal skipped; session gone"),
                Err(e) => warn!(session_id = %id, error = %e, "session renewal dropped"),
            }
        })
    }

    /// Drop the cached copy only (e.g. after a role change).
    pub async fn evict(&self, id: SessionId) {
        if let Err(e) = self.cache.delete(id).await {
            warn!(session_id = %id, error = %e, "session cache delete failed");
        }
    }

    /// Drop cached copies of every session of a principal.
    pub async fn evict_principal(&self, principal_id: PrincipalId) -> Result<usize, StoreError> {
        let sessions = self.repository.list_by_principal(principal_id).await?;
        for s in &sessions {
            self.evict(s.id).await;
        }
        Ok(sessions.len())
    }

    /// Delete expired durable sessions.
    pub async fn sweep_expired(&self) -> Result<u64, StoreError> {
        let removed = self.repository.delete_expired(self.clock.now()).await?;
        if removed > 0 {
            info!(removed, "expired sessions swept");
        }
        Ok(removed)
    }

    /// Periodic expiry sweep on a background task.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = store.sweep_expired().await {
                    error!(error = %e, "session sweep failed");
                }
            }
        })
    }

    async fn cached(&self, id: SessionId, now: DateTime<Utc>) -> Option<SessionRecord> {
        match self.cache.get(id).await {
            Ok(Some(record)) if !record.session.is_expired(now) => Some(record),
            Ok(Some(_)) => {
                debug!(session_id = %id, "cached session copy expired; consulting store");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(session_id = %id, error = %e, "session cache read failed; using store");
                None
            }
        }
    }

    /// Write `record` to the cache with `min(remaining, ceiling)` as TTL.
    ///
    /// Returns `false` when the session has no validity left (nothing cached).
    async fn fill(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        let Some(ttl) = record.session.cache_ttl(now, self.policy.cache_ceiling) else {
            return false;
        };

        if let Err(e) = self.cache.set(record, ttl).await {
            warn!(session_id = %record.session.id, error = %e, "session cache write failed");
        }
        true
    }

    /// Re-read the durable row after a cache fill and evict the copy when the
    /// row is gone. An unreadable store keeps the copy.
    async fn still_live(&self, id: SessionId) -> bool {
        match self.repository.get(id).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                debug!(session_id = %id, "session removed during cache fill; evicting");
                self.evict(id).await;
                false
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "session check after cache fill failed");
                true
            }
        }
    }
}

impl core::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionStore")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
