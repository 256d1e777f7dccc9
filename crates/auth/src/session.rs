//! Session model and sliding-window rules.
//!
//! Storage lives in `forgeguard-infra`; everything here is pure so the
//! renewal and cache-TTL arithmetic can be tested without a store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use forgeguard_core::{PrincipalId, SessionId};

use crate::principal::Principal;

/// Session lifetime policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Validity granted on login and on every renewal.
    pub sliding_window: Duration,
    /// Upper bound for any fast-cache entry.
    pub cache_ceiling: Duration,
    /// Minimum idle time since the last renewal before activity renews again.
    pub renew_after: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            sliding_window: Duration::days(7),
            cache_ceiling: Duration::minutes(30),
            renew_after: Duration::minutes(5),
        }
    }
}

/// Client details captured at login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Durable session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub principal_id: PrincipalId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Session {
    /// Fresh session starting at `now`.
    pub fn start(
        principal_id: PrincipalId,
        device: DeviceInfo,
        now: DateTime<Utc>,
        policy: &SessionPolicy,
    ) -> Self {
        Self {
            id: SessionId::new(),
            principal_id,
            expires_at: now + policy.sliding_window,
            created_at: now,
            last_active_at: now,
            client_ip: device.client_ip,
            user_agent: device.user_agent,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Whether activity at `now` should trigger a renewal.
    pub fn needs_renewal(&self, now: DateTime<Utc>, policy: &SessionPolicy) -> bool {
        !self.is_expired(now) && now - self.last_active_at >= policy.renew_after
    }

    /// Slide the window forward. `expires_at` never moves backwards.
    pub fn renew(&mut self, now: DateTime<Utc>, sliding_window: Duration) {
        self.expires_at = self.expires_at.max(now + sliding_window);
        self.last_active_at = self.last_active_at.max(now);
    }

    /// TTL for a cache copy: `min(remaining, ceiling)`, `None` once nothing remains.
    pub fn cache_ttl(&self, now: DateTime<Utc>, ceiling: Duration) -> Option<std::time::Duration> {
        let ttl = self.remaining(now).min(ceiling);
        if ttl <= Duration::zero() {
            return None;
        }
        ttl.to_std().ok()
    }
}

/// What the fast cache holds for a session id.
///
/// The durable store only knows the `Session`; the principal snapshot is filled
/// in by the first authenticated request and dropped when roles change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: Session,
    #[serde(default)]
    pub principal: Option<Principal>,
}

impl SessionRecord {
    pub fn bare(session: Session) -> Self {
        Self {
            session,
            principal: None,
        }
    }
}
