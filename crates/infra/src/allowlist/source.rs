use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllowlistError {
    #[error("allowlist source unavailable: {0}")]
    Unavailable(String),

    #[error("allowlist fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// External source of truth for the network rule.
#[async_trait]
pub trait AllowlistSource: Send + Sync {
    /// Whether the allowlist rule is switched on.
    async fn rule_status(&self) -> Result<bool, AllowlistError>;

    /// IP literals on the list. Unparseable entries are skipped by the guard.
    async fn entries(&self) -> Result<Vec<String>, AllowlistError>;
}

/// In-memory source for tests and dev.
#[derive(Debug, Default)]
pub struct InMemoryAllowlistSource {
    state: RwLock<(bool, Vec<String>)>,
    failing: AtomicBool,
    delay: RwLock<Option<Duration>>,
    fetches: AtomicUsize,
}

impl InMemoryAllowlistSource {
    pub fn new(enabled: bool, entries: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let source = Self::default();
        source.set(enabled, entries);
        source
    }

    pub fn set(&self, enabled: bool, entries: impl IntoIterator<Item = impl Into<String>>) {
        let entries = entries.into_iter().map(Into::into).collect();
        if let Ok(mut state) = self.state.write() {
            *state = (enabled, entries);
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every call sleep first (to exercise fetch timeouts).
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut d) = self.delay.write() {
            *d = delay;
        }
    }

    /// Number of `rule_status` calls so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn before_call(&self) -> Result<(), AllowlistError> {
        let delay = self.delay.read().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AllowlistError::Unavailable("source offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AllowlistSource for InMemoryAllowlistSource {
    async fn rule_status(&self) -> Result<bool, AllowlistError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        self.state
            .read()
            .map(|s| s.0)
            .map_err(|_| AllowlistError::Unavailable("lock poisoned".to_string()))
    }

    async fn entries(&self) -> Result<Vec<String>, AllowlistError> {
        self.before_call().await?;
        self.state
            .read()
            .map(|s| s.1.clone())
            .map_err(|_| AllowlistError::Unavailable("lock poisoned".to_string()))
    }
}

/// Postgres-backed allowlist source.
///
/// ```sql
/// CREATE TABLE network_rules (
///     rule_key TEXT PRIMARY KEY,
///     enabled  BOOLEAN NOT NULL DEFAULT FALSE
/// );
/// CREATE TABLE network_allowlist (
///     ip         TEXT PRIMARY KEY,
///     note       TEXT,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
/// );
/// ```
#[derive(Debug, Clone)]
pub struct PostgresAllowlistSource {
    pool: Arc<PgPool>,
    rule_key: String,
}

impl PostgresAllowlistSource {
    pub const DEFAULT_RULE_KEY: &'static str = "ip_allowlist";

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            rule_key: Self::DEFAULT_RULE_KEY.to_string(),
        }
    }
}

#[async_trait]
impl AllowlistSource for PostgresAllowlistSource {
    async fn rule_status(&self) -> Result<bool, AllowlistError> {
        let row = sqlx::query("SELECT enabled FROM network_rules WHERE rule_key = $1")
            .bind(&self.rule_key)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| AllowlistError::Unavailable(e.to_string()))?;

        match row {
            Some(row) => row
                .try_get("enabled")
                .map_err(|e| AllowlistError::Unavailable(e.to_string())),
            None => Ok(false),
        }
    }

    async fn entries(&self) -> Result<Vec<String>, AllowlistError> {
        let rows = sqlx::query("SELECT ip FROM network_allowlist")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| AllowlistError::Unavailable(e.to_string()))?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("ip"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AllowlistError::Unavailable(e.to_string()))
    }
}
