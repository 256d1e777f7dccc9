//! Environment-driven API configuration.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use forgeguard_auth::{ApprovalPolicy, RoleCode, SessionPolicy};
use forgeguard_infra::AllowlistConfig;

const DEV_TOKEN_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub token_secret: String,
    pub token_ttl: Duration,
    pub session_sliding_window: Duration,
    pub session_cache_ceiling: Duration,
    pub session_renew_after: Duration,
    pub session_sweep_interval: Duration,
    pub allowlist_refresh: Duration,
    pub allowlist_fetch_timeout: Duration,
    /// Custom header carrying the raw token; checked before `Authorization`.
    pub credential_header: String,
    pub credential_cookie: String,
    /// Use the first `X-Forwarded-For` hop as the client address.
    pub trust_forwarded_for: bool,
    /// Paths that bypass the network guard.
    pub network_exempt_paths: Vec<String>,
    pub approval_subordinate_role: String,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    /// `(login, password)` seeded as an ALL-scope admin in in-memory mode.
    pub dev_admin: Option<(String, String)>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            token_secret: DEV_TOKEN_SECRET.to_string(),
            token_ttl: Duration::from_secs(30 * 24 * 3600),
            session_sliding_window: Duration::from_secs(7 * 24 * 3600),
            session_cache_ceiling: Duration::from_secs(30 * 60),
            session_renew_after: Duration::from_secs(5 * 60),
            session_sweep_interval: Duration::from_secs(3600),
            allowlist_refresh: Duration::from_secs(60),
            allowlist_fetch_timeout: Duration::from_millis(2000),
            credential_header: "x-access-token".to_string(),
            credential_cookie: "access_token".to_string(),
            trust_forwarded_for: false,
            network_exempt_paths: vec!["/health".to_string(), "/version".to_string()],
            approval_subordinate_role: "member".to_string(),
            use_persistent_stores: false,
            database_url: None,
            redis_url: None,
            dev_admin: None,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();

        let token_secret = match std::env::var("TOKEN_SECRET") {
            Ok(s) if !s.is_empty() => s,
            _ => {
                warn!("TOKEN_SECRET not set; using insecure dev default");
                d.token_secret
            }
        };

        let dev_admin = match (
            std::env::var("DEV_ADMIN_LOGIN").ok(),
            std::env::var("DEV_ADMIN_PASSWORD").ok(),
        ) {
            (Some(login), Some(password)) => Some((login, password)),
            _ => None,
        };

        let config = Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(d.bind_addr),
            token_secret,
            token_ttl: secs("TOKEN_TTL_SECS", d.token_ttl)?,
            session_sliding_window: secs("SESSION_SLIDING_WINDOW_SECS", d.session_sliding_window)?,
            session_cache_ceiling: secs("SESSION_CACHE_CEILING_SECS", d.session_cache_ceiling)?,
            session_renew_after: secs("SESSION_RENEW_AFTER_SECS", d.session_renew_after)?,
            session_sweep_interval: secs("SESSION_SWEEP_INTERVAL_SECS", d.session_sweep_interval)?,
            allowlist_refresh: secs("ALLOWLIST_REFRESH_SECS", d.allowlist_refresh)?,
            allowlist_fetch_timeout: Duration::from_millis(parse_or(
                "ALLOWLIST_FETCH_TIMEOUT_MS",
                d.allowlist_fetch_timeout.as_millis() as u64,
            )?),
            credential_header: std::env::var("CREDENTIAL_HEADER")
                .map(|h| h.to_ascii_lowercase())
                .unwrap_or(d.credential_header),
            credential_cookie: std::env::var("CREDENTIAL_COOKIE").unwrap_or(d.credential_cookie),
            trust_forwarded_for: parse_or("TRUST_FORWARDED_FOR", d.trust_forwarded_for)?,
            network_exempt_paths: match std::env::var("NETWORK_EXEMPT_PATHS") {
                Ok(raw) => raw
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect(),
                Err(_) => d.network_exempt_paths,
            },
            approval_subordinate_role: std::env::var("APPROVAL_SUBORDINATE_ROLE")
                .unwrap_or(d.approval_subordinate_role),
            use_persistent_stores: parse_or("USE_PERSISTENT_STORES", d.use_persistent_stores)?,
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            dev_admin,
        };

        if config.session_sliding_window.is_zero() {
            anyhow::bail!("SESSION_SLIDING_WINDOW_SECS must be > 0");
        }
        if config.token_ttl.is_zero() {
            anyhow::bail!("TOKEN_TTL_SECS must be > 0");
        }
        if config.use_persistent_stores && config.database_url.is_none() {
            anyhow::bail!("USE_PERSISTENT_STORES=true requires DATABASE_URL");
        }

        Ok(config)
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            sliding_window: chrono_duration(self.session_sliding_window),
            cache_ceiling: chrono_duration(self.session_cache_ceiling),
            renew_after: chrono_duration(self.session_renew_after),
        }
    }

    pub fn allowlist_config(&self) -> AllowlistConfig {
        AllowlistConfig {
            refresh_interval: self.allowlist_refresh,
            fetch_timeout: self.allowlist_fetch_timeout,
        }
    }

    pub fn approval_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy {
            subordinate_role: RoleCode::new(self.approval_subordinate_role.clone()),
        }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono_duration(self.token_ttl)
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

fn secs(key: &str, default: Duration) -> Result<Duration> {
    parse_or(key, default.as_secs()).map(Duration::from_secs)
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}
