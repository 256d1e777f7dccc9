//! Service wiring: stores, caches, directory, guard and audit.
//!
//! Two flavours:
//! - in-memory (dev/tests), returning `DevBackends` handles for seeding
//! - persistent (Postgres, plus Redis cache with the `redis` feature)

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use forgeguard_auth::{
    CapabilitySet, DataScope, ModuleAccess, PermissionEngine, Principal, ProfileDirectory, Role,
    RoleCode, TokenCodec,
};
use forgeguard_core::{Clock, PrincipalId, RoleId, SystemClock};
use forgeguard_infra::{
    AuditEmitter, AuditSink, InMemoryAllowlistSource, InMemoryLoginVerifier,
    InMemoryProfileDirectory, InMemorySessionCache, InMemorySessionRepository, LoginVerifier,
    NetworkAllowlistGuard, PostgresAllowlistSource, PostgresLoginVerifier,
    PostgresProfileDirectory, PostgresSessionRepository, SessionCache, SessionStore, StoreError,
};

use crate::config::ApiConfig;

#[derive(Clone)]
pub struct AppServices {
    pub codec: Arc<TokenCodec>,
    pub token_ttl: chrono::Duration,
    pub sessions: Arc<SessionStore>,
    pub directory: Arc<dyn ProfileDirectory>,
    pub logins: Arc<dyn LoginVerifier>,
    pub engine: PermissionEngine,
    pub guard: Arc<NetworkAllowlistGuard>,
    pub audit: AuditEmitter,
    pub clock: Arc<dyn Clock>,
}

/// Concrete in-memory backends, for seeding data in dev mode and tests.
#[derive(Clone)]
pub struct DevBackends {
    pub directory: Arc<InMemoryProfileDirectory>,
    pub logins: Arc<InMemoryLoginVerifier>,
    pub allowlist: Arc<InMemoryAllowlistSource>,
    pub sessions: Arc<InMemorySessionRepository>,
    pub cache: Arc<InMemorySessionCache>,
}

impl AppServices {
    pub fn in_memory(
        config: &ApiConfig,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> (Self, DevBackends) {
        let dev = DevBackends {
            directory: Arc::new(InMemoryProfileDirectory::new()),
            logins: Arc::new(InMemoryLoginVerifier::new()),
            allowlist: Arc::new(InMemoryAllowlistSource::new(false, Vec::<String>::new())),
            sessions: Arc::new(InMemorySessionRepository::new()),
            cache: Arc::new(InMemorySessionCache::new(clock.clone())),
        };

        let sessions = SessionStore::new(
            dev.cache.clone(),
            dev.sessions.clone(),
            config.session_policy(),
            clock.clone(),
        );
        let guard = NetworkAllowlistGuard::new(
            dev.allowlist.clone(),
            config.allowlist_config(),
            clock.clone(),
        );

        let services = Self::assemble(
            config,
            clock,
            audit,
            sessions,
            dev.directory.clone(),
            dev.logins.clone(),
            Arc::new(guard),
        );

        (services, dev)
    }

    pub async fn persistent(config: &ApiConfig, audit: Arc<dyn AuditSink>) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is required for persistent stores")?;
        let pool = sqlx::PgPool::connect(url)
            .await
            .context("failed to connect to Postgres")?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = session_cache(config, clock.clone())?;

        let sessions = SessionStore::new(
            cache,
            Arc::new(PostgresSessionRepository::new(pool.clone())),
            config.session_policy(),
            clock.clone(),
        );
        let guard = NetworkAllowlistGuard::new(
            Arc::new(PostgresAllowlistSource::new(pool.clone())),
            config.allowlist_config(),
            clock.clone(),
        );

        info!("using persistent stores (Postgres)");
        Ok(Self::assemble(
            config,
            clock,
            audit,
            sessions,
            Arc::new(PostgresProfileDirectory::new(pool.clone())),
            Arc::new(PostgresLoginVerifier::new(pool)),
            Arc::new(guard),
        ))
    }

    fn assemble(
        config: &ApiConfig,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        sessions: SessionStore,
        directory: Arc<dyn ProfileDirectory>,
        logins: Arc<dyn LoginVerifier>,
        guard: Arc<NetworkAllowlistGuard>,
    ) -> Self {
        Self {
            codec: Arc::new(TokenCodec::new(config.token_secret.as_bytes())),
            token_ttl: config.token_ttl(),
            sessions: Arc::new(sessions),
            engine: PermissionEngine::new(directory.clone(), config.approval_policy()),
            directory,
            logins,
            guard,
            audit: AuditEmitter::new(audit),
            clock,
        }
    }

    /// Drop cached session records (and their principal snapshots) of every
    /// principal holding `role_id`. Call after changing a role definition.
    pub async fn invalidate_role(&self, role_id: RoleId) -> Result<usize, StoreError> {
        let holders = self
            .directory
            .principals_with_role(role_id)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut evicted = 0;
        for principal_id in holders {
            evicted += self.sessions.evict_principal(principal_id).await?;
        }
        info!(role_id = %role_id, evicted, "role change invalidated cached sessions");
        Ok(evicted)
    }
}

impl DevBackends {
    /// Seed an ALL-scope administrator that may reach every module.
    pub fn seed_admin(&self, login: &str, password: &str) -> Result<PrincipalId> {
        let principal = Principal {
            id: PrincipalId::new(),
            display_name: login.to_string(),
            role: Role {
                id: RoleId::new(),
                code: RoleCode::new("admin"),
                data_scope: DataScope::All,
                can_manage_subordinates: true,
                capabilities: CapabilitySet::new(),
            },
            org_unit_id: None,
            group_id: None,
            module_access: ModuleAccess::all(),
        };
        self.add_account(login, password, principal)
    }

    pub fn add_account(&self, login: &str, password: &str, principal: Principal) -> Result<PrincipalId> {
        let id = principal.id;
        self.logins
            .add_account(login, password, id)
            .context("failed to register account")?;
        self.directory.upsert(principal);
        Ok(id)
    }
}

#[cfg(feature = "redis")]
fn session_cache(config: &ApiConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn SessionCache>> {
    match config.redis_url.as_deref() {
        Some(url) => {
            info!("session cache: redis");
            Ok(Arc::new(
                forgeguard_infra::RedisSessionCache::new(url, None)
                    .context("failed to open Redis client")?,
            ))
        }
        None => {
            warn!("REDIS_URL not set; session cache is process-local");
            Ok(Arc::new(InMemorySessionCache::new(clock)))
        }
    }
}

#[cfg(not(feature = "redis"))]
fn session_cache(config: &ApiConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn SessionCache>> {
    if config.redis_url.is_some() {
        warn!("REDIS_URL set but built without the `redis` feature; session cache is process-local");
    }
    Ok(Arc::new(InMemorySessionCache::new(clock)))
}
