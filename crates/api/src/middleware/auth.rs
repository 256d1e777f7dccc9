use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};

use forgeguard_auth::AuthError;

use crate::app::errors::auth_error_to_response;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;
use crate::credentials::CredentialSources;

/// Where authentication stopped, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    CredentialExtraction,
    TokenVerification,
    SessionResolution,
    ContextPopulation,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::CredentialExtraction => "credential_extraction",
            Stage::TokenVerification => "token_verification",
            Stage::SessionResolution => "session_resolution",
            Stage::ContextPopulation => "context_population",
        }
    }
}

/// Runs credential → token → session → principal for one request.
#[derive(Clone)]
pub struct AuthCoordinator {
    services: Arc<AppServices>,
    credentials: Arc<CredentialSources>,
}

impl AuthCoordinator {
    pub fn new(services: Arc<AppServices>, credentials: CredentialSources) -> Self {
        Self {
            services,
            credentials: Arc::new(credentials),
        }
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<PrincipalContext, AuthError> {
        let services = &self.services;
        let now = services.clock.now();

        let token = self
            .credentials
            .extract(headers)
            .ok_or(AuthError::MissingCredential)
            .map_err(|e| fail(Stage::CredentialExtraction, e))?;

        let verified = services
            .codec
            .verify(token, now)
            .map_err(|e| fail(Stage::TokenVerification, e.into()))?;

        let record = services
            .sessions
            .resolve(verified.session_id)
            .await
            .map_err(|e| fail(Stage::SessionResolution, AuthError::DependencyUnavailable(e.to_string())))?
            .ok_or(AuthError::SessionNotFound)
            .map_err(|e| fail(Stage::SessionResolution, e))?;

        // A token may only ride on the session it was issued for.
        if record.session.principal_id != verified.principal_id {
            return Err(fail(Stage::SessionResolution, AuthError::SessionNotFound));
        }

        let principal = match record.principal {
            Some(principal) => principal,
            None => {
                let principal = services
                    .directory
                    .profile_with_role(verified.principal_id)
                    .await
                    .map_err(|e| {
                        fail(
                            Stage::ContextPopulation,
                            AuthError::DependencyUnavailable(e.to_string()),
                        )
                    })?
                    .ok_or(AuthError::ProfileMissing)
                    .map_err(|e| fail(Stage::ContextPopulation, e))?;
                services
                    .sessions
                    .attach_principal(&record.session, &principal)
                    .await;
                principal
            }
        };

        if record
            .session
            .needs_renewal(now, services.sessions.policy())
        {
            debug!(session_id = %record.session.id, "scheduling session renewal");
            services.sessions.schedule_renewal(record.session.id);
        }

        Ok(PrincipalContext::new(principal, record.session.id))
    }
}

fn fail(stage: Stage, err: AuthError) -> AuthError {
    match &err {
        AuthError::ProfileMissing => error!(
            stage = stage.as_str(),
            cause = err.cause(),
            "session references a principal without a profile"
        ),
        AuthError::DependencyUnavailable(detail) => warn!(
            stage = stage.as_str(),
            cause = err.cause(),
            detail = %detail,
            "authentication failed on dependency"
        ),
        _ => debug!(stage = stage.as_str(), cause = err.cause(), "authentication rejected"),
    }
    err
}

pub async fn auth_middleware(
    State(coordinator): State<AuthCoordinator>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let ctx = coordinator
        .authenticate(req.headers())
        .await
        .map_err(|e| auth_error_to_response(&e))?;

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, header};
    use chrono::Duration;

    use forgeguard_auth::{
        CapabilitySet, DataScope, DeviceInfo, ModuleAccess, Principal, PrincipalId, Role, RoleCode,
        RoleId, TokenPayload,
    };
    use forgeguard_core::{Clock, ManualClock};
    use forgeguard_infra::{InMemoryAuditSink, SessionRepository};

    use super::*;
    use crate::app::services::DevBackends;
    use crate::config::ApiConfig;

    struct Harness {
        coordinator: AuthCoordinator,
        services: Arc<AppServices>,
        dev: DevBackends,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let (services, dev) = AppServices::in_memory(
            &ApiConfig::default(),
            clock.clone(),
            Arc::new(InMemoryAuditSink::new()),
        );
        let services = Arc::new(services);
        let coordinator = AuthCoordinator::new(
            services.clone(),
            CredentialSources::new("x-access-token", "access_token"),
        );
        Harness {
            coordinator,
            services,
            dev,
            clock,
        }
    }

    fn member() -> Principal {
        Principal {
            id: PrincipalId::new(),
            display_name: "Ana".to_string(),
            role: Role {
                id: RoleId::new(),
                code: RoleCode::new("member"),
                data_scope: DataScope::SelfOnly,
                can_manage_subordinates: false,
                capabilities: CapabilitySet::new(),
            },
            org_unit_id: None,
            group_id: None,
            module_access: ModuleAccess::default(),
        }
    }

    async fn login(h: &Harness, principal: &Principal) -> (String, forgeguard_auth::Session) {
        let session = h
            .services
            .sessions
            .create(principal.id, DeviceInfo::default())
            .await
            .unwrap();
        let token = h
            .services
            .codec
            .sign(
                &TokenPayload {
                    session_id: session.id,
                    principal_id: principal.id,
                },
                Duration::days(30),
                h.clock.now(),
            )
            .unwrap();
        (token, session)
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn full_pipeline_populates_context() {
        let h = harness();
        let p = member();
        h.dev.directory.upsert(p.clone());
        let (token, session) = login(&h, &p).await;

        let ctx = h.coordinator.authenticate(&bearer(&token)).await.unwrap();
        assert_eq!(ctx.principal_id(), p.id);
        assert_eq!(ctx.session_id(), session.id);
    }

    #[tokio::test]
    async fn missing_profile_is_reported_distinctly() {
        let h = harness();
        let p = member();
        let (token, _) = login(&h, &p).await;

        assert_eq!(
            h.coordinator.authenticate(&bearer(&token)).await,
            Err(AuthError::ProfileMissing)
        );
    }

    #[tokio::test]
    async fn store_outage_fails_fast() {
        let h = harness();
        let p = member();
        h.dev.directory.upsert(p.clone());
        let (token, session) = login(&h, &p).await;
        h.services.sessions.evict(session.id).await;
        h.dev.sessions.set_offline(true);

        assert!(matches!(
            h.coordinator.authenticate(&bearer(&token)).await,
            Err(AuthError::DependencyUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn stale_activity_triggers_renewal() {
        let h = harness();
        let p = member();
        h.dev.directory.upsert(p.clone());
        let (token, session) = login(&h, &p).await;

        h.clock.advance(Duration::days(6));
        h.coordinator.authenticate(&bearer(&token)).await.unwrap();

        // Renewal is spawned; poll the durable store until it lands.
        for _ in 0..100 {
            let stored = h.dev.sessions.get(session.id).await.unwrap().unwrap();
            if stored.expires_at > session.expires_at {
                assert_eq!(stored.expires_at, h.clock.now() + Duration::days(7));
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("renewal did not reach the durable store");
    }

    #[tokio::test]
    async fn token_for_a_revoked_session_is_rejected() {
        let h = harness();
        let p = member();
        h.dev.directory.upsert(p.clone());
        let (first, _) = login(&h, &p).await;
        let (second, _) = login(&h, &p).await;

        assert_eq!(
            h.coordinator.authenticate(&bearer(&first)).await,
            Err(AuthError::SessionNotFound)
        );
        assert!(h.coordinator.authenticate(&bearer(&second)).await.is_ok());
    }

    #[tokio::test]
    async fn garbage_and_missing_credentials() {
        let h = harness();
        assert_eq!(
            h.coordinator.authenticate(&HeaderMap::new()).await,
            Err(AuthError::MissingCredential)
        );
        assert_eq!(
            h.coordinator.authenticate(&bearer("not.a.token")).await,
            Err(AuthError::MalformedCredential)
        );
    }
}
