use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{error, info, warn};

use forgeguard_auth::{DeviceInfo, TokenPayload};
use forgeguard_infra::{AuditEvent, allowlist::normalize};

use crate::app::errors::json_error;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;
use crate::credentials::{cleared_cookie, session_cookie};

/// Name of the credential cookie; set from config when the app is built.
#[derive(Debug, Clone)]
pub struct CookieName(pub Arc<str>);

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(cookie): Extension<CookieName>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Response {
    let principal_id = match services.logins.verify(&body.login, &body.password).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            info!(login = %body.login, "login rejected");
            services.audit.emit(
                AuditEvent::new("auth.login_failed", "principal")
                    .detail(serde_json::json!({ "login": body.login })),
            );
            return json_error(
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "invalid login or password",
            );
        }
        Err(e) => {
            warn!(error = %e, "credential check failed");
            return json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "dependency_unavailable",
                "login is temporarily unavailable",
            );
        }
    };

    let principal = match services.directory.profile_with_role(principal_id).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            error!(principal_id = %principal_id, "credentials valid but profile missing");
            return json_error(
                StatusCode::UNAUTHORIZED,
                "configuration_error",
                "account is not fully configured; contact an administrator",
            );
        }
        Err(e) => {
            warn!(error = %e, "profile lookup failed during login");
            return json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "dependency_unavailable",
                "login is temporarily unavailable",
            );
        }
    };

    let device = DeviceInfo {
        client_ip: peer.map(|ConnectInfo(addr)| normalize(addr.ip()).to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let (session, revoked) = match services.sessions.create_revoking(principal_id, device).await {
        Ok(created) => created,
        Err(e) => {
            warn!(principal_id = %principal_id, error = %e, "session creation failed");
            return json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "dependency_unavailable",
                "login is temporarily unavailable",
            );
        }
    };

    let token = match services.codec.sign(
        &TokenPayload {
            session_id: session.id,
            principal_id,
        },
        services.token_ttl,
        services.clock.now(),
    ) {
        Ok(token) => token,
        Err(e) => {
            error!(error = %e, "token signing failed");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "could not issue credential",
            );
        }
    };

    services.sessions.attach_principal(&session, &principal).await;

    for old in &revoked {
        services.audit.emit(
            AuditEvent::new("auth.session_revoked", "session")
                .actor(principal_id)
                .entity(old)
                .detail(serde_json::json!({ "reason": "superseded_by_login" })),
        );
    }
    services.audit.emit(
        AuditEvent::new("auth.login", "session")
            .actor(principal_id)
            .entity(session.id),
    );
    info!(principal_id = %principal_id, session_id = %session.id, "login succeeded");

    let cookie = session_cookie(&cookie.0, &token, services.token_ttl.num_seconds());
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({
            "token": token,
            "session_id": session.id.to_string(),
            "expires_at": session.expires_at,
        })),
    )
        .into_response()
}

pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(cookie): Extension<CookieName>,
    Extension(ctx): Extension<PrincipalContext>,
) -> Response {
    if let Err(e) = services.sessions.destroy(ctx.session_id()).await {
        warn!(session_id = %ctx.session_id(), error = %e, "logout failed");
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "dependency_unavailable",
            "logout is temporarily unavailable",
        );
    }

    services.audit.emit(
        AuditEvent::new("auth.logout", "session")
            .actor(ctx.principal_id())
            .entity(ctx.session_id()),
    );
    info!(principal_id = %ctx.principal_id(), session_id = %ctx.session_id(), "logout");

    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, cleared_cookie(&cookie.0))],
    )
        .into_response()
}
