use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use forgeguard_auth::AuthError;

/// Map an `AuthError` to its HTTP response.
///
/// Authentication causes collapse to one body so callers cannot tell a bad
/// signature from an unknown session.
pub fn auth_error_to_response(err: &AuthError) -> axum::response::Response {
    if err.is_unauthenticated() {
        return unauthenticated();
    }

    match err {
        AuthError::ProfileMissing => json_error(
            StatusCode::UNAUTHORIZED,
            "configuration_error",
            "account is not fully configured; contact an administrator",
        ),
        AuthError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg.clone()),
        AuthError::NetworkDenied(addr) => json_error(
            StatusCode::FORBIDDEN,
            "network_denied",
            format!("access from {addr} is blocked by the network allowlist policy"),
        ),
        _ => unauthenticated(),
    }
}

pub fn unauthenticated() -> axum::response::Response {
    json_error(
        StatusCode::UNAUTHORIZED,
        "unauthenticated",
        "authentication required",
    )
}

pub fn network_unavailable() -> axum::response::Response {
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "network_policy_unavailable",
        "network allowlist is unavailable; access is temporarily blocked",
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn authentication_causes_share_one_response() {
        let causes = [
            AuthError::MissingCredential,
            AuthError::MalformedCredential,
            AuthError::InvalidSignature,
            AuthError::ExpiredCredential,
            AuthError::SessionNotFound,
            AuthError::DependencyUnavailable("redis down".to_string()),
        ];

        let expected = body_of(unauthenticated()).await;
        for cause in &causes {
            assert!(cause.is_unauthenticated());
            assert_eq!(body_of(auth_error_to_response(cause)).await, expected, "{cause:?}");
        }
    }

    #[tokio::test]
    async fn missing_profile_is_reported_as_configuration_error() {
        let (status, body) = body_of(auth_error_to_response(&AuthError::ProfileMissing)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "configuration_error");
    }
}
