use thiserror::Error;

use crate::token::TokenError;

/// Failure taxonomy of the authentication/authorization boundary.
///
/// Causes are kept apart for logging; the HTTP layer collapses the
/// authentication ones into a single response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no credential presented")]
    MissingCredential,

    #[error("malformed credential")]
    MalformedCredential,

    #[error("invalid credential signature")]
    InvalidSignature,

    #[error("credential expired")]
    ExpiredCredential,

    #[error("session not found")]
    SessionNotFound,

    /// Session references a principal the profile store does not know.
    #[error("principal profile missing")]
    ProfileMissing,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("address {0} is not on the network allowlist")]
    NetworkDenied(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

impl AuthError {
    /// True for causes that surface as a uniform "unauthenticated".
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            AuthError::MissingCredential
                | AuthError::MalformedCredential
                | AuthError::InvalidSignature
                | AuthError::ExpiredCredential
                | AuthError::SessionNotFound
                | AuthError::DependencyUnavailable(_)
        )
    }

    /// Short machine-readable cause, for logs only.
    pub fn cause(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::MalformedCredential => "malformed_credential",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::ExpiredCredential => "expired_credential",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::ProfileMissing => "profile_missing",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::NetworkDenied(_) => "network_denied",
            AuthError::DependencyUnavailable(_) => "dependency_unavailable",
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::InvalidSignature => AuthError::InvalidSignature,
            TokenError::Expired => AuthError::ExpiredCredential,
            TokenError::Malformed(_) | TokenError::InvalidTtl | TokenError::Encoding(_) => {
                AuthError::MalformedCredential
            }
        }
    }
}
