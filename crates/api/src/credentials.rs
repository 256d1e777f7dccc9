//! Credential extraction.
//!
//! Precedence: custom header, then `Authorization: Bearer`, then cookie. The
//! first non-empty source wins; later sources are not consulted.

use axum::http::{HeaderMap, header};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSources {
    /// Lowercase header name, e.g. `x-access-token`.
    pub header: String,
    pub cookie: String,
}

impl CredentialSources {
    pub fn new(header: impl Into<String>, cookie: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
            cookie: cookie.into(),
        }
    }

    pub fn extract<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        self.from_custom_header(headers)
            .or_else(|| from_bearer(headers))
            .or_else(|| self.from_cookie(headers))
    }

    fn from_custom_header<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn from_cookie<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == self.cookie && !value.trim().is_empty())
            .map(|(_, value)| value.trim())
    }
}

fn from_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value carrying a freshly issued token.
pub fn session_cookie(name: &str, token: &str, max_age_secs: i64) -> String {
    format!("{name}={token}; HttpOnly; Path=/; SameSite=Lax; Max-Age={max_age_secs}")
}

/// `Set-Cookie` value that clears the credential cookie.
pub fn cleared_cookie(name: &str) -> String {
    format!("{name}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0")
}
