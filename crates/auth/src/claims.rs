use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgeguard_core::{PrincipalId, SessionId};

use crate::token::TokenError;

/// Claims carried inside a signed credential.
///
/// Timestamps are unix seconds, as in any compact bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Session the credential is bound to.
    pub sid: SessionId,

    /// Subject / principal identifier.
    pub sub: PrincipalId,

    /// Issued-at timestamp.
    pub iat: i64,

    /// Expiration timestamp.
    pub exp: i64,
}

/// Deterministically validate the time window of decoded claims.
///
/// Note: signature verification happens before this in `TokenCodec::verify`.
/// A credential is valid strictly before `exp`.
pub fn validate_claims(claims: &TokenClaims, now: DateTime<Utc>) -> Result<(), TokenError> {
    if claims.exp <= claims.iat {
        return Err(TokenError::Malformed(
            "invalid time window (exp <= iat)".to_string(),
        ));
    }
    if now.timestamp() >= claims.exp {
        return Err(TokenError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(iat: i64, exp: i64) -> TokenClaims {
        TokenClaims {
            sid: SessionId::new(),
            sub: PrincipalId::new(),
            iat,
            exp,
        }
    }

    #[test]
    fn valid_window_passes() {
        let now = Utc::now();
        let c = claims(now.timestamp(), now.timestamp() + 60);
        assert!(validate_claims(&c, now).is_ok());
    }

    #[test]
    fn expiry_instant_is_already_expired() {
        let now = Utc::now();
        let c = claims(now.timestamp() - 60, now.timestamp());
        assert_eq!(validate_claims(&c, now), Err(TokenError::Expired));
    }

    #[test]
    fn inverted_window_is_malformed() {
        let now = Utc::now();
        let c = claims(now.timestamp(), now.timestamp());
        assert!(matches!(
            validate_claims(&c, now),
            Err(TokenError::Malformed(_))
        ));
    }
}
