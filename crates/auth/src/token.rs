//! Signed bearer credential (HS256 compact token).

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use forgeguard_core::{PrincipalId, SessionId};

use crate::claims::{TokenClaims, validate_claims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Wrong segment count, undecodable base64/JSON, or an impossible time window.
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("token ttl must be positive")]
    InvalidTtl,

    #[error("failed to encode token: {0}")]
    Encoding(String),
}

/// What the caller asks to embed in a credential.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub session_id: SessionId,
    pub principal_id: PrincipalId,
}

/// A credential that passed signature and expiry checks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub session_id: SessionId,
    pub principal_id: PrincipalId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VerifiedToken {
    pub fn payload(&self) -> TokenPayload {
        TokenPayload {
            session_id: self.session_id,
            principal_id: self.principal_id,
        }
    }
}

/// Stateless signer/verifier for session credentials.
///
/// Verification recomputes the HMAC over header and payload and compares it in
/// constant time; expiry is then checked against the supplied `now` rather
/// than the process clock, so callers control time.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims.clear();

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn sign(
        &self,
        payload: &TokenPayload,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        if ttl <= Duration::zero() {
            return Err(TokenError::InvalidTtl);
        }

        let iat = now.timestamp();
        let exp = iat
            .checked_add(ttl.num_seconds().max(1))
            .ok_or(TokenError::InvalidTtl)?;

        let claims = TokenClaims {
            sid: payload.session_id,
            sub: payload.principal_id,
            iat,
            exp,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedToken, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::InvalidSignature
                }
                _ => TokenError::Malformed(e.to_string()),
            })?;

        let claims = data.claims;
        validate_claims(&claims, now)?;

        let issued_at = DateTime::from_timestamp(claims.iat, 0)
            .ok_or_else(|| TokenError::Malformed("iat out of range".to_string()))?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| TokenError::Malformed("exp out of range".to_string()))?;

        Ok(VerifiedToken {
            session_id: claims.sid,
            principal_id: claims.sub,
            issued_at,
            expires_at,
        })
    }
}

impl core::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    const SECRET: &str = "test-secret-with-enough-entropy-0123456789";

    fn payload() -> TokenPayload {
        TokenPayload {
            session_id: SessionId::new(),
            principal_id: PrincipalId::new(),
        }
    }

    #[test]
    fn verify_returns_signed_payload() {
        let codec = TokenCodec::new(SECRET);
        let now = Utc::now();
        let p = payload();

        let token = codec.sign(&p, Duration::minutes(10), now).unwrap();
        let verified = codec.verify(&token, now).unwrap();

        assert_eq!(verified.payload(), p);
        assert_eq!(verified.issued_at.timestamp(), now.timestamp());
        assert_eq!(verified.expires_at.timestamp(), now.timestamp() + 600);
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let codec = TokenCodec::new(SECRET);
        let now = Utc::now();
        let token = codec.sign(&payload(), Duration::minutes(10), now).unwrap();
        let other = codec.sign(&payload(), Duration::minutes(10), now).unwrap();

        // Splice the payload of one token onto the signature of another.
        let a: Vec<&str> = token.split('.').collect();
        let b: Vec<&str> = other.split('.').collect();
        let forged = format!("{}.{}.{}", a[0], b[1], a[2]);

        assert_eq!(codec.verify(&forged, now), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn wrong_secret_fails_signature() {
        let now = Utc::now();
        let token = TokenCodec::new(SECRET)
            .sign(&payload(), Duration::minutes(10), now)
            .unwrap();

        let err = TokenCodec::new("another-secret").verify(&token, now);
        assert_eq!(err, Err(TokenError::InvalidSignature));
    }

    #[test]
    fn wrong_segment_count_is_malformed() {
        let codec = TokenCodec::new(SECRET);
        let now = Utc::now();

        assert!(matches!(codec.verify("abc.def", now), Err(TokenError::Malformed(_))));
        assert!(matches!(codec.verify("", now), Err(TokenError::Malformed(_))));
        assert!(matches!(
            codec.verify("!!!.@@@.###", now),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn non_positive_ttl_is_rejected() {
        let codec = TokenCodec::new(SECRET);
        assert_eq!(
            codec.sign(&payload(), Duration::zero(), Utc::now()),
            Err(TokenError::InvalidTtl)
        );
    }

    proptest! {
        #[test]
        fn round_trip_holds_for_the_whole_ttl(
            sid in any::<u128>(),
            pid in any::<u128>(),
            ttl_secs in 1i64..=2_592_000,
            elapsed_frac in 0.0f64..1.0,
        ) {
            let codec = TokenCodec::new(SECRET);
            let now = Utc::now();
            let p = TokenPayload {
                session_id: SessionId::from_uuid(Uuid::from_u128(sid)),
                principal_id: PrincipalId::from_uuid(Uuid::from_u128(pid)),
            };

            let token = codec.sign(&p, Duration::seconds(ttl_secs), now).unwrap();

            let elapsed = ((ttl_secs - 1) as f64 * elapsed_frac) as i64;
            let verified = codec.verify(&token, now + Duration::seconds(elapsed)).unwrap();
            prop_assert_eq!(verified.payload(), p);
        }

        #[test]
        fn expired_tokens_fail_even_with_valid_signature(
            ttl_secs in 1i64..=86_400,
            overshoot in 0i64..=86_400,
        ) {
            let codec = TokenCodec::new(SECRET);
            let now = Utc::now();
            let token = codec.sign(&payload(), Duration::seconds(ttl_secs), now).unwrap();

            let later = now + Duration::seconds(ttl_secs + overshoot);
            prop_assert_eq!(codec.verify(&token, later), Err(TokenError::Expired));
        }
    }
}
