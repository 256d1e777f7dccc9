//! Login credential verification (argon2 PHC hashes).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use async_trait::async_trait;
use password_hash::{PasswordHash, SaltString};
use sqlx::{PgPool, Row};
use thiserror::Error;

use forgeguard_auth::DirectoryError;
use forgeguard_core::PrincipalId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Cheap parameters for tests and local seeding. The PHC string carries its
/// parameters, so `verify_password` also accepts hashes made with the library
/// defaults (m=19456, t=2) by whatever provisions production accounts.
pub fn hash_password_light(password: &str) -> Result<String, PasswordError> {
    let params = Params::new(1024, 1, 1, None).map_err(|e| PasswordError::Hash(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| PasswordError::Hash(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| PasswordError::Hash(e.to_string()))?;
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::Hash(e.to_string()))?
        .to_string();
    Ok(phc)
}

/// Malformed stored hashes never verify.
pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// [`verify_password`] on tokio's blocking pool, off the request worker.
pub async fn verify_password_blocking(hash: String, password: String) -> Result<bool, DirectoryError> {
    tokio::task::spawn_blocking(move || verify_password(&hash, &password))
        .await
        .map_err(|e| DirectoryError::Unavailable(format!("password check aborted: {e}")))
}

/// Checks a login/password pair against the principal store.
#[async_trait]
pub trait LoginVerifier: Send + Sync {
    /// `Ok(None)` for unknown logins and wrong passwords alike.
    async fn verify(&self, login: &str, password: &str) -> Result<Option<PrincipalId>, DirectoryError>;
}

#[derive(Debug, Default)]
pub struct InMemoryLoginVerifier {
    accounts: RwLock<HashMap<String, (PrincipalId, String)>>,
}

impl InMemoryLoginVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account; the password is hashed here.
    pub fn add_account(
        &self,
        login: impl Into<String>,
        password: &str,
        principal_id: PrincipalId,
    ) -> Result<(), PasswordError> {
        let hash = hash_password_light(password)?;
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| PasswordError::Hash("lock poisoned".to_string()))?;
        accounts.insert(login.into().to_lowercase(), (principal_id, hash));
        Ok(())
    }
}

#[async_trait]
impl LoginVerifier for InMemoryLoginVerifier {
    async fn verify(&self, login: &str, password: &str) -> Result<Option<PrincipalId>, DirectoryError> {
        let account = self
            .accounts
            .read()
            .map_err(|_| DirectoryError::Unavailable("lock poisoned".to_string()))?
            .get(&login.to_lowercase())
            .cloned();

        let Some((id, hash)) = account else {
            return Ok(None);
        };
        Ok(verify_password_blocking(hash, password.to_string())
            .await?
            .then_some(id))
    }
}

/// Verifies against `profiles.login` / `profiles.password_hash`.
#[derive(Debug, Clone)]
pub struct PostgresLoginVerifier {
    pool: Arc<PgPool>,
}

impl PostgresLoginVerifier {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl LoginVerifier for PostgresLoginVerifier {
    async fn verify(&self, login: &str, password: &str) -> Result<Option<PrincipalId>, DirectoryError> {
        let row = sqlx::query(
            "SELECT id, password_hash FROM profiles WHERE LOWER(login) = LOWER($1)",
        )
        .bind(login)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: uuid::Uuid = row
            .try_get("id")
            .map_err(|e| DirectoryError::Corrupt(e.to_string()))?;
        let hash: String = row
            .try_get("password_hash")
            .map_err(|e| DirectoryError::Corrupt(e.to_string()))?;

        Ok(verify_password_blocking(hash, password.to_string())
            .await?
            .then(|| PrincipalId::from_uuid(id)))
    }
}
