//! Postgres-backed session repository.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE auth_sessions (
//!     id             UUID PRIMARY KEY,
//!     principal_id   UUID        NOT NULL,
//!     expires_at     TIMESTAMPTZ NOT NULL,
//!     created_at     TIMESTAMPTZ NOT NULL,
//!     last_active_at TIMESTAMPTZ NOT NULL,
//!     client_ip      TEXT,
//!     user_agent     TEXT
//! );
//! CREATE INDEX auth_sessions_principal_idx ON auth_sessions (principal_id);
//! CREATE INDEX auth_sessions_expires_idx ON auth_sessions (expires_at);
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use forgeguard_auth::Session;
use forgeguard_core::{PrincipalId, SessionId};

use super::{SessionRepository, StoreError};

const SESSION_COLUMNS: &str =
    "id, principal_id, expires_at, created_at, last_active_at, client_ip, user_agent";

/// Transaction-scoped lock serializing logins of one principal. Without it two
/// READ COMMITTED transactions each miss the other's insert and both commit.
const PRINCIPAL_LOCK_SQL: &str = "SELECT pg_advisory_xact_lock(hashtext($1::text))";

#[derive(Debug, Clone)]
pub struct PostgresSessionRepository {
    pool: Arc<PgPool>,
}

impl PostgresSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn get(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM auth_sessions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| SessionRow::from_row(&r).map(Session::from))
            .transpose()
            .map_err(|e| map_sqlx_error("get", e))
    }

    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO auth_sessions
                (id, principal_id, expires_at, created_at, last_active_at, client_ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                expires_at = EXCLUDED.expires_at,
                last_active_at = EXCLUDED.last_active_at
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.principal_id.as_uuid())
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.last_active_at)
        .bind(session.client_ip.as_deref())
        .bind(session.user_agent.as_deref())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("put", e))?;
        Ok(())
    }

    async fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(())
    }

    async fn list_by_principal(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM auth_sessions WHERE principal_id = $1"
        ))
        .bind(principal_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_principal", e))?;

        rows.iter()
            .map(|r| SessionRow::from_row(r).map(Session::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("list_by_principal", e))
    }

    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn extend(
        &self,
        id: SessionId,
        expires_at: DateTime<Utc>,
        last_active_at: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        // UPDATE only: a concurrently deleted row stays deleted.
        let row = sqlx::query(&format!(
            r#"
            UPDATE auth_sessions SET
                expires_at = GREATEST(expires_at, $2),
                last_active_at = GREATEST(last_active_at, $3)
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(expires_at)
        .bind(last_active_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("extend", e))?;

        row.map(|r| SessionRow::from_row(&r).map(Session::from))
            .transpose()
            .map_err(|e| map_sqlx_error("extend", e))
    }

    #[instrument(skip(self, session), fields(principal_id = %session.principal_id), err)]
    async fn replace_for_principal(&self, session: &Session) -> Result<Vec<SessionId>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("replace_for_principal", e))?;

        sqlx::query(PRINCIPAL_LOCK_SQL)
            .bind(session.principal_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_for_principal", e))?;

        let revoked = sqlx::query(
            "DELETE FROM auth_sessions WHERE principal_id = $1 AND id <> $2 RETURNING id",
        )
        .bind(session.principal_id.as_uuid())
        .bind(session.id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("replace_for_principal", e))?
        .iter()
        .map(|r| r.try_get::<uuid::Uuid, _>("id").map(SessionId::from_uuid))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| map_sqlx_error("replace_for_principal", e))?;

        sqlx::query(
            r#"
            INSERT INTO auth_sessions
                (id, principal_id, expires_at, created_at, last_active_at, client_ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.principal_id.as_uuid())
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.last_active_at)
        .bind(session.client_ip.as_deref())
        .bind(session.user_agent.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("replace_for_principal", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("replace_for_principal", e))?;

        Ok(revoked)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_expired", e))?;
        Ok(result.rows_affected())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("bad session row in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

struct SessionRow {
    id: uuid::Uuid,
    principal_id: uuid::Uuid,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    client_ip: Option<String>,
    user_agent: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for SessionRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(SessionRow {
            id: row.try_get("id")?,
            principal_id: row.try_get("principal_id")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            last_active_at: row.try_get("last_active_at")?,
            client_ip: row.try_get("client_ip")?,
            user_agent: row.try_get("user_agent")?,
        })
    }
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: SessionId::from_uuid(row.id),
            principal_id: PrincipalId::from_uuid(row.principal_id),
            expires_at: row.expires_at,
            created_at: row.created_at,
            last_active_at: row.last_active_at,
            client_ip: row.client_ip,
            user_agent: row.user_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use forgeguard_auth::{DeviceInfo, SessionPolicy};

    use super::*;

    /// Runs only when `DATABASE_URL` points at a scratch database.
    async fn scratch_pool() -> Option<PgPool> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auth_sessions (
                id             UUID PRIMARY KEY,
                principal_id   UUID        NOT NULL,
                expires_at     TIMESTAMPTZ NOT NULL,
                created_at     TIMESTAMPTZ NOT NULL,
                last_active_at TIMESTAMPTZ NOT NULL,
                client_ip      TEXT,
                user_agent     TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .ok()?;
        Some(pool)
    }

    #[tokio::test]
    async fn concurrent_logins_leave_a_single_session() {
        let Some(pool) = scratch_pool().await else {
            return;
        };
        let repo = PostgresSessionRepository::new(pool);
        let principal = PrincipalId::new();
        let policy = SessionPolicy::default();

        let mut logins = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let repo = repo.clone();
            let session = Session::start(principal, DeviceInfo::default(), Utc::now(), &policy);
            logins.spawn(async move { repo.replace_for_principal(&session).await });
        }
        while let Some(result) = logins.join_next().await {
            result.unwrap().unwrap();
        }

        let live = repo.list_by_principal(principal).await.unwrap();
        assert_eq!(live.len(), 1);

        repo.delete(live[0].id).await.unwrap();
    }
}
