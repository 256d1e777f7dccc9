//! Postgres-backed profile directory.
//!
//! ```sql
//! CREATE TABLE roles (
//!     id                      UUID PRIMARY KEY,
//!     code                    TEXT    NOT NULL UNIQUE,
//!     data_scope              TEXT    NOT NULL,   -- ALL | PROJECT | GROUP | SELF
//!     can_manage_subordinates BOOLEAN NOT NULL DEFAULT FALSE,
//!     capabilities            JSONB   NOT NULL DEFAULT '{}'
//! );
//! CREATE TABLE profiles (
//!     id            UUID PRIMARY KEY,
//!     display_name  TEXT  NOT NULL,
//!     login         TEXT  NOT NULL UNIQUE,
//!     password_hash TEXT  NOT NULL,
//!     role_id       UUID  NOT NULL REFERENCES roles (id),
//!     org_unit_id   UUID,
//!     group_id      UUID,
//!     module_access JSONB NOT NULL DEFAULT '[]'
//! );
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use forgeguard_auth::{
    CapabilitySet, DataScope, DirectoryError, ModuleAccess, Principal, ProfileDirectory, Role,
    RoleCode,
};
use forgeguard_core::{GroupId, OrgUnitId, PrincipalId, RoleId};

#[derive(Debug, Clone)]
pub struct PostgresProfileDirectory {
    pool: Arc<PgPool>,
}

impl PostgresProfileDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ProfileDirectory for PostgresProfileDirectory {
    #[instrument(skip(self), fields(principal_id = %principal_id), err)]
    async fn profile_with_role(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Option<Principal>, DirectoryError> {
        let row = sqlx::query(
            r#"
            SELECT
                p.id, p.display_name, p.org_unit_id, p.group_id, p.module_access,
                r.id AS role_id, r.code AS role_code, r.data_scope,
                r.can_manage_subordinates, r.capabilities
            FROM profiles p
            JOIN roles r ON r.id = p.role_id
            WHERE p.id = $1
            "#,
        )
        .bind(principal_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        row.map(|r| principal_from_row(&r)).transpose()
    }

    async fn principals_with_role(
        &self,
        role_id: RoleId,
    ) -> Result<Vec<PrincipalId>, DirectoryError> {
        let rows = sqlx::query("SELECT id FROM profiles WHERE role_id = $1")
            .bind(role_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        rows.iter()
            .map(|r| {
                r.try_get::<uuid::Uuid, _>("id")
                    .map(PrincipalId::from_uuid)
                    .map_err(corrupt)
            })
            .collect()
    }
}

fn corrupt(err: sqlx::Error) -> DirectoryError {
    DirectoryError::Corrupt(err.to_string())
}

fn principal_from_row(row: &sqlx::postgres::PgRow) -> Result<Principal, DirectoryError> {
    let data_scope: String = row.try_get("data_scope").map_err(corrupt)?;
    let data_scope: DataScope = data_scope
        .parse()
        .map_err(|e: forgeguard_core::DomainError| DirectoryError::Corrupt(e.to_string()))?;

    let capabilities: serde_json::Value = row.try_get("capabilities").map_err(corrupt)?;
    let capabilities: CapabilitySet = serde_json::from_value(capabilities)
        .map_err(|e| DirectoryError::Corrupt(format!("role capabilities: {e}")))?;

    let module_access: serde_json::Value = row.try_get("module_access").map_err(corrupt)?;
    let module_access: ModuleAccess = serde_json::from_value(module_access)
        .map_err(|e| DirectoryError::Corrupt(format!("module access: {e}")))?;

    let role_code: String = row.try_get("role_code").map_err(corrupt)?;

    Ok(Principal {
        id: PrincipalId::from_uuid(row.try_get("id").map_err(corrupt)?),
        display_name: row.try_get("display_name").map_err(corrupt)?,
        role: Role {
            id: RoleId::from_uuid(row.try_get("role_id").map_err(corrupt)?),
            code: RoleCode::new(role_code),
            data_scope,
            can_manage_subordinates: row.try_get("can_manage_subordinates").map_err(corrupt)?,
            capabilities,
        },
        org_unit_id: row
            .try_get::<Option<uuid::Uuid>, _>("org_unit_id")
            .map_err(corrupt)?
            .map(OrgUnitId::from_uuid),
        group_id: row
            .try_get::<Option<uuid::Uuid>, _>("group_id")
            .map_err(corrupt)?
            .map(GroupId::from_uuid),
        module_access,
    })
}
