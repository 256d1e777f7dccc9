use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgeguard_core::{GroupId, OrgUnitId, PrincipalId, RoleId};

use crate::capability::ModuleAccess;
use crate::roles::Role;

/// A fully resolved principal for authorization decisions.
///
/// Built from the profile store (profile + role + placement); a snapshot of
/// it is cached alongside the session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub display_name: String,
    pub role: Role,
    pub org_unit_id: Option<OrgUnitId>,
    pub group_id: Option<GroupId>,
    pub module_access: ModuleAccess,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("profile store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt profile record: {0}")]
    Corrupt(String),
}

/// Read-only view of the business record store.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Profile joined with its role and placement, `None` if unknown.
    async fn profile_with_role(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Option<Principal>, DirectoryError>;

    /// Every principal currently holding `role_id`.
    async fn principals_with_role(&self, role_id: RoleId)
    -> Result<Vec<PrincipalId>, DirectoryError>;
}
