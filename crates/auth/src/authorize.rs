use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use forgeguard_core::PrincipalId;

use crate::capability::{Action, Module, SubModule};
use crate::error::AuthError;
use crate::principal::{Principal, ProfileDirectory};
use crate::roles::{DataScope, RoleCode};

/// Outcome of a capability check, with the reason when denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub granted: bool,
    pub denial: Option<DenialKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// The module is not in the principal's module access list.
    ModuleOutOfScope,
    /// The role lacks `(module, sub_module, action)`.
    MissingCapability,
}

impl AccessDecision {
    fn granted() -> Self {
        Self {
            granted: true,
            denial: None,
        }
    }

    fn denied(kind: DenialKind) -> Self {
        Self {
            granted: false,
            denial: Some(kind),
        }
    }
}

/// Evaluate `(module, sub_module, action)` for a principal.
///
/// Module gating and action gating are independent and both required.
///
/// - No IO
/// - No panics
pub fn evaluate(
    principal: &Principal,
    module: &Module,
    sub_module: &SubModule,
    action: &Action,
) -> AccessDecision {
    if !principal.module_access.includes(module) {
        return AccessDecision::denied(DenialKind::ModuleOutOfScope);
    }

    if !principal
        .role
        .capabilities
        .permits(module, sub_module, action)
    {
        return AccessDecision::denied(DenialKind::MissingCapability);
    }

    AccessDecision::granted()
}

pub fn allowed(
    principal: &Principal,
    module: &Module,
    sub_module: &SubModule,
    action: &Action,
) -> bool {
    evaluate(principal, module, sub_module, action).granted
}

/// Like [`allowed`], as a `Result` for handlers that propagate with `?`.
pub fn authorize(
    principal: &Principal,
    module: &Module,
    sub_module: &SubModule,
    action: &Action,
) -> Result<(), AuthError> {
    if allowed(principal, module, sub_module, action) {
        Ok(())
    } else {
        Err(AuthError::Forbidden(format!(
            "missing permission '{module}.{sub_module}.{action}'"
        )))
    }
}

/// Domain-specific approval rule for GROUP-scoped approvers.
///
/// Group leads approve only applicants holding `subordinate_role`, not peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPolicy {
    pub subordinate_role: RoleCode,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            subordinate_role: RoleCode::new("member"),
        }
    }
}

/// Data-scope evaluator.
///
/// Capability checks are pure; scope checks need the target's placement, read
/// from the profile directory. Unknown targets and lookup failures deny.
#[derive(Clone)]
pub struct PermissionEngine {
    directory: Arc<dyn ProfileDirectory>,
    approval: ApprovalPolicy,
}

impl PermissionEngine {
    pub fn new(directory: Arc<dyn ProfileDirectory>, approval: ApprovalPolicy) -> Self {
        Self {
            directory,
            approval,
        }
    }

    pub fn allowed(
        &self,
        principal: &Principal,
        module: &Module,
        sub_module: &SubModule,
        action: &Action,
    ) -> bool {
        allowed(principal, module, sub_module, action)
    }

    pub async fn can_view(&self, principal: &Principal, target: PrincipalId) -> bool {
        match principal.role.data_scope {
            DataScope::All => true,
            DataScope::SelfOnly => target == principal.id,
            DataScope::Project => match self.lookup(target).await {
                Some(other) => same(principal.org_unit_id, other.org_unit_id),
                None => false,
            },
            DataScope::Group => match self.lookup(target).await {
                Some(other) => same(principal.group_id, other.group_id),
                None => false,
            },
        }
    }

    pub async fn can_approve(&self, principal: &Principal, applicant: PrincipalId) -> bool {
        if !principal.role.can_manage_subordinates {
            return false;
        }

        match principal.role.data_scope {
            DataScope::All => true,
            DataScope::SelfOnly => applicant == principal.id,
            DataScope::Project => match self.lookup(applicant).await {
                Some(other) => same(principal.org_unit_id, other.org_unit_id),
                None => false,
            },
            DataScope::Group => match self.lookup(applicant).await {
                Some(other) => {
                    same(principal.group_id, other.group_id)
                        && other.role.code == self.approval.subordinate_role
                }
                None => false,
            },
        }
    }

    async fn lookup(&self, target: PrincipalId) -> Option<Principal> {
        match self.directory.profile_with_role(target).await {
            Ok(Some(p)) => Some(p),
            Ok(None) => {
                debug!(principal_id = %target, "scope check target not found; denying");
                None
            }
            Err(e) => {
                warn!(principal_id = %target, error = %e, "scope check lookup failed; denying");
                None
            }
        }
    }
}

impl core::fmt::Debug for PermissionEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PermissionEngine")
            .field("approval", &self.approval)
            .finish_non_exhaustive()
    }
}

/// Both sides must be placed, and in the same place.
fn same<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}
