//! Handler-side authorization helpers.
//!
//! Middleware only establishes who the caller is; handlers decide what the
//! caller may do, per action.

use forgeguard_auth::{AccessDecision, Action, AuthError, Module, SubModule, evaluate};
use forgeguard_infra::{AuditEmitter, AuditEvent};
use tracing::info;

use crate::context::PrincipalContext;

/// Check `(module, sub_module, action)` for the caller.
///
/// Denials are logged with their reason and audited as `authz.denied`.
pub fn require(
    ctx: &PrincipalContext,
    audit: &AuditEmitter,
    module: &Module,
    sub_module: &SubModule,
    action: &Action,
) -> Result<(), AuthError> {
    let AccessDecision { granted, denial } = evaluate(ctx.principal(), module, sub_module, action);
    if granted {
        return Ok(());
    }

    let permission = format!("{module}.{sub_module}.{action}");
    info!(
        principal_id = %ctx.principal_id(),
        permission = %permission,
        denial = ?denial,
        "authorization denied"
    );
    audit.emit(
        AuditEvent::new("authz.denied", "permission")
            .actor(ctx.principal_id())
            .entity(&permission)
            .detail(serde_json::json!({ "denial": denial })),
    );

    Err(AuthError::Forbidden(format!("missing permission '{permission}'")))
}
