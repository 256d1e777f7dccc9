use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn version() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn whoami(Extension(ctx): Extension<PrincipalContext>) -> impl IntoResponse {
    let p = ctx.principal();
    Json(serde_json::json!({
        "principal_id": p.id.to_string(),
        "session_id": ctx.session_id().to_string(),
        "display_name": p.display_name,
        "role": p.role.code.as_str(),
        "data_scope": p.role.data_scope.as_str(),
        "can_manage_subordinates": p.role.can_manage_subordinates,
        "org_unit_id": p.org_unit_id.map(|id| id.to_string()),
        "group_id": p.group_id.map(|id| id.to_string()),
        "module_access": p.module_access.patterns(),
    }))
}
