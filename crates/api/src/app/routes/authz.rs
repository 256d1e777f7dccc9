use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use forgeguard_auth::{Action, Module, PrincipalId, SubModule};

use crate::app::errors::{auth_error_to_response, json_error};
use crate::app::services::AppServices;
use crate::authz::require;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/check", get(check))
        .route("/can-view/:principal_id", get(can_view))
        .route("/can-approve/:principal_id", get(can_approve))
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub module: String,
    pub sub_module: String,
    pub action: String,
}

async fn check(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Query(q): Query<CheckQuery>,
) -> Response {
    let module = Module::new(q.module);
    let sub_module = SubModule::new(q.sub_module);
    let action = Action::new(q.action);

    match require(&ctx, &services.audit, &module, &sub_module, &action) {
        Ok(()) => Json(serde_json::json!({ "allowed": true })).into_response(),
        Err(e) => auth_error_to_response(&e),
    }
}

async fn can_view(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(target): Path<String>,
) -> Response {
    let target = match parse_principal(&target) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let allowed = services.engine.can_view(ctx.principal(), target).await;
    Json(serde_json::json!({ "allowed": allowed })).into_response()
}

async fn can_approve(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<PrincipalContext>,
    Path(applicant): Path<String>,
) -> Response {
    let applicant = match parse_principal(&applicant) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let allowed = services.engine.can_approve(ctx.principal(), applicant).await;
    Json(serde_json::json!({ "allowed": allowed })).into_response()
}

fn parse_principal(raw: &str) -> Result<PrincipalId, Response> {
    raw.parse::<PrincipalId>()
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}
