use axum::{
    Router,
    routing::{get, post},
};

pub mod auth;
pub mod authz;
pub mod system;

/// Routes that need no authenticated principal.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/version", get(system::version))
        .route("/auth/login", post(auth::login))
}

/// Routes behind the auth middleware.
pub fn protected_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/auth/logout", post(auth::logout))
        .nest("/authz", authz::router())
}
