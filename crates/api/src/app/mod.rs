//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, caches, directory, guard, audit
//! - `routes/`: handlers, one file per area
//! - `errors.rs`: consistent JSON error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::config::ApiConfig;
use crate::credentials::CredentialSources;
use crate::middleware::{self, AuthCoordinator, NetworkState};

pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Layer order, outermost first: network guard, shared extensions, then the
/// auth middleware on protected routes only. Serve with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the guard sees
/// peer addresses.
pub fn build_app(services: Arc<AppServices>, config: &ApiConfig) -> Router {
    let coordinator = AuthCoordinator::new(
        services.clone(),
        CredentialSources::new(&config.credential_header, &config.credential_cookie),
    );
    let network = NetworkState {
        services: services.clone(),
        exempt_paths: config.network_exempt_paths.clone().into(),
        trust_forwarded_for: config.trust_forwarded_for,
    };
    let cookie = routes::auth::CookieName(config.credential_cookie.as_str().into());

    let protected = routes::protected_router().layer(axum::middleware::from_fn_with_state(
        coordinator,
        middleware::auth_middleware,
    ));

    Router::new()
        .merge(routes::public_router())
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    network,
                    middleware::network_middleware,
                ))
                .layer(Extension(services))
                .layer(Extension(cookie)),
        )
}
