use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use forgeguard_auth::AuthError;
use forgeguard_infra::{AuditEvent, NetworkDecision, allowlist::normalize};

use crate::app::errors::{auth_error_to_response, network_unavailable};
use crate::app::services::AppServices;

#[derive(Clone)]
pub struct NetworkState {
    pub services: Arc<AppServices>,
    pub exempt_paths: Arc<[String]>,
    pub trust_forwarded_for: bool,
}

/// Caller address: first `X-Forwarded-For` hop when trusted, else the peer.
pub fn client_ip<B>(req: &Request<B>, trust_forwarded_for: bool) -> Option<IpAddr> {
    let forwarded = trust_forwarded_for
        .then(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|hop| hop.trim().parse::<IpAddr>().ok())
        })
        .flatten();

    forwarded
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .map(normalize)
}

pub async fn network_middleware(
    State(state): State<NetworkState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    if state.exempt_paths.iter().any(|p| p == req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let ip = client_ip(&req, state.trust_forwarded_for);
    match state.services.guard.check(ip).await {
        NetworkDecision::Allow => Ok(next.run(req).await),
        NetworkDecision::Deny => {
            let addr = ip.map_or_else(|| "unknown address".to_string(), |ip| ip.to_string());
            warn!(ip = %addr, path = %req.uri().path(), "request blocked by network allowlist");
            state.services.audit.emit(
                AuditEvent::new("network.denied", "network")
                    .entity(&addr)
                    .detail(serde_json::json!({ "path": req.uri().path() })),
            );
            Err(auth_error_to_response(&AuthError::NetworkDenied(addr)))
        }
        NetworkDecision::Unavailable => Err(network_unavailable()),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;

    fn request(xff: Option<&str>, peer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/whoami");
        if let Some(xff) = xff {
            builder = builder.header("x-forwarded-for", xff);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            req.extensions_mut()
                .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        }
        req
    }

    #[test]
    fn forwarded_for_is_used_only_when_trusted() {
        let req = request(Some("10.1.1.1, 172.16.0.1"), Some("127.0.0.1:5000"));
        assert_eq!(client_ip(&req, true), Some("10.1.1.1".parse().unwrap()));
        assert_eq!(client_ip(&req, false), Some("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn mapped_peers_are_normalized() {
        let req = request(None, Some("[::ffff:10.0.0.7]:443"));
        assert_eq!(client_ip(&req, false), Some("10.0.0.7".parse().unwrap()));
    }

    #[test]
    fn unparseable_forwarded_for_falls_back_to_peer() {
        let req = request(Some("garbage"), Some("127.0.0.1:5000"));
        assert_eq!(client_ip(&req, true), Some("127.0.0.1".parse().unwrap()));
        assert_eq!(client_ip(&request(None, None), true), None);
    }
}
