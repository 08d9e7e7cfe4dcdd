use crate::api::ApiError;
use crate::config::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use toolgate_core::{AuthIdentity, Guard, GuardError};

/// Raw value of the Authorization header, if readable
pub fn authorization_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION)?.to_str().ok()
}

/// Authenticate, then charge one request against the caller's quota
pub fn check_request(
    guard: &Guard,
    headers: &HeaderMap,
    peer: Option<IpAddr>,
) -> Result<AuthIdentity, GuardError> {
    let identity = guard.authenticate(authorization_header(headers)).inspect_err(|_| {
        tracing::warn!(peer = ?peer, "Rejected request with missing or invalid token");
    })?;

    let key = identity.quota_key(peer);
    guard.admit(&key).inspect_err(|err| {
        tracing::warn!(quota_key = %key, "{}", err);
    })?;

    Ok(identity)
}

/// Guard middleware for the `/mcp` routes.
///
/// Failures short-circuit with a plain JSON error, so streaming routes never
/// open a stream for a rejected caller.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Absent when the router is driven without a socket (tests)
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let identity = check_request(&state.guard, req.headers(), peer)?;
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
