/*
 * Responsibility
 * - middleware の公開インターフェース
 * - stage order: trace → auth (credential / session_token → identity → access) → audit
 */
use axum::extract::MatchedPath;
use axum::http::Request;

use crate::context::{ClientAddr, TraceContext};

pub mod audit;
pub mod auth;
pub mod cors;
pub mod http;
pub mod trace;

/// Route template when the router matched one, else the literal path.
pub(crate) fn route_of<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string())
}

/// Caller addresses, preferring what the trace stage already resolved.
pub(crate) fn client_addr_of<B>(req: &Request<B>) -> ClientAddr {
    req.extensions()
        .get::<TraceContext>()
        .map(|t| t.addr.clone())
        .unwrap_or_else(|| ClientAddr::resolve(req.headers(), req.extensions()))
}
