//! Trusted-upstream guard for routes that take identity from headers.
//!
//! Bind-only identity trusts `AccountID` / `UserID` / ... as sent, so those routes must
//! only be reachable by the gateway that authenticated the caller. The gateway proves
//! itself with a shared secret in `X-Upstream-Secret`.
//!
//! - no secret configured: every request is rejected
//! - missing or different secret: 401
//! - match: the header is stripped and the request continues
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderName, Request},
    middleware::{self, Next},
    response::Response,
};

use crate::error::{AppError, AuthError};
use crate::middleware::{client_addr_of, route_of};

pub const UPSTREAM_SECRET_HEADER: HeaderName = HeaderName::from_static("x-upstream-secret");

#[derive(Clone)]
pub struct UpstreamGuard {
    secret: Option<Arc<[u8]>>,
}

impl std::fmt::Debug for UpstreamGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamGuard")
            .field("configured", &self.secret.is_some())
            .finish()
    }
}

pub fn apply<S>(router: Router<S>, guard: UpstreamGuard) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(middleware::from_fn_with_state(guard, upstream_middleware))
}

impl UpstreamGuard {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret
                .filter(|s| !s.is_empty())
                .map(|s| Arc::from(s.as_bytes())),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    pub fn admits(&self, presented: Option<&[u8]>) -> bool {
        match (&self.secret, presented) {
            (Some(secret), Some(presented)) => constant_time_eq(secret, presented),
            _ => false,
        }
    }
}

/// Compares every byte regardless of where the first difference is.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn upstream_middleware(
    State(guard): State<UpstreamGuard>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let presented = req.headers().get(UPSTREAM_SECRET_HEADER).map(|v| v.as_bytes());
    if !guard.admits(presented) {
        tracing::warn!(
            request_path = %route_of(&req),
            client_ip = %client_addr_of(&req).client_ip,
            configured = guard.is_configured(),
            "untrusted upstream rejected"
        );
        return Err(AuthError::UntrustedUpstream.into());
    }

    req.headers_mut().remove(UPSTREAM_SECRET_HEADER);
    Ok(next.run(req).await)
}
