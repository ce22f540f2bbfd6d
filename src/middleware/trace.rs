//! Per-request trace id and request-scoped logging context.
//!
//! Outermost stage: every response, including rejections from later stages, carries
//! `X-Request-ID`, and every log line emitted while serving the request is inside the
//! `request` span that holds the id.
use axum::{
    Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
};
use tracing::Instrument;

use crate::context::{ClientAddr, TraceContext};

/// Header name for request id propagation.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

pub fn apply<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn(trace_middleware))
}

/// 128 random bits, hex encoded. Falls back to an empty id instead of failing the
/// request when the OS cannot provide randomness.
pub fn generate_request_id() -> String {
    let mut bytes = [0u8; 16];
    match getrandom::fill(&mut bytes) {
        Ok(()) => hex::encode(bytes),
        Err(err) => {
            tracing::warn!(error = %err, "randomness unavailable; request id left empty");
            String::new()
        }
    }
}

async fn trace_middleware(mut req: Request<Body>, next: Next) -> Response {
    let request_id = generate_request_id();
    let addr = ClientAddr::resolve(req.headers(), req.extensions());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
        client_ip = %addr.client_ip,
    );

    req.extensions_mut().insert(TraceContext {
        request_id: request_id.clone(),
        addr,
    });

    // Downstream sees only the generated id, never one the client sent.
    let value = HeaderValue::from_str(&request_id).ok();
    match &value {
        Some(value) => {
            req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
        }
        None => {
            req.headers_mut().remove(REQUEST_ID_HEADER);
        }
    }

    let mut response = next.run(req).instrument(span).await;

    if let Some(value) = value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
