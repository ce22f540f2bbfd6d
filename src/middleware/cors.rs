//! CORS policy for browser clients.
//!
//! Note:
//! - Browser clients carry the credential in the `jwt` cookie, so a configured origin is
//!   allowed WITH credentials.
//! - Preflight `OPTIONS` is answered here, before any auth stage runs.
//!
//! Policy:
//! - `CORS_ALLOWED_ORIGIN` set: exactly that origin, with credentials.
//! - Development without an origin: permissive (Allow-Origin: *), WITHOUT credentials.
//! - Production without an origin: no CORS headers at all.

use std::time::Duration;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::Config;
use crate::identity;
use crate::middleware::audit::TARGET_ID_HEADER;
use crate::middleware::auth::identity::{X_MERCHANT_ID, X_TENANT_ID};
use crate::middleware::auth::session_token::TOKEN_HEADER;
use crate::middleware::trace::REQUEST_ID_HEADER;

fn cors_layer(config: &Config) -> CorsLayer {
    let base = match config
        .cors_allowed_origin
        .as_deref()
        .and_then(|o| HeaderValue::from_str(o).ok())
    {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_credentials(true),
        // IMPORTANT: never combine `Any` with credentials.
        None if !config.app_env.is_production() => CorsLayer::new().allow_origin(Any),
        None => CorsLayer::new(),
    };

    base.allow_methods([
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ])
    .allow_headers([
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        REQUEST_ID_HEADER,
        X_MERCHANT_ID,
        X_TENANT_ID,
        TOKEN_HEADER,
        HeaderName::from_static("jwt"),
        identity::MERCHANT_ID,
    ])
    .expose_headers([
        header::CONTENT_RANGE,
        HeaderName::from_static("x-total-count"),
        REQUEST_ID_HEADER,
        TARGET_ID_HEADER,
    ])
    .max_age(Duration::from_secs(60 * 10))
}

/// Apply CORS policy to the given Router.
pub fn apply<S>(router: Router<S>, config: &Config) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(cors_layer(config))
}
