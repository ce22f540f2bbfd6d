//! Mini-program session token check.
//!
//! The login flow stores the session under `wx_tokens_<token>` as a hash. Every field
//! below must be present and non-empty, otherwise the request is refused with 403.
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, Request},
    middleware::{self, Next},
    response::Response,
};

use crate::context::SessionClaims;
use crate::error::{AppError, AuthError};
use crate::identity::set_header;
use crate::middleware::{client_addr_of, route_of};
use crate::services::cache::CacheClient;

pub const TOKEN_HEADER: HeaderName = HeaderName::from_static("token");
pub const KEY_PREFIX: &str = "wx_tokens_";

pub const OPEN_ID: &str = "OPEN_ID";
pub const ACCOUNT_ID: &str = "ACCOUNT_ID";
pub const UNION_ID: &str = "UNION_ID";
pub const SESSION_KEY: &str = "SESSION_KEY";

#[derive(Clone)]
pub struct SessionTokenStage {
    cache: Arc<dyn CacheClient>,
    call_timeout: Duration,
}

pub fn apply<S>(router: Router<S>, stage: SessionTokenStage) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(middleware::from_fn_with_state(stage, session_token_middleware))
}

impl SessionTokenStage {
    pub fn new(cache: Arc<dyn CacheClient>, call_timeout: Duration) -> Self {
        Self {
            cache,
            call_timeout,
        }
    }

    /// Read every session field for the token carried in `headers`.
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<SessionClaims, AuthError> {
        let token = headers
            .get(&TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::CacheFieldMissing("token"))?;

        let key = format!("{KEY_PREFIX}{token}");

        Ok(SessionClaims {
            open_id: self.field(&key, OPEN_ID).await?,
            account_id: self.field(&key, ACCOUNT_ID).await?,
            union_id: self.field(&key, UNION_ID).await?,
            session_key: self.field(&key, SESSION_KEY).await?,
        })
    }

    async fn field(&self, key: &str, field: &'static str) -> Result<String, AuthError> {
        match tokio::time::timeout(self.call_timeout, self.cache.hget_string(key, field)).await {
            Ok(Ok(Some(value))) if !value.is_empty() => Ok(value),
            Ok(Ok(_)) => {
                tracing::error!(sub_key = field, "session field is empty or missing");
                Err(AuthError::CacheFieldMissing(field))
            }
            Ok(Err(err)) => {
                tracing::error!(sub_key = field, error = %err, "session lookup failed");
                Err(AuthError::CacheFieldMissing(field))
            }
            Err(_) => {
                tracing::error!(sub_key = field, "session lookup timed out");
                Err(AuthError::CacheFieldMissing(field))
            }
        }
    }
}

async fn session_token_middleware(
    State(stage): State<SessionTokenStage>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let session = match stage.resolve(req.headers()).await {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(
                request_path = %route_of(&req),
                request_method = %req.method(),
                client_ip = %client_addr_of(&req).client_ip,
                error = %err,
                "session token rejected"
            );
            return Err(err.into());
        }
    };

    let headers = req.headers_mut();
    set_header(headers, HeaderName::from_static("open_id"), &session.open_id);
    set_header(headers, HeaderName::from_static("account_id"), &session.account_id);
    set_header(headers, HeaderName::from_static("union_id"), &session.union_id);
    set_header(headers, HeaderName::from_static("session_key"), &session.session_key);

    req.extensions_mut().insert(session);

    Ok(next.run(req).await)
}
