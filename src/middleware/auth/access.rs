//! Identity → allow / deny for the matched route.
//!
//! The permission store is the only decision maker. Anything that keeps it from
//! answering (empty subject, no route template, backend error, timeout) denies with 403.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{MatchedPath, State},
    http::{Method, Request, StatusCode},
    middleware::{self, Next},
    response::Response,
};

use crate::error::{AppError, AuthError};
use crate::identity::Identity;
use crate::middleware::client_addr_of;
use crate::services::permission::PermissionStore;

/// Which identity field is checked against the permission store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubjectKey {
    #[default]
    UserId,
    AccountId,
}

impl SubjectKey {
    pub fn pick<'a>(&self, identity: &'a Identity) -> &'a str {
        match self {
            SubjectKey::UserId => &identity.user_id,
            SubjectKey::AccountId => &identity.account_id,
        }
    }
}

#[derive(Clone)]
pub struct AccessStage {
    store: Arc<dyn PermissionStore>,
    subject_key: SubjectKey,
    call_timeout: Duration,
}

/// `route_layer` so the matched template is known when the check runs.
///
/// 例：
/// ```ignore
/// let v1 = middleware::auth::access::apply(v1, state.access_stage());
/// ```
pub fn apply<S>(router: Router<S>, stage: AccessStage) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(middleware::from_fn_with_state(stage, access_middleware))
}

impl AccessStage {
    pub fn new(store: Arc<dyn PermissionStore>, subject_key: SubjectKey, call_timeout: Duration) -> Self {
        Self {
            store,
            subject_key,
            call_timeout,
        }
    }

    pub fn subject_key(&self) -> SubjectKey {
        self.subject_key
    }

    /// Status the request should continue with; only `200 OK` lets it through.
    pub async fn decide(&self, subject: &str, route: Option<&str>, method: &Method) -> StatusCode {
        if subject.trim().is_empty() {
            tracing::debug!("no subject to authorize");
            return StatusCode::FORBIDDEN;
        }

        let Some(route) = route else {
            tracing::debug!("no route template to authorize");
            return StatusCode::FORBIDDEN;
        };

        match tokio::time::timeout(self.call_timeout, self.store.verify(subject, route, method)).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "permission store failed; denying");
                StatusCode::FORBIDDEN
            }
            Err(_) => {
                tracing::error!("permission store timed out; denying");
                StatusCode::FORBIDDEN
            }
        }
    }
}

async fn access_middleware(
    State(stage): State<AccessStage>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let subject = req
        .extensions()
        .get::<Identity>()
        .map(|identity| stage.subject_key().pick(identity).to_string())
        .unwrap_or_default();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string());

    let status = stage.decide(&subject, route.as_deref(), req.method()).await;

    if status != StatusCode::OK {
        let identity = req.extensions().get::<Identity>().cloned().unwrap_or_default();
        let addr = client_addr_of(&req);
        tracing::error!(
            request_path = route.as_deref().unwrap_or(req.uri().path()),
            request_method = %req.method(),
            client_ip = %addr.client_ip,
            remote_ip = %addr.remote_ip,
            user_name = %identity.user_name,
            user_id = %identity.user_id,
            account_id = %identity.account_id,
            namespace = %identity.namespace,
            status = status.as_u16(),
            "permission denied"
        );
        return Err(AuthError::PermissionDenied(status).into());
    }

    Ok(next.run(req).await)
}
