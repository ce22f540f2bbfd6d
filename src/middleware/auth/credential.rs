//! Bearer credential → verified claim set in request extensions.
//!
//! One source per stage instance:
//! - `Authorization: Bearer <jwt>` for API/app clients
//! - a named cookie (default `jwt`) for browser clients
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::{self, Next},
    response::Response,
};

use crate::context::ClaimSet;
use crate::error::{AppError, AuthError};
use crate::middleware::{client_addr_of, route_of};
use crate::services::auth::{JwtVerifier, VerifyError};

pub const DEFAULT_COOKIE: &str = "jwt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Header,
    Cookie(String),
}

impl CredentialSource {
    pub fn cookie() -> Self {
        Self::Cookie(DEFAULT_COOKIE.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CredentialStage {
    verifier: Arc<JwtVerifier>,
    source: CredentialSource,
}

/// Guard the routes of `router` with credential verification.
///
/// 例：
/// ```ignore
/// let v1 = middleware::auth::credential::apply(v1, state.credential_stage());
/// ```
pub fn apply<S>(router: Router<S>, stage: CredentialStage) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(middleware::from_fn_with_state(stage, credential_middleware))
}

impl CredentialStage {
    pub fn new(verifier: Arc<JwtVerifier>, source: CredentialSource) -> Self {
        Self { verifier, source }
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    /// Extract, verify and decode the caller's credential.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<ClaimSet, AuthError> {
        let token = self.extract(headers)?;

        self.verifier.verify(token).map_err(|err| match err {
            VerifyError::EmptyClaim(name) => AuthError::IncompleteClaims(name),
            VerifyError::Jwt(e) => {
                tracing::debug!(error = %e, "token rejected by verifier");
                AuthError::InvalidSignature
            }
        })
    }

    fn extract<'a>(&self, headers: &'a HeaderMap) -> Result<&'a str, AuthError> {
        match &self.source {
            CredentialSource::Header => {
                let value = headers
                    .get(header::AUTHORIZATION)
                    .ok_or(AuthError::MissingCredential)?
                    .to_str()
                    .map_err(|_| AuthError::MalformedCredential)?;

                if value.trim().is_empty() {
                    return Err(AuthError::MissingCredential);
                }

                match value.split_once(' ') {
                    Some(("Bearer", token)) if !token.trim().is_empty() => Ok(token.trim()),
                    _ => Err(AuthError::MalformedCredential),
                }
            }
            CredentialSource::Cookie(name) => cookie_value(headers, name)
                .filter(|v| !v.is_empty())
                .ok_or(AuthError::MissingCredential),
        }
    }
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then_some(value.trim())
        })
}

async fn credential_middleware(
    State(stage): State<CredentialStage>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let claims = match stage.authenticate(req.headers()) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::warn!(
                request_path = %route_of(&req),
                request_method = %req.method(),
                client_ip = %client_addr_of(&req).client_ip,
                error = %err,
                "credential rejected"
            );
            return Err(err.into());
        }
    };

    tracing::debug!(sub = claims.subject().unwrap_or_default(), "credential verified");

    // middleware → 次の stage への受け渡し
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
