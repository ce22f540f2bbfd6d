//! Verified claims (or trusted headers) → canonical [`Identity`].
//!
//! After this stage every later stage and the handler read the same `Identity` and
//! `ScopeContext` from the request extensions, and the identity header set is
//! rewritten on the outgoing request, whichever source produced it.
//!
//! Tenant scope:
//! - `X-Tenant-ID` from the gateway wins and is forwarded as `MerchantID` unchanged
//! - otherwise `X-Merchant-ID` is resolved through `merchant2tenant:<id>`; a miss is
//!   logged and leaves the scope empty (the request continues)
//! - otherwise the identity's own merchant id is kept
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
use serde_json::Value;

use crate::context::{ClaimSet, ScopeContext};
use crate::error::{AppError, AuthError};
use crate::identity::{self, Identity, set_header};
use crate::middleware::{client_addr_of, route_of};
use crate::services::cache::CacheClient;

pub const X_TENANT_ID: HeaderName = HeaderName::from_static("x-tenant-id");
pub const X_MERCHANT_ID: HeaderName = HeaderName::from_static("x-merchant-id");

pub const DEFAULT_TENANT_PREFIX: &str = "merchant2tenant";

/// Where the identity of a verified credential comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    /// The claim set already holds the identity fields.
    Claims,
    /// `iss` is the opaque blob itself (tokens issued at login).
    InlineBlob,
    /// `iss` references a blob stored under `<prefix>:<iss>`.
    CachedBlob { prefix: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Verified(IdentitySource),
    BindOnly,
}

#[derive(Clone)]
pub struct IdentityStage {
    mode: Mode,
    cache: Arc<dyn CacheClient>,
    tenant_prefix: String,
    call_timeout: Duration,
}

pub fn apply<S>(router: Router<S>, stage: IdentityStage) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(middleware::from_fn_with_state(stage, identity_middleware))
}

impl IdentityStage {
    /// Resolve the identity from the claim set published by the credential stage.
    pub fn new(source: IdentitySource, cache: Arc<dyn CacheClient>) -> Self {
        Self::with_mode(Mode::Verified(source), cache)
    }

    /// Re-derive the identity from headers of an already-authenticated upstream.
    /// Never rejects.
    pub fn bind_only(cache: Arc<dyn CacheClient>) -> Self {
        Self::with_mode(Mode::BindOnly, cache)
    }

    fn with_mode(mode: Mode, cache: Arc<dyn CacheClient>) -> Self {
        Self {
            mode,
            cache,
            tenant_prefix: DEFAULT_TENANT_PREFIX.to_string(),
            call_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_tenant_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tenant_prefix = prefix.into();
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    async fn resolve(
        &self,
        headers: &HeaderMap,
        claims: Option<&ClaimSet>,
    ) -> Result<Identity, AuthError> {
        let source = match &self.mode {
            Mode::BindOnly => return Ok(Identity::from_headers(headers)),
            Mode::Verified(source) => source,
        };

        // Misordered pipeline: fail closed.
        let claims = claims.ok_or(AuthError::MissingCredential)?;

        match source {
            IdentitySource::Claims => from_claims(claims),
            IdentitySource::InlineBlob => {
                let blob = claims.issuer().ok_or(AuthError::IncompleteClaims("iss"))?;
                load_blob(blob)
            }
            IdentitySource::CachedBlob { prefix } => {
                let reference = claims.issuer().ok_or(AuthError::IncompleteClaims("iss"))?;
                let blob = self.cached_blob(prefix, reference).await?;
                load_blob(&blob)
            }
        }
    }

    async fn cached_blob(&self, prefix: &str, reference: &str) -> Result<String, AuthError> {
        let key = format!("{prefix}:{reference}");
        match tokio::time::timeout(self.call_timeout, self.cache.get_string(&key)).await {
            Ok(Ok(Some(blob))) => Ok(blob),
            Ok(Ok(None)) => Err(AuthError::IdentityResolution(format!(
                "identity blob '{key}' not found"
            ))),
            Ok(Err(err)) => Err(AuthError::IdentityResolution(err.to_string())),
            Err(_) => Err(AuthError::IdentityResolution(
                "identity blob lookup timed out".to_string(),
            )),
        }
    }

    /// Tenant scope for the request; degrades to empty instead of failing.
    async fn resolve_tenant(&self, headers: &HeaderMap, identity: &Identity) -> String {
        if let Some(tenant) = header_text(headers, &X_TENANT_ID) {
            return tenant;
        }

        let Some(merchant_id) = header_text(headers, &X_MERCHANT_ID) else {
            return identity.merchant_id.clone();
        };

        tracing::debug!(merchant_id = %merchant_id, "merchant id received");

        let key = format!("{}:{}", self.tenant_prefix, merchant_id);
        match tokio::time::timeout(self.call_timeout, self.cache.get_string(&key)).await {
            Ok(Ok(Some(tenant))) => {
                tracing::debug!(merchant_id = %merchant_id, tenant = %tenant, "tenant resolved");
                tenant
            }
            Ok(Ok(None)) => {
                tracing::error!(key = %key, "tenant mapping not found; scope left empty");
                String::new()
            }
            Ok(Err(err)) => {
                tracing::error!(key = %key, error = %err, "tenant lookup failed; scope left empty");
                String::new()
            }
            Err(_) => {
                tracing::error!(key = %key, "tenant lookup timed out; scope left empty");
                String::new()
            }
        }
    }
}

fn header_text(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn load_blob(blob: &str) -> Result<Identity, AuthError> {
    Identity::load(blob).map_err(|e| AuthError::IdentityResolution(e.to_string()))
}

fn from_claims(claims: &ClaimSet) -> Result<Identity, AuthError> {
    let mut identity: Identity = serde_json::from_value(Value::Object(claims.as_map().clone()))
        .map_err(|e| AuthError::IdentityResolution(e.to_string()))?;

    if identity.account_id.is_empty() {
        identity.account_id = claims.subject().unwrap_or_default().to_string();
    }

    Ok(identity)
}

async fn identity_middleware(
    State(stage): State<IdentityStage>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let existing = req.extensions().get::<Identity>().cloned();
    if existing.is_some() && req.extensions().get::<ScopeContext>().is_some() {
        // Published once per request; an earlier stage already did it.
        tracing::debug!("identity already published; keeping it");
        return Ok(next.run(req).await);
    }

    // An identity placed without a scope is kept as is and only gets its scope here.
    let identity = match existing {
        Some(identity) => identity,
        None => {
            let claims = req.extensions().get::<ClaimSet>();
            match stage.resolve(req.headers(), claims).await {
                Ok(identity) => identity,
                Err(err) => {
                    tracing::warn!(
                        request_path = %route_of(&req),
                        request_method = %req.method(),
                        client_ip = %client_addr_of(&req).client_ip,
                        error = %err,
                        "identity rejected"
                    );
                    return Err(err.into());
                }
            }
        }
    };

    let tenant = stage.resolve_tenant(req.headers(), &identity).await;

    let headers = req.headers_mut();
    identity.write_headers(headers);
    set_header(headers, identity::MERCHANT_ID, &tenant);

    let scope = ScopeContext {
        namespace: identity.namespace.clone(),
        tenant,
        account: identity.account_id.clone(),
        operator: identity.user_id.clone(),
    };

    tracing::debug!(
        account_id = %identity.account_id,
        user_id = %identity.user_id,
        tenant = %scope.tenant,
        "identity published"
    );

    req.extensions_mut().insert(identity);
    req.extensions_mut().insert(scope);

    Ok(next.run(req).await)
}
