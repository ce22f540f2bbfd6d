//! Permission store interface consulted by the access stage.
//!
//! Permissions are written at login time into a hash per subject:
//! `HGET <prefix>:<subject> <METHOD>:<route template>`.
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use thiserror::Error;

use crate::services::cache::{CacheClient, CacheError};

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Live allow/deny lookup keyed by (subject, route template, method).
///
/// `Ok(StatusCode::OK)` allows; any other status is returned to the client as is.
#[async_trait]
pub trait PermissionStore: Send + Sync + 'static {
    async fn verify(
        &self,
        subject: &str,
        route: &str,
        method: &Method,
    ) -> Result<StatusCode, PermissionError>;
}

/// Permission store backed by the shared cache.
pub struct CachePermissionStore {
    cache: Arc<dyn CacheClient>,
    prefix: String,
}

impl CachePermissionStore {
    pub fn new(cache: Arc<dyn CacheClient>, prefix: impl Into<String>) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, subject: &str) -> String {
        format!("{}:{}", self.prefix, subject)
    }

    pub fn field(route: &str, method: &Method) -> String {
        format!("{}:{}", method.as_str(), route)
    }
}

#[async_trait]
impl PermissionStore for CachePermissionStore {
    async fn verify(
        &self,
        subject: &str,
        route: &str,
        method: &Method,
    ) -> Result<StatusCode, PermissionError> {
        let value = self
            .cache
            .hget_string(&self.key(subject), &Self::field(route, method))
            .await?;

        let status = match value.as_deref().map(str::trim) {
            Some("1") | Some("true") => StatusCode::OK,
            Some(raw) => raw
                .parse::<u16>()
                .ok()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::FORBIDDEN),
            None => StatusCode::FORBIDDEN,
        };

        Ok(status)
    }
}

impl std::fmt::Debug for CachePermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePermissionStore")
            .field("backend", &self.cache.backend_name())
            .field("prefix", &self.prefix)
            .finish()
    }
}
