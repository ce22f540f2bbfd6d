//! Cache client interface used by the pipeline (tenant lookup, identity blobs,
//! session tokens, permissions).
use async_trait::async_trait;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-layer errors (transport/command).
///
/// Note:
/// - We keep this independent from `AppError` so each stage decides how to fail
///   (fail-closed for authorization and session tokens, degrade for tenant lookup).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    BackendConnection(String),
    #[error("cache command error: {0}")]
    BackendCommand(String),
}

/// A minimal, read-only cache interface.
///
/// The pipeline never writes to the cache; login flows and permission management
/// populate it elsewhere.
#[async_trait]
pub trait CacheClient: Send + Sync + 'static {
    // Returns the cache backend name (for logging).
    fn backend_name(&self) -> &'static str;

    // GET: UTF-8 string value.
    async fn get_string(&self, key: &str) -> CacheResult<Option<String>>;

    // HGET: UTF-8 string value of one hash field.
    async fn hget_string(&self, key: &str, field: &str) -> CacheResult<Option<String>>;
}
