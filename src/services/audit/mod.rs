//! Audit persistence: login events and operation (mutation) records.
//!
//! Records are immutable once built. Writes are best-effort from the pipeline's point
//! of view; callers log failures and move on.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryAuditStore;
pub use postgres::PgAuditStore;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit db error: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginRecord {
    pub id: Uuid,
    pub access_level: u32,
    pub merchant_id: String,
    pub account_id: String,
    pub user_id: String,
    pub user_name: String,
    pub login_type: String,
    pub sign_in_name: String,
    pub client_ip: String,
    pub remote_ip: String,
    pub full_path: String,
    pub resp_code: u16,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `Attempt` is written before the handler runs (PUT/PATCH/DELETE), `Outcome` after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditPhase {
    Attempt,
    Outcome,
}

impl AuditPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditPhase::Attempt => "attempt",
            AuditPhase::Outcome => "outcome",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    pub id: Uuid,
    pub phase: AuditPhase,
    pub method: String,
    pub full_path: String,
    pub target_id: String,
    pub operator: String,
    pub account_id: String,
    pub namespace: String,
    pub client_ip: String,
    pub remote_ip: String,
    pub status: Option<u16>,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait AuditStore: Send + Sync + 'static {
    fn backend_name(&self) -> &'static str;

    /// Persist a login event; returns the stored record id.
    async fn create_login(&self, record: &LoginRecord) -> Result<String, AuditError>;

    /// Persist an operation record; returns the stored record id.
    async fn create_operation(&self, record: &OperationRecord) -> Result<String, AuditError>;
}
