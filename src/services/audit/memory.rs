use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::services::audit::{AuditError, AuditStore, LoginRecord, OperationRecord};

/// Keeps records in process; used for development runs and tests.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    logins: Mutex<Vec<LoginRecord>>,
    operations: Mutex<Vec<OperationRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logins(&self) -> Vec<LoginRecord> {
        self.logins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn operations(&self) -> Vec<OperationRecord> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_login(&self, record: &LoginRecord) -> Result<String, AuditError> {
        self.logins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(record.id.to_string())
    }

    async fn create_operation(&self, record: &OperationRecord) -> Result<String, AuditError> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(record.id.to_string())
    }
}
