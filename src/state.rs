/*
 * Responsibility
 * - Router に紐づける共有コンテキスト (AppState)
 *   - ex: verifier / issuer, cache, permission store, audit store
 * - Clone 前提で持つ (内部は Arc/Clone cheap)
 * - 各 stage の組み立て (設定値はここで一度だけ解釈する)
 */
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::middleware::audit::{LoginAuditStage, OperationAuditStage};
use crate::middleware::auth::access::{AccessStage, SubjectKey};
use crate::middleware::auth::credential::{CredentialSource, CredentialStage};
use crate::middleware::auth::identity::{IdentitySource, IdentityStage};
use crate::middleware::auth::session_token::SessionTokenStage;
use crate::middleware::auth::upstream::UpstreamGuard;
use crate::services::audit::AuditStore;
use crate::services::auth::{JwtIssuer, JwtVerifier, build_issuer, build_verifier};
use crate::services::cache::CacheClient;
use crate::services::permission::{CachePermissionStore, PermissionStore};

/// Stage modes read from `Config`.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub credential_source: CredentialSource,
    pub identity_source: IdentitySource,
    pub subject_key: SubjectKey,
    pub merchant_tenant_prefix: String,
    pub audit_target_param: String,
    pub skip_view_log: bool,
    pub external_call_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            credential_source: config.credential_source.clone(),
            identity_source: config.identity_source.clone(),
            subject_key: config.subject_key,
            merchant_tenant_prefix: config.merchant_tenant_prefix.clone(),
            audit_target_param: config.audit_target_param.clone(),
            skip_view_log: config.skip_view_log,
            external_call_timeout: config.external_call_timeout,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<JwtVerifier>,
    pub issuer: Arc<JwtIssuer>,
    pub cache: Arc<dyn CacheClient>,
    pub permissions: Arc<dyn PermissionStore>,
    pub audit: Arc<dyn AuditStore>,
    pub upstream: UpstreamGuard,
    pub settings: PipelineSettings,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("cache", &self.cache.backend_name())
            .field("audit", &self.audit.backend_name())
            .field("upstream", &self.upstream)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Permissions are read from the same cache the login flow writes them to.
    pub fn new(config: &Config, cache: Arc<dyn CacheClient>, audit: Arc<dyn AuditStore>) -> Self {
        let permissions: Arc<dyn PermissionStore> = Arc::new(CachePermissionStore::new(
            cache.clone(),
            config.permission_key_prefix.clone(),
        ));

        Self {
            verifier: build_verifier(config),
            issuer: build_issuer(config),
            cache,
            permissions,
            audit,
            upstream: UpstreamGuard::new(config.upstream_secret.as_deref()),
            settings: PipelineSettings::from_config(config),
        }
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionStore>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn credential_stage(&self) -> CredentialStage {
        CredentialStage::new(self.verifier.clone(), self.settings.credential_source.clone())
    }

    pub fn identity_stage(&self) -> IdentityStage {
        IdentityStage::new(self.settings.identity_source.clone(), self.cache.clone())
            .with_tenant_prefix(self.settings.merchant_tenant_prefix.clone())
            .with_call_timeout(self.settings.external_call_timeout)
    }

    pub fn upstream_guard(&self) -> UpstreamGuard {
        self.upstream.clone()
    }

    pub fn bind_only_stage(&self) -> IdentityStage {
        IdentityStage::bind_only(self.cache.clone())
            .with_tenant_prefix(self.settings.merchant_tenant_prefix.clone())
            .with_call_timeout(self.settings.external_call_timeout)
    }

    pub fn access_stage(&self) -> AccessStage {
        AccessStage::new(
            self.permissions.clone(),
            self.settings.subject_key,
            self.settings.external_call_timeout,
        )
    }

    pub fn session_token_stage(&self) -> SessionTokenStage {
        SessionTokenStage::new(self.cache.clone(), self.settings.external_call_timeout)
    }

    pub fn login_audit_stage(&self) -> LoginAuditStage {
        LoginAuditStage::new(
            self.audit.clone(),
            self.settings.skip_view_log,
            self.settings.external_call_timeout,
        )
    }

    pub fn operation_audit_stage(&self) -> OperationAuditStage {
        OperationAuditStage::new(self.audit.clone(), self.settings.external_call_timeout)
            .with_target_param(self.settings.audit_target_param.clone())
    }
}
