/*
 * Responsibility
 * - 環境変数からの設定読み込み (secret, cache / audit backends, stage modes)
 * - 設定値のバリデーション (不足なら起動失敗)
 */
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::middleware::audit::DEFAULT_TARGET_PARAM;
use crate::middleware::auth::access::SubjectKey;
use crate::middleware::auth::credential::{CredentialSource, DEFAULT_COOKIE};
use crate::middleware::auth::identity::{DEFAULT_TENANT_PREFIX, IdentitySource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    pub cors_allowed_origin: Option<String>,

    pub jwt_secret: String,
    pub jwt_audience: Option<String>,
    pub jwt_leeway_seconds: u64,
    pub jwt_ttl_seconds: u64,

    // Shared with the gateway in front of bind-only routes. None: those routes reject.
    pub upstream_secret: Option<String>,

    pub credential_source: CredentialSource,
    pub identity_source: IdentitySource,
    pub subject_key: SubjectKey,

    pub permission_key_prefix: String,
    pub merchant_tenant_prefix: String,
    pub audit_target_param: String,
    pub skip_view_log: bool,

    pub external_call_timeout: Duration,
    pub request_timeout: Duration,

    // None: in-process backend (development only).
    pub valkey_url: Option<String>,
    pub database_url: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print the signing secret or connection strings
        f.debug_struct("Config")
            .field("addr", &self.addr)
            .field("app_env", &self.app_env)
            .field("credential_source", &self.credential_source)
            .field("identity_source", &self.identity_source)
            .field("subject_key", &self.subject_key)
            .finish_non_exhaustive()
    }
}

fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match var(key) {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

impl Config {
    /// Development defaults around a signing secret; every backend is in-process.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            app_env: AppEnv::Development,
            cors_allowed_origin: None,
            jwt_secret: jwt_secret.into(),
            jwt_audience: None,
            jwt_leeway_seconds: 60,
            jwt_ttl_seconds: 86_400,
            upstream_secret: None,
            credential_source: CredentialSource::Header,
            identity_source: IdentitySource::InlineBlob,
            subject_key: SubjectKey::UserId,
            permission_key_prefix: "rbam".to_string(),
            merchant_tenant_prefix: DEFAULT_TENANT_PREFIX.to_string(),
            audit_target_param: DEFAULT_TARGET_PARAM.to_string(),
            skip_view_log: true,
            external_call_timeout: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(30),
            valkey_url: None,
            database_url: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port: u16 = parse_or("PORT", 3000)?;
        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::from_env();

        let jwt_secret = var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let defaults = Self::with_secret(jwt_secret);

        let credential_source = match var("CREDENTIAL_SOURCE").as_deref() {
            None | Some("header") => CredentialSource::Header,
            Some("cookie") => CredentialSource::Cookie(
                var("CREDENTIAL_COOKIE").unwrap_or_else(|| DEFAULT_COOKIE.to_string()),
            ),
            Some(_) => return Err(ConfigError::Invalid("CREDENTIAL_SOURCE")),
        };

        let identity_source = match var("IDENTITY_SOURCE").as_deref() {
            None | Some("inline") => IdentitySource::InlineBlob,
            Some("claims") => IdentitySource::Claims,
            Some("cached") => IdentitySource::CachedBlob {
                prefix: var("IDENTITY_BLOB_PREFIX").unwrap_or_else(|| "identity_blob".to_string()),
            },
            Some(_) => return Err(ConfigError::Invalid("IDENTITY_SOURCE")),
        };

        let subject_key = match var("PERMISSION_SUBJECT").as_deref() {
            None | Some("user_id") => SubjectKey::UserId,
            Some("account_id") => SubjectKey::AccountId,
            Some(_) => return Err(ConfigError::Invalid("PERMISSION_SUBJECT")),
        };

        let valkey_url = var("VALKEY_URL");
        let database_url = var("DATABASE_URL");

        // In-process backends lose state on restart; never run them in production.
        if app_env.is_production() {
            if valkey_url.is_none() {
                return Err(ConfigError::Missing("VALKEY_URL"));
            }
            if database_url.is_none() {
                return Err(ConfigError::Missing("DATABASE_URL"));
            }
        }

        Ok(Self {
            addr,
            app_env,
            cors_allowed_origin: var("CORS_ALLOWED_ORIGIN"),
            jwt_secret: defaults.jwt_secret,
            jwt_audience: var("JWT_AUDIENCE"),
            jwt_leeway_seconds: parse_or("JWT_LEEWAY_SECONDS", defaults.jwt_leeway_seconds)?,
            jwt_ttl_seconds: parse_or("JWT_TTL_SECONDS", defaults.jwt_ttl_seconds)?,
            upstream_secret: var("UPSTREAM_SHARED_SECRET"),
            credential_source,
            identity_source,
            subject_key,
            permission_key_prefix: var("PERMISSION_KEY_PREFIX")
                .unwrap_or(defaults.permission_key_prefix),
            merchant_tenant_prefix: var("MERCHANT_TENANT_PREFIX")
                .unwrap_or(defaults.merchant_tenant_prefix),
            audit_target_param: var("AUDIT_TARGET_PARAM").unwrap_or(defaults.audit_target_param),
            skip_view_log: parse_or("SKIP_VIEW_LOG", defaults.skip_view_log)?,
            external_call_timeout: Duration::from_millis(parse_or("EXTERNAL_CALL_TIMEOUT_MS", 2000)?),
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECONDS", 30)?),
            valkey_url,
            database_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_secrets() {
        let mut config = Config::with_secret("super-secret");
        config.database_url = Some("postgres://user:pw@db/audit".into());
        config.upstream_secret = Some("gw-shared".into());
        let printed = format!("{config:?}");
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("gw-shared"));
        assert!(!printed.contains("pw@db"));
    }

    #[test]
    fn development_defaults() {
        let config = Config::with_secret("s");
        assert_eq!(config.credential_source, CredentialSource::Header);
        assert_eq!(config.identity_source, IdentitySource::InlineBlob);
        assert_eq!(config.subject_key, SubjectKey::UserId);
        assert_eq!(config.merchant_tenant_prefix, "merchant2tenant");
        assert_eq!(config.audit_target_param, "id");
        assert!(config.skip_view_log);
        assert!(config.upstream_secret.is_none());
    }
}
