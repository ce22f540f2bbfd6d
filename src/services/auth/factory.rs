/// Factory: build the token verifier and issuer from application `Config`.
use std::sync::Arc;

use crate::config::Config;
use crate::services::auth::{JwtIssuer, JwtVerifier};

/// Audience stamped on issued tokens when none is configured.
pub const DEFAULT_AUDIENCE: &str = "app";

pub fn build_verifier(config: &Config) -> Arc<JwtVerifier> {
    Arc::new(JwtVerifier::new(
        config.jwt_secret.as_bytes(),
        config.jwt_audience.as_deref(),
        config.jwt_leeway_seconds,
    ))
}

pub fn build_issuer(config: &Config) -> Arc<JwtIssuer> {
    Arc::new(JwtIssuer::new(
        config.jwt_secret.as_bytes(),
        config.jwt_audience.as_deref().unwrap_or(DEFAULT_AUDIENCE),
        config.jwt_ttl_seconds,
    ))
}
