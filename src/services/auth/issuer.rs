use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::identity::{Identity, IdentityError};

#[derive(Debug, Error)]
pub enum IssueError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("failed to sign JWT: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

/// Claims of a login-issued token: `iss` carries the identity blob.
#[derive(Debug, Serialize)]
struct LoginClaims<'a> {
    sub: &'a str,
    iss: String,
    aud: &'a str,
    jti: String,
    iat: i64,
    exp: i64,
}

/// Signs HS256 tokens that the credential stage accepts.
#[derive(Clone)]
pub struct JwtIssuer {
    audience: String,
    ttl_seconds: u64,
    encoding_key: EncodingKey,
}

impl JwtIssuer {
    pub fn new(secret: &[u8], audience: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            audience: audience.into(),
            ttl_seconds,
            encoding_key: EncodingKey::from_secret(secret),
        }
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Issue a token for a freshly signed-in identity.
    pub fn issue(&self, identity: &Identity) -> Result<String, IssueError> {
        let now = chrono::Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX / 2);

        let claims = LoginClaims {
            sub: &identity.account_id,
            iss: identity.dump()?,
            aud: &self.audience,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now.saturating_add(ttl),
        };

        self.sign(&claims)
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, IssueError> {
        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some("JWT".to_string());
        Ok(jsonwebtoken::encode(&header, claims, &self.encoding_key)?)
    }
}

impl std::fmt::Debug for JwtIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIssuer")
            .field("audience", &self.audience)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}
