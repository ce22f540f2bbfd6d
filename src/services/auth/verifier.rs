use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use std::{error::Error as StdError, fmt};

use crate::context::ClaimSet;

/// The only signing algorithms accepted. Tokens asserting anything else (`none`, RSA,
/// EC, EdDSA) fail before the signature is even looked at.
pub const HMAC_FAMILY: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Claims that must be present and non-blank on every accepted token.
pub const REQUIRED_CLAIMS: [&str; 4] = ["sub", "iss", "aud", "jti"];

// Errors returned by signature verification + strict claim validation.
#[derive(Debug)]
pub enum VerifyError {
    Jwt(jsonwebtoken::errors::Error),
    EmptyClaim(&'static str),
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jwt(e) => write!(f, "jwt verification failed: {}", e),
            Self::EmptyClaim(name) => write!(f, "missing or empty '{}' claim", name),
        }
    }
}

impl StdError for VerifyError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Jwt(e) => Some(e),
            _ => None,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Self::Jwt(e)
    }
}

/// HMAC access-token verifier.
///
/// - Key material is intentionally not printable via Debug.
/// - `exp`/`nbf` are checked when present; tokens issued without them are accepted.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("JwtVerifier")
            .field("validation", &self.validation)
            .finish()
    }
}

impl JwtVerifier {
    pub fn new(secret: &[u8], audience: Option<&str>, leeway_seconds: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = HMAC_FAMILY.to_vec();
        validation.required_spec_claims.clear();
        validation.leeway = leeway_seconds;

        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            // Presence of `aud` is still enforced by `verify`.
            None => validation.validate_aud = false,
        }

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Verify the signature, then require every claim in [`REQUIRED_CLAIMS`].
    ///
    /// A partial claim set is rejected, never defaulted.
    pub fn verify(&self, token: &str) -> Result<ClaimSet, VerifyError> {
        let data = jsonwebtoken::decode::<ClaimSet>(token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;

        if let Some(name) = REQUIRED_CLAIMS.into_iter().find(|name| !claims.has_text(name)) {
            return Err(VerifyError::EmptyClaim(name));
        }

        Ok(claims)
    }
}
