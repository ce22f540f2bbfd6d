/*
 * Responsibility
 * - sign-in の request/response DTO
 * - login audit も同じ body を読む (name / phone / login_type)
 */
use serde::{Deserialize, Serialize};

use crate::context::{ScopeContext, SessionClaims};
use crate::identity::Identity;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SignInRequest {
    pub name: String,
    pub phone: String,
    pub login_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignInResponse {
    pub access_token: String,
    /// Always "Bearer"
    pub token_type: String,
    /// Seconds until expiry.
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    pub identity: Identity,
    pub scope: ScopeContext,
}

/// Session fields safe to hand back to the client (`session_key` stays server side).
#[derive(Debug, Clone, Serialize)]
pub struct SessionProfileResponse {
    pub open_id: String,
    pub account_id: String,
    pub union_id: String,
}

impl From<SessionClaims> for SessionProfileResponse {
    fn from(s: SessionClaims) -> Self {
        Self {
            open_id: s.open_id,
            account_id: s.account_id,
            union_id: s.union_id,
        }
    }
}
