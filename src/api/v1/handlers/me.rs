/*
 * Responsibility
 * - GET /me: pipeline が publish した Identity / ScopeContext をそのまま返す
 * - GET /session/profile: session token stage が読んだ値を返す
 */
use axum::{Extension, Json};

use crate::api::v1::dto::auth::{MeResponse, SessionProfileResponse};
use crate::context::{ScopeContext, SessionClaims};
use crate::identity::Identity;

pub async fn me(
    Extension(identity): Extension<Identity>,
    Extension(scope): Extension<ScopeContext>,
) -> Json<MeResponse> {
    Json(MeResponse { identity, scope })
}

pub async fn session_profile(
    Extension(session): Extension<SessionClaims>,
) -> Json<SessionProfileResponse> {
    Json(session.into())
}
