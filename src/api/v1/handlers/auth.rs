/*
 * Responsibility
 * - POST /auth/signin
 * - 信頼済み upstream が付けた identity header を token (identity blob 入り) に交換する
 * - Identity を response extensions に入れて login audit に渡す
 */
use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::api::v1::dto::auth::{SignInRequest, SignInResponse};
use crate::error::AppError;
use crate::identity::Identity;
use crate::middleware::auth::credential::{CredentialSource, DEFAULT_COOKIE};
use crate::state::AppState;

pub async fn sign_in(
    State(state): State<AppState>,
    Extension(upstream): Extension<Identity>,
    Json(req): Json<SignInRequest>,
) -> Result<Response, AppError> {
    if upstream.account_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "MISSING_ACCOUNT",
            "upstream identity carries no account id",
        ));
    }

    let mut identity = upstream;
    if !req.login_type.is_empty() {
        identity.login_type = req.login_type;
    }
    if identity.user_name.is_empty() {
        identity.user_name = req.name;
    }
    if identity.phone.is_empty() {
        identity.phone = req.phone;
    }

    let access_token = state.issuer.issue(&identity).map_err(|err| {
        tracing::error!(error = %err, account_id = %identity.account_id, "token issue failed");
        AppError::Internal
    })?;

    let cookie_name = match &state.settings.credential_source {
        CredentialSource::Cookie(name) => name.as_str(),
        CredentialSource::Header => DEFAULT_COOKIE,
    };
    let cookie = HeaderValue::from_str(&format!(
        "{cookie_name}={access_token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        state.issuer.ttl_seconds()
    ))
    .map_err(|_| AppError::Internal)?;

    tracing::info!(account_id = %identity.account_id, login_type = %identity.login_type, "signed in");

    let body = SignInResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.issuer.ttl_seconds(),
    };

    let mut response = (StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(body)).into_response();
    response.extensions_mut().insert(identity);

    Ok(response)
}
