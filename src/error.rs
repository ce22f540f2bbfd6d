/*
 * Responsibility
 * - Common AppError for every stage and handler
 * - IntoResponse (HTTP status / JSON error body)
 * - AuthError: the rejection taxonomy of the auth pipeline
 */
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// Terminal rejections raised by the credential, identity and access stages.
///
/// None of these are retried; the request is aborted before the handler runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("credential is required")]
    MissingCredential,
    #[error("authorization header format must be Bearer {{token}}")]
    MalformedCredential,
    #[error("invalid token")]
    InvalidSignature,
    #[error("missing or empty '{0}' claim")]
    IncompleteClaims(&'static str),
    #[error("identity could not be resolved: {0}")]
    IdentityResolution(String),
    #[error("you don't have enough permission to visit this endpoint")]
    PermissionDenied(StatusCode),
    #[error("session field '{0}' is missing")]
    CacheFieldMissing(&'static str),
    #[error("caller is not a trusted upstream")]
    UntrustedUpstream,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingCredential
            | AuthError::MalformedCredential
            | AuthError::InvalidSignature
            | AuthError::IncompleteClaims(_)
            | AuthError::IdentityResolution(_)
            | AuthError::UntrustedUpstream => StatusCode::UNAUTHORIZED,
            // The permission store decides the status; it is surfaced verbatim.
            AuthError::PermissionDenied(status) => *status,
            AuthError::CacheFieldMissing(_) => StatusCode::FORBIDDEN,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "MISSING_CREDENTIAL",
            AuthError::MalformedCredential => "MALFORMED_CREDENTIAL",
            AuthError::InvalidSignature => "INVALID_SIGNATURE",
            AuthError::IncompleteClaims(_) => "INCOMPLETE_CLAIMS",
            AuthError::IdentityResolution(_) => "IDENTITY_RESOLUTION",
            AuthError::PermissionDenied(_) => "PERMISSION_DENIED",
            AuthError::CacheFieldMissing(_) => "CACHE_FIELD_MISSING",
            AuthError::UntrustedUpstream => "UNTRUSTED_UPSTREAM",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{code}: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("request body is too large")]
    PayloadTooLarge,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            AppError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                "request body is too large".into(),
            ),
            AppError::Auth(err) => (err.status(), err.code(), err.to_string()),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "internal server error".into(),
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_failures_map_to_401() {
        for err in [
            AuthError::MissingCredential,
            AuthError::MalformedCredential,
            AuthError::InvalidSignature,
            AuthError::IncompleteClaims("aud"),
            AuthError::IdentityResolution("bad base64".into()),
            AuthError::UntrustedUpstream,
        ] {
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED, "{err}");
        }
    }

    #[test]
    fn permission_status_is_surfaced_verbatim() {
        let err = AuthError::PermissionDenied(StatusCode::PAYMENT_REQUIRED);
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn missing_session_field_is_forbidden() {
        let response = AppError::from(AuthError::CacheFieldMissing("OPEN_ID")).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
