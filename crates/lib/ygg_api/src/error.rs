//! Application error types.
//!
//! Errors render as the Yggdrasil error body
//! `{"error": ..., "errorMessage": ..., "cause"?: ...}`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use ygg_core::auth::AuthError;
use ygg_core::signing::SigningError;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    ForbiddenOperation(String),

    #[error("{0}")]
    IllegalArgument(String),

    /// Undecodable body or query; the decoder's complaint becomes `cause`.
    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Internal server error")]
    Internal(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error: &'a str,
    error_message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<&'a str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message, cause) = match &self {
            AppError::ForbiddenOperation(m) => (
                StatusCode::FORBIDDEN,
                "ForbiddenOperationException",
                m.as_str(),
                None,
            ),
            AppError::IllegalArgument(m) => (
                StatusCode::BAD_REQUEST,
                "IllegalArgumentException",
                m.as_str(),
                None,
            ),
            AppError::Malformed(detail) => (
                StatusCode::BAD_REQUEST,
                "IllegalArgumentException",
                "Malformed request.",
                Some(detail.as_str()),
            ),
            AppError::Internal(detail) => {
                error!(detail = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error",
                    None,
                )
            }
        };
        let body = Json(ErrorBody {
            error,
            error_message: message,
            cause,
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials | AuthError::InvalidToken => {
                AppError::ForbiddenOperation(e.to_string())
            }
            AuthError::Forbidden(msg) => AppError::ForbiddenOperation(msg),
            AuthError::IllegalArgument(msg) => AppError::IllegalArgument(msg),
            AuthError::Store(e) => AppError::Internal(e.to_string()),
            AuthError::Signing(e) => AppError::Internal(e.to_string()),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<SigningError> for AppError {
    fn from(e: SigningError) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Malformed(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Malformed(rejection.body_text())
    }
}
