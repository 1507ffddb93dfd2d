//! Error types for gighub-api
//!
//! Every failure renders as `{"message": ...}`; validation failures add
//! `"errors": {"field": ["..."]}`. Unexpected errors are logged and hidden
//! behind a generic "Server Error".

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use gighub_common::ValidationErrors;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// One or more fields failed validation (422)
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Missing or invalid bearer token (401)
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Authenticated but not allowed (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Conflict (409), e.g. an external account already linked elsewhere
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 422 for a single field
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        ApiError::Validation(ValidationErrors::single(field, message))
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound(format!("{} not found.", what))
    }

    pub fn forbidden() -> Self {
        ApiError::Forbidden("This action is unauthorized.".to_string())
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(errors)
    }
}

impl From<gighub_common::Error> for ApiError {
    fn from(err: gighub_common::Error) -> Self {
        use gighub_common::Error;
        match err {
            Error::NotFound(what) => ApiError::NotFound(format!("{} not found.", what)),
            Error::Validation(errors) => ApiError::Validation(errors),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Database(err) => err.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                let field = unique_field(db_err.message());
                ApiError::field(
                    &field,
                    format!("The {} has already been taken.", field.replace('_', " ")),
                )
            }
            _ => ApiError::Internal(format!("Database error: {}", err)),
        }
    }
}

/// Column named by a SQLite unique violation
///
/// `UNIQUE constraint failed: users.email` gives `email`; composite keys
/// report their first column.
fn unique_field(message: &str) -> String {
    message
        .rsplit_once(": ")
        .and_then(|(_, columns)| columns.split(',').next())
        .map(|column| column.trim())
        .map(|column| column.rsplit_once('.').map_or(column, |(_, name)| name))
        .filter(|name| !name.is_empty())
        .unwrap_or("id")
        .to_string()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(errors) => {
                let message = errors
                    .first_message()
                    .unwrap_or("The given data was invalid.")
                    .to_string();
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    json!({ "message": message, "errors": errors }),
                )
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "message": msg })),
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                json!({ "message": "Unauthenticated." }),
            ),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({ "message": msg })),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "message": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "message": msg })),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                server_error()
            }
            ApiError::Other(err) => {
                tracing::error!(error = %format!("{:#}", err), "Request failed");
                server_error()
            }
        };

        (status, Json(body)).into_response()
    }
}

fn server_error() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "message": "Server Error" }),
    )
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
