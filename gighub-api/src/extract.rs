//! Request extractors with JSON error bodies
//!
//! Drop-in replacements for axum's `Json`, `Path` and `Query` whose rejections
//! go through [`ApiError`]:
//! - malformed or mistyped JSON body: 422 with a field error
//! - path segment that does not parse (`/api/jobs/abc`): 404
//! - query string that does not parse: 422 on `query`

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Request,
    },
    http::request::Parts,
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use gighub_common::ValidationErrors;

use crate::error::ApiError;

const JSON_DATA_PREFIX: &str = "Failed to deserialize the JSON body into the target type: ";

/// JSON body extractor and response
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

/// Path parameters extractor
#[derive(Debug)]
pub struct Path<T>(pub T);

/// Query string extractor
#[derive(Debug)]
pub struct Query<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for Json<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state).await?;
        Ok(Json(value))
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

#[async_trait]
impl<T, S> FromRequestParts<S> for Path<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Path(value) =
            axum::extract::Path::<T>::from_request_parts(parts, state).await?;
        Ok(Path(value))
    }
}

#[async_trait]
impl<T, S> FromRequestParts<S> for Query<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Query(value) =
            axum::extract::Query::<T>::from_request_parts(parts, state).await?;
        Ok(Query(value))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(error = %rejection.body_text(), "JSON body rejected");
        match rejection {
            JsonRejection::JsonDataError(err) => {
                let (field, message) = json_data_error(&err.body_text());
                ApiError::Validation(ValidationErrors::single(&field, message))
            }
            JsonRejection::JsonSyntaxError(_) => {
                ApiError::field("body", "The request body is not valid JSON.")
            }
            JsonRejection::MissingJsonContentType(_) => ApiError::BadRequest(
                "Expected request with `Content-Type: application/json`.".to_string(),
            ),
            other => ApiError::BadRequest(other.body_text()),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        match rejection {
            PathRejection::FailedToDeserializePathParams(err) => {
                debug!(error = %err.body_text(), "Path parameter rejected");
                ApiError::NotFound("Resource not found.".to_string())
            }
            other => ApiError::Internal(other.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        let text = rejection.body_text();
        let detail = text
            .strip_prefix("Failed to deserialize query string: ")
            .unwrap_or(&text);
        ApiError::field("query", format!("The query string is invalid: {}.", detail))
    }
}

/// Field name and message from a serde data error
///
/// The detail reads `path: message at line L column C`; the first segment of
/// the path names the field. Errors without a path land on `body`.
fn json_data_error(text: &str) -> (String, String) {
    let detail = text.strip_prefix(JSON_DATA_PREFIX).unwrap_or(text);
    let detail = match detail.rfind(" at line ") {
        Some(idx) => &detail[..idx],
        None => detail,
    };

    if let Some((path, message)) = detail.split_once(": ") {
        let field = path
            .split(|c: char| c == '.' || c == '[')
            .next()
            .unwrap_or_default();
        if !field.is_empty() && !path.contains(char::is_whitespace) {
            return (
                field.to_string(),
                format!("The {} field is invalid: {}.", field.replace('_', " "), message),
            );
        }
    }
    ("body".to_string(), format!("The request body is invalid: {}.", detail))
}
