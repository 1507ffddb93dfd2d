//! Bearer token authentication middleware
//!
//! Reads `Authorization: Bearer <token>`, or a `token` query parameter for
//! clients that cannot set headers (browser `EventSource`). On success the
//! request carries a [`CurrentUser`] extension.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use gighub_common::auth::user_for_token;
use gighub_common::db::User;

use crate::error::ApiError;
use crate::AppState;

/// Authenticated user of the current request
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }

    pub fn is_admin(&self) -> bool {
        self.0.is_admin
    }

    /// 403 unless the user is an administrator
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }
}

/// Plaintext token the request authenticated with
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

fn bearer_token(request: &Request) -> Option<String> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    header.or_else(|| {
        request.uri().query().and_then(|query| {
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "token")
                .map(|(_, value)| value.to_string())
                .filter(|t| !t.is_empty())
        })
    })
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request).ok_or(ApiError::Unauthenticated)?;

    let user = user_for_token(&state.db, &token)
        .await?
        .ok_or_else(|| {
            debug!("Rejected unknown bearer token");
            ApiError::Unauthenticated
        })?;

    request.extensions_mut().insert(CurrentUser(user));
    request.extensions_mut().insert(BearerToken(token));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str, auth: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = auth {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_header_token() {
        assert_eq!(
            bearer_token(&request("/api/auth/me", Some("Bearer abc123"))).as_deref(),
            Some("abc123")
        );
        assert_eq!(bearer_token(&request("/api/auth/me", Some("Basic abc"))), None);
    }

    #[test]
    fn test_query_token_fallback() {
        assert_eq!(
            bearer_token(&request("/broadcasting/workflows?x=1&token=t0k", None)).as_deref(),
            Some("t0k")
        );
        assert_eq!(bearer_token(&request("/broadcasting/workflows?token=", None)), None);
    }
}
