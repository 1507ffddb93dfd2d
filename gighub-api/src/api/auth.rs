//! Registration, login and token management
//!
//! The first registered user becomes an administrator.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Extension, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use gighub_common::auth::{hash_password, issue_token, revoke_token, verify_password};
use gighub_common::db::User;
use gighub_common::ValidationErrors;

use super::clean;
use crate::auth::{BearerToken, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::extract::Json;
use crate::AppState;

const PASSWORD_MIN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    /// Label stored with the token, e.g. the device name
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub user: User,
    pub token: String,
}

/// Run password hashing off the async worker threads
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("Password task failed: {}", e)))
}

async fn find_user_by_email(db: &sqlx::SqlitePool, email: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        "SELECT id, name, email, password_hash, is_admin, created_at FROM users WHERE email = ? COLLATE NOCASE",
    )
    .bind(email)
    .fetch_optional(db)
    .await
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<TokenResponse>)> {
    let name = clean(req.name);
    let email = clean(req.email).map(|e| e.to_lowercase());

    let mut errors = ValidationErrors::new();
    errors.required("name", name.as_deref());
    errors.max_len("name", name.as_deref(), 255);
    errors.required("email", email.as_deref());
    errors.email("email", email.as_deref());
    errors.required("password", req.password.as_deref());
    errors.min_len("password", req.password.as_deref(), PASSWORD_MIN);
    if let Some(confirmation) = req.password_confirmation.as_deref() {
        if req.password.as_deref() != Some(confirmation) {
            errors.add("password", "The password confirmation does not match.");
        }
    }
    if let Some(email) = email.as_deref() {
        if !errors.has("email") && find_user_by_email(&state.db, email).await?.is_some() {
            errors.add("email", "The email has already been taken.");
        }
    }
    errors.into_result()?;

    let (name, email, password) = (
        name.unwrap_or_default(),
        email.unwrap_or_default(),
        req.password.unwrap_or_default(),
    );

    let password_hash = blocking(move || hash_password(&password)).await??;

    // Admin flag is decided inside the insert
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (name, email, password_hash, is_admin, created_at)
        SELECT ?, ?, ?, NOT EXISTS (SELECT 1 FROM users), ?
        RETURNING id, name, email, password_hash, is_admin, created_at
        "#,
    )
    .bind(&name)
    .bind(&email)
    .bind(password_hash)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    let token = issue_token(&state.db, user.id, "register").await?;
    info!(user_id = user.id, admin = user.is_admin, "User registered");

    Ok((StatusCode::CREATED, Json(TokenResponse { user, token })))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let email = clean(req.email);

    let mut errors = ValidationErrors::new();
    errors.required("email", email.as_deref());
    errors.required("password", req.password.as_deref());
    errors.into_result()?;

    let email = email.unwrap_or_default();
    let password = req.password.unwrap_or_default();

    let user = find_user_by_email(&state.db, &email).await?;
    let verified = match &user {
        Some(user) => {
            let stored = user.password_hash.clone();
            blocking(move || verify_password(&password, &stored)).await?
        }
        None => false,
    };
    let user = match user {
        Some(user) if verified => user,
        _ => {
            return Err(ValidationErrors::single(
                "email",
                "These credentials do not match our records.",
            )
            .into())
        }
    };

    let device = clean(req.device_name).unwrap_or_else(|| "api".to_string());
    let token = issue_token(&state.db, user.id, &device).await?;
    Ok(Json(TokenResponse { user, token }))
}

/// GET /api/auth/me
pub async fn me(Extension(user): Extension<CurrentUser>) -> Json<User> {
    Json(user.0)
}

/// POST /api/auth/logout - revokes the token used for this request
pub async fn logout(
    State(state): State<AppState>,
    Extension(token): Extension<BearerToken>,
) -> ApiResult<StatusCode> {
    revoke_token(&state.db, &token.0).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn public_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
}

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/me", get(me))
        .route("/api/auth/logout", post(logout))
}
