//! Freelance platform connections
//!
//! OAuth flow:
//! 1. `GET /api/platforms/:platform/connect` issues a single-use `state` and
//!    returns the provider authorize URL
//! 2. the provider redirects to `GET /api/platforms/:platform/callback`
//!    (public), which consumes the state, exchanges the code, links the
//!    account and queues its first sync
//!
//! Fiverr has no OAuth and is linked by username.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use gighub_common::db::{Platform, PlatformAccount, PlatformProject};
use gighub_common::queue::{dispatch, Job};
use gighub_common::ValidationErrors;
use gighub_services::db::platform_accounts::{
    self as store, AccountUpsert,
};
use gighub_services::platforms::PlatformError;

use super::clean;
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path, Query};
use crate::pagination::{PageParams, Paginated};
use crate::AppState;

const FIVERR_USERNAME_MAX: usize = 64;

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub platform: Platform,
    pub url: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub message: String,
    pub account: PlatformAccount,
}

#[derive(Debug, Deserialize)]
pub struct FiverrRequest {
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectQuery {
    pub platform: Option<Platform>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub message: String,
    pub account_id: i64,
}

fn parse_platform(raw: &str) -> ApiResult<Platform> {
    raw.parse::<Platform>()
        .map_err(|_| ApiError::not_found("Platform"))
}

impl From<PlatformError> for ApiError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::NotConfigured(_) | PlatformError::OAuthUnsupported(_) => {
                ApiError::field("platform", err.to_string())
            }
            PlatformError::Network(msg) => ApiError::Internal(format!("Platform unreachable: {}", msg)),
            other => ApiError::BadRequest(format!("Platform rejected the request: {}", other)),
        }
    }
}

/// 409 when `external_id` on `platform` is already linked to another user
async fn ensure_not_linked_elsewhere(
    state: &AppState,
    platform: Platform,
    external_id: &str,
    user_id: i64,
) -> ApiResult<()> {
    if let Some(existing) = store::find_by_external_id(&state.db, platform, external_id).await? {
        if existing.user_id != user_id {
            warn!(
                platform = %platform,
                external_id,
                user_id,
                "Platform account already linked to another user"
            );
            return Err(ApiError::Conflict(format!(
                "This {} account is already connected to another user.",
                platform
            )));
        }
    }
    Ok(())
}

async fn queue_sync(state: &AppState, account_id: i64) -> ApiResult<()> {
    dispatch(&state.db, &Job::SyncPlatformAccount { account_id }, state.max_attempts).await?;
    Ok(())
}

/// GET /api/platforms/:platform/connect
pub async fn connect(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(platform): Path<String>,
) -> ApiResult<Json<ConnectResponse>> {
    let platform = parse_platform(&platform)?;
    if !platform.supports_oauth() {
        return Err(PlatformError::OAuthUnsupported(platform).into());
    }
    let client = state.platforms.get(platform)?;

    let oauth_state = store::create_oauth_state(&state.db, user.id(), platform).await?;
    let url = client.authorize_url(&oauth_state)?;

    Ok(Json(ConnectResponse {
        platform,
        url,
        state: oauth_state,
    }))
}

/// GET /api/platforms/:platform/callback (public)
pub async fn callback(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Json<AccountResponse>> {
    let platform = parse_platform(&platform)?;

    if let Some(error) = query.error {
        let detail = query.error_description.unwrap_or_default();
        info!(platform = %platform, error = %error, "OAuth authorization denied");
        return Err(ApiError::BadRequest(format!("Authorization failed: {} {}", error, detail).trim().to_string()));
    }

    let (Some(code), Some(oauth_state)) = (clean(query.code), clean(query.state)) else {
        return Err(ApiError::BadRequest("Missing code or state.".to_string()));
    };

    let user_id = store::consume_oauth_state(&state.db, &oauth_state, platform)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Invalid or expired state.".to_string()))?;

    let client = state.platforms.get(platform)?;
    let token = client.exchange_code(&code).await?;
    let profile = client.fetch_profile(&token.access_token).await?;

    ensure_not_linked_elsewhere(&state, platform, &profile.external_id, user_id).await?;

    let account = store::save_account(
        &state.db,
        &AccountUpsert {
            user_id,
            platform,
            external_id: Some(profile.external_id.clone()),
            username: profile.username.clone(),
            access_token: Some(token.access_token),
            refresh_token: token.refresh_token,
            token_expires_at: token.expires_at,
        },
    )
    .await?;
    queue_sync(&state, account.id).await?;

    info!(account_id = account.id, user_id, platform = %platform, "Platform account connected");
    Ok(Json(AccountResponse {
        message: format!("{} connected.", platform),
        account,
    }))
}

/// POST /api/platforms/fiverr
pub async fn link_fiverr(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<FiverrRequest>,
) -> ApiResult<(StatusCode, Json<AccountResponse>)> {
    let username = clean(req.username).map(|u| u.trim_start_matches('@').to_string());

    let mut errors = ValidationErrors::new();
    errors.required("username", username.as_deref());
    errors.max_len("username", username.as_deref(), FIVERR_USERNAME_MAX);
    if let Some(u) = username.as_deref() {
        if !u.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            errors.add("username", "The username format is invalid.");
        }
    }
    errors.into_result()?;

    let username = username.unwrap_or_default();
    let external_id = username.to_lowercase();
    ensure_not_linked_elsewhere(&state, Platform::Fiverr, &external_id, user.id()).await?;

    let account = store::save_account(
        &state.db,
        &AccountUpsert {
            user_id: user.id(),
            platform: Platform::Fiverr,
            external_id: Some(external_id),
            username: Some(username),
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(AccountResponse {
            message: "fiverr linked.".to_string(),
            account,
        }),
    ))
}

/// GET /api/platform-accounts
pub async fn list_accounts(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<PlatformAccount>>> {
    Ok(Json(store::list_accounts_for_user(&state.db, user.id()).await?))
}

async fn own_account(state: &AppState, id: i64, user: &CurrentUser) -> ApiResult<PlatformAccount> {
    let account = store::get_account(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Platform account"))?;
    if account.user_id != user.id() {
        return Err(ApiError::forbidden());
    }
    Ok(account)
}

/// DELETE /api/platform-accounts/:id
pub async fn disconnect(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let account = own_account(&state, id, &user).await?;
    store::delete_account(&state.db, account.id).await?;
    info!(account_id = account.id, platform = %account.platform, "Platform account disconnected");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/platform-accounts/:id/sync
pub async fn sync_account(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<SyncResponse>)> {
    let account = own_account(&state, id, &user).await?;
    if !account.platform.supports_oauth() {
        return Err(ApiError::field(
            "platform",
            format!("{} accounts are linked manually and cannot be synced.", account.platform),
        ));
    }
    queue_sync(&state, account.id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SyncResponse {
            message: "Sync queued.".to_string(),
            account_id: account.id,
        }),
    ))
}

/// GET /api/platform-projects
pub async fn list_projects(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(page): Query<PageParams>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Json<Paginated<PlatformProject>>> {
    let page = page.resolve();
    let (rows, total) = store::list_projects_for_user(
        &state.db,
        user.id(),
        query.platform,
        page.limit(),
        page.offset(),
    )
    .await?;
    Ok(Json(Paginated::new(rows, page, total)))
}

pub fn platform_routes() -> Router<AppState> {
    Router::new()
        .route("/api/platforms/fiverr", post(link_fiverr))
        .route("/api/platforms/:platform/connect", get(connect))
        .route("/api/platform-accounts", get(list_accounts))
        .route("/api/platform-accounts/:id", delete(disconnect))
        .route("/api/platform-accounts/:id/sync", post(sync_account))
        .route("/api/platform-projects", get(list_projects))
}

pub fn platform_callback_routes() -> Router<AppState> {
    Router::new().route("/api/platforms/:platform/callback", get(callback))
}
