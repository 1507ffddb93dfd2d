//! Team channels and messaging
//!
//! Channels are addressed by UUID. Only members may read, post or add other
//! members. Messages, typing indicators and read receipts are broadcast on
//! `team.channel.{uuid}`.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Extension, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use gighub_common::db::{Channel, TeamMessage};
use gighub_common::events::HubEvent;
use gighub_common::ValidationErrors;

use super::clean;
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path, Query};
use crate::pagination::{PageParams, Paginated};
use crate::AppState;

const MESSAGE_MAX: usize = 5000;

const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.channel_id, m.user_id, u.name AS user_name, m.body, m.created_at
    FROM team_messages m
    JOIN users u ON u.id = m.user_id
"#;

#[derive(Debug, Deserialize)]
pub struct ChannelRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MemberRequest {
    pub user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    #[serde(default = "default_typing")]
    pub typing: bool,
}

fn default_typing() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct ChannelResponse {
    #[serde(flatten)]
    pub channel: Channel,
    pub member_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReadResponse {
    pub message_id: i64,
    pub read_at: DateTime<Utc>,
}

pub(crate) async fn find_channel(db: &SqlitePool, uuid: &str) -> sqlx::Result<Option<Channel>> {
    sqlx::query_as::<_, Channel>(
        "SELECT id, uuid, name, created_by, created_at FROM channels WHERE uuid = ?",
    )
    .bind(uuid)
    .fetch_optional(db)
    .await
}

pub(crate) async fn is_member(db: &SqlitePool, channel_id: i64, user_id: i64) -> sqlx::Result<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM channel_members WHERE channel_id = ? AND user_id = ?)",
    )
    .bind(channel_id)
    .bind(user_id)
    .fetch_one(db)
    .await
}

async fn member_ids(db: &SqlitePool, channel_id: i64) -> sqlx::Result<Vec<i64>> {
    sqlx::query_scalar("SELECT user_id FROM channel_members WHERE channel_id = ? ORDER BY user_id")
        .bind(channel_id)
        .fetch_all(db)
        .await
}

/// Channel `uuid` if `user` belongs to it (404 / 403 otherwise)
async fn member_channel(db: &SqlitePool, uuid: &str, user: &CurrentUser) -> ApiResult<Channel> {
    let channel = find_channel(db, uuid)
        .await?
        .ok_or_else(|| ApiError::not_found("Channel"))?;
    if !is_member(db, channel.id, user.id()).await? {
        return Err(ApiError::forbidden());
    }
    Ok(channel)
}

async fn user_exists(db: &SqlitePool, user_id: i64) -> sqlx::Result<bool> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = ?)")
        .bind(user_id)
        .fetch_one(db)
        .await
}

/// GET /api/channels - channels the current user belongs to
pub async fn list_channels(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<Vec<Channel>>> {
    let channels = sqlx::query_as::<_, Channel>(
        r#"
        SELECT c.id, c.uuid, c.name, c.created_by, c.created_at
        FROM channels c
        JOIN channel_members cm ON cm.channel_id = c.id
        WHERE cm.user_id = ?
        ORDER BY c.name
        "#,
    )
    .bind(user.id())
    .fetch_all(&state.db)
    .await?;
    Ok(Json(channels))
}

/// POST /api/channels - creator joins automatically
pub async fn create_channel(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<ChannelRequest>,
) -> ApiResult<(StatusCode, Json<ChannelResponse>)> {
    let name = clean(req.name);

    let mut errors = ValidationErrors::new();
    errors.required("name", name.as_deref());
    errors.max_len("name", name.as_deref(), 100);
    for id in &req.member_ids {
        if !user_exists(&state.db, *id).await? {
            errors.add("member_ids", format!("User {} does not exist.", id));
        }
    }
    errors.into_result()?;

    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    let channel = sqlx::query_as::<_, Channel>(
        r#"
        INSERT INTO channels (uuid, name, created_by, created_at)
        VALUES (?, ?, ?, ?)
        RETURNING id, uuid, name, created_by, created_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name.unwrap_or_default())
    .bind(user.id())
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let mut members = req.member_ids.clone();
    members.push(user.id());
    for member in &members {
        sqlx::query(
            "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at) VALUES (?, ?, ?)",
        )
        .bind(channel.id)
        .bind(member)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    info!(channel = %channel.uuid, members = members.len(), "Channel created");
    let member_ids = member_ids(&state.db, channel.id).await?;
    Ok((StatusCode::CREATED, Json(ChannelResponse { channel, member_ids })))
}

/// POST /api/channels/:uuid/members
pub async fn add_member(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(uuid): Path<String>,
    Json(req): Json<MemberRequest>,
) -> ApiResult<Json<ChannelResponse>> {
    let channel = member_channel(&state.db, &uuid, &user).await?;

    let new_member = match req.user_id {
        None => return Err(ApiError::field("user_id", "The user id field is required.")),
        Some(id) if !user_exists(&state.db, id).await? => {
            return Err(ApiError::field("user_id", "The selected user id is invalid."))
        }
        Some(id) => id,
    };

    sqlx::query("INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at) VALUES (?, ?, ?)")
        .bind(channel.id)
        .bind(new_member)
        .bind(Utc::now())
        .execute(&state.db)
        .await?;

    let member_ids = member_ids(&state.db, channel.id).await?;
    Ok(Json(ChannelResponse { channel, member_ids }))
}

/// GET /api/channels/:uuid/messages - newest first
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(uuid): Path<String>,
    Query(page): Query<PageParams>,
) -> ApiResult<Json<Paginated<TeamMessage>>> {
    let channel = member_channel(&state.db, &uuid, &user).await?;
    let page = page.resolve();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM team_messages WHERE channel_id = ?")
        .bind(channel.id)
        .fetch_one(&state.db)
        .await?;

    let rows = sqlx::query_as::<_, TeamMessage>(&format!(
        "{} WHERE m.channel_id = ? ORDER BY m.id DESC LIMIT ? OFFSET ?",
        MESSAGE_SELECT
    ))
    .bind(channel.id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Json(Paginated::new(rows, page, total)))
}

/// POST /api/channels/:uuid/messages
pub async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(uuid): Path<String>,
    Json(req): Json<MessageRequest>,
) -> ApiResult<(StatusCode, Json<TeamMessage>)> {
    let channel = member_channel(&state.db, &uuid, &user).await?;
    let body = req.body.map(|b| b.trim().to_string());

    let mut errors = ValidationErrors::new();
    errors.required("body", body.as_deref());
    errors.max_len("body", body.as_deref(), MESSAGE_MAX);
    errors.into_result()?;

    let message_id: i64 = sqlx::query_scalar(
        "INSERT INTO team_messages (channel_id, user_id, body, created_at) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(channel.id)
    .bind(user.id())
    .bind(body.unwrap_or_default())
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    let message = sqlx::query_as::<_, TeamMessage>(&format!("{} WHERE m.id = ?", MESSAGE_SELECT))
        .bind(message_id)
        .fetch_one(&state.db)
        .await?;

    state.event_bus.emit_lossy(HubEvent::MessageSent {
        channel_uuid: channel.uuid.clone(),
        message: message.clone(),
    });

    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /api/channels/:uuid/typing
pub async fn typing(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(uuid): Path<String>,
    body: Option<Json<TypingRequest>>,
) -> ApiResult<StatusCode> {
    let channel = member_channel(&state.db, &uuid, &user).await?;
    let typing = body.map(|Json(b)| b.typing).unwrap_or(true);

    state.event_bus.emit_lossy(HubEvent::UserTyping {
        channel_uuid: channel.uuid,
        user_id: user.id(),
        user_name: user.0.name.clone(),
        typing,
    });
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/channels/:uuid/messages/:id/read
///
/// Idempotent: a second read keeps the first `read_at` and is not
/// broadcast again.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((uuid, message_id)): Path<(String, i64)>,
) -> ApiResult<Json<ReadResponse>> {
    let channel = member_channel(&state.db, &uuid, &user).await?;

    let in_channel: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM team_messages WHERE id = ? AND channel_id = ?)",
    )
    .bind(message_id)
    .bind(channel.id)
    .fetch_one(&state.db)
    .await?;
    if !in_channel {
        return Err(ApiError::not_found("Message"));
    }

    let now = Utc::now();
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?, ?, ?)",
    )
    .bind(message_id)
    .bind(user.id())
    .bind(now)
    .execute(&state.db)
    .await?
    .rows_affected()
        > 0;

    let read_at: DateTime<Utc> = sqlx::query_scalar(
        "SELECT read_at FROM message_reads WHERE message_id = ? AND user_id = ?",
    )
    .bind(message_id)
    .bind(user.id())
    .fetch_one(&state.db)
    .await?;

    if inserted {
        state.event_bus.emit_lossy(HubEvent::MessageRead {
            channel_uuid: channel.uuid,
            message_id,
            user_id: user.id(),
            read_at,
        });
    }

    Ok(Json(ReadResponse { message_id, read_at }))
}

pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/api/channels", get(list_channels).post(create_channel))
        .route("/api/channels/:uuid/members", post(add_member))
        .route(
            "/api/channels/:uuid/messages",
            get(list_messages).post(send_message),
        )
        .route("/api/channels/:uuid/typing", post(typing))
        .route("/api/channels/:uuid/messages/:id/read", post(mark_read))
}
