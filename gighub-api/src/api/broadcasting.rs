//! Broadcast channel authorization and SSE subscription
//!
//! Channel rules:
//! - `team.channel.{uuid}`: channel members
//! - `meeting.{roomId}`: meeting host and attendees
//! - `user.{id}`: that user only
//! - `workflows`: any authenticated user

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use gighub_common::events::ChannelName;
use gighub_common::sse::channel_event_stream;

use super::chat::{find_channel, is_member};
use super::meetings::{find_meeting, is_participant};
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChannelAuthRequest {
    pub channel_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChannelAuthResponse {
    pub channel_name: String,
    pub authorized: bool,
}

/// Whether `user` may listen on `channel`
pub(crate) async fn can_subscribe(
    db: &SqlitePool,
    channel: &ChannelName,
    user: &CurrentUser,
) -> sqlx::Result<bool> {
    match channel {
        ChannelName::Team(uuid) => match find_channel(db, uuid).await? {
            Some(c) => is_member(db, c.id, user.id()).await,
            None => Ok(false),
        },
        ChannelName::Meeting(room_id) => match find_meeting(db, room_id).await? {
            Some(m) => is_participant(db, &m, user.id()).await,
            None => Ok(false),
        },
        ChannelName::User(id) => Ok(*id == user.id()),
        ChannelName::Workflows => Ok(true),
    }
}

async fn authorize(db: &SqlitePool, raw: &str, user: &CurrentUser) -> ApiResult<ChannelName> {
    let channel = ChannelName::parse(raw.trim()).ok_or_else(ApiError::forbidden)?;
    if !can_subscribe(db, &channel, user).await? {
        debug!(channel = raw, user_id = user.id(), "Channel subscription denied");
        return Err(ApiError::forbidden());
    }
    Ok(channel)
}

/// POST /broadcasting/auth
pub async fn auth_channel(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<ChannelAuthRequest>,
) -> ApiResult<Json<ChannelAuthResponse>> {
    let raw = req.channel_name.unwrap_or_default();
    let channel = authorize(&state.db, &raw, &user).await?;
    Ok(Json(ChannelAuthResponse {
        channel_name: channel.as_string(),
        authorized: true,
    }))
}

/// GET /broadcasting/:channel - SSE stream of one channel
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(channel): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let channel = authorize(&state.db, &channel, &user).await?;
    Ok(channel_event_stream(&state.event_bus, channel, user.id()))
}

pub fn broadcasting_routes() -> Router<AppState> {
    Router::new()
        .route("/broadcasting/auth", post(auth_channel))
        .route("/broadcasting/:channel", get(subscribe))
}
