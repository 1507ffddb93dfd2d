//! Meetings (appointments) and signalling relay
//!
//! Creation runs in one transaction: insert the meeting, resolve attendee
//! emails to users, push the event to the calendar, store its id, commit.
//! A calendar failure is logged and the meeting is kept without an event id.
//!
//! Participants are the host plus every attendee linked to a user.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Extension, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use gighub_common::db::{Meeting, MeetingAttendee};
use gighub_common::events::HubEvent;
use gighub_common::validation::is_email;
use gighub_common::ValidationErrors;

use super::clean;
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path, Query};
use crate::pagination::{PageParams, Paginated};
use crate::AppState;

const MEETING_COLUMNS: &str =
    "id, room_id, title, description, host_id, starts_at, ends_at, calendar_event_id, created_at";

const SIGNAL_TYPES: &[&str] = &["offer", "answer", "ice-candidate", "join", "leave"];

#[derive(Debug, Deserialize)]
pub struct MeetingQuery {
    /// Only meetings that have not ended yet
    #[serde(default)]
    pub upcoming: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct MeetingRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attendees: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    #[serde(rename = "type")]
    pub signal_type: Option<String>,
    #[serde(default)]
    pub payload: Value,
    pub to_user_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MeetingResponse {
    #[serde(flatten)]
    pub meeting: Meeting,
    pub attendees: Vec<MeetingAttendee>,
}

fn validate(req: &MeetingRequest) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.required("title", req.title.as_deref());
    errors.max_len("title", req.title.as_deref(), 255);

    if req.starts_at.is_none() {
        errors.add("starts_at", "The starts at field is required.");
    }
    if req.ends_at.is_none() {
        errors.add("ends_at", "The ends at field is required.");
    }
    if let (Some(start), Some(end)) = (req.starts_at, req.ends_at) {
        if end <= start {
            errors.add("ends_at", "The ends at must be a date after starts at.");
        }
    }
    for email in &req.attendees {
        if !is_email(email) {
            errors.add("attendees", format!("{} is not a valid email address.", email.trim()));
        }
    }
    errors
}

/// Lowercased, de-duplicated attendee list in request order
fn normalize_attendees(emails: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for email in emails {
        let email = email.trim().to_lowercase();
        if !out.contains(&email) {
            out.push(email);
        }
    }
    out
}

pub(crate) async fn find_meeting(db: &SqlitePool, room_id: &str) -> sqlx::Result<Option<Meeting>> {
    sqlx::query_as::<_, Meeting>(&format!(
        "SELECT {} FROM meetings WHERE room_id = ?",
        MEETING_COLUMNS
    ))
    .bind(room_id)
    .fetch_optional(db)
    .await
}

async fn attendees_of(db: &SqlitePool, meeting_id: i64) -> sqlx::Result<Vec<MeetingAttendee>> {
    sqlx::query_as::<_, MeetingAttendee>(
        "SELECT meeting_id, email, user_id, status FROM meeting_attendees WHERE meeting_id = ? ORDER BY email",
    )
    .bind(meeting_id)
    .fetch_all(db)
    .await
}

pub(crate) async fn is_participant(db: &SqlitePool, meeting: &Meeting, user_id: i64) -> sqlx::Result<bool> {
    if meeting.host_id == user_id {
        return Ok(true);
    }
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM meeting_attendees WHERE meeting_id = ? AND user_id = ?)",
    )
    .bind(meeting.id)
    .bind(user_id)
    .fetch_one(db)
    .await
}

async fn participant_meeting(db: &SqlitePool, room_id: &str, user: &CurrentUser) -> ApiResult<Meeting> {
    let meeting = find_meeting(db, room_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Meeting"))?;
    if !is_participant(db, &meeting, user.id()).await? {
        return Err(ApiError::forbidden());
    }
    Ok(meeting)
}

/// GET /api/meetings - meetings the user hosts or attends, soonest first
pub async fn list_meetings(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(page): Query<PageParams>,
    Query(query): Query<MeetingQuery>,
) -> ApiResult<Json<Paginated<Meeting>>> {
    let page = page.resolve();
    let after = query.upcoming.then(Utc::now);

    const WHERE: &str = r#"
        WHERE (host_id = ?1 OR id IN (SELECT meeting_id FROM meeting_attendees WHERE user_id = ?1))
          AND (?2 IS NULL OR ends_at > ?2)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM meetings {}", WHERE))
        .bind(user.id())
        .bind(after)
        .fetch_one(&state.db)
        .await?;

    let rows = sqlx::query_as::<_, Meeting>(&format!(
        "SELECT {} FROM meetings {} ORDER BY starts_at LIMIT ?3 OFFSET ?4",
        MEETING_COLUMNS, WHERE
    ))
    .bind(user.id())
    .bind(after)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Json(Paginated::new(rows, page, total)))
}

/// POST /api/meetings
pub async fn create_meeting(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<MeetingRequest>,
) -> ApiResult<(StatusCode, Json<MeetingResponse>)> {
    validate(&req).into_result()?;

    let emails = normalize_attendees(&req.attendees);
    let (Some(starts_at), Some(ends_at)) = (req.starts_at, req.ends_at) else {
        return Err(ApiError::field("starts_at", "The starts at field is required."));
    };

    let mut tx = state.db.begin().await?;

    let mut meeting = sqlx::query_as::<_, Meeting>(&format!(
        r#"
        INSERT INTO meetings (room_id, title, description, host_id, starts_at, ends_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING {}
        "#,
        MEETING_COLUMNS
    ))
    .bind(Uuid::new_v4().to_string())
    .bind(clean(req.title))
    .bind(clean(req.description))
    .bind(user.id())
    .bind(starts_at)
    .bind(ends_at)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    let mut invited_users = Vec::new();
    for email in &emails {
        let user_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM users WHERE email = ? COLLATE NOCASE")
                .bind(email)
                .fetch_optional(&mut *tx)
                .await?;

        sqlx::query(
            "INSERT INTO meeting_attendees (meeting_id, email, user_id, status) VALUES (?, ?, ?, 'invited')",
        )
        .bind(meeting.id)
        .bind(email)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if let Some(id) = user_id.filter(|id| *id != user.id()) {
            invited_users.push(id);
        }
    }

    match state.calendar.create_event(&meeting, &emails).await {
        Ok(Some(event_id)) => {
            sqlx::query("UPDATE meetings SET calendar_event_id = ? WHERE id = ?")
                .bind(&event_id)
                .bind(meeting.id)
                .execute(&mut *tx)
                .await?;
            meeting.calendar_event_id = Some(event_id);
        }
        Ok(None) => {}
        Err(e) => {
            warn!(room_id = %meeting.room_id, error = %e, "Calendar sync failed, meeting saved without event");
        }
    }

    tx.commit().await?;

    for invited in invited_users {
        state.event_bus.emit_lossy(HubEvent::UserNotification {
            user_id: invited,
            kind: "meeting_invite".to_string(),
            title: meeting.title.clone(),
            body: format!("{} invited you for {}", user.0.name, meeting.starts_at.to_rfc3339()),
            timestamp: Utc::now(),
        });
    }

    info!(room_id = %meeting.room_id, attendees = emails.len(), "Meeting created");
    let attendees = attendees_of(&state.db, meeting.id).await?;
    Ok((StatusCode::CREATED, Json(MeetingResponse { meeting, attendees })))
}

/// GET /api/meetings/:room_id
pub async fn show_meeting(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(room_id): Path<String>,
) -> ApiResult<Json<MeetingResponse>> {
    let meeting = participant_meeting(&state.db, &room_id, &user).await?;
    let attendees = attendees_of(&state.db, meeting.id).await?;
    Ok(Json(MeetingResponse { meeting, attendees }))
}

/// DELETE /api/meetings/:room_id (host only)
pub async fn delete_meeting(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(room_id): Path<String>,
) -> ApiResult<StatusCode> {
    let meeting = find_meeting(&state.db, &room_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Meeting"))?;
    if meeting.host_id != user.id() {
        return Err(ApiError::forbidden());
    }

    if let Some(event_id) = meeting.calendar_event_id.as_deref() {
        if let Err(e) = state.calendar.delete_event(event_id).await {
            warn!(room_id = %meeting.room_id, error = %e, "Calendar event removal failed");
        }
    }

    sqlx::query("DELETE FROM meetings WHERE id = ?")
        .bind(meeting.id)
        .execute(&state.db)
        .await?;
    info!(room_id = %meeting.room_id, "Meeting deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/meetings/:room_id/signal
///
/// Relays a WebRTC-style signal to the room; `to_user_id` narrows it to one
/// participant.
pub async fn signal(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(room_id): Path<String>,
    Json(req): Json<SignalRequest>,
) -> ApiResult<StatusCode> {
    let meeting = participant_meeting(&state.db, &room_id, &user).await?;

    let mut errors = ValidationErrors::new();
    errors.required("type", req.signal_type.as_deref());
    errors.one_of("type", req.signal_type.as_deref(), SIGNAL_TYPES);
    if let Some(to) = req.to_user_id {
        if !is_participant(&state.db, &meeting, to).await? {
            errors.add("to_user_id", "The selected user is not in this meeting.");
        }
    }
    errors.into_result()?;

    state.event_bus.emit_lossy(HubEvent::MeetingSignal {
        room_id: meeting.room_id,
        from_user_id: user.id(),
        to_user_id: req.to_user_id,
        signal_type: req.signal_type.unwrap_or_default(),
        payload: req.payload,
    });
    Ok(StatusCode::ACCEPTED)
}

pub fn meeting_routes() -> Router<AppState> {
    Router::new()
        .route("/api/meetings", get(list_meetings).post(create_meeting))
        .route(
            "/api/meetings/:room_id",
            get(show_meeting).delete(delete_meeting),
        )
        .route("/api/meetings/:room_id/signal", post(signal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_end_must_follow_start() {
        let start = Utc::now();
        let req = MeetingRequest {
            title: Some("Sync".into()),
            starts_at: Some(start),
            ends_at: Some(start),
            ..Default::default()
        };
        assert!(validate(&req).has("ends_at"));

        let ok = MeetingRequest {
            ends_at: Some(start + Duration::minutes(30)),
            ..req
        };
        assert!(validate(&ok).is_empty());
    }

    #[test]
    fn test_attendee_emails_validated_and_normalized() {
        let req = MeetingRequest {
            title: Some("Sync".into()),
            starts_at: Some(Utc::now()),
            ends_at: Some(Utc::now() + Duration::hours(1)),
            description: None,
            attendees: vec!["not-an-email".into()],
        };
        assert!(validate(&req).has("attendees"));

        let emails = normalize_attendees(&[
            "Ana@Example.com".into(),
            " ana@example.com ".into(),
            "bo@example.com".into(),
        ]);
        assert_eq!(emails, vec!["ana@example.com", "bo@example.com"]);
    }
}
