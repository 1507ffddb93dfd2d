//! Candidates, optionally attached to a job post

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;

use gighub_common::db::{Candidate, CANDIDATE_STATUSES};
use gighub_common::ValidationErrors;

use super::{clean, like_pattern};
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path, Query};
use crate::pagination::{PageParams, Paginated};
use crate::AppState;

const CANDIDATE_COLUMNS: &str =
    "id, job_post_id, name, email, phone, resume_url, status, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct CandidateQuery {
    pub job_post_id: Option<i64>,
    pub status: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateRequest {
    pub job_post_id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub resume_url: Option<String>,
    pub status: Option<String>,
}

struct ValidCandidate {
    job_post_id: Option<i64>,
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    resume_url: Option<String>,
    status: Option<String>,
}

async fn validate(
    db: &SqlitePool,
    req: CandidateRequest,
    existing_id: Option<i64>,
) -> ApiResult<ValidCandidate> {
    let name = clean(req.name);
    let email = clean(req.email).map(|e| e.to_lowercase());
    let phone = clean(req.phone);
    let resume_url = clean(req.resume_url);
    let status = clean(req.status);

    let mut errors = ValidationErrors::new();
    if existing_id.is_none() {
        errors.required("name", name.as_deref());
        errors.required("email", email.as_deref());
    }
    errors.max_len("name", name.as_deref(), 255);
    errors.email("email", email.as_deref());
    errors.max_len("phone", phone.as_deref(), 32);
    errors.url("resume_url", resume_url.as_deref());
    errors.one_of("status", status.as_deref(), CANDIDATE_STATUSES);

    if let Some(job_post_id) = req.job_post_id {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM job_posts WHERE id = ?)")
            .bind(job_post_id)
            .fetch_one(db)
            .await?;
        if !exists {
            errors.add("job_post_id", "The selected job post id is invalid.");
        }
    }

    if let Some(email) = email.as_deref() {
        if !errors.has("email") {
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM candidates WHERE email = ?1 AND (?2 IS NULL OR id != ?2))",
            )
            .bind(email)
            .bind(existing_id)
            .fetch_one(db)
            .await?;
            if taken {
                errors.add("email", "The email has already been taken.");
            }
        }
    }
    errors.into_result()?;

    Ok(ValidCandidate {
        job_post_id: req.job_post_id,
        name,
        email,
        phone,
        resume_url,
        status,
    })
}

async fn find_candidate(db: &SqlitePool, id: i64) -> sqlx::Result<Option<Candidate>> {
    sqlx::query_as::<_, Candidate>(&format!(
        "SELECT {} FROM candidates WHERE id = ?",
        CANDIDATE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(db)
    .await
}

/// GET /api/candidates
pub async fn list_candidates(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(query): Query<CandidateQuery>,
) -> ApiResult<Json<Paginated<Candidate>>> {
    let page = page.resolve();
    let pattern = like_pattern(&query.search);
    let status = clean(query.status);

    const WHERE: &str = r#"
        WHERE (?1 IS NULL OR job_post_id = ?1)
          AND (?2 IS NULL OR status = ?2)
          AND (?3 IS NULL OR name LIKE ?3 OR email LIKE ?3)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM candidates {}", WHERE))
        .bind(query.job_post_id)
        .bind(&status)
        .bind(&pattern)
        .fetch_one(&state.db)
        .await?;

    let rows = sqlx::query_as::<_, Candidate>(&format!(
        "SELECT {} FROM candidates {} ORDER BY created_at DESC, id DESC LIMIT ?4 OFFSET ?5",
        CANDIDATE_COLUMNS, WHERE
    ))
    .bind(query.job_post_id)
    .bind(&status)
    .bind(&pattern)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Json(Paginated::new(rows, page, total)))
}

/// POST /api/candidates
pub async fn create_candidate(
    State(state): State<AppState>,
    Json(req): Json<CandidateRequest>,
) -> ApiResult<(StatusCode, Json<Candidate>)> {
    let valid = validate(&state.db, req, None).await?;
    let now = Utc::now();

    let candidate = sqlx::query_as::<_, Candidate>(&format!(
        r#"
        INSERT INTO candidates (job_post_id, name, email, phone, resume_url, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING {}
        "#,
        CANDIDATE_COLUMNS
    ))
    .bind(valid.job_post_id)
    .bind(valid.name)
    .bind(valid.email)
    .bind(valid.phone)
    .bind(valid.resume_url)
    .bind(valid.status.unwrap_or_else(|| "new".to_string()))
    .bind(now)
    .bind(now)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(candidate)))
}

/// GET /api/candidates/:id
pub async fn show_candidate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Candidate>> {
    find_candidate(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Candidate"))
}

/// PUT /api/candidates/:id
pub async fn update_candidate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CandidateRequest>,
) -> ApiResult<Json<Candidate>> {
    let candidate = find_candidate(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Candidate"))?;
    let valid = validate(&state.db, req, Some(candidate.id)).await?;

    let updated = sqlx::query_as::<_, Candidate>(&format!(
        r#"
        UPDATE candidates SET
            job_post_id = COALESCE(?, job_post_id),
            name = COALESCE(?, name),
            email = COALESCE(?, email),
            phone = COALESCE(?, phone),
            resume_url = COALESCE(?, resume_url),
            status = COALESCE(?, status),
            updated_at = ?
        WHERE id = ?
        RETURNING {}
        "#,
        CANDIDATE_COLUMNS
    ))
    .bind(valid.job_post_id)
    .bind(valid.name)
    .bind(valid.email)
    .bind(valid.phone)
    .bind(valid.resume_url)
    .bind(valid.status)
    .bind(Utc::now())
    .bind(candidate.id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(updated))
}

/// DELETE /api/candidates/:id
pub async fn delete_candidate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let result = sqlx::query("DELETE FROM candidates WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Candidate"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn candidate_routes() -> Router<AppState> {
    Router::new()
        .route("/api/candidates", get(list_candidates).post(create_candidate))
        .route(
            "/api/candidates/:id",
            get(show_candidate)
                .put(update_candidate)
                .delete(delete_candidate),
        )
}
