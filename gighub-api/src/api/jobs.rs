//! Job posts
//!
//! A post belongs to a company; only the company owner may create, update or
//! delete its posts.

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Extension, Router,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::info;

use gighub_common::db::{JobPost, EMPLOYMENT_TYPES, JOB_STATUSES};
use gighub_common::ValidationErrors;

use super::companies::{find_company, owned_company};
use super::{clean, like_pattern};
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path, Query};
use crate::pagination::{PageParams, Paginated};
use crate::AppState;

const JOB_COLUMNS: &str = "id, company_id, title, description, location, employment_type, salary_min, salary_max, status, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub company_id: Option<i64>,
    pub status: Option<String>,
    pub employment_type: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JobRequest {
    pub company_id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub employment_type: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub status: Option<String>,
}

/// Field rules shared by create and update
///
/// `current` holds the stored salaries so a partial update is checked
/// against the resulting pair.
fn validate(req: &JobRequest, creating: bool, current: (Option<i64>, Option<i64>)) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    if creating {
        if req.company_id.is_none() {
            errors.add("company_id", "The company id field is required.");
        }
        errors.required("title", req.title.as_deref());
        errors.required("description", req.description.as_deref());
        errors.required("employment_type", req.employment_type.as_deref());
    }
    errors.max_len("title", req.title.as_deref(), 255);
    errors.max_len("location", req.location.as_deref(), 255);
    errors.one_of("employment_type", req.employment_type.as_deref(), EMPLOYMENT_TYPES);
    errors.one_of("status", req.status.as_deref(), JOB_STATUSES);

    for (field, value) in [("salary_min", req.salary_min), ("salary_max", req.salary_max)] {
        if matches!(value, Some(v) if v < 0) {
            errors.add(field, format!("The {} must be at least 0.", field.replace('_', " ")));
        }
    }

    let min = req.salary_min.or(current.0);
    let max = req.salary_max.or(current.1);
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            errors.add(
                "salary_max",
                "The salary max must be greater than or equal to salary min.",
            );
        }
    }
    errors
}

async fn find_job(db: &SqlitePool, id: i64) -> sqlx::Result<Option<JobPost>> {
    sqlx::query_as::<_, JobPost>(&format!("SELECT {} FROM job_posts WHERE id = ?", JOB_COLUMNS))
        .bind(id)
        .fetch_optional(db)
        .await
}

/// GET /api/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(query): Query<JobQuery>,
) -> ApiResult<Json<Paginated<JobPost>>> {
    let page = page.resolve();
    let pattern = like_pattern(&query.search);
    let status = clean(query.status);
    let employment_type = clean(query.employment_type);

    const WHERE: &str = r#"
        WHERE (?1 IS NULL OR company_id = ?1)
          AND (?2 IS NULL OR status = ?2)
          AND (?3 IS NULL OR employment_type = ?3)
          AND (?4 IS NULL OR title LIKE ?4 OR description LIKE ?4 OR location LIKE ?4)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM job_posts {}", WHERE))
        .bind(query.company_id)
        .bind(&status)
        .bind(&employment_type)
        .bind(&pattern)
        .fetch_one(&state.db)
        .await?;

    let rows = sqlx::query_as::<_, JobPost>(&format!(
        "SELECT {} FROM job_posts {} ORDER BY created_at DESC, id DESC LIMIT ?5 OFFSET ?6",
        JOB_COLUMNS, WHERE
    ))
    .bind(query.company_id)
    .bind(&status)
    .bind(&employment_type)
    .bind(&pattern)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Json(Paginated::new(rows, page, total)))
}

/// POST /api/jobs
pub async fn create_job(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<JobRequest>,
) -> ApiResult<(StatusCode, Json<JobPost>)> {
    let mut errors = validate(&req, true, (None, None));
    if let Some(company_id) = req.company_id {
        if find_company(&state.db, company_id).await?.is_none() {
            errors.add("company_id", "The selected company id is invalid.");
        }
    }
    errors.into_result()?;

    let company = owned_company(&state.db, req.company_id.unwrap_or_default(), &user).await?;
    let now = Utc::now();

    let job = sqlx::query_as::<_, JobPost>(&format!(
        r#"
        INSERT INTO job_posts
            (company_id, title, description, location, employment_type, salary_min, salary_max, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING {}
        "#,
        JOB_COLUMNS
    ))
    .bind(company.id)
    .bind(clean(req.title))
    .bind(clean(req.description))
    .bind(clean(req.location))
    .bind(req.employment_type)
    .bind(req.salary_min)
    .bind(req.salary_max)
    .bind(req.status.unwrap_or_else(|| "open".to_string()))
    .bind(now)
    .bind(now)
    .fetch_one(&state.db)
    .await?;

    info!(job_id = job.id, company_id = company.id, "Job post created");
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/jobs/:id
pub async fn show_job(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<JobPost>> {
    find_job(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Job post"))
}

/// PUT /api/jobs/:id
///
/// `company_id` cannot be changed.
pub async fn update_job(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(req): Json<JobRequest>,
) -> ApiResult<Json<JobPost>> {
    let job = find_job(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job post"))?;
    owned_company(&state.db, job.company_id, &user).await?;

    validate(&req, false, (job.salary_min, job.salary_max)).into_result()?;

    let updated = sqlx::query_as::<_, JobPost>(&format!(
        r#"
        UPDATE job_posts SET
            title = COALESCE(?, title),
            description = COALESCE(?, description),
            location = COALESCE(?, location),
            employment_type = COALESCE(?, employment_type),
            salary_min = COALESCE(?, salary_min),
            salary_max = COALESCE(?, salary_max),
            status = COALESCE(?, status),
            updated_at = ?
        WHERE id = ?
        RETURNING {}
        "#,
        JOB_COLUMNS
    ))
    .bind(clean(req.title))
    .bind(clean(req.description))
    .bind(clean(req.location))
    .bind(req.employment_type)
    .bind(req.salary_min)
    .bind(req.salary_max)
    .bind(req.status)
    .bind(Utc::now())
    .bind(job.id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(updated))
}

/// DELETE /api/jobs/:id
pub async fn delete_job(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let job = find_job(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job post"))?;
    owned_company(&state.db, job.company_id, &user).await?;

    sqlx::query("DELETE FROM job_posts WHERE id = ?")
        .bind(job.id)
        .execute(&state.db)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", get(list_jobs).post(create_job))
        .route("/api/jobs/:id", get(show_job).put(update_job).delete(delete_job))
}
