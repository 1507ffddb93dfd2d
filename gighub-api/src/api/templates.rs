//! Message templates (proposal, outreach and interview emails)
//!
//! Readable by everyone; only administrators may change them.

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Extension, Router,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;

use gighub_common::db::Template;
use gighub_common::ValidationErrors;

use super::{clean, like_pattern};
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path, Query};
use crate::pagination::{PageParams, Paginated};
use crate::AppState;

const TEMPLATE_COLUMNS: &str = "id, name, category, subject, body, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct TemplateQuery {
    pub category: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

async fn find_template(db: &SqlitePool, id: i64) -> sqlx::Result<Option<Template>> {
    sqlx::query_as::<_, Template>(&format!(
        "SELECT {} FROM templates WHERE id = ?",
        TEMPLATE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(db)
    .await
}

async fn validate(db: &SqlitePool, req: &TemplateRequest, existing_id: Option<i64>) -> ApiResult<()> {
    let mut errors = ValidationErrors::new();
    if existing_id.is_none() {
        errors.required("name", req.name.as_deref());
        errors.required("body", req.body.as_deref());
    }
    errors.max_len("name", req.name.as_deref(), 255);
    errors.max_len("subject", req.subject.as_deref(), 255);

    if let Some(name) = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM templates WHERE name = ?1 AND (?2 IS NULL OR id != ?2))",
        )
        .bind(name)
        .bind(existing_id)
        .fetch_one(db)
        .await?;
        if taken {
            errors.add("name", "The name has already been taken.");
        }
    }
    Ok(errors.into_result()?)
}

/// GET /api/templates
pub async fn list_templates(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(query): Query<TemplateQuery>,
) -> ApiResult<Json<Paginated<Template>>> {
    let page = page.resolve();
    let category = clean(query.category);
    let pattern = like_pattern(&query.search);

    const WHERE: &str = "WHERE (?1 IS NULL OR category = ?1) AND (?2 IS NULL OR name LIKE ?2 OR subject LIKE ?2)";

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM templates {}", WHERE))
        .bind(&category)
        .bind(&pattern)
        .fetch_one(&state.db)
        .await?;

    let rows = sqlx::query_as::<_, Template>(&format!(
        "SELECT {} FROM templates {} ORDER BY name LIMIT ?3 OFFSET ?4",
        TEMPLATE_COLUMNS, WHERE
    ))
    .bind(&category)
    .bind(&pattern)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Json(Paginated::new(rows, page, total)))
}

/// POST /api/templates (admin)
pub async fn create_template(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<TemplateRequest>,
) -> ApiResult<(StatusCode, Json<Template>)> {
    user.require_admin()?;
    validate(&state.db, &req, None).await?;
    let now = Utc::now();

    let template = sqlx::query_as::<_, Template>(&format!(
        r#"
        INSERT INTO templates (name, category, subject, body, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING {}
        "#,
        TEMPLATE_COLUMNS
    ))
    .bind(clean(req.name))
    .bind(clean(req.category))
    .bind(clean(req.subject))
    .bind(req.body)
    .bind(now)
    .bind(now)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(template)))
}

/// GET /api/templates/:id
pub async fn show_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Template>> {
    find_template(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Template"))
}

/// PUT /api/templates/:id (admin)
pub async fn update_template(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(req): Json<TemplateRequest>,
) -> ApiResult<Json<Template>> {
    user.require_admin()?;
    let template = find_template(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Template"))?;
    validate(&state.db, &req, Some(template.id)).await?;

    let updated = sqlx::query_as::<_, Template>(&format!(
        r#"
        UPDATE templates SET
            name = COALESCE(?, name),
            category = COALESCE(?, category),
            subject = COALESCE(?, subject),
            body = COALESCE(?, body),
            updated_at = ?
        WHERE id = ?
        RETURNING {}
        "#,
        TEMPLATE_COLUMNS
    ))
    .bind(clean(req.name))
    .bind(clean(req.category))
    .bind(clean(req.subject))
    .bind(req.body.filter(|b| !b.trim().is_empty()))
    .bind(Utc::now())
    .bind(template.id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(updated))
}

/// DELETE /api/templates/:id (admin)
pub async fn delete_template(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    let result = sqlx::query("DELETE FROM templates WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Template"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn template_routes() -> Router<AppState> {
    Router::new()
        .route("/api/templates", get(list_templates).post(create_template))
        .route(
            "/api/templates/:id",
            get(show_template).put(update_template).delete(delete_template),
        )
}
