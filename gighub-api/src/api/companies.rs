//! Companies on the job board
//!
//! Anyone authenticated can read; only the owner may update or delete.

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

use gighub_common::db::Company;
use gighub_common::ValidationErrors;

use super::{clean, like_pattern};
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path, Query};
use crate::pagination::{PageParams, Paginated};
use crate::AppState;

const COMPANY_COLUMNS: &str = "id, owner_id, name, website, description, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct CompanyQuery {
    pub search: Option<String>,
    /// Only companies owned by the current user
    #[serde(default)]
    pub mine: bool,
}

#[derive(Debug, Deserialize)]
pub struct CompanyRequest {
    pub name: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
}

pub(crate) async fn find_company(db: &SqlitePool, id: i64) -> sqlx::Result<Option<Company>> {
    sqlx::query_as::<_, Company>(&format!(
        "SELECT {} FROM companies WHERE id = ?",
        COMPANY_COLUMNS
    ))
    .bind(id)
    .fetch_optional(db)
    .await
}

/// Company `id`, 404 when missing and 403 unless `user` owns it
pub(crate) async fn owned_company(db: &SqlitePool, id: i64, user: &CurrentUser) -> ApiResult<Company> {
    let company = find_company(db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Company"))?;
    if company.owner_id != user.id() {
        return Err(ApiError::forbidden());
    }
    Ok(company)
}

async fn name_taken(db: &SqlitePool, name: &str, except_id: Option<i64>) -> sqlx::Result<bool> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM companies WHERE name = ? COLLATE NOCASE AND (?2 IS NULL OR id != ?2))",
    )
    .bind(name)
    .bind(except_id)
    .fetch_one(db)
    .await
}

async fn validate(
    db: &SqlitePool,
    req: CompanyRequest,
    existing: Option<&Company>,
) -> ApiResult<(Option<String>, Option<String>, Option<String>)> {
    let name = clean(req.name);
    let website = clean(req.website);

    let mut errors = ValidationErrors::new();
    if existing.is_none() {
        errors.required("name", name.as_deref());
    }
    errors.max_len("name", name.as_deref(), 255);
    errors.url("website", website.as_deref());
    if let Some(n) = name.as_deref() {
        if name_taken(db, n, existing.map(|c| c.id)).await? {
            errors.add("name", "The name has already been taken.");
        }
    }
    errors.into_result()?;

    Ok((name, website, clean(req.description)))
}

/// GET /api/companies
pub async fn list_companies(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(page): Query<PageParams>,
    Query(query): Query<CompanyQuery>,
) -> ApiResult<Json<Paginated<Company>>> {
    let page = page.resolve();
    let pattern = like_pattern(&query.search);
    let owner = query.mine.then(|| user.id());

    const WHERE: &str = "WHERE (?1 IS NULL OR name LIKE ?1) AND (?2 IS NULL OR owner_id = ?2)";

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM companies {}", WHERE))
        .bind(&pattern)
        .bind(owner)
        .fetch_one(&state.db)
        .await?;

    let rows = sqlx::query_as::<_, Company>(&format!(
        "SELECT {} FROM companies {} ORDER BY name LIMIT ?3 OFFSET ?4",
        COMPANY_COLUMNS, WHERE
    ))
    .bind(&pattern)
    .bind(owner)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Json(Paginated::new(rows, page, total)))
}

/// POST /api/companies
pub async fn create_company(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<CompanyRequest>,
) -> ApiResult<(StatusCode, Json<Company>)> {
    let (name, website, description) = validate(&state.db, req, None).await?;
    let now = Utc::now();

    let company = sqlx::query_as::<_, Company>(&format!(
        r#"
        INSERT INTO companies (owner_id, name, website, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING {}
        "#,
        COMPANY_COLUMNS
    ))
    .bind(user.id())
    .bind(name.unwrap_or_default())
    .bind(website)
    .bind(description)
    .bind(now)
    .bind(now)
    .fetch_one(&state.db)
    .await?;

    info!(company_id = company.id, owner_id = user.id(), "Company created");
    Ok((StatusCode::CREATED, Json(company)))
}

/// GET /api/companies/:id
pub async fn show_company(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Company>> {
    find_company(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Company"))
}

/// PUT /api/companies/:id
pub async fn update_company(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(req): Json<CompanyRequest>,
) -> ApiResult<Json<Company>> {
    let company = owned_company(&state.db, id, &user).await?;
    let (name, website, description) = validate(&state.db, req, Some(&company)).await?;

    let updated = sqlx::query_as::<_, Company>(&format!(
        r#"
        UPDATE companies SET
            name = COALESCE(?, name),
            website = COALESCE(?, website),
            description = COALESCE(?, description),
            updated_at = ?
        WHERE id = ?
        RETURNING {}
        "#,
        COMPANY_COLUMNS
    ))
    .bind(name)
    .bind(website)
    .bind(description)
    .bind(Utc::now())
    .bind(company.id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(updated))
}

/// DELETE /api/companies/:id - job posts go with it
pub async fn delete_company(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let company = owned_company(&state.db, id, &user).await?;
    sqlx::query("DELETE FROM companies WHERE id = ?")
        .bind(company.id)
        .execute(&state.db)
        .await?;
    info!(company_id = company.id, "Company deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub fn company_routes() -> Router<AppState> {
    Router::new()
        .route("/api/companies", get(list_companies).post(create_company))
        .route(
            "/api/companies/:id",
            get(show_company).put(update_company).delete(delete_company),
        )
}
