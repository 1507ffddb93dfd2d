//! IP address registry (allow/block list)
//!
//! Addresses are stored in canonical form so `::1` and `0:0:0:0:0:0:0:1`
//! collide on the UNIQUE index. Mutation is admin-only.

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Extension, Router,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::net::IpAddr;

use gighub_common::db::IpAddress;
use gighub_common::ValidationErrors;

use super::{clean, like_pattern};
use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path, Query};
use crate::pagination::{PageParams, Paginated};
use crate::AppState;

const IP_COLUMNS: &str = "id, address, label, is_blocked, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct IpQuery {
    pub is_blocked: Option<bool>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IpRequest {
    pub address: Option<String>,
    pub label: Option<String>,
    pub is_blocked: Option<bool>,
}

fn canonical(address: &str) -> Option<String> {
    address.trim().parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

async fn find_ip(db: &SqlitePool, id: i64) -> sqlx::Result<Option<IpAddress>> {
    sqlx::query_as::<_, IpAddress>(&format!("SELECT {} FROM ip_addresses WHERE id = ?", IP_COLUMNS))
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Validated canonical address (when given) and label
async fn validate(
    db: &SqlitePool,
    req: &IpRequest,
    existing_id: Option<i64>,
) -> ApiResult<(Option<String>, Option<String>)> {
    let label = clean(req.label.clone());
    let raw = clean(req.address.clone());

    let mut errors = ValidationErrors::new();
    if existing_id.is_none() {
        errors.required("address", raw.as_deref());
    }
    errors.max_len("label", label.as_deref(), 255);

    let address = match raw.as_deref() {
        Some(raw) => match canonical(raw) {
            Some(ip) => Some(ip),
            None => {
                errors.add("address", "The address must be a valid IP address.");
                None
            }
        },
        None => None,
    };

    if let Some(ip) = address.as_deref() {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM ip_addresses WHERE address = ?1 AND (?2 IS NULL OR id != ?2))",
        )
        .bind(ip)
        .bind(existing_id)
        .fetch_one(db)
        .await?;
        if taken {
            errors.add("address", "The address has already been taken.");
        }
    }
    errors.into_result()?;
    Ok((address, label))
}

/// GET /api/ip-addresses
pub async fn list_ips(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
    Query(query): Query<IpQuery>,
) -> ApiResult<Json<Paginated<IpAddress>>> {
    let page = page.resolve();
    let pattern = like_pattern(&query.search);

    const WHERE: &str = "WHERE (?1 IS NULL OR is_blocked = ?1) AND (?2 IS NULL OR address LIKE ?2 OR label LIKE ?2)";

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM ip_addresses {}", WHERE))
        .bind(query.is_blocked)
        .bind(&pattern)
        .fetch_one(&state.db)
        .await?;

    let rows = sqlx::query_as::<_, IpAddress>(&format!(
        "SELECT {} FROM ip_addresses {} ORDER BY address LIMIT ?3 OFFSET ?4",
        IP_COLUMNS, WHERE
    ))
    .bind(query.is_blocked)
    .bind(&pattern)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Json(Paginated::new(rows, page, total)))
}

/// POST /api/ip-addresses (admin)
pub async fn create_ip(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<IpRequest>,
) -> ApiResult<(StatusCode, Json<IpAddress>)> {
    user.require_admin()?;
    let (address, label) = validate(&state.db, &req, None).await?;
    let now = Utc::now();

    let ip = sqlx::query_as::<_, IpAddress>(&format!(
        r#"
        INSERT INTO ip_addresses (address, label, is_blocked, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING {}
        "#,
        IP_COLUMNS
    ))
    .bind(address)
    .bind(label)
    .bind(req.is_blocked.unwrap_or(false))
    .bind(now)
    .bind(now)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(ip)))
}

/// GET /api/ip-addresses/:id
pub async fn show_ip(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<IpAddress>> {
    find_ip(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("IP address"))
}

/// PUT /api/ip-addresses/:id (admin)
pub async fn update_ip(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(req): Json<IpRequest>,
) -> ApiResult<Json<IpAddress>> {
    user.require_admin()?;
    let ip = find_ip(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("IP address"))?;
    let (address, label) = validate(&state.db, &req, Some(ip.id)).await?;

    let updated = sqlx::query_as::<_, IpAddress>(&format!(
        r#"
        UPDATE ip_addresses SET
            address = COALESCE(?, address),
            label = COALESCE(?, label),
            is_blocked = COALESCE(?, is_blocked),
            updated_at = ?
        WHERE id = ?
        RETURNING {}
        "#,
        IP_COLUMNS
    ))
    .bind(address)
    .bind(label)
    .bind(req.is_blocked)
    .bind(Utc::now())
    .bind(ip.id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(updated))
}

/// DELETE /api/ip-addresses/:id (admin)
pub async fn delete_ip(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    let result = sqlx::query("DELETE FROM ip_addresses WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("IP address"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn ip_address_routes() -> Router<AppState> {
    Router::new()
        .route("/api/ip-addresses", get(list_ips).post(create_ip))
        .route(
            "/api/ip-addresses/:id",
            get(show_ip).put(update_ip).delete(delete_ip),
        )
}
