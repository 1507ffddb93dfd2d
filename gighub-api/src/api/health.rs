//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use gighub_common::queue::{failed_count, pending_count, AI_QUEUE, PLATFORMS_QUEUE};

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the database cannot be queried
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueHealth>,
}

#[derive(Debug, Serialize)]
pub struct QueueHealth {
    pub ai_pending: i64,
    pub platforms_pending: i64,
    pub failed: i64,
}

async fn queue_health(state: &AppState) -> gighub_common::Result<QueueHealth> {
    Ok(QueueHealth {
        ai_pending: pending_count(&state.db, AI_QUEUE).await?,
        platforms_pending: pending_count(&state.db, PLATFORMS_QUEUE).await?,
        failed: failed_count(&state.db).await?,
    })
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);

    let queue = match queue_health(&state).await {
        Ok(q) => Some(q),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read queue");
            None
        }
    };

    Json(HealthResponse {
        status: if queue.is_some() { "ok" } else { "degraded" }.to_string(),
        module: "gighub-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        queue,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
