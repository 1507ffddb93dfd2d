//! gighub-api library interface
//!
//! REST + SSE server for GigHub. Exposes [`AppState`] and [`build_router`]
//! so integration tests can drive the router without a socket.

pub mod api;
pub mod auth;
pub mod error;
pub mod extract;
pub mod pagination;

pub use crate::error::{ApiError, ApiResult};

use axum::http::{HeaderValue, Method};
use axum::{middleware, Router};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use gighub_common::events::EventBus;
use gighub_services::calendar::{CalendarSync, DisabledCalendar};
use gighub_services::platforms::PlatformRegistry;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Broadcast bus feeding the SSE channels
    pub event_bus: EventBus,
    /// Configured OAuth platform clients
    pub platforms: PlatformRegistry,
    pub calendar: Arc<dyn CalendarSync>,
    /// `max_attempts` for jobs dispatched by handlers
    pub max_attempts: u32,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// State with no platforms and calendar sync disabled
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self {
            db,
            event_bus,
            platforms: PlatformRegistry::new(),
            calendar: Arc::new(DisabledCalendar),
            max_attempts: 3,
            startup_time: Utc::now(),
        }
    }

    pub fn with_platforms(mut self, platforms: PlatformRegistry) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn CalendarSync>) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Build application router
///
/// `/health`, register/login and the OAuth callback are public; everything
/// else requires a bearer token.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(api::account_routes())
        .merge(api::workflow_routes())
        .merge(api::company_routes())
        .merge(api::job_routes())
        .merge(api::candidate_routes())
        .merge(api::template_routes())
        .merge(api::ip_address_routes())
        .merge(api::platform_routes())
        .merge(api::chat_routes())
        .merge(api::meeting_routes())
        .merge(api::broadcasting_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let public = Router::new()
        .merge(api::health_routes())
        .merge(api::public_auth_routes())
        .merge(api::platform_callback_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS policy from `server.cors_origins`
///
/// Empty or `["*"]` allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(parsed)
}
