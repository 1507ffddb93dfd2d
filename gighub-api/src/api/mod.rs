//! HTTP API handlers for gighub-api

pub mod auth;
pub mod broadcasting;
pub mod candidates;
pub mod chat;
pub mod companies;
pub mod health;
pub mod ip_addresses;
pub mod jobs;
pub mod meetings;
pub mod platforms;
pub mod templates;
pub mod workflows;

pub use auth::{account_routes, public_auth_routes};
pub use broadcasting::broadcasting_routes;
pub use candidates::candidate_routes;
pub use chat::chat_routes;
pub use companies::company_routes;
pub use health::health_routes;
pub use ip_addresses::ip_address_routes;
pub use jobs::job_routes;
pub use meetings::meeting_routes;
pub use platforms::{platform_callback_routes, platform_routes};
pub use templates::template_routes;
pub use workflows::workflow_routes;

/// Trim a string field and drop it when blank
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `%term%` for LIKE filters, `None` for a blank search
pub(crate) fn like_pattern(search: &Option<String>) -> Option<String> {
    search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s))
}
