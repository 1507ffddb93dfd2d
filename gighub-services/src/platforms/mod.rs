//! Freelance platform integrations
//!
//! Upwork and Freelancer connect through OAuth 2.0 authorization-code flow;
//! Fiverr has no public API and is linked manually by username, so it has no
//! client here. Each OAuth platform implements [`PlatformClient`]; the
//! [`PlatformRegistry`] holds the clients that are configured.

pub mod freelancer;
pub mod oauth;
pub mod upwork;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use gighub_common::config::PlatformsConfig;
use gighub_common::db::Platform;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{0} is not configured")]
    NotConfigured(Platform),

    #[error("{0} does not support OAuth")]
    OAuthUnsupported(Platform),

    /// Access token rejected by the provider
    #[error("Access token rejected")]
    Unauthorized,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Account identity reported by the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteProfile {
    pub external_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

/// A project (job listing) from the provider's feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteProject {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub budget: Option<f64>,
    pub currency: Option<String>,
    pub url: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    fn platform(&self) -> Platform;

    /// Provider authorize URL carrying `state`
    fn authorize_url(&self, state: &str) -> Result<String, PlatformError>;

    async fn exchange_code(&self, code: &str) -> Result<OAuthToken, PlatformError>;

    async fn refresh(&self, refresh_token: &str) -> Result<OAuthToken, PlatformError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<RemoteProfile, PlatformError>;

    async fn fetch_projects(&self, access_token: &str) -> Result<Vec<RemoteProject>, PlatformError>;
}

/// Configured platform clients, keyed by platform
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    clients: HashMap<Platform, Arc<dyn PlatformClient>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build clients for every platform with a `[platforms.*]` section
    ///
    /// `public_url` is the externally reachable base of the API; redirect URIs
    /// are `{public_url}/api/platforms/{platform}/callback`.
    pub fn from_config(config: &PlatformsConfig, public_url: &str) -> Result<Self, PlatformError> {
        let mut registry = Self::new();

        if let Some(upwork) = &config.upwork {
            let redirect = redirect_uri(public_url, Platform::Upwork);
            registry = registry.with(Arc::new(upwork::UpworkClient::new(upwork, redirect)?));
        }
        if let Some(freelancer) = &config.freelancer {
            let redirect = redirect_uri(public_url, Platform::Freelancer);
            registry = registry.with(Arc::new(freelancer::FreelancerClient::new(freelancer, redirect)?));
        }

        tracing::info!(
            platforms = ?registry.clients.keys().map(|p| p.as_str()).collect::<Vec<_>>(),
            "Platform clients configured"
        );
        Ok(registry)
    }

    pub fn with(mut self, client: Arc<dyn PlatformClient>) -> Self {
        self.clients.insert(client.platform(), client);
        self
    }

    /// Client for an OAuth platform
    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformClient>, PlatformError> {
        if !platform.supports_oauth() {
            return Err(PlatformError::OAuthUnsupported(platform));
        }
        self.clients
            .get(&platform)
            .cloned()
            .ok_or(PlatformError::NotConfigured(platform))
    }
}

pub fn redirect_uri(public_url: &str, platform: Platform) -> String {
    format!(
        "{}/api/platforms/{}/callback",
        public_url.trim_end_matches('/'),
        platform
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gighub_common::config::OAuthClientConfig;

    #[test]
    fn test_registry_from_config() {
        let config = PlatformsConfig {
            upwork: Some(OAuthClientConfig {
                client_id: "id".into(),
                client_secret: "secret".into(),
                ..Default::default()
            }),
            freelancer: None,
        };
        let registry = PlatformRegistry::from_config(&config, "https://gighub.test/").unwrap();

        assert!(registry.get(Platform::Upwork).is_ok());
        assert!(matches!(
            registry.get(Platform::Freelancer),
            Err(PlatformError::NotConfigured(Platform::Freelancer))
        ));
        assert!(matches!(
            registry.get(Platform::Fiverr),
            Err(PlatformError::OAuthUnsupported(Platform::Fiverr))
        ));
    }

    #[test]
    fn test_redirect_uri() {
        assert_eq!(
            redirect_uri("https://gighub.test/", Platform::Freelancer),
            "https://gighub.test/api/platforms/freelancer/callback"
        );
    }
}
