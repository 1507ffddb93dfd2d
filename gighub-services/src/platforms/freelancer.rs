//! Freelancer.com client

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use gighub_common::config::OAuthClientConfig;
use gighub_common::db::Platform;

use super::oauth::{Endpoints, OAuthHttp, TokenHeader};
use super::{OAuthToken, PlatformClient, PlatformError, RemoteProfile, RemoteProject};

const AUTHORIZE_URL: &str = "https://accounts.freelancer.com/oauth/authorize";
const TOKEN_URL: &str = "https://accounts.freelancer.com/oauth/token";
const API_BASE: &str = "https://www.freelancer.com/api";
const PROJECT_URL_BASE: &str = "https://www.freelancer.com/projects/";

/// Freelancer expects the raw token in this header rather than `Authorization`
const TOKEN_HEADER: &str = "freelancer-oauth-v1";

/// Every Freelancer response wraps its payload in `result`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    result: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, PlatformError> {
        match (self.status.as_str(), self.result) {
            ("success", Some(result)) => Ok(result),
            _ => Err(PlatformError::Parse(
                self.message
                    .unwrap_or_else(|| format!("Unexpected response status: {}", self.status)),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SelfUser {
    id: i64,
    username: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectList {
    #[serde(default)]
    projects: Vec<FreelancerProject>,
}

#[derive(Debug, Deserialize)]
struct FreelancerProject {
    id: i64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    preview_description: Option<String>,
    #[serde(default)]
    budget: Option<Budget>,
    #[serde(default)]
    currency: Option<Currency>,
    #[serde(default)]
    seo_url: Option<String>,
    /// Unix seconds
    #[serde(default)]
    time_submitted: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Budget {
    #[serde(default)]
    minimum: Option<f64>,
    #[serde(default)]
    maximum: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Currency {
    code: String,
}

pub struct FreelancerClient {
    http: OAuthHttp,
}

impl FreelancerClient {
    pub fn new(config: &OAuthClientConfig, redirect_uri: String) -> Result<Self, PlatformError> {
        let endpoints = Endpoints::resolve((AUTHORIZE_URL, TOKEN_URL, API_BASE), config);
        Ok(Self {
            http: OAuthHttp::new(config, endpoints, redirect_uri, TokenHeader::Named(TOKEN_HEADER))?,
        })
    }
}

fn project_from(p: FreelancerProject) -> RemoteProject {
    // Fixed-price projects report a range; keep the upper bound
    let budget = p.budget.and_then(|b| b.maximum.or(b.minimum));
    let posted_at: Option<DateTime<Utc>> = p
        .time_submitted
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    RemoteProject {
        external_id: p.id.to_string(),
        title: p.title,
        description: p.description.or(p.preview_description),
        budget,
        currency: p.currency.map(|c| c.code),
        url: p.seo_url.map(|slug| format!("{}{}", PROJECT_URL_BASE, slug)),
        posted_at,
    }
}

#[async_trait]
impl PlatformClient for FreelancerClient {
    fn platform(&self) -> Platform {
        Platform::Freelancer
    }

    fn authorize_url(&self, state: &str) -> Result<String, PlatformError> {
        self.http.authorize_url(state)
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthToken, PlatformError> {
        self.http.exchange_code(code).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<OAuthToken, PlatformError> {
        self.http.refresh(refresh_token).await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<RemoteProfile, PlatformError> {
        let envelope: Envelope<SelfUser> = self
            .http
            .get_json(access_token, "/users/0.1/self", &[])
            .await?;
        let user = envelope.into_result()?;

        Ok(RemoteProfile {
            external_id: user.id.to_string(),
            username: Some(user.username),
            display_name: user.display_name,
        })
    }

    async fn fetch_projects(&self, access_token: &str) -> Result<Vec<RemoteProject>, PlatformError> {
        let envelope: Envelope<ProjectList> = self
            .http
            .get_json(
                access_token,
                "/projects/0.1/projects/active",
                &[("limit", "50"), ("full_description", "true")],
            )
            .await?;

        let projects: Vec<RemoteProject> = envelope
            .into_result()?
            .projects
            .into_iter()
            .map(project_from)
            .collect();
        tracing::debug!(count = projects.len(), "Fetched Freelancer projects");
        Ok(projects)
    }
}
