//! Upwork client

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use gighub_common::config::OAuthClientConfig;
use gighub_common::db::Platform;

use super::oauth::{Endpoints, OAuthHttp, TokenHeader};
use super::{OAuthToken, PlatformClient, PlatformError, RemoteProfile, RemoteProject};

const AUTHORIZE_URL: &str = "https://www.upwork.com/ab/account-security/oauth2/authorize";
const TOKEN_URL: &str = "https://www.upwork.com/api/v3/oauth2/token";
const API_BASE: &str = "https://www.upwork.com/api";

const JOB_URL_BASE: &str = "https://www.upwork.com/jobs/";

#[derive(Debug, Deserialize)]
struct InfoResponse {
    info: UserInfo,
    #[serde(default)]
    auth_user: Option<AuthUser>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(rename = "ref")]
    reference: String,
    #[serde(default)]
    profile_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobSearchResponse {
    #[serde(default)]
    jobs: Vec<UpworkJob>,
}

#[derive(Debug, Deserialize)]
struct UpworkJob {
    id: String,
    title: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    budget: Option<f64>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    date_created: Option<DateTime<Utc>>,
}

pub struct UpworkClient {
    http: OAuthHttp,
}

impl UpworkClient {
    pub fn new(config: &OAuthClientConfig, redirect_uri: String) -> Result<Self, PlatformError> {
        let endpoints = Endpoints::resolve((AUTHORIZE_URL, TOKEN_URL, API_BASE), config);
        Ok(Self {
            http: OAuthHttp::new(config, endpoints, redirect_uri, TokenHeader::Bearer)?,
        })
    }
}

fn profile_from(info: InfoResponse) -> RemoteProfile {
    let display_name = info.auth_user.and_then(|u| {
        let name = [u.first_name, u.last_name]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        (!name.is_empty()).then_some(name)
    });

    // Profile URLs end in the public profile key (~01abc...)
    let username = info
        .info
        .profile_url
        .as_deref()
        .and_then(|u| u.trim_end_matches('/').rsplit('/').next())
        .filter(|s| !s.is_empty())
        .map(String::from);

    RemoteProfile {
        external_id: info.info.reference,
        username,
        display_name,
    }
}

fn project_from(job: UpworkJob) -> RemoteProject {
    let url = job
        .url
        .unwrap_or_else(|| format!("{}{}", JOB_URL_BASE, job.id));
    RemoteProject {
        external_id: job.id,
        title: job.title,
        description: job.snippet,
        budget: job.budget.filter(|b| *b > 0.0),
        currency: Some("USD".to_string()),
        url: Some(url),
        posted_at: job.date_created,
    }
}

#[async_trait]
impl PlatformClient for UpworkClient {
    fn platform(&self) -> Platform {
        Platform::Upwork
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
        let info: InfoResponse = self
            .http
            .get_json(access_token, "/auth/v1/info.json", &[])
            .await?;
        Ok(profile_from(info))
    }

    async fn fetch_projects(&self, access_token: &str) -> Result<Vec<RemoteProject>, PlatformError> {
        let response: JobSearchResponse = self
            .http
            .get_json(
                access_token,
                "/profiles/v2/search/jobs.json",
                &[("q", ""), ("paging", "0;50"), ("sort", "create_time desc")],
            )
            .await?;

        let projects: Vec<RemoteProject> = response.jobs.into_iter().map(project_from).collect();
        tracing::debug!(count = projects.len(), "Fetched Upwork jobs");
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parsing() {
        let info: InfoResponse = serde_json::from_str(
            r#"{
                "info": {"ref": "12345", "profile_url": "https://www.upwork.com/freelancers/~01abc/"},
                "auth_user": {"first_name": "Ana", "last_name": "Lima"}
            }"#,
        )
        .unwrap();
        let profile = profile_from(info);
        assert_eq!(profile.external_id, "12345");
        assert_eq!(profile.username.as_deref(), Some("~01abc"));
        assert_eq!(profile.display_name.as_deref(), Some("Ana Lima"));
    }

    #[test]
    fn test_job_parsing() {
        let response: JobSearchResponse = serde_json::from_str(
            r#"{"jobs": [
                {"id": "~022", "title": "Build n8n flow", "snippet": "Need help", "budget": 500, "date_created": "2026-03-01T10:00:00Z"},
                {"id": "~023", "title": "Hourly gig", "budget": 0}
            ]}"#,
        )
        .unwrap();
        let projects: Vec<_> = response.jobs.into_iter().map(project_from).collect();

        assert_eq!(projects[0].budget, Some(500.0));
        assert_eq!(projects[0].url.as_deref(), Some("https://www.upwork.com/jobs/~022"));
        assert!(projects[0].posted_at.is_some());
        assert_eq!(projects[1].budget, None);
    }

    #[test]
    fn test_missing_jobs_key_is_empty_feed() {
        let response: JobSearchResponse = serde_json::from_str("{}").unwrap();
        assert!(response.jobs.is_empty());
    }
}
