//! OAuth 2.0 authorization-code plumbing shared by the platform clients

use chrono::{Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use gighub_common::config::{get_user_agent, OAuthClientConfig};

use super::{OAuthToken, PlatformError};

/// How the access token is presented on API calls
#[derive(Debug, Clone, Copy)]
pub enum TokenHeader {
    Bearer,
    /// Provider-specific header carrying the raw token
    Named(&'static str),
}

/// Provider defaults, overridable per endpoint from config
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
}

impl Endpoints {
    pub fn resolve(defaults: (&str, &str, &str), config: &OAuthClientConfig) -> Self {
        Self {
            authorize_url: config
                .authorize_url
                .clone()
                .unwrap_or_else(|| defaults.0.to_string()),
            token_url: config.token_url.clone().unwrap_or_else(|| defaults.1.to_string()),
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| defaults.2.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl From<TokenResponse> for OAuthToken {
    fn from(r: TokenResponse) -> Self {
        OAuthToken {
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            expires_at: r.expires_in.map(|s| Utc::now() + ChronoDuration::seconds(s)),
        }
    }
}

/// reqwest client bound to one provider's OAuth registration
pub struct OAuthHttp {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    redirect_uri: String,
    token_header: TokenHeader,
    pub endpoints: Endpoints,
}

impl OAuthHttp {
    pub fn new(
        config: &OAuthClientConfig,
        endpoints: Endpoints,
        redirect_uri: String,
        token_header: TokenHeader,
    ) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .user_agent(get_user_agent())
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: config.scopes.clone(),
            redirect_uri,
            token_header,
            endpoints,
        })
    }

    pub fn authorize_url(&self, state: &str) -> Result<String, PlatformError> {
        let mut url = Url::parse(&self.endpoints.authorize_url)
            .map_err(|e| PlatformError::Parse(format!("authorize_url: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("state", state);
            if !self.scopes.is_empty() {
                query.append_pair("scope", &self.scopes.join(" "));
            }
        }
        Ok(url.into())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<OAuthToken, PlatformError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<OAuthToken, PlatformError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<OAuthToken, PlatformError> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        form.push(("client_secret", self.client_secret.as_str()));

        let response = self
            .http
            .post(&self.endpoints.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        let token: TokenResponse = read_json(response).await?;
        Ok(token.into())
    }

    /// GET `{api_base}{path}` with the access token
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        access_token: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        let url = format!("{}{}", self.endpoints.api_base, path);
        tracing::debug!(url = %url, "Platform API request");

        let request = self.http.get(&url).query(query);
        let request = match self.token_header {
            TokenHeader::Bearer => request.bearer_auth(access_token),
            TokenHeader::Named(name) => request.header(name, access_token),
        };

        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.to_string()))?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, PlatformError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(PlatformError::Unauthorized);
    }

    let body = response
        .text()
        .await
        .map_err(|e| PlatformError::Network(e.to_string()))?;

    if !status.is_success() {
        return Err(PlatformError::Api {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| PlatformError::Parse(e.to_string()))
}
