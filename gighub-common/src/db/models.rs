//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Freelance platforms GigHub aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Platform {
    Upwork,
    Freelancer,
    Fiverr,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Upwork => "upwork",
            Platform::Freelancer => "freelancer",
            Platform::Fiverr => "fiverr",
        }
    }

    /// Fiverr has no public OAuth; accounts are linked by username
    pub fn supports_oauth(&self) -> bool {
        !matches!(self, Platform::Fiverr)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upwork" => Ok(Platform::Upwork),
            "freelancer" => Ok(Platform::Freelancer),
            "fiverr" => Ok(Platform::Fiverr),
            other => Err(format!("Unknown platform: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PlatformAccount {
    pub id: i64,
    pub user_id: i64,
    pub platform: Platform,
    pub external_id: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub status: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PlatformAccount {
    /// Token is known to be expired (or expires within `leeway_secs`)
    pub fn token_expired(&self, now: DateTime<Utc>, leeway_secs: i64) -> bool {
        self.token_expires_at
            .map(|exp| exp <= now + chrono::Duration::seconds(leeway_secs))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PlatformProject {
    pub id: i64,
    pub platform_account_id: i64,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub budget: Option<f64>,
    pub currency: Option<String>,
    pub url: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Company {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub website: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct JobPost {
    pub id: i64,
    pub company_id: i64,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub employment_type: String,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const EMPLOYMENT_TYPES: &[&str] = &["full_time", "part_time", "contract", "freelance", "internship"];
pub const JOB_STATUSES: &[&str] = &["open", "closed", "draft"];

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Candidate {
    pub id: i64,
    pub job_post_id: Option<i64>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub resume_url: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const CANDIDATE_STATUSES: &[&str] = &["new", "screening", "interview", "offer", "hired", "rejected"];

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct IpAddress {
    pub id: i64,
    pub address: String,
    pub label: Option<String>,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// AI generation state of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AiStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiStatus::Pending => "pending",
            AiStatus::Processing => "processing",
            AiStatus::Completed => "completed",
            AiStatus::Failed => "failed",
        }
    }
}

/// One generated question/answer pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faq {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Workflow {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub source_url: Option<String>,
    #[serde(skip_serializing)]
    pub template_json: Option<String>,
    pub node_count: i64,
    pub integrations: Json<Vec<String>>,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    pub blog_post: Option<String>,
    pub faqs: Json<Vec<Faq>>,
    pub ai_status: AiStatus,
    pub ai_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Template data is available for the processing job
    pub fn has_template_source(&self) -> bool {
        self.template_json.is_some() || self.source_url.is_some()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Channel {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TeamMessage {
    pub id: i64,
    pub channel_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Meeting {
    pub id: i64,
    pub room_id: String,
    pub title: String,
    pub description: Option<String>,
    pub host_id: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub calendar_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MeetingAttendee {
    pub meeting_id: i64,
    pub email: String,
    pub user_id: Option<i64>,
    pub status: String,
}
