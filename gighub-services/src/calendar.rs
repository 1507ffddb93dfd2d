//! Calendar sync for meetings
//!
//! The HTTP implementation speaks a Google-Calendar-style events API:
//! `POST {base_url}/calendars/{calendar_id}/events` returning `{"id": ...}`.
//! When no `base_url` is configured, [`DisabledCalendar`] is used and meetings
//! are stored without a calendar event.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use gighub_common::config::{get_user_agent, CalendarConfig};
use gighub_common::db::Meeting;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Calendar API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

#[async_trait]
pub trait CalendarSync: Send + Sync {
    /// Create an event for `meeting`, returning the provider's event id
    ///
    /// `Ok(None)` means sync is disabled.
    async fn create_event(
        &self,
        meeting: &Meeting,
        attendees: &[String],
    ) -> Result<Option<String>, CalendarError>;

    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError>;
}

/// Calendar sync switched off
pub struct DisabledCalendar;

#[async_trait]
impl CalendarSync for DisabledCalendar {
    async fn create_event(
        &self,
        _meeting: &Meeting,
        _attendees: &[String],
    ) -> Result<Option<String>, CalendarError> {
        Ok(None)
    }

    async fn delete_event(&self, _event_id: &str) -> Result<(), CalendarError> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct EventTime {
    #[serde(rename = "dateTime")]
    date_time: String,
}

#[derive(Debug, Serialize)]
struct EventAttendee<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct EventBody<'a> {
    summary: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    start: EventTime,
    end: EventTime,
    attendees: Vec<EventAttendee<'a>>,
    /// Lets the meeting link back to its room
    location: String,
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    id: String,
}

pub struct HttpCalendar {
    http: reqwest::Client,
    events_url: String,
    api_token: Option<String>,
}

impl HttpCalendar {
    pub fn new(base_url: &str, config: &CalendarConfig) -> Result<Self, CalendarError> {
        let http = reqwest::Client::builder()
            .user_agent(get_user_agent())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CalendarError::Network(e.to_string()))?;

        Ok(Self {
            http,
            events_url: format!(
                "{}/calendars/{}/events",
                base_url.trim_end_matches('/'),
                config.calendar_id
            ),
            api_token: config.api_token.clone(),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn event_body<'a>(meeting: &'a Meeting, attendees: &'a [String]) -> EventBody<'a> {
    EventBody {
        summary: &meeting.title,
        description: meeting.description.as_deref(),
        start: EventTime {
            date_time: meeting.starts_at.to_rfc3339(),
        },
        end: EventTime {
            date_time: meeting.ends_at.to_rfc3339(),
        },
        attendees: attendees
            .iter()
            .map(|email| EventAttendee { email: email.as_str() })
            .collect(),
        location: format!("gighub:meeting/{}", meeting.room_id),
    }
}

#[async_trait]
impl CalendarSync for HttpCalendar {
    async fn create_event(
        &self,
        meeting: &Meeting,
        attendees: &[String],
    ) -> Result<Option<String>, CalendarError> {
        let response = self
            .authorized(self.http.post(&self.events_url))
            .json(&event_body(meeting, attendees))
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(CalendarError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreatedEvent =
            serde_json::from_str(&body).map_err(|e| CalendarError::Parse(e.to_string()))?;
        tracing::info!(room_id = %meeting.room_id, event_id = %created.id, "Calendar event created");
        Ok(Some(created.id))
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError> {
        let url = format!("{}/{}", self.events_url, event_id);
        let response = self
            .authorized(self.http.delete(&url))
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;

        let status = response.status();
        // 404/410: event already removed
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Ok(());
        }
        Err(CalendarError::Api {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

/// HTTP calendar when `base_url` is set, otherwise [`DisabledCalendar`]
pub fn from_config(config: &CalendarConfig) -> Result<Arc<dyn CalendarSync>, CalendarError> {
    match &config.base_url {
        Some(base_url) => {
            tracing::info!(base_url = %base_url, calendar_id = %config.calendar_id, "Calendar sync enabled");
            Ok(Arc::new(HttpCalendar::new(base_url, config)?))
        }
        None => {
            tracing::info!("Calendar sync disabled (no calendar.base_url)");
            Ok(Arc::new(DisabledCalendar))
        }
    }
}
