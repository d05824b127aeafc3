use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::GoogleCalendarEvent;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use url::Url;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";
pub const DEFAULT_CALENDAR_ID: &str = "primary";

/// Remote calendar consumed by the planner.
#[async_trait]
pub trait CalendarGateway: Send + Sync {
    /// Events overlapping `[time_min, time_max]`, recurring events expanded.
    async fn list_events(
        &self,
        access_token: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError>;

    /// Creates a timed event and returns its id.
    async fn create_event(
        &self,
        access_token: &str,
        title: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<String, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestGoogleCalendarClient {
    client: Client,
    api_base: String,
    calendar_id: String,
}

impl Default for ReqwestGoogleCalendarClient {
    fn default() -> Self {
        Self::new(DEFAULT_CALENDAR_ID)
    }
}

impl ReqwestGoogleCalendarClient {
    pub fn new(calendar_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: CALENDAR_API_BASE.to_string(),
            calendar_id: calendar_id.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Calendar(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn http_error(action: &str, status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("failed to {action}: http {}", status.as_u16())
        } else {
            format!("failed to {action}: http {}; body={body}", status.as_u16())
        };
        InfraError::Calendar(message)
    }

    fn events_endpoint(&self) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|error| InfraError::Calendar(format!("invalid calendar api base url: {error}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::Calendar("calendar api base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("calendars");
            segments.push(&self.calendar_id);
            segments.push("events");
        }
        Ok(url)
    }
}

#[derive(Debug, serde::Deserialize)]
struct EventsPageResponse {
    items: Option<Vec<GoogleCalendarEvent>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[async_trait]
impl CalendarGateway for ReqwestGoogleCalendarClient {
    async fn list_events(
        &self,
        access_token: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.events_endpoint()?;
        let time_min = time_min.to_rfc3339_opts(SecondsFormat::Millis, true);
        let time_max = time_max.to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut page_token: Option<String> = None;
        let mut events = Vec::new();

        loop {
            let mut req = self
                .client
                .get(endpoint.clone())
                .bearer_auth(access_token)
                .query(&[
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                ]);
            if let Some(page_token) = page_token.as_deref() {
                req = req.query(&[("pageToken", page_token)]);
            }

            let response = req.send().await.map_err(|error| {
                InfraError::Calendar(format!("network error while listing calendar events: {error}"))
            })?;

            let status = response.status();
            let body = response.text().await.map_err(|error| {
                InfraError::Calendar(format!("failed reading events list response: {error}"))
            })?;

            if !status.is_success() {
                return Err(Self::http_error("fetch events", status, &body));
            }

            let mut parsed: EventsPageResponse = serde_json::from_str(&body).map_err(|error| {
                InfraError::Calendar(format!("invalid events list payload: {error}; body={body}"))
            })?;

            events.extend(parsed.items.take().unwrap_or_default());
            match parsed.next_page_token.take() {
                Some(next_page_token) => page_token = Some(next_page_token),
                None => break,
            }
        }

        log::debug!("listed {} calendar events", events.len());
        Ok(events)
    }

    async fn create_event(
        &self,
        access_token: &str,
        title: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<String, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(title, "event title")?;
        if end <= start {
            return Err(InfraError::Calendar("event end must be after start".to_string()));
        }

        let endpoint = self.events_endpoint()?;
        let event = GoogleCalendarEvent::new(title, start, end);
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(access_token)
            .json(&event)
            .send()
            .await
            .map_err(|error| InfraError::Calendar(format!("network error while creating event: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Calendar(format!("failed reading event create response: {error}")))?;

        if !status.is_success() {
            return Err(Self::http_error("create event", status, &body));
        }

        let parsed: GoogleCalendarEvent = serde_json::from_str(&body).map_err(|error| {
            InfraError::Calendar(format!("invalid event create payload: {error}; body={body}"))
        })?;
        parsed
            .id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| InfraError::Calendar("event create response did not include id".to_string()))
    }
}
