use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::credentials::{CredentialError, TokenSource};
use crate::store::format_rfc3339;
use crate::util::truncate;

pub const DEFAULT_CALENDAR_ID: &str = "primary";
pub const GOOGLE_CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";
const TOKEN_REVOKED_MESSAGE: &str = "Token has been expired or revoked";
const ERROR_BODY_LIMIT: usize = 240;

/// A finished work block on its way to the calendar. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub calendar_id: String,
    pub summary: String,
    /// RFC3339.
    pub start: String,
    /// RFC3339.
    pub end: String,
}

/// Reference to the event the calendar created.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InsertedEvent {
    pub id: String,
    #[serde(rename = "htmlLink", default)]
    pub html_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
    At(DateTime<FixedOffset>),
    AllDay(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcomingEvent {
    pub summary: String,
    pub start: EventTime,
    pub end: Option<EventTime>,
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar credential expired or was revoked: {0}")]
    AuthExpired(String),
    /// The access token was refused but the credential itself may still be
    /// good (for example a refresh token is cached).
    #[error("calendar API rejected the access token: {0}")]
    Unauthorized(String),
    #[error("calendar API returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("calendar request failed: {0}")]
    Transport(String),
    #[error("unexpected calendar response: {0}")]
    Decode(String),
    #[error(transparent)]
    Credential(CredentialError),
}

impl From<CredentialError> for CalendarError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Revoked(detail) => Self::AuthExpired(detail),
            other => Self::Credential(other),
        }
    }
}

/// Remote calendar operations used by clock-out and the `upcoming` listing.
pub trait CalendarClient {
    fn insert_event(&self, event: &CalendarEvent) -> Result<InsertedEvent, CalendarError>;

    fn upcoming_events(
        &self,
        calendar_id: &str,
        from: DateTime<FixedOffset>,
        max_results: u32,
    ) -> Result<Vec<UpcomingEvent>, CalendarError>;
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct EventDateTime {
    #[serde(rename = "dateTime", default, skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<String>,
}

#[derive(Serialize)]
struct EventInsertRequest<'a> {
    summary: &'a str,
    start: EventDateTime,
    end: EventDateTime,
}

impl<'a> From<&'a CalendarEvent> for EventInsertRequest<'a> {
    fn from(event: &'a CalendarEvent) -> Self {
        Self {
            summary: &event.summary,
            start: EventDateTime {
                date_time: Some(event.start.clone()),
                date: None,
            },
            end: EventDateTime {
                date_time: Some(event.end.clone()),
                date: None,
            },
        }
    }
}

#[derive(Deserialize)]
struct EventsListResponse {
    #[serde(default)]
    items: Vec<RemoteEvent>,
}

#[derive(Deserialize)]
struct RemoteEvent {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    start: Option<EventDateTime>,
    #[serde(default)]
    end: Option<EventDateTime>,
}

/// Google Calendar v3 over ureq.
pub struct GoogleCalendarClient<T> {
    agent: ureq::Agent,
    tokens: T,
    base_url: String,
}

impl<T: TokenSource> GoogleCalendarClient<T> {
    pub fn new(agent: ureq::Agent, tokens: T) -> Self {
        Self {
            agent,
            tokens,
            base_url: GOOGLE_CALENDAR_API.to_string(),
        }
    }

    pub fn tokens(&self) -> &T {
        &self.tokens
    }

    fn events_url(&self, calendar_id: &str) -> Result<Url, CalendarError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| CalendarError::Transport(format!("invalid API base URL: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| CalendarError::Transport("API base URL cannot take a path".into()))?
            .pop_if_empty()
            .extend(["calendars", calendar_id, "events"]);
        Ok(url)
    }

    fn bearer(&self) -> Result<String, CalendarError> {
        Ok(format!("Bearer {}", self.tokens.access_token()?))
    }

    /// Send a request with the current bearer token. A plain 401 drops the
    /// cached access token and retries once with a fresh one.
    fn send_authorized<F>(&self, send: F) -> Result<String, CalendarError>
    where
        F: Fn(&str) -> Result<ureq::Response, ureq::Error>,
    {
        match read_response(send(&self.bearer()?)) {
            Err(CalendarError::Unauthorized(message)) => {
                warn!(error = %message, "access token rejected; retrying with a new one");
                self.tokens.discard_access_token()?;
                read_response(send(&self.bearer()?))
            }
            other => other,
        }
    }
}

impl<T: TokenSource> CalendarClient for GoogleCalendarClient<T> {
    fn insert_event(&self, event: &CalendarEvent) -> Result<InsertedEvent, CalendarError> {
        let url = self.events_url(&event.calendar_id)?;
        let payload = serde_json::to_string(&EventInsertRequest::from(event))
            .map_err(|err| CalendarError::Decode(err.to_string()))?;
        debug!(calendar = %event.calendar_id, "inserting calendar event");

        let body = self.send_authorized(|bearer| {
            self.agent
                .post(url.as_str())
                .set("Authorization", bearer)
                .set("Content-Type", "application/json")
                .send_string(&payload)
        })?;
        serde_json::from_str(&body).map_err(|err| CalendarError::Decode(err.to_string()))
    }

    fn upcoming_events(
        &self,
        calendar_id: &str,
        from: DateTime<FixedOffset>,
        max_results: u32,
    ) -> Result<Vec<UpcomingEvent>, CalendarError> {
        let url = self.events_url(calendar_id)?;
        let body = self.send_authorized(|bearer| {
            self.agent
                .get(url.as_str())
                .set("Authorization", bearer)
                .query("timeMin", &format_rfc3339(from))
                .query("singleEvents", "true")
                .query("orderBy", "startTime")
                .query("showDeleted", "false")
                .query("maxResults", &max_results.to_string())
                .call()
        })?;
        parse_upcoming_events(&body)
    }
}

fn read_response(result: Result<ureq::Response, ureq::Error>) -> Result<String, CalendarError> {
    match result {
        Ok(response) => response
            .into_string()
            .map_err(|err| CalendarError::Decode(err.to_string())),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(classify_failure(status, &body))
        }
        Err(ureq::Error::Transport(err)) => Err(CalendarError::Transport(err.to_string())),
    }
}

/// Map a non-2xx Google response to a [`CalendarError`]. Matching on the
/// revoked-token message lives here and nowhere else. A 401 without that
/// message is only a stale access token.
pub fn classify_failure(status: u16, body: &str) -> CalendarError {
    let message = google_error_message(body).unwrap_or_else(|| truncate(body, ERROR_BODY_LIMIT));
    if message.contains(TOKEN_REVOKED_MESSAGE) || body.contains("invalid_grant") {
        CalendarError::AuthExpired(message)
    } else if status == 401 {
        CalendarError::Unauthorized(message)
    } else {
        CalendarError::Http { status, message }
    }
}

fn google_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    let message = match error {
        Value::String(code) => value
            .get("error_description")
            .and_then(Value::as_str)
            .map(|description| format!("{code}: {description}"))
            .unwrap_or_else(|| code.clone()),
        Value::Object(_) => error.get("message")?.as_str()?.to_string(),
        _ => return None,
    };
    Some(truncate(&message, ERROR_BODY_LIMIT))
}

fn parse_upcoming_events(body: &str) -> Result<Vec<UpcomingEvent>, CalendarError> {
    let parsed: EventsListResponse =
        serde_json::from_str(body).map_err(|err| CalendarError::Decode(err.to_string()))?;
    let mut events = Vec::with_capacity(parsed.items.len());
    for item in parsed.items {
        let Some(start) = item.start.as_ref().and_then(parse_event_time) else {
            debug!(summary = ?item.summary, "skipping event without a readable start");
            continue;
        };
        events.push(UpcomingEvent {
            summary: item
                .summary
                .filter(|summary| !summary.trim().is_empty())
                .unwrap_or_else(|| "(no title)".to_string()),
            start,
            end: item.end.as_ref().and_then(parse_event_time),
        });
    }
    Ok(events)
}

fn parse_event_time(value: &EventDateTime) -> Option<EventTime> {
    if let Some(raw) = value.date_time.as_deref() {
        return DateTime::parse_from_rfc3339(raw).ok().map(EventTime::At);
    }
    value
        .date
        .as_deref()
        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
        .map(EventTime::AllDay)
}
