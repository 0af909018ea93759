//! Google Calendar client for the user's primary calendar.

use campusdesk_core::EventTime;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::outcome::Listing;
use crate::rest::{Page, RestClient};
use crate::transport::{HttpRequest, Method};

const CALENDAR_ID: &str = "primary";
const PAGE_SIZE: &str = "250";

/// An event on the primary calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
}

impl CalendarEvent {
    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day()
    }
}

/// Fields for creating or replacing an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub attendees: Vec<String>,
}

impl EventDraft {
    pub fn new(summary: impl Into<String>, start: EventTime, end: EventTime) -> Self {
        Self {
            summary: summary.into(),
            description: None,
            location: None,
            start,
            end,
            attendees: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_attendee(mut self, email: impl Into<String>) -> Self {
        self.attendees.push(email.into());
        self
    }

    /// The end must be strictly after the start. Everything else is left to
    /// Calendar.
    pub fn validate(&self) -> ApiResult<()> {
        if self.end.to_utc_datetime() <= self.start.to_utc_datetime() {
            return Err(ApiError::validation("event end must be after its start"));
        }
        Ok(())
    }

    fn to_api(&self) -> serde_json::Value {
        let mut body = json!({
            "summary": self.summary,
            "start": time_to_api(&self.start),
            "end": time_to_api(&self.end),
        });
        if let Some(description) = &self.description {
            body["description"] = json!(description);
        }
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }
        if !self.attendees.is_empty() {
            body["attendees"] = self
                .attendees
                .iter()
                .map(|email| json!({"email": email}))
                .collect();
        }
        body
    }
}

fn time_to_api(time: &EventTime) -> serde_json::Value {
    match time {
        EventTime::DateTime(dt) => json!({"dateTime": dt.to_rfc3339()}),
        EventTime::AllDay(date) => json!({"date": date.format("%Y-%m-%d").to_string()}),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventPage {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
}

impl Page for EventPage {
    type Item = ApiEvent;

    fn into_parts(self) -> (Vec<ApiEvent>, Option<String>) {
        (self.items, self.next_page_token)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    #[serde(default)]
    start: ApiEventTime,
    #[serde(default)]
    end: ApiEventTime,
    html_link: Option<String>,
    status: Option<String>,
    #[serde(default)]
    attendees: Vec<ApiAttendee>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiAttendee {
    email: Option<String>,
}

impl ApiEventTime {
    fn parse(&self) -> Result<EventTime, String> {
        match (&self.date_time, &self.date) {
            (Some(dt), _) => DateTime::parse_from_rfc3339(dt)
                .map(EventTime::from_local)
                .map_err(|e| format!("bad dateTime '{dt}': {e}")),
            (None, Some(date)) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map(EventTime::from_date)
                .map_err(|e| format!("bad date '{date}': {e}")),
            (None, None) => Err("missing time".to_string()),
        }
    }
}

impl ApiEvent {
    fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }

    fn into_event(self) -> Result<CalendarEvent, String> {
        let id = self.id.ok_or("missing id")?;
        let start = self.start.parse().map_err(|e| format!("start: {e}"))?;
        let end = self.end.parse().map_err(|e| format!("end: {e}"))?;
        Ok(CalendarEvent {
            id,
            summary: self.summary.unwrap_or_default(),
            description: self.description,
            location: self.location,
            start,
            end,
            html_link: self.html_link,
            attendees: self.attendees.into_iter().filter_map(|a| a.email).collect(),
        })
    }
}

/// Calendar operations for the signed-in user.
#[derive(Debug, Clone)]
pub struct CalendarClient {
    rest: RestClient,
}

impl CalendarClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// A copy whose calls stop at `cancel`.
    pub fn scoped(&self, cancel: CancellationToken) -> Self {
        Self::new(self.rest.scoped(cancel))
    }

    pub(crate) fn rest(&self) -> &RestClient {
        &self.rest
    }

    fn events_url(&self) -> String {
        self.rest
            .endpoint(&format!("calendars/{CALENDAR_ID}/events"))
    }

    fn event_url(&self, id: &str) -> String {
        format!("{}/{}", self.events_url(), urlencoding::encode(id))
    }

    /// Events overlapping `[time_min, time_max)`, recurring events expanded,
    /// ordered by start. Cancelled instances are skipped; events that cannot
    /// be parsed are counted in `dropped`.
    pub async fn list_events(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> ApiResult<Listing<CalendarEvent>> {
        let url = self.events_url();
        let raw = self
            .rest
            .collect_pages::<EventPage, _>(|token| {
                HttpRequest::get(&url)
                    .query("timeMin", time_min.to_rfc3339())
                    .query("timeMax", time_max.to_rfc3339())
                    .query("singleEvents", "true")
                    .query("orderBy", "startTime")
                    .query("maxResults", PAGE_SIZE)
                    .query_opt("pageToken", token)
            })
            .await?;

        let mut events = Vec::with_capacity(raw.len());
        let mut dropped = 0;
        for event in raw.into_iter().filter(|e| !e.is_cancelled()) {
            match event.into_event() {
                Ok(event) => events.push(event),
                Err(reason) => {
                    warn!("skipping event: {reason}");
                    dropped += 1;
                }
            }
        }
        debug!(count = events.len(), dropped, "listed events");
        Ok(Listing::new(events, dropped))
    }

    pub async fn create_event(&self, draft: &EventDraft) -> ApiResult<CalendarEvent> {
        self.write_event(Method::Post, self.events_url(), draft).await
    }

    /// Replaces every field of event `id` with `draft`.
    pub async fn update_event(&self, id: &str, draft: &EventDraft) -> ApiResult<CalendarEvent> {
        self.write_event(Method::Put, self.event_url(id), draft).await
    }

    pub async fn delete_event(&self, id: &str) -> ApiResult<()> {
        self.rest
            .execute(HttpRequest::new(Method::Delete, self.event_url(id)))
            .await
    }

    async fn write_event(
        &self,
        method: Method,
        url: String,
        draft: &EventDraft,
    ) -> ApiResult<CalendarEvent> {
        draft
            .validate()
            .map_err(|e| e.with_provider(self.rest.provider()))?;
        let request = HttpRequest::new(method, url).json(draft.to_api());
        let saved: ApiEvent = self.rest.fetch(request).await?;
        saved.into_event().map_err(|reason| {
            ApiError::decode(format!("saved event could not be read: {reason}"))
                .with_provider(self.rest.provider())
        })
    }
}
