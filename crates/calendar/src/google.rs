//! Google Calendar v3 client over OAuth refresh-token credentials.
//!
//! The access token is refreshed lazily and cached until shortly before
//! expiry. Event writes are retried up to `max_retries` times; a create that
//! hits a 409 "already exists" for a client-chosen id is treated as success
//! because the deterministic id means the event is ours.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{
    CalendarSync, CalendarSyncError, EventDetails, EventDraft, EventPatch, ExternalEventId,
};

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Refresh slightly before the reported expiry to absorb clock skew.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

pub struct GoogleCalendar {
    http: reqwest::Client,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    calendar_id: String,
    token_uri: String,
    max_retries: u32,
    cached_token: RwLock<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl GoogleCalendar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
        calendar_id: String,
        token_uri: String,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self, CalendarSyncError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|error| CalendarSyncError::Http(error.to_string()))?;

        Ok(Self {
            http,
            client_id,
            client_secret,
            refresh_token,
            calendar_id,
            token_uri,
            max_retries: max_retries.max(1),
            cached_token: RwLock::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, CalendarSyncError> {
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Utc::now() {
                    return Ok(token.access_token.clone());
                }
            }
        }
        self.refresh_access_token().await
    }

    async fn refresh_access_token(&self) -> Result<String, CalendarSyncError> {
        let response = self
            .http
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("refresh_token", self.refresh_token.expose_secret()),
            ])
            .send()
            .await
            .map_err(|error| CalendarSyncError::Http(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarSyncError::Auth(format!(
                "token refresh returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|error| CalendarSyncError::Auth(error.to_string()))?;

        let expires_at = Utc::now()
            + chrono::Duration::seconds((token.expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(0));
        let access_token = token.access_token.clone();
        *self.cached_token.write().await =
            Some(CachedToken { access_token: token.access_token, expires_at });

        debug!(event_name = "calendar.google.token_refreshed", "access token refreshed");
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.cached_token.write().await = None;
    }

    fn events_url(&self) -> String {
        format!("{CALENDAR_API_BASE}/calendars/{}/events", self.calendar_id)
    }

    fn event_url(&self, event_id: &ExternalEventId) -> String {
        format!("{}/{}", self.events_url(), event_id.0)
    }
}

#[async_trait::async_trait]
impl CalendarSync for GoogleCalendar {
    async fn create_event(
        &self,
        draft: &EventDraft,
    ) -> Result<ExternalEventId, CalendarSyncError> {
        let body = draft_body(draft);
        let mut last_error =
            CalendarSyncError::Http("create_event was never attempted".to_string());

        for attempt in 0..self.max_retries {
            let token = self.access_token().await?;
            let response = self
                .http
                .post(self.events_url())
                .query(&[("sendUpdates", "all")])
                .bearer_auth(&token)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => {
                    let created: Value = response
                        .json()
                        .await
                        .map_err(|error| CalendarSyncError::Encode(error.to_string()))?;
                    let id = created
                        .get("id")
                        .and_then(Value::as_str)
                        .map(|value| ExternalEventId(value.to_string()))
                        .or_else(|| draft.event_id.clone())
                        .ok_or_else(|| {
                            CalendarSyncError::Encode(
                                "create response carried no event id".to_string(),
                            )
                        })?;
                    return Ok(id);
                }
                Ok(response) => {
                    let status = response.status();
                    let message = response.text().await.unwrap_or_default();

                    // Our deterministic id already exists: the event was
                    // created by an earlier attempt.
                    if status == StatusCode::CONFLICT {
                        if let Some(event_id) = &draft.event_id {
                            if message.to_ascii_lowercase().contains("already exists") {
                                debug!(
                                    event_name = "calendar.google.event_exists",
                                    event_id = %event_id.0,
                                    "create collided with an earlier attempt"
                                );
                                return Ok(event_id.clone());
                            }
                        }
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        self.invalidate_token().await;
                    }

                    warn!(
                        event_name = "calendar.google.create_attempt_failed",
                        attempt,
                        status = status.as_u16(),
                        "event create attempt failed"
                    );
                    last_error =
                        CalendarSyncError::Api { status: status.as_u16(), message };
                }
                Err(error) => {
                    warn!(
                        event_name = "calendar.google.create_attempt_failed",
                        attempt,
                        error = %error,
                        "event create attempt failed"
                    );
                    last_error = CalendarSyncError::Http(error.to_string());
                }
            }
        }

        Err(last_error)
    }

    async fn update_event(
        &self,
        event_id: &ExternalEventId,
        patch: &EventPatch,
    ) -> Result<(), CalendarSyncError> {
        let body = patch_body(patch);
        let mut last_error =
            CalendarSyncError::Http("update_event was never attempted".to_string());

        for attempt in 0..self.max_retries {
            let token = self.access_token().await?;
            let response = self
                .http
                .patch(self.event_url(event_id))
                .query(&[("sendUpdates", "all")])
                .bearer_auth(&token)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED {
                        self.invalidate_token().await;
                    }
                    warn!(
                        event_name = "calendar.google.update_attempt_failed",
                        attempt,
                        status = status.as_u16(),
                        event_id = %event_id.0,
                        "event update attempt failed"
                    );
                    last_error = CalendarSyncError::Api {
                        status: status.as_u16(),
                        message: response.text().await.unwrap_or_default(),
                    };
                }
                Err(error) => {
                    last_error = CalendarSyncError::Http(error.to_string());
                }
            }
        }

        Err(last_error)
    }

    async fn delete_event(&self, event_id: &ExternalEventId) -> Result<(), CalendarSyncError> {
        let mut last_error =
            CalendarSyncError::Http("delete_event was never attempted".to_string());

        for attempt in 0..self.max_retries {
            let token = self.access_token().await?;
            let response = self
                .http
                .delete(self.event_url(event_id))
                .query(&[("sendUpdates", "all")])
                .bearer_auth(&token)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => return Ok(()),
                // Already gone counts as deleted.
                Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(()),
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED {
                        self.invalidate_token().await;
                    }
                    warn!(
                        event_name = "calendar.google.delete_attempt_failed",
                        attempt,
                        status = status.as_u16(),
                        event_id = %event_id.0,
                        "event delete attempt failed"
                    );
                    last_error = CalendarSyncError::Api {
                        status: status.as_u16(),
                        message: response.text().await.unwrap_or_default(),
                    };
                }
                Err(error) => {
                    last_error = CalendarSyncError::Http(error.to_string());
                }
            }
        }

        Err(last_error)
    }

    async fn get_event(
        &self,
        event_id: &ExternalEventId,
    ) -> Result<EventDetails, CalendarSyncError> {
        let mut last_error = CalendarSyncError::Http("get_event was never attempted".to_string());

        for _attempt in 0..self.max_retries {
            let token = self.access_token().await?;
            let response =
                self.http.get(self.event_url(event_id)).bearer_auth(&token).send().await;

            match response {
                Ok(response) if response.status().is_success() => {
                    let event: Value = response
                        .json()
                        .await
                        .map_err(|error| CalendarSyncError::Encode(error.to_string()))?;
                    return Ok(details_from_value(event_id, &event));
                }
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED {
                        self.invalidate_token().await;
                    }
                    last_error = CalendarSyncError::Api {
                        status: status.as_u16(),
                        message: response.text().await.unwrap_or_default(),
                    };
                }
                Err(error) => {
                    last_error = CalendarSyncError::Http(error.to_string());
                }
            }
        }

        Err(last_error)
    }
}

fn details_from_value(event_id: &ExternalEventId, event: &Value) -> EventDetails {
    let text = |value: &Value| value.as_str().map(str::to_string);
    EventDetails {
        id: event
            .get("id")
            .and_then(Value::as_str)
            .map(|id| ExternalEventId(id.to_string()))
            .unwrap_or_else(|| event_id.clone()),
        summary: event.get("summary").and_then(text),
        start: event.pointer("/start/dateTime").and_then(text),
        end: event.pointer("/end/dateTime").and_then(text),
        status: event.get("status").and_then(text),
    }
}

fn format_local(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn draft_body(draft: &EventDraft) -> Value {
    let timezone = draft.timezone.name();
    let mut body = json!({
        "summary": draft.summary,
        "start": { "dateTime": format_local(draft.start), "timeZone": timezone },
        "end": { "dateTime": format_local(draft.end), "timeZone": timezone },
    });

    if let Some(description) = &draft.description {
        body["description"] = json!(description);
    }
    if !draft.attendees.is_empty() {
        body["attendees"] =
            Value::Array(draft.attendees.iter().map(|email| json!({ "email": email })).collect());
    }
    if let Some(event_id) = &draft.event_id {
        body["id"] = json!(event_id.0);
    }

    body
}

fn patch_body(patch: &EventPatch) -> Value {
    let mut body = json!({});
    if let Some(summary) = &patch.summary {
        body["summary"] = json!(summary);
    }
    if let Some(description) = &patch.description {
        body["description"] = json!(description);
    }

    let timezone = patch.timezone.map(|tz| tz.name().to_string());
    if let Some(start) = patch.start {
        let mut entry = json!({ "dateTime": format_local(start) });
        if let Some(timezone) = &timezone {
            entry["timeZone"] = json!(timezone);
        }
        body["start"] = entry;
    }
    if let Some(end) = patch.end {
        let mut entry = json!({ "dateTime": format_local(end) });
        if let Some(timezone) = &timezone {
            entry["timeZone"] = json!(timezone);
        }
        body["end"] = entry;
    }

    body
}
