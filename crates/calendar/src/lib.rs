//! Calendar mirroring boundary.
//!
//! Bookings are mirrored into an external calendar on a best-effort basis:
//! the booking flow never fails because the mirror did. This crate defines
//! the [`CalendarSync`] trait, the Google Calendar implementation behind it,
//! and test doubles for service-level tests.
//!
//! Event ids are derived deterministically from the booking identity so a
//! retried create collides with its own earlier attempt instead of
//! duplicating the event.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod google;
pub mod testing;

pub use google::GoogleCalendar;
pub use testing::{CalendarCall, NoopCalendar, RecordingCalendar};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExternalEventId(pub String);

#[derive(Clone, Debug, PartialEq)]
pub struct EventDraft {
    pub summary: String,
    pub description: Option<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub timezone: Tz,
    pub attendees: Vec<String>,
    /// Client-chosen id; `None` lets the provider assign one.
    pub event_id: Option<ExternalEventId>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventPatch {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub timezone: Option<Tz>,
}

/// Provider-side view of an event, as reported by the remote calendar.
/// Times are the provider's ISO strings; callers only compare them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventDetails {
    pub id: ExternalEventId,
    pub summary: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Error)]
pub enum CalendarSyncError {
    #[error("calendar auth failed: {0}")]
    Auth(String),
    #[error("calendar request failed: {0}")]
    Http(String),
    #[error("calendar api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("calendar payload error: {0}")]
    Encode(String),
}

#[async_trait]
pub trait CalendarSync: Send + Sync {
    async fn create_event(
        &self,
        draft: &EventDraft,
    ) -> Result<ExternalEventId, CalendarSyncError>;

    async fn update_event(
        &self,
        event_id: &ExternalEventId,
        patch: &EventPatch,
    ) -> Result<(), CalendarSyncError>;

    async fn delete_event(&self, event_id: &ExternalEventId) -> Result<(), CalendarSyncError>;

    async fn get_event(
        &self,
        event_id: &ExternalEventId,
    ) -> Result<EventDetails, CalendarSyncError>;
}

/// Stable event id for one booking slot. Google accepts ids matching
/// `[a-v0-9]{5,1024}`; a truncated sha-256 hex digest stays inside that
/// alphabet.
pub fn deterministic_event_id(
    bot_id: &str,
    customer_email: &str,
    date: NaiveDate,
    start_time: NaiveTime,
) -> ExternalEventId {
    let mut hasher = Sha256::new();
    hasher.update(bot_id.as_bytes());
    hasher.update(b"|");
    hasher.update(customer_email.to_ascii_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(start_time.format("%H:%M:%S").to_string().as_bytes());

    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    ExternalEventId(hex[..32].to_string())
}
