//! Calendar test doubles: a recorder that captures every call and a no-op
//! used when mirroring is disabled.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::{
    CalendarSync, CalendarSyncError, EventDetails, EventDraft, EventPatch, ExternalEventId,
};

#[derive(Clone, Debug, PartialEq)]
pub enum CalendarCall {
    Create(EventDraft),
    Update(ExternalEventId, EventPatch),
    Delete(ExternalEventId),
    Get(ExternalEventId),
}

/// Records calls and optionally fails them all, for exercising the
/// best-effort contract.
#[derive(Default)]
pub struct RecordingCalendar {
    calls: Mutex<Vec<CalendarCall>>,
    fail: AtomicBool,
}

impl RecordingCalendar {
    pub fn failing() -> Self {
        let calendar = Self::default();
        calendar.fail.store(true, Ordering::SeqCst);
        calendar
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<CalendarCall> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: CalendarCall) -> Result<(), CalendarSyncError> {
        self.calls.lock().await.push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CalendarSyncError::Http("recording calendar set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CalendarSync for RecordingCalendar {
    async fn create_event(
        &self,
        draft: &EventDraft,
    ) -> Result<ExternalEventId, CalendarSyncError> {
        self.record(CalendarCall::Create(draft.clone())).await?;
        Ok(draft
            .event_id
            .clone()
            .unwrap_or_else(|| ExternalEventId("recorded-event".to_string())))
    }

    async fn update_event(
        &self,
        event_id: &ExternalEventId,
        patch: &EventPatch,
    ) -> Result<(), CalendarSyncError> {
        self.record(CalendarCall::Update(event_id.clone(), patch.clone())).await
    }

    async fn delete_event(&self, event_id: &ExternalEventId) -> Result<(), CalendarSyncError> {
        self.record(CalendarCall::Delete(event_id.clone())).await
    }

    async fn get_event(
        &self,
        event_id: &ExternalEventId,
    ) -> Result<EventDetails, CalendarSyncError> {
        self.record(CalendarCall::Get(event_id.clone())).await?;
        Ok(EventDetails { id: event_id.clone(), ..EventDetails::default() })
    }
}

/// Used when no calendar is configured; every call succeeds without effect.
#[derive(Default)]
pub struct NoopCalendar;

#[async_trait::async_trait]
impl CalendarSync for NoopCalendar {
    async fn create_event(
        &self,
        draft: &EventDraft,
    ) -> Result<ExternalEventId, CalendarSyncError> {
        Ok(draft.event_id.clone().unwrap_or_else(|| ExternalEventId("noop-event".to_string())))
    }

    async fn update_event(
        &self,
        _event_id: &ExternalEventId,
        _patch: &EventPatch,
    ) -> Result<(), CalendarSyncError> {
        Ok(())
    }

    async fn delete_event(&self, _event_id: &ExternalEventId) -> Result<(), CalendarSyncError> {
        Ok(())
    }

    async fn get_event(
        &self,
        event_id: &ExternalEventId,
    ) -> Result<EventDetails, CalendarSyncError> {
        Ok(EventDetails { id: event_id.clone(), ..EventDetails::default() })
    }
}
