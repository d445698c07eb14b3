use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use bookline_calendar::{
    deterministic_event_id, CalendarSync, EventDraft, EventPatch, ExternalEventId,
};
use bookline_core::availability::{compute_slots, in_window, AvailabilityInput, Slot, WindowRule};
use bookline_core::conflict::Interval;
use bookline_core::domain::appointment::{
    Appointment, AppointmentId, AppointmentStatus, BotId, OrgId, SlotChange, SlotScope,
};
use bookline_core::domain::policy::BookingPolicy;
use bookline_core::domain::resource::{Resource, ResourceId};
use bookline_core::errors::BookingError;
use bookline_db::repositories::{
    AppointmentRepository, CapacityOutcome, PolicyRepository, RepositoryError,
    ResourceRepository, ScheduleRepository,
};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct CreateBookingRequest {
    pub org_id: OrgId,
    pub bot_id: BotId,
    pub resource_id: Option<ResourceId>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub form_data: Value,
    pub notes: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RescheduleRequest {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub resource_id: Option<ResourceId>,
    pub form_data: Option<Value>,
}

/// A booking mutation plus the outcome of the calendar mirror. The mirror
/// is best effort: `calendar_warning` carries the failure instead of the
/// operation failing.
#[derive(Clone, Debug)]
pub struct BookingReceipt {
    pub appointment: Appointment,
    pub calendar_synced: bool,
    pub calendar_warning: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CancellationReceipt {
    pub appointment: Appointment,
    pub calendar_synced: bool,
    pub calendar_warning: Option<String>,
}

pub struct BookingService {
    resources: Arc<dyn ResourceRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    policies: Arc<dyn PolicyRepository>,
    appointments: Arc<dyn AppointmentRepository>,
    calendar: Arc<dyn CalendarSync>,
    clock: Clock,
}

impl BookingService {
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        policies: Arc<dyn PolicyRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        calendar: Arc<dyn CalendarSync>,
    ) -> Self {
        Self { resources, schedules, policies, appointments, calendar, clock: Arc::new(Utc::now) }
    }

    /// Test constructor with an injected clock.
    pub fn with_clock(
        resources: Arc<dyn ResourceRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        policies: Arc<dyn PolicyRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        calendar: Arc<dyn CalendarSync>,
        clock: Clock,
    ) -> Self {
        Self { resources, schedules, policies, appointments, calendar, clock }
    }

    pub async fn get_booking(&self, id: &AppointmentId) -> Result<Appointment, BookingError> {
        self.appointments
            .find_by_id(id)
            .await
            .map_err(storage)?
            .ok_or_else(|| BookingError::not_found("appointment", &id.0))
    }

    /// Admin listing of a bot's bookings, optionally narrowed to one status
    /// and/or one local date.
    pub async fn list_bookings(
        &self,
        bot_id: &BotId,
        status: Option<AppointmentStatus>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, BookingError> {
        self.appointments.list_for_bot(bot_id, status, date).await.map_err(storage)
    }

    /// Open slots for one local date, for either a resource or the bot's
    /// generic (resource-less) calendar.
    pub async fn compute_available_slots(
        &self,
        bot_id: &BotId,
        resource_id: Option<&ResourceId>,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, BookingError> {
        let policy = self.policy_for(bot_id).await?;
        let context = self.slot_context(bot_id, resource_id, &policy).await?;

        let existing = self
            .appointments
            .list_active_for_date(&context.scope, date)
            .await
            .map_err(storage)?;
        let intervals: Vec<Interval> = existing.iter().map(Appointment::interval).collect();
        let extra_occupied = BTreeMap::new();

        let input = AvailabilityInput {
            range_start: date.and_time(NaiveTime::MIN),
            range_end: date
                .succ_opt()
                .ok_or_else(|| BookingError::Validation("date out of range".to_string()))?
                .and_time(NaiveTime::MIN),
            slot_minutes: context.slot_minutes(date, &policy),
            capacity: context.capacity,
            timezone: policy.timezone,
            windows: &context.windows,
            existing: &intervals,
            extra_occupied: &extra_occupied,
            min_notice_minutes: Some(policy.min_notice_minutes),
            max_future_days: policy.max_future_days,
        };

        Ok(compute_slots(&input, (self.clock)()))
    }

    pub async fn create_booking(
        &self,
        request: CreateBookingRequest,
    ) -> Result<BookingReceipt, BookingError> {
        if request.customer_name.trim().is_empty() {
            return Err(BookingError::Validation("customer name is required".to_string()));
        }
        if request.customer_email.trim().is_empty() {
            return Err(BookingError::Validation("customer email is required".to_string()));
        }

        let policy = self.policy_for(&request.bot_id).await?;

        let missing = policy.missing_required_fields(&request.form_data);
        if !missing.is_empty() {
            return Err(BookingError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let context =
            self.slot_context(&request.bot_id, request.resource_id.as_ref(), &policy).await?;

        let now = (self.clock)();
        let start = request.date.and_time(request.start_time);
        let end = start + Duration::minutes(i64::from(context.slot_minutes(request.date, &policy)));
        self.check_slot_bookable(start, now, &policy, &context)?;

        let duplicate = self
            .appointments
            .find_confirmed_for_customer(
                &request.bot_id,
                request.customer_email.trim(),
                request.date,
                request.start_time,
            )
            .await
            .map_err(storage)?;
        if duplicate.is_some() {
            return Err(BookingError::DuplicateBooking);
        }

        let mut appointment = Appointment {
            id: AppointmentId(Uuid::new_v4().to_string()),
            org_id: request.org_id,
            bot_id: request.bot_id,
            resource_id: context.resource.as_ref().map(|resource| resource.id.clone()),
            resource_name: context.resource.as_ref().map(|resource| resource.name.clone()),
            customer_name: request.customer_name.trim().to_string(),
            customer_email: request.customer_email.trim().to_string(),
            customer_phone: request.customer_phone,
            date: request.date,
            start_time: request.start_time,
            end_time: end.time(),
            form_data: request.form_data,
            notes: request.notes,
            status: AppointmentStatus::Confirmed,
            calendar_event_id: None,
            created_at: now,
            confirmed_at: Some(now),
            cancelled_at: None,
            updated_at: now,
        };

        let outcome = self
            .appointments
            .insert_within_capacity(&appointment, &context.scope, context.capacity)
            .await
            .map_err(storage)?;
        if outcome == CapacityOutcome::Exhausted {
            return Err(BookingError::SlotUnavailable(
                "the requested slot is fully booked".to_string(),
            ));
        }

        info!(
            event_name = "booking.created",
            appointment_id = %appointment.id.0,
            bot_id = %appointment.bot_id.0,
            date = %appointment.date,
            start = %appointment.start_time,
            "booking created"
        );

        let (synced, warning) = self.mirror_create(&mut appointment, &policy, now).await;
        Ok(BookingReceipt { appointment, calendar_synced: synced, calendar_warning: warning })
    }

    pub async fn reschedule_booking(
        &self,
        id: &AppointmentId,
        request: RescheduleRequest,
    ) -> Result<BookingReceipt, BookingError> {
        let mut appointment = self.get_booking(id).await?;
        let policy = self.policy_for(&appointment.bot_id).await?;
        let now = (self.clock)();

        self.retire_if_past_due(&mut appointment, &policy, now).await?;
        if appointment.status != AppointmentStatus::Confirmed
            && appointment.status != AppointmentStatus::Pending
        {
            return Err(BookingError::InvalidState { status: appointment.status });
        }

        let resource_id =
            request.resource_id.as_ref().or(appointment.resource_id.as_ref()).cloned();
        let context =
            self.slot_context(&appointment.bot_id, resource_id.as_ref(), &policy).await?;

        let start = request.date.and_time(request.start_time);
        let end = start + Duration::minutes(i64::from(context.slot_minutes(request.date, &policy)));
        self.check_slot_bookable(start, now, &policy, &context)?;

        let change = SlotChange {
            date: request.date,
            start_time: request.start_time,
            end_time: end.time(),
            resource_id: context.resource.as_ref().map(|resource| resource.id.clone()),
            resource_name: context.resource.as_ref().map(|resource| resource.name.clone()),
            form_data: request.form_data,
        };

        let outcome = self
            .appointments
            .reschedule_within_capacity(id, &change, &context.scope, context.capacity, now)
            .await
            .map_err(storage)?;
        if outcome == CapacityOutcome::Exhausted {
            return Err(BookingError::SlotUnavailable(
                "the requested slot is fully booked".to_string(),
            ));
        }

        appointment.date = change.date;
        appointment.start_time = change.start_time;
        appointment.end_time = change.end_time;
        appointment.resource_id = change.resource_id.clone();
        appointment.resource_name = change.resource_name.clone();
        if let Some(form_data) = change.form_data {
            appointment.form_data = form_data;
        }
        appointment.updated_at = now;

        info!(
            event_name = "booking.rescheduled",
            appointment_id = %appointment.id.0,
            date = %appointment.date,
            start = %appointment.start_time,
            "booking rescheduled"
        );

        let (synced, warning) = self.mirror_reschedule(&mut appointment, &policy, now).await;
        Ok(BookingReceipt { appointment, calendar_synced: synced, calendar_warning: warning })
    }

    pub async fn cancel_booking(
        &self,
        id: &AppointmentId,
    ) -> Result<CancellationReceipt, BookingError> {
        let mut appointment = self.get_booking(id).await?;
        let policy = self.policy_for(&appointment.bot_id).await?;
        let now = (self.clock)();

        self.retire_if_past_due(&mut appointment, &policy, now).await?;
        if !appointment.can_transition_to(AppointmentStatus::Cancelled) {
            return Err(BookingError::InvalidState { status: appointment.status });
        }

        self.appointments
            .update_status(id, AppointmentStatus::Cancelled, now)
            .await
            .map_err(storage)?;
        appointment.status = AppointmentStatus::Cancelled;
        appointment.cancelled_at = Some(now);
        appointment.updated_at = now;

        info!(
            event_name = "booking.cancelled",
            appointment_id = %appointment.id.0,
            "booking cancelled"
        );

        let (synced, warning) = match &appointment.calendar_event_id {
            Some(event_id) => {
                match self.calendar.delete_event(&ExternalEventId(event_id.clone())).await {
                    Ok(()) => (true, None),
                    Err(error) => {
                        warn!(
                            event_name = "booking.calendar_sync_failed",
                            appointment_id = %appointment.id.0,
                            error = %error,
                            "calendar delete failed"
                        );
                        (false, Some(error.to_string()))
                    }
                }
            }
            None => (false, None),
        };

        Ok(CancellationReceipt {
            appointment,
            calendar_synced: synced,
            calendar_warning: warning,
        })
    }

    async fn policy_for(&self, bot_id: &BotId) -> Result<BookingPolicy, BookingError> {
        if let Some(policy) = self.policies.find_for_bot(bot_id).await.map_err(storage)? {
            return Ok(policy);
        }

        // First booking-related request for this bot: persist defaults.
        let policy = BookingPolicy::defaults(OrgId(bot_id.0.clone()), bot_id.clone());
        self.policies.save(policy.clone()).await.map_err(storage)?;
        Ok(policy)
    }

    async fn slot_context(
        &self,
        bot_id: &BotId,
        resource_id: Option<&ResourceId>,
        policy: &BookingPolicy,
    ) -> Result<SlotContext, BookingError> {
        match resource_id {
            Some(resource_id) => {
                let resource = self
                    .resources
                    .find_by_id(resource_id)
                    .await
                    .map_err(storage)?
                    .filter(|resource| resource.bot_id == *bot_id)
                    .ok_or_else(|| BookingError::not_found("resource", &resource_id.0))?;
                if !resource.active {
                    return Err(BookingError::Validation(format!(
                        "resource `{}` is not accepting bookings",
                        resource.name
                    )));
                }

                let schedule_windows =
                    self.schedules.list_for_resource(resource_id).await.map_err(storage)?;
                let windows =
                    schedule_windows.iter().map(WindowRule::from_schedule).collect();
                let schedule_slot_minutes = schedule_windows
                    .iter()
                    .map(|window| (WindowRule::from_schedule(window), window.slot_minutes))
                    .collect();

                Ok(SlotContext {
                    scope: SlotScope::Resource(resource.id.clone()),
                    capacity: resource.capacity_per_slot,
                    schedule_slot_minutes,
                    windows,
                    resource: Some(resource),
                })
            }
            None => {
                // Bot-level bookings are only valid when the bot has no
                // bookable resources; otherwise the caller must pick one.
                let active = self.resources.list_for_bot(bot_id, true).await.map_err(storage)?;
                if !active.is_empty() {
                    return Err(BookingError::Validation(
                        "this bot requires choosing a resource".to_string(),
                    ));
                }

                Ok(SlotContext {
                    scope: SlotScope::Bot(bot_id.clone()),
                    capacity: policy.capacity_per_slot,
                    schedule_slot_minutes: Vec::new(),
                    windows: policy.windows.iter().map(WindowRule::from_policy).collect(),
                    resource: None,
                })
            }
        }
    }

    fn check_slot_bookable(
        &self,
        start: chrono::NaiveDateTime,
        now: DateTime<Utc>,
        policy: &BookingPolicy,
        context: &SlotContext,
    ) -> Result<(), BookingError> {
        let now_local = now.with_timezone(&policy.timezone).naive_local();
        if start < now_local {
            return Err(BookingError::PastSlot);
        }

        let earliest = now_local + Duration::minutes(i64::from(policy.min_notice_minutes));
        if start < earliest {
            return Err(BookingError::SlotUnavailable(format!(
                "bookings require at least {} minutes notice",
                policy.min_notice_minutes
            )));
        }

        if let Some(days) = policy.max_future_days {
            if start > now_local + Duration::days(i64::from(days)) {
                return Err(BookingError::SlotUnavailable(format!(
                    "bookings are only accepted up to {days} days ahead"
                )));
            }
        }

        if !in_window(&context.windows, start) {
            return Err(BookingError::SlotUnavailable(
                "the requested time is outside business hours".to_string(),
            ));
        }

        Ok(())
    }

    /// Confirmed appointments whose end has passed are retired to completed
    /// before lifecycle checks, so stale rows reject mutation with the
    /// accurate state.
    async fn retire_if_past_due(
        &self,
        appointment: &mut Appointment,
        policy: &BookingPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        let now_local = now.with_timezone(&policy.timezone).naive_local();
        if appointment.status == AppointmentStatus::Confirmed && appointment.past_due(now_local) {
            self.appointments
                .update_status(&appointment.id, AppointmentStatus::Completed, now)
                .await
                .map_err(storage)?;
            appointment.status = AppointmentStatus::Completed;
            appointment.updated_at = now;
        }
        Ok(())
    }

    async fn mirror_create(
        &self,
        appointment: &mut Appointment,
        policy: &BookingPolicy,
        now: DateTime<Utc>,
    ) -> (bool, Option<String>) {
        let event_id = deterministic_event_id(
            &appointment.bot_id.0,
            &appointment.customer_email,
            appointment.date,
            appointment.start_time,
        );
        let draft = EventDraft {
            summary: event_summary(appointment),
            description: appointment.notes.clone(),
            start: appointment.date.and_time(appointment.start_time),
            end: appointment.date.and_time(appointment.end_time),
            timezone: policy.timezone,
            attendees: vec![appointment.customer_email.clone()],
            event_id: Some(event_id),
        };

        match self.calendar.create_event(&draft).await {
            Ok(created) => {
                if let Err(error) = self
                    .appointments
                    .set_calendar_event(&appointment.id, Some(&created.0), now)
                    .await
                {
                    warn!(
                        event_name = "booking.calendar_sync_failed",
                        appointment_id = %appointment.id.0,
                        error = %error,
                        "could not persist calendar event id"
                    );
                    return (false, Some(error.to_string()));
                }
                appointment.calendar_event_id = Some(created.0);
                (true, None)
            }
            Err(error) => {
                warn!(
                    event_name = "booking.calendar_sync_failed",
                    appointment_id = %appointment.id.0,
                    error = %error,
                    "calendar create failed"
                );
                (false, Some(error.to_string()))
            }
        }
    }

    async fn mirror_reschedule(
        &self,
        appointment: &mut Appointment,
        policy: &BookingPolicy,
        now: DateTime<Utc>,
    ) -> (bool, Option<String>) {
        match appointment.calendar_event_id.clone() {
            Some(event_id) => {
                let patch = EventPatch {
                    summary: Some(event_summary(appointment)),
                    description: None,
                    start: Some(appointment.date.and_time(appointment.start_time)),
                    end: Some(appointment.date.and_time(appointment.end_time)),
                    timezone: Some(policy.timezone),
                };
                match self.calendar.update_event(&ExternalEventId(event_id), &patch).await {
                    Ok(()) => (true, None),
                    Err(error) => {
                        warn!(
                            event_name = "booking.calendar_sync_failed",
                            appointment_id = %appointment.id.0,
                            error = %error,
                            "calendar update failed"
                        );
                        (false, Some(error.to_string()))
                    }
                }
            }
            None => self.mirror_create(appointment, policy, now).await,
        }
    }
}

struct SlotContext {
    scope: SlotScope,
    capacity: u32,
    windows: Vec<WindowRule>,
    schedule_slot_minutes: Vec<(WindowRule, u32)>,
    resource: Option<Resource>,
}

impl SlotContext {
    /// Slot length for one date: the first applicable schedule window's
    /// duration, falling back to the policy default.
    fn slot_minutes(&self, date: NaiveDate, policy: &BookingPolicy) -> u32 {
        self.schedule_slot_minutes
            .iter()
            .find(|(window, _)| window_applies(window, date))
            .map(|(_, minutes)| *minutes)
            .unwrap_or(policy.slot_minutes)
    }
}

fn window_applies(window: &WindowRule, date: NaiveDate) -> bool {
    match window {
        WindowRule::Weekly { weekday, available, .. } => {
            *available && *weekday == chrono::Datelike::weekday(&date)
        }
        WindowRule::Date { date: d, available, .. } => *available && *d == date,
    }
}

fn event_summary(appointment: &Appointment) -> String {
    match &appointment.resource_name {
        Some(resource_name) => {
            format!("Appointment with {resource_name} - {}", appointment.customer_name)
        }
        None => format!("Appointment - {}", appointment.customer_name),
    }
}

fn storage(error: RepositoryError) -> BookingError {
    BookingError::Storage(error.to_string())
}
