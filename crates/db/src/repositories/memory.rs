//! In-memory repository fakes for service-level tests. Capacity semantics
//! mirror the SQL implementations via the shared conflict predicates.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio::sync::RwLock;

use bookline_core::conflict::{overlap_count, Interval};
use bookline_core::domain::appointment::{
    Appointment, AppointmentId, AppointmentStatus, BotId, SlotChange, SlotScope,
};
use bookline_core::domain::policy::BookingPolicy;
use bookline_core::domain::resource::{Resource, ResourceId};
use bookline_core::domain::schedule::{ScheduleId, ScheduleWindow};

use super::{
    local_datetime, AppointmentRepository, CapacityOutcome, PolicyRepository, RepositoryError,
    ResourceRepository, ScheduleRepository,
};

#[derive(Default)]
pub struct InMemoryResourceRepository {
    resources: RwLock<HashMap<String, Resource>>,
}

#[async_trait::async_trait]
impl ResourceRepository for InMemoryResourceRepository {
    async fn find_by_id(&self, id: &ResourceId) -> Result<Option<Resource>, RepositoryError> {
        let resources = self.resources.read().await;
        Ok(resources.get(&id.0).cloned())
    }

    async fn list_for_bot(
        &self,
        bot_id: &BotId,
        only_active: bool,
    ) -> Result<Vec<Resource>, RepositoryError> {
        let resources = self.resources.read().await;
        let mut listed: Vec<Resource> = resources
            .values()
            .filter(|resource| resource.bot_id == *bot_id && (!only_active || resource.active))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    async fn save(&self, resource: Resource) -> Result<(), RepositoryError> {
        let mut resources = self.resources.write().await;
        resources.insert(resource.id.0.clone(), resource);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryScheduleRepository {
    windows: RwLock<HashMap<String, ScheduleWindow>>,
}

#[async_trait::async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn list_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Vec<ScheduleWindow>, RepositoryError> {
        let windows = self.windows.read().await;
        let mut listed: Vec<ScheduleWindow> = windows
            .values()
            .filter(|window| window.resource_id == *resource_id)
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(listed)
    }

    async fn save(&self, window: ScheduleWindow) -> Result<(), RepositoryError> {
        let mut windows = self.windows.write().await;
        windows.insert(window.id.0.clone(), window);
        Ok(())
    }

    async fn delete(&self, id: &ScheduleId) -> Result<bool, RepositoryError> {
        let mut windows = self.windows.write().await;
        Ok(windows.remove(&id.0).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryPolicyRepository {
    policies: RwLock<HashMap<String, BookingPolicy>>,
}

#[async_trait::async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn find_for_bot(
        &self,
        bot_id: &BotId,
    ) -> Result<Option<BookingPolicy>, RepositoryError> {
        let policies = self.policies.read().await;
        Ok(policies.get(&bot_id.0).cloned())
    }

    async fn save(&self, policy: BookingPolicy) -> Result<(), RepositoryError> {
        let mut policies = self.policies.write().await;
        policies.insert(policy.bot_id.0.clone(), policy);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<BookingPolicy>, RepositoryError> {
        let policies = self.policies.read().await;
        let mut listed: Vec<BookingPolicy> = policies.values().cloned().collect();
        listed.sort_by(|a, b| a.bot_id.0.cmp(&b.bot_id.0));
        Ok(listed)
    }
}

#[derive(Default)]
pub struct InMemoryAppointmentRepository {
    appointments: RwLock<HashMap<String, Appointment>>,
}

impl InMemoryAppointmentRepository {
    fn occupied_count(
        appointments: &HashMap<String, Appointment>,
        scope: &SlotScope,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        exclude: Option<&AppointmentId>,
    ) -> u32 {
        let candidate = Interval::new(local_datetime(date, start_time), local_datetime(date, end_time));
        let existing: Vec<Interval> = appointments
            .values()
            .filter(|appointment| appointment.status.occupies_slot())
            .filter(|appointment| appointment.date == date)
            .filter(|appointment| in_scope(appointment, scope))
            .filter(|appointment| exclude.map_or(true, |id| appointment.id != *id))
            .map(Appointment::interval)
            .collect();
        overlap_count(&existing, &candidate)
    }
}

fn in_scope(appointment: &Appointment, scope: &SlotScope) -> bool {
    match scope {
        SlotScope::Resource(resource_id) => {
            appointment.resource_id.as_ref() == Some(resource_id)
        }
        SlotScope::Bot(bot_id) => {
            appointment.bot_id == *bot_id && appointment.resource_id.is_none()
        }
    }
}

#[async_trait::async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn find_by_id(
        &self,
        id: &AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let appointments = self.appointments.read().await;
        Ok(appointments.get(&id.0).cloned())
    }

    async fn list_active_for_date(
        &self,
        scope: &SlotScope,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let appointments = self.appointments.read().await;
        let mut listed: Vec<Appointment> = appointments
            .values()
            .filter(|appointment| appointment.status.occupies_slot())
            .filter(|appointment| appointment.date == date)
            .filter(|appointment| in_scope(appointment, scope))
            .cloned()
            .collect();
        listed.sort_by_key(|appointment| appointment.start_time);
        Ok(listed)
    }

    async fn list_for_bot(
        &self,
        bot_id: &BotId,
        status: Option<AppointmentStatus>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let appointments = self.appointments.read().await;
        let mut listed: Vec<Appointment> = appointments
            .values()
            .filter(|appointment| appointment.bot_id == *bot_id)
            .filter(|appointment| status.map_or(true, |wanted| appointment.status == wanted))
            .filter(|appointment| date.map_or(true, |wanted| appointment.date == wanted))
            .cloned()
            .collect();
        listed.sort_by_key(|appointment| (appointment.date, appointment.start_time));
        Ok(listed)
    }

    async fn find_confirmed_for_customer(
        &self,
        bot_id: &BotId,
        customer_email: &str,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let appointments = self.appointments.read().await;
        Ok(appointments
            .values()
            .find(|appointment| {
                appointment.bot_id == *bot_id
                    && appointment.customer_email == customer_email
                    && appointment.date == date
                    && appointment.start_time == start_time
                    && appointment.status == AppointmentStatus::Confirmed
            })
            .cloned())
    }

    async fn insert_within_capacity(
        &self,
        appointment: &Appointment,
        scope: &SlotScope,
        capacity: u32,
    ) -> Result<CapacityOutcome, RepositoryError> {
        let mut appointments = self.appointments.write().await;
        let occupied = Self::occupied_count(
            &appointments,
            scope,
            appointment.date,
            appointment.start_time,
            appointment.end_time,
            None,
        );
        if occupied >= capacity {
            return Ok(CapacityOutcome::Exhausted);
        }

        appointments.insert(appointment.id.0.clone(), appointment.clone());
        Ok(CapacityOutcome::Granted)
    }

    async fn reschedule_within_capacity(
        &self,
        id: &AppointmentId,
        change: &SlotChange,
        scope: &SlotScope,
        capacity: u32,
        updated_at: DateTime<Utc>,
    ) -> Result<CapacityOutcome, RepositoryError> {
        let mut appointments = self.appointments.write().await;
        let occupied = Self::occupied_count(
            &appointments,
            scope,
            change.date,
            change.start_time,
            change.end_time,
            Some(id),
        );
        if occupied >= capacity {
            return Ok(CapacityOutcome::Exhausted);
        }

        if let Some(appointment) = appointments.get_mut(&id.0) {
            appointment.date = change.date;
            appointment.start_time = change.start_time;
            appointment.end_time = change.end_time;
            appointment.resource_id = change.resource_id.clone();
            appointment.resource_name = change.resource_name.clone();
            if let Some(form_data) = &change.form_data {
                appointment.form_data = form_data.clone();
            }
            appointment.updated_at = updated_at;
        }
        Ok(CapacityOutcome::Granted)
    }

    async fn update_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut appointments = self.appointments.write().await;
        if let Some(appointment) = appointments.get_mut(&id.0) {
            appointment.status = status;
            appointment.updated_at = now;
            match status {
                AppointmentStatus::Confirmed => {
                    appointment.confirmed_at.get_or_insert(now);
                }
                AppointmentStatus::Cancelled | AppointmentStatus::Rejected => {
                    appointment.cancelled_at.get_or_insert(now);
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn set_calendar_event(
        &self,
        id: &AppointmentId,
        calendar_event_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut appointments = self.appointments.write().await;
        if let Some(appointment) = appointments.get_mut(&id.0) {
            appointment.calendar_event_id = calendar_event_id.map(str::to_string);
            appointment.updated_at = now;
        }
        Ok(())
    }

    async fn complete_past_due(
        &self,
        bot_id: &BotId,
        cutoff_date: NaiveDate,
        cutoff_time: NaiveTime,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let cutoff = local_datetime(cutoff_date, cutoff_time);
        let mut appointments = self.appointments.write().await;
        let mut changed = 0;
        for appointment in appointments.values_mut() {
            if appointment.bot_id == *bot_id
                && appointment.status == AppointmentStatus::Confirmed
                && local_datetime(appointment.date, appointment.end_time) <= cutoff
            {
                appointment.status = AppointmentStatus::Completed;
                appointment.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
