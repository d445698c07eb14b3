use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use thiserror::Error;

use bookline_core::domain::appointment::{
    Appointment, AppointmentId, AppointmentStatus, BotId, SlotChange, SlotScope,
};
use bookline_core::domain::policy::BookingPolicy;
use bookline_core::domain::resource::{Resource, ResourceId};
use bookline_core::domain::schedule::{ScheduleId, ScheduleWindow};

pub mod appointment;
pub mod memory;
pub mod policy;
pub mod resource;
pub mod schedule;

pub use appointment::SqlAppointmentRepository;
pub use memory::{
    InMemoryAppointmentRepository, InMemoryPolicyRepository, InMemoryResourceRepository,
    InMemoryScheduleRepository,
};
pub use policy::SqlPolicyRepository;
pub use resource::SqlResourceRepository;
pub use schedule::SqlScheduleRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result of a capacity-checked write. `Exhausted` means the overlap count
/// inside the write transaction already reached the slot capacity and
/// nothing was changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacityOutcome {
    Granted,
    Exhausted,
}

#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn find_by_id(&self, id: &ResourceId) -> Result<Option<Resource>, RepositoryError>;
    async fn list_for_bot(
        &self,
        bot_id: &BotId,
        only_active: bool,
    ) -> Result<Vec<Resource>, RepositoryError>;
    async fn save(&self, resource: Resource) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn list_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Vec<ScheduleWindow>, RepositoryError>;
    async fn save(&self, window: ScheduleWindow) -> Result<(), RepositoryError>;
    async fn delete(&self, id: &ScheduleId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn find_for_bot(&self, bot_id: &BotId) -> Result<Option<BookingPolicy>, RepositoryError>;
    async fn save(&self, policy: BookingPolicy) -> Result<(), RepositoryError>;
    /// Every stored policy; the completion sweeper iterates these.
    async fn list_all(&self) -> Result<Vec<BookingPolicy>, RepositoryError>;
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn find_by_id(&self, id: &AppointmentId)
        -> Result<Option<Appointment>, RepositoryError>;

    /// Appointments that occupy slots (not cancelled/rejected) for the given
    /// scope and local date, ascending by start time.
    async fn list_active_for_date(
        &self,
        scope: &SlotScope,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError>;

    /// Every appointment of the bot regardless of status, ascending by date
    /// and start time, optionally narrowed to one status and/or one local
    /// date. Backs the admin bookings listing.
    async fn list_for_bot(
        &self,
        bot_id: &BotId,
        status: Option<AppointmentStatus>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, RepositoryError>;

    /// Confirmed appointment held by the same customer for the exact same
    /// slot, used to reject duplicate bookings.
    async fn find_confirmed_for_customer(
        &self,
        bot_id: &BotId,
        customer_email: &str,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<Option<Appointment>, RepositoryError>;

    /// Inserts the appointment iff the slot still has capacity for its
    /// scope. Count and insert run in one write transaction.
    async fn insert_within_capacity(
        &self,
        appointment: &Appointment,
        scope: &SlotScope,
        capacity: u32,
    ) -> Result<CapacityOutcome, RepositoryError>;

    /// Moves the appointment to a new slot iff that slot has capacity,
    /// excluding the appointment itself from the overlap count.
    async fn reschedule_within_capacity(
        &self,
        id: &AppointmentId,
        change: &SlotChange,
        scope: &SlotScope,
        capacity: u32,
        updated_at: DateTime<Utc>,
    ) -> Result<CapacityOutcome, RepositoryError>;

    async fn update_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn set_calendar_event(
        &self,
        id: &AppointmentId,
        calendar_event_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Flips every confirmed appointment of the bot that ended at or before
    /// the given local cutoff to completed. Returns the number of rows
    /// changed.
    async fn complete_past_due(
        &self,
        bot_id: &BotId,
        cutoff_date: NaiveDate,
        cutoff_time: NaiveTime,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

pub(crate) fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_time(column: &str, value: String) -> Result<NaiveTime, RepositoryError> {
    NaiveTime::parse_from_str(&value, "%H:%M:%S").map_err(|error| {
        RepositoryError::Decode(format!("invalid time in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn local_datetime(date: NaiveDate, time: NaiveTime) -> NaiveDateTime {
    date.and_time(time)
}
