use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::Interval;
use crate::domain::resource::ResourceId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppointmentId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Rejected,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Statuses that hold slot capacity. Cancelled and rejected rows are
    /// retained for audit but never count against a slot.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Rejected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Rejected)
    }
}

/// Which pool of appointments a slot competes in: a dedicated resource, or
/// the whole tenant-bot when no resources are configured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotScope {
    Resource(ResourceId),
    Bot(BotId),
}

/// The mutable slot assignment applied by a reschedule.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotChange {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub resource_id: Option<ResourceId>,
    pub resource_name: Option<String>,
    pub form_data: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub org_id: OrgId,
    pub bot_id: BotId,
    pub resource_id: Option<ResourceId>,
    pub resource_name: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub form_data: serde_json::Value,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    pub calendar_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self.status, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, Rejected)
                // Reschedule keeps the appointment confirmed.
                | (Confirmed, Confirmed)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
        )
    }

    pub fn transition_to(&mut self, next: AppointmentStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidAppointmentTransition { from: self.status, to: next })
    }

    /// Wall-clock interval of the reservation in the owning tenant's
    /// timezone, half-open `[start, end)`.
    pub fn interval(&self) -> Interval {
        Interval::new(
            NaiveDateTime::new(self.date, self.start_time),
            NaiveDateTime::new(self.date, self.end_time),
        )
    }

    /// True once the appointment's end has passed, compared in the policy
    /// timezone. Only meaningful for confirmed appointments.
    pub fn past_due(&self, now_local: NaiveDateTime) -> bool {
        NaiveDateTime::new(self.date, self.end_time) <= now_local
    }
}
