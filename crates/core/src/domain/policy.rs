use chrono::{DateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::domain::appointment::{BotId, OrgId};
use crate::errors::DomainError;

pub const DEFAULT_SLOT_MINUTES: u32 = 30;
pub const DEFAULT_CAPACITY_PER_SLOT: u32 = 1;
pub const DEFAULT_MIN_NOTICE_MINUTES: u32 = 60;
pub const DEFAULT_MAX_FUTURE_DAYS: u32 = 60;

/// A generic weekly business-hours window used when a booking carries no
/// resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyWindow {
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Per tenant-bot booking configuration. One row per bot, created lazily
/// with defaults the first time the bot takes a booking-related request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookingPolicy {
    pub org_id: OrgId,
    pub bot_id: BotId,
    pub timezone: Tz,
    pub slot_minutes: u32,
    pub capacity_per_slot: u32,
    pub min_notice_minutes: u32,
    pub max_future_days: Option<u32>,
    pub windows: Vec<PolicyWindow>,
    pub required_fields: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingPolicy {
    pub fn defaults(org_id: OrgId, bot_id: BotId) -> Self {
        let now = Utc::now();
        Self {
            org_id,
            bot_id,
            timezone: Tz::UTC,
            slot_minutes: DEFAULT_SLOT_MINUTES,
            capacity_per_slot: DEFAULT_CAPACITY_PER_SLOT,
            min_notice_minutes: DEFAULT_MIN_NOTICE_MINUTES,
            max_future_days: Some(DEFAULT_MAX_FUTURE_DAYS),
            windows: Vec::new(),
            required_fields: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.slot_minutes == 0 {
            return Err(DomainError::InvariantViolation(
                "policy slot duration must be positive".to_string(),
            ));
        }
        if self.capacity_per_slot == 0 {
            return Err(DomainError::InvariantViolation(
                "policy capacity_per_slot must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Names of required customer fields missing or blank in `form_data`.
    pub fn missing_required_fields(&self, form_data: &serde_json::Value) -> Vec<String> {
        self.required_fields
            .iter()
            .filter(|field| {
                match form_data.get(field.as_str()) {
                    None | Some(serde_json::Value::Null) => true,
                    Some(serde_json::Value::String(value)) => value.trim().is_empty(),
                    Some(_) => false,
                }
            })
            .cloned()
            .collect()
    }
}
