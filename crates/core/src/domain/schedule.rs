use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::domain::resource::ResourceId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleId(pub String);

/// When a window applies: every week on a given weekday, or one specific
/// calendar date. Date rules override weekly rules for that date.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleRule {
    Weekly(Weekday),
    Date(NaiveDate),
}

/// A recurring or date-specific availability window for one resource.
///
/// `available = false` blocks the window's span instead of opening it; a
/// date-specific unavailable window marks that whole date closed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub id: ScheduleId,
    pub resource_id: ResourceId,
    pub rule: ScheduleRule,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_minutes: u32,
    pub available: bool,
    pub created_at: DateTime<Utc>,
}

impl ScheduleWindow {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.end_time <= self.start_time {
            return Err(DomainError::InvariantViolation(
                "schedule window end time must be after start time".to_string(),
            ));
        }
        if self.slot_minutes == 0 {
            return Err(DomainError::InvariantViolation(
                "schedule window slot duration must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Persistence encodes weekdays as 0 = Monday .. 6 = Sunday.
pub fn weekday_index(weekday: Weekday) -> u8 {
    weekday.num_days_from_monday() as u8
}

pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}
