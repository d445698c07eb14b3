use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::appointment::{BotId, OrgId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Person,
    Room,
    Equipment,
    Other,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Room => "room",
            Self::Equipment => "equipment",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "person" => Some(Self::Person),
            "room" => Some(Self::Room),
            "equipment" => Some(Self::Equipment),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// A bookable unit (person, room, equipment) owned by a tenant-bot.
///
/// Resources are deactivated rather than deleted once they carry historical
/// appointments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub org_id: OrgId,
    pub bot_id: BotId,
    pub name: String,
    pub resource_type: ResourceType,
    pub capacity_per_slot: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.capacity_per_slot == 0 {
            return Err(DomainError::InvariantViolation(
                "resource capacity_per_slot must be at least 1".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "resource name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
