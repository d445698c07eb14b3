pub mod availability;
pub mod config;
pub mod conflict;
pub mod domain;
pub mod errors;

pub use availability::{compute_slots, in_window, AvailabilityInput, Slot, WindowRule};
pub use conflict::{has_capacity, overlap_count, overlaps, Interval};
pub use domain::appointment::{
    Appointment, AppointmentId, AppointmentStatus, BotId, OrgId, SlotChange, SlotScope,
};
pub use domain::policy::{BookingPolicy, PolicyWindow};
pub use domain::resource::{Resource, ResourceId, ResourceType};
pub use domain::schedule::{ScheduleId, ScheduleRule, ScheduleWindow};
pub use errors::{BookingError, DomainError};
