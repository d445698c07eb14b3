use thiserror::Error;

use crate::domain::appointment::AppointmentStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid appointment transition from {from:?} to {to:?}")]
    InvalidAppointmentTransition { from: AppointmentStatus, to: AppointmentStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failure taxonomy for the booking operations exposed to callers.
///
/// `Validation` and `SlotUnavailable` are recoverable by resubmitting a
/// corrected request or picking another slot; `InvalidState` is terminal for
/// the targeted appointment; `Storage` is safe to retry because no partial
/// writes are ever left visible. Calendar sync failures are deliberately
/// absent: they never fail a booking operation and are surfaced as warnings
/// on the receipt instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BookingError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("slot unavailable: {0}")]
    SlotUnavailable(String),
    #[error("appointment is {} and cannot be modified", status.as_str())]
    InvalidState { status: AppointmentStatus },
    #[error("requested slot start has already elapsed")]
    PastSlot,
    #[error("duplicate booking for this customer and time slot")]
    DuplicateBooking,
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("storage failure: {0}")]
    Storage(String),
}

impl BookingError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}

impl From<DomainError> for BookingError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidAppointmentTransition { from, .. } => {
                Self::InvalidState { status: from }
            }
            DomainError::InvariantViolation(message) => Self::Validation(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::appointment::AppointmentStatus;

    use super::{BookingError, DomainError};

    #[test]
    fn invalid_transition_maps_to_invalid_state() {
        let error = BookingError::from(DomainError::InvalidAppointmentTransition {
            from: AppointmentStatus::Cancelled,
            to: AppointmentStatus::Confirmed,
        });

        assert_eq!(error, BookingError::InvalidState { status: AppointmentStatus::Cancelled });
    }

    #[test]
    fn invariant_violation_maps_to_validation() {
        let error =
            BookingError::from(DomainError::InvariantViolation("end before start".to_owned()));

        assert!(matches!(error, BookingError::Validation(message) if message == "end before start"));
    }

    #[test]
    fn invalid_state_message_names_the_status() {
        let error = BookingError::InvalidState { status: AppointmentStatus::Completed };

        assert_eq!(error.to_string(), "appointment is completed and cannot be modified");
    }
}
