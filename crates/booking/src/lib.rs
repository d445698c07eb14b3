//! Booking lifecycle: slot discovery, booking/reschedule/cancel with
//! capacity enforcement, best-effort calendar mirroring, and the background
//! sweeper that retires finished appointments.

pub mod service;
pub mod sweeper;

pub use service::{
    BookingReceipt, BookingService, CancellationReceipt, CreateBookingRequest, RescheduleRequest,
};
pub use sweeper::{past_due_cutoff, CompletionSweeper};
