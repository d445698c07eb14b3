//! Background task that retires confirmed appointments whose end time has
//! passed. Reschedule and cancel also flip stale rows lazily, so the sweeper
//! only has to keep listings and reports from drifting for long.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use tracing::{error, info};

use bookline_db::repositories::{AppointmentRepository, PolicyRepository};

use crate::service::Clock;

/// Splits `now` into the local date and time for the bot's timezone. An
/// appointment is past due when it ends on an earlier date, or on the cutoff
/// date at or before the cutoff time.
pub fn past_due_cutoff(now: DateTime<Utc>, tz: Tz) -> (NaiveDate, NaiveTime) {
    let local = now.with_timezone(&tz).naive_local();
    (local.date(), local.time())
}

pub struct CompletionSweeper {
    policies: Arc<dyn PolicyRepository>,
    appointments: Arc<dyn AppointmentRepository>,
    interval: Duration,
    clock: Clock,
}

impl CompletionSweeper {
    pub fn new(
        policies: Arc<dyn PolicyRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        interval: Duration,
    ) -> Self {
        Self { policies, appointments, interval, clock: Arc::new(Utc::now) }
    }

    /// Test constructor with an injected clock.
    pub fn with_clock(
        policies: Arc<dyn PolicyRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        interval: Duration,
        clock: Clock,
    ) -> Self {
        Self { policies, appointments, interval, clock }
    }

    /// One pass over every bot with a stored policy. Each bot's cutoff is
    /// evaluated in its own timezone. Returns the total number of
    /// appointments completed.
    pub async fn sweep_once(&self) -> Result<u64, bookline_db::repositories::RepositoryError> {
        let now = (self.clock)();
        let mut total = 0u64;

        for policy in self.policies.list_all().await? {
            let (cutoff_date, cutoff_time) = past_due_cutoff(now, policy.timezone);
            let completed = self
                .appointments
                .complete_past_due(&policy.bot_id, cutoff_date, cutoff_time, now)
                .await?;
            if completed > 0 {
                info!(
                    event_name = "booking.sweeper.completed",
                    bot_id = %policy.bot_id.0,
                    completed,
                    "marked past-due appointments completed"
                );
            }
            total += completed;
        }

        Ok(total)
    }

    /// Runs until the task is dropped, sweeping once per interval. Errors are
    /// logged and the loop keeps going; a transient database failure must not
    /// kill the task.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(sweep_error) = self.sweep_once().await {
                error!(
                    event_name = "booking.sweeper.failed",
                    error = %sweep_error,
                    "completion sweep failed"
                );
            }
        }
    }
}
