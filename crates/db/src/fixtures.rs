//! Demo seed data for local development: one tenant bot with a per-bot
//! policy, two resources with weekly schedules, and a pair of appointments.

use chrono::{Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde_json::json;
use uuid::Uuid;

use bookline_core::domain::appointment::{
    Appointment, AppointmentId, AppointmentStatus, BotId, OrgId, SlotScope,
};
use bookline_core::domain::policy::{BookingPolicy, PolicyWindow};
use bookline_core::domain::resource::{Resource, ResourceId, ResourceType};
use bookline_core::domain::schedule::{ScheduleId, ScheduleRule, ScheduleWindow};

use crate::repositories::{
    AppointmentRepository, PolicyRepository, RepositoryError, ResourceRepository,
    ScheduleRepository, SqlAppointmentRepository, SqlPolicyRepository, SqlResourceRepository,
    SqlScheduleRepository,
};
use crate::DbPool;

pub const DEMO_ORG_ID: &str = "org-demo";
pub const DEMO_BOT_ID: &str = "bot-demo";

#[derive(Debug)]
pub struct SeedSummary {
    pub org_id: String,
    pub bot_id: String,
    pub resource_ids: Vec<String>,
    pub appointment_ids: Vec<String>,
}

pub async fn seed_demo_dataset(pool: &DbPool) -> Result<SeedSummary, RepositoryError> {
    let now = Utc::now();
    let org_id = OrgId(DEMO_ORG_ID.to_string());
    let bot_id = BotId(DEMO_BOT_ID.to_string());

    let policies = SqlPolicyRepository::new(pool.clone());
    let mut policy = BookingPolicy::defaults(org_id.clone(), bot_id.clone());
    policy.timezone = "America/New_York".parse::<Tz>().unwrap_or(Tz::UTC);
    policy.required_fields = vec!["reason".to_string()];
    policy.windows = weekdays()
        .into_iter()
        .map(|weekday| PolicyWindow {
            weekday,
            start_time: time(9, 0),
            end_time: time(17, 0),
        })
        .collect();
    policies.save(policy).await?;

    let resources = SqlResourceRepository::new(pool.clone());
    let doctor_id = ResourceId("res-demo-doctor".to_string());
    let room_id = ResourceId("res-demo-room".to_string());
    resources
        .save(Resource {
            id: doctor_id.clone(),
            org_id: org_id.clone(),
            bot_id: bot_id.clone(),
            name: "Dr. Mills".to_string(),
            resource_type: ResourceType::Person,
            capacity_per_slot: 1,
            active: true,
            created_at: now,
            updated_at: now,
        })
        .await?;
    resources
        .save(Resource {
            id: room_id.clone(),
            org_id: org_id.clone(),
            bot_id: bot_id.clone(),
            name: "Consultation Room".to_string(),
            resource_type: ResourceType::Room,
            capacity_per_slot: 4,
            active: true,
            created_at: now,
            updated_at: now,
        })
        .await?;

    let schedules = SqlScheduleRepository::new(pool.clone());
    for resource_id in [&doctor_id, &room_id] {
        for weekday in weekdays() {
            schedules
                .save(ScheduleWindow {
                    id: ScheduleId(Uuid::new_v4().to_string()),
                    resource_id: resource_id.clone(),
                    rule: ScheduleRule::Weekly(weekday),
                    start_time: time(9, 0),
                    end_time: time(17, 0),
                    slot_minutes: 30,
                    available: true,
                    created_at: now,
                })
                .await?;
        }
    }

    let appointments = SqlAppointmentRepository::new(pool.clone());
    let date = next_monday(now.date_naive());
    let mut appointment_ids = Vec::new();
    for (start, end, email) in
        [((10, 0), (10, 30), "ada@example.com"), ((14, 0), (14, 30), "bob@example.com")]
    {
        let appointment = Appointment {
            id: AppointmentId(Uuid::new_v4().to_string()),
            org_id: org_id.clone(),
            bot_id: bot_id.clone(),
            resource_id: Some(doctor_id.clone()),
            resource_name: Some("Dr. Mills".to_string()),
            customer_name: "Demo Customer".to_string(),
            customer_email: email.to_string(),
            customer_phone: None,
            date,
            start_time: time(start.0, start.1),
            end_time: time(end.0, end.1),
            form_data: json!({ "reason": "demo" }),
            notes: None,
            status: AppointmentStatus::Confirmed,
            calendar_event_id: None,
            created_at: now,
            confirmed_at: Some(now),
            cancelled_at: None,
            updated_at: now,
        };
        appointments
            .insert_within_capacity(&appointment, &SlotScope::Resource(doctor_id.clone()), 1)
            .await?;
        appointment_ids.push(appointment.id.0);
    }

    Ok(SeedSummary {
        org_id: org_id.0,
        bot_id: bot_id.0,
        resource_ids: vec![doctor_id.0, room_id.0],
        appointment_ids,
    })
}

fn weekdays() -> [Weekday; 5] {
    [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
}

fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn next_monday(from: NaiveDate) -> NaiveDate {
    let mut date = from.succ_opt().unwrap_or(from);
    while date.weekday() != Weekday::Mon {
        date = match date.succ_opt() {
            Some(next) => next,
            None => return date,
        };
    }
    date
}
