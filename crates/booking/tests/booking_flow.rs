//! End-to-end booking flows over the in-memory repositories and the
//! recording calendar, with a pinned clock.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde_json::json;

use bookline_booking::{BookingService, CreateBookingRequest, RescheduleRequest};
use bookline_calendar::testing::{CalendarCall, RecordingCalendar};
use bookline_calendar::deterministic_event_id;
use bookline_core::domain::appointment::{
    Appointment, AppointmentId, AppointmentStatus, BotId, OrgId, SlotScope,
};
use bookline_core::domain::policy::BookingPolicy;
use bookline_core::domain::resource::{Resource, ResourceId, ResourceType};
use bookline_core::domain::schedule::{ScheduleId, ScheduleRule, ScheduleWindow};
use bookline_core::errors::BookingError;
use bookline_db::repositories::{
    AppointmentRepository, InMemoryAppointmentRepository, InMemoryPolicyRepository,
    InMemoryResourceRepository, InMemoryScheduleRepository, PolicyRepository, ResourceRepository,
    ScheduleRepository,
};

const BOT: &str = "bot-1";
const RESOURCE: &str = "res-1";

/// Friday noon; the scheduled Monday below is three days out.
fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 13).unwrap()
}

fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

struct Harness {
    service: BookingService,
    appointments: Arc<InMemoryAppointmentRepository>,
    calendar: Arc<RecordingCalendar>,
}

impl Harness {
    async fn new(calendar: RecordingCalendar) -> Self {
        let resources = Arc::new(InMemoryResourceRepository::default());
        let schedules = Arc::new(InMemoryScheduleRepository::default());
        let policies = Arc::new(InMemoryPolicyRepository::default());
        let appointments = Arc::new(InMemoryAppointmentRepository::default());
        let calendar = Arc::new(calendar);

        policies
            .save(BookingPolicy::defaults(OrgId("org-1".to_string()), BotId(BOT.to_string())))
            .await
            .expect("save policy");

        resources
            .save(Resource {
                id: ResourceId(RESOURCE.to_string()),
                org_id: OrgId("org-1".to_string()),
                bot_id: BotId(BOT.to_string()),
                name: "Dr. Mills".to_string(),
                resource_type: ResourceType::Person,
                capacity_per_slot: 1,
                active: true,
                created_at: fixed_now(),
                updated_at: fixed_now(),
            })
            .await
            .expect("save resource");

        schedules
            .save(ScheduleWindow {
                id: ScheduleId("sch-mon".to_string()),
                resource_id: ResourceId(RESOURCE.to_string()),
                rule: ScheduleRule::Weekly(Weekday::Mon),
                start_time: at(9, 0),
                end_time: at(17, 0),
                slot_minutes: 30,
                available: true,
                created_at: fixed_now(),
            })
            .await
            .expect("save schedule");

        let service = BookingService::with_clock(
            resources,
            schedules,
            policies,
            appointments.clone(),
            calendar.clone(),
            Arc::new(fixed_now),
        );

        Self { service, appointments, calendar }
    }

    fn request(&self, email: &str, date: NaiveDate, start: NaiveTime) -> CreateBookingRequest {
        CreateBookingRequest {
            org_id: OrgId("org-1".to_string()),
            bot_id: BotId(BOT.to_string()),
            resource_id: Some(ResourceId(RESOURCE.to_string())),
            customer_name: "Ada Lovelace".to_string(),
            customer_email: email.to_string(),
            customer_phone: None,
            date,
            start_time: start,
            form_data: json!({}),
            notes: None,
        }
    }
}

#[tokio::test]
async fn booking_a_free_slot_succeeds_and_mirrors_to_the_calendar() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    let receipt = harness
        .service
        .create_booking(harness.request("ada@example.com", monday(), at(10, 0)))
        .await
        .expect("create booking");

    let appointment = &receipt.appointment;
    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
    assert_eq!(appointment.end_time, at(10, 30));
    assert_eq!(appointment.resource_name.as_deref(), Some("Dr. Mills"));
    assert!(receipt.calendar_synced);
    assert!(receipt.calendar_warning.is_none());

    let expected_id = deterministic_event_id(BOT, "ada@example.com", monday(), at(10, 0));
    assert_eq!(appointment.calendar_event_id.as_deref(), Some(expected_id.0.as_str()));

    let calls = harness.calendar.calls().await;
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], CalendarCall::Create(_)));
}

#[tokio::test]
async fn a_full_slot_is_refused() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    harness
        .service
        .create_booking(harness.request("first@example.com", monday(), at(10, 0)))
        .await
        .expect("first booking");

    // Overlapping, not identical: 10:00-10:30 vs 10:00-10:30 by another customer.
    let refused = harness
        .service
        .create_booking(harness.request("second@example.com", monday(), at(10, 0)))
        .await;
    assert!(matches!(refused, Err(BookingError::SlotUnavailable(_))));

    // The adjacent slot is still open.
    harness
        .service
        .create_booking(harness.request("second@example.com", monday(), at(10, 30)))
        .await
        .expect("adjacent booking");
}

#[tokio::test]
async fn the_same_customer_cannot_book_the_same_slot_twice() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    harness
        .service
        .create_booking(harness.request("ada@example.com", monday(), at(10, 0)))
        .await
        .expect("first booking");

    let refused = harness
        .service
        .create_booking(harness.request("ada@example.com", monday(), at(10, 0)))
        .await;
    assert!(matches!(refused, Err(BookingError::DuplicateBooking)));
}

#[tokio::test]
async fn past_and_short_notice_slots_are_refused() {
    let harness = Harness::new(RecordingCalendar::default()).await;
    let today = fixed_now().date_naive();

    let past = harness.service.create_booking(harness.request("a@example.com", today, at(9, 0))).await;
    assert!(matches!(past, Err(BookingError::PastSlot)));

    // 12:30 is in the future but inside the 60-minute notice window.
    let short_notice =
        harness.service.create_booking(harness.request("a@example.com", today, at(12, 30))).await;
    assert!(matches!(short_notice, Err(BookingError::SlotUnavailable(_))));
}

#[tokio::test]
async fn slots_outside_the_schedule_are_refused() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    let evening =
        harness.service.create_booking(harness.request("a@example.com", monday(), at(18, 0))).await;
    assert!(matches!(evening, Err(BookingError::SlotUnavailable(_))));

    // Tuesday has no schedule window at all.
    let tuesday = monday().succ_opt().unwrap();
    let off_day =
        harness.service.create_booking(harness.request("a@example.com", tuesday, at(10, 0))).await;
    assert!(matches!(off_day, Err(BookingError::SlotUnavailable(_))));
}

#[tokio::test]
async fn beyond_the_booking_horizon_is_refused() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    // Default horizon is 60 days; 2025-03-17 is a Monday 66 days out.
    let far_monday = NaiveDate::from_ymd_opt(2025, 3, 17).unwrap();
    let refused = harness
        .service
        .create_booking(harness.request("a@example.com", far_monday, at(10, 0)))
        .await;
    assert!(matches!(refused, Err(BookingError::SlotUnavailable(_))));
}

#[tokio::test]
async fn missing_required_fields_fail_validation() {
    let policies = Arc::new(InMemoryPolicyRepository::default());
    let mut policy = BookingPolicy::defaults(OrgId("org-1".to_string()), BotId(BOT.to_string()));
    policy.required_fields = vec!["reason".to_string()];
    policies.save(policy).await.expect("save policy");

    let service = BookingService::with_clock(
        Arc::new(InMemoryResourceRepository::default()),
        Arc::new(InMemoryScheduleRepository::default()),
        policies,
        Arc::new(InMemoryAppointmentRepository::default()),
        Arc::new(RecordingCalendar::default()),
        Arc::new(fixed_now),
    );

    let refused = service
        .create_booking(CreateBookingRequest {
            org_id: OrgId("org-1".to_string()),
            bot_id: BotId(BOT.to_string()),
            resource_id: None,
            customer_name: "Ada".to_string(),
            customer_email: "ada@example.com".to_string(),
            customer_phone: None,
            date: monday(),
            start_time: at(10, 0),
            form_data: json!({ "reason": "  " }),
            notes: None,
        })
        .await;
    match refused {
        Err(BookingError::Validation(message)) => assert!(message.contains("reason")),
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[tokio::test]
async fn bots_with_active_resources_require_one_to_be_chosen() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    let mut request = harness.request("ada@example.com", monday(), at(10, 0));
    request.resource_id = None;
    let refused = harness.service.create_booking(request).await;
    assert!(matches!(refused, Err(BookingError::Validation(_))));
}

#[tokio::test]
async fn bots_without_resources_take_generic_bookings() {
    let resources = Arc::new(InMemoryResourceRepository::default());
    let schedules = Arc::new(InMemoryScheduleRepository::default());
    let policies = Arc::new(InMemoryPolicyRepository::default());
    let appointments = Arc::new(InMemoryAppointmentRepository::default());
    let service = BookingService::with_clock(
        resources,
        schedules,
        policies,
        appointments,
        Arc::new(RecordingCalendar::default()),
        Arc::new(fixed_now),
    );

    let receipt = service
        .create_booking(CreateBookingRequest {
            org_id: OrgId("org-1".to_string()),
            bot_id: BotId("bot-bare".to_string()),
            resource_id: None,
            customer_name: "Ada".to_string(),
            customer_email: "ada@example.com".to_string(),
            customer_phone: None,
            date: monday(),
            start_time: at(10, 0),
            form_data: json!({}),
            notes: None,
        })
        .await
        .expect("generic booking");

    assert!(receipt.appointment.resource_id.is_none());
    assert!(receipt.appointment.resource_name.is_none());
}

#[tokio::test]
async fn rescheduling_frees_the_old_slot() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    let receipt = harness
        .service
        .create_booking(harness.request("ada@example.com", monday(), at(10, 0)))
        .await
        .expect("create booking");

    let moved = harness
        .service
        .reschedule_booking(
            &receipt.appointment.id,
            RescheduleRequest {
                date: monday(),
                start_time: at(11, 0),
                resource_id: None,
                form_data: None,
            },
        )
        .await
        .expect("reschedule");
    assert_eq!(moved.appointment.start_time, at(11, 0));
    assert_eq!(moved.appointment.end_time, at(11, 30));
    assert!(moved.calendar_synced);

    // The vacated 10:00 slot is bookable again.
    harness
        .service
        .create_booking(harness.request("other@example.com", monday(), at(10, 0)))
        .await
        .expect("rebook freed slot");

    // The mirror updated the existing event rather than creating a new one.
    let calls = harness.calendar.calls().await;
    assert!(calls.iter().any(|call| matches!(call, CalendarCall::Update(_, _))));
}

#[tokio::test]
async fn rescheduling_into_a_full_slot_is_refused_and_keeps_the_booking() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    let receipt = harness
        .service
        .create_booking(harness.request("ada@example.com", monday(), at(10, 0)))
        .await
        .expect("first booking");
    harness
        .service
        .create_booking(harness.request("other@example.com", monday(), at(11, 0)))
        .await
        .expect("second booking");

    let refused = harness
        .service
        .reschedule_booking(
            &receipt.appointment.id,
            RescheduleRequest {
                date: monday(),
                start_time: at(11, 0),
                resource_id: None,
                form_data: None,
            },
        )
        .await;
    assert!(matches!(refused, Err(BookingError::SlotUnavailable(_))));

    let unchanged = harness.service.get_booking(&receipt.appointment.id).await.expect("fetch");
    assert_eq!(unchanged.start_time, at(10, 0));
}

#[tokio::test]
async fn rescheduling_onto_its_own_slot_succeeds() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    let receipt = harness
        .service
        .create_booking(harness.request("ada@example.com", monday(), at(10, 0)))
        .await
        .expect("create booking");

    // Capacity 1, but the booking does not count against itself.
    harness
        .service
        .reschedule_booking(
            &receipt.appointment.id,
            RescheduleRequest {
                date: monday(),
                start_time: at(10, 0),
                resource_id: None,
                form_data: None,
            },
        )
        .await
        .expect("reschedule in place");
}

#[tokio::test]
async fn cancelling_releases_the_slot_and_deletes_the_event() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    let receipt = harness
        .service
        .create_booking(harness.request("ada@example.com", monday(), at(10, 0)))
        .await
        .expect("create booking");

    let cancelled =
        harness.service.cancel_booking(&receipt.appointment.id).await.expect("cancel");
    assert_eq!(cancelled.appointment.status, AppointmentStatus::Cancelled);
    assert!(cancelled.calendar_synced);

    let calls = harness.calendar.calls().await;
    assert!(matches!(calls.last(), Some(CalendarCall::Delete(_))));

    harness
        .service
        .create_booking(harness.request("other@example.com", monday(), at(10, 0)))
        .await
        .expect("rebook cancelled slot");

    // Cancelling again reports the current state.
    let again = harness.service.cancel_booking(&receipt.appointment.id).await;
    assert!(matches!(
        again,
        Err(BookingError::InvalidState { status: AppointmentStatus::Cancelled })
    ));
}

#[tokio::test]
async fn stale_confirmed_bookings_are_retired_before_mutation() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    // Ended yesterday; still marked confirmed in storage.
    let yesterday = fixed_now().date_naive() - Duration::days(1);
    let stale = Appointment {
        id: AppointmentId("apt-stale".to_string()),
        org_id: OrgId("org-1".to_string()),
        bot_id: BotId(BOT.to_string()),
        resource_id: Some(ResourceId(RESOURCE.to_string())),
        resource_name: Some("Dr. Mills".to_string()),
        customer_name: "Ada".to_string(),
        customer_email: "ada@example.com".to_string(),
        customer_phone: None,
        date: yesterday,
        start_time: at(9, 0),
        end_time: at(9, 30),
        form_data: json!({}),
        notes: None,
        status: AppointmentStatus::Confirmed,
        calendar_event_id: None,
        created_at: fixed_now(),
        confirmed_at: Some(fixed_now()),
        cancelled_at: None,
        updated_at: fixed_now(),
    };
    let scope = SlotScope::Resource(ResourceId(RESOURCE.to_string()));
    harness.appointments.insert_within_capacity(&stale, &scope, 1).await.expect("seed stale");

    let refused = harness.service.cancel_booking(&stale.id).await;
    assert!(matches!(
        refused,
        Err(BookingError::InvalidState { status: AppointmentStatus::Completed })
    ));

    let stored = harness.appointments.find_by_id(&stale.id).await.expect("fetch");
    assert_eq!(stored.unwrap().status, AppointmentStatus::Completed);
}

#[tokio::test]
async fn calendar_failures_do_not_fail_the_booking() {
    let harness = Harness::new(RecordingCalendar::failing()).await;

    let receipt = harness
        .service
        .create_booking(harness.request("ada@example.com", monday(), at(10, 0)))
        .await
        .expect("booking survives calendar outage");

    assert!(!receipt.calendar_synced);
    assert!(receipt.calendar_warning.is_some());
    assert!(receipt.appointment.calendar_event_id.is_none());
    assert_eq!(receipt.appointment.status, AppointmentStatus::Confirmed);

    // The stored row matches the receipt.
    let stored =
        harness.service.get_booking(&receipt.appointment.id).await.expect("fetch booking");
    assert!(stored.calendar_event_id.is_none());
}

#[tokio::test]
async fn available_slots_reflect_schedule_and_bookings() {
    let harness = Harness::new(RecordingCalendar::default()).await;
    let resource_id = ResourceId(RESOURCE.to_string());

    let open = harness
        .service
        .compute_available_slots(&BotId(BOT.to_string()), Some(&resource_id), monday())
        .await
        .expect("slots");
    // 09:00-17:00 in 30-minute steps.
    assert_eq!(open.len(), 16);
    assert_eq!(open[0].start.time(), at(9, 0));
    assert_eq!(open.last().unwrap().start.time(), at(16, 30));
    assert!(open.iter().all(|slot| slot.remaining_capacity == 1));

    harness
        .service
        .create_booking(harness.request("ada@example.com", monday(), at(10, 0)))
        .await
        .expect("create booking");

    let after = harness
        .service
        .compute_available_slots(&BotId(BOT.to_string()), Some(&resource_id), monday())
        .await
        .expect("slots");
    assert_eq!(after.len(), 15);
    assert!(after.iter().all(|slot| slot.start.time() != at(10, 0)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_for_a_capacity_one_slot_admit_exactly_one() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    // Distinct customers so the duplicate-booking guard stays out of the way.
    let requests: Vec<_> = (0..16)
        .map(|n| harness.request(&format!("racer-{n}@example.com"), monday(), at(10, 0)))
        .collect();

    let service = Arc::new(harness.service);
    let tasks: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let service = service.clone();
            tokio::spawn(async move { service.create_booking(request).await })
        })
        .collect();

    let mut confirmed = 0;
    let mut refused = 0;
    for task in tasks {
        match task.await.expect("task join") {
            Ok(receipt) => {
                assert_eq!(receipt.appointment.status, AppointmentStatus::Confirmed);
                confirmed += 1;
            }
            Err(BookingError::SlotUnavailable(_)) => refused += 1,
            Err(other) => panic!("unexpected booking error: {other:?}"),
        }
    }
    assert_eq!(confirmed, 1);
    assert_eq!(refused, 15);

    // Storage agrees with the receipts: one occupant for the slot.
    let scope = SlotScope::Resource(ResourceId(RESOURCE.to_string()));
    let stored = harness
        .appointments
        .list_active_for_date(&scope, monday())
        .await
        .expect("list active");
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn unknown_resources_and_bookings_are_not_found() {
    let harness = Harness::new(RecordingCalendar::default()).await;

    let mut request = harness.request("ada@example.com", monday(), at(10, 0));
    request.resource_id = Some(ResourceId("res-missing".to_string()));
    let missing_resource = harness.service.create_booking(request).await;
    assert!(matches!(missing_resource, Err(BookingError::NotFound { kind: "resource", .. })));

    let missing_booking =
        harness.service.get_booking(&AppointmentId("apt-missing".to_string())).await;
    assert!(matches!(missing_booking, Err(BookingError::NotFound { kind: "appointment", .. })));
}
