//! Contract tests for the demo seed: everything the seed promises must be
//! queryable through the repository layer, and the seeded appointments must
//! hold their slots under the capacity rules.

use chrono::NaiveTime;

use bookline_core::domain::appointment::{AppointmentId, BotId, SlotScope};
use bookline_core::domain::resource::ResourceId;
use bookline_core::domain::schedule::ScheduleRule;
use bookline_db::repositories::{
    AppointmentRepository, PolicyRepository, ResourceRepository, ScheduleRepository,
    SqlAppointmentRepository, SqlPolicyRepository, SqlResourceRepository, SqlScheduleRepository,
};
use bookline_db::{connect_with_settings, migrations, seed_demo_dataset, DbPool, SeedSummary};

async fn seeded_pool() -> (DbPool, SeedSummary) {
    let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
        .await
        .expect("connect test pool");
    migrations::run_pending(&pool).await.expect("run migrations");
    let summary = seed_demo_dataset(&pool).await.expect("seed dataset");
    (pool, summary)
}

#[tokio::test]
async fn seed_policy_carries_business_hours_and_required_fields() {
    let (pool, summary) = seeded_pool().await;

    let policy = SqlPolicyRepository::new(pool.clone())
        .find_for_bot(&BotId(summary.bot_id.clone()))
        .await
        .expect("find policy")
        .expect("policy exists");

    assert_eq!(policy.org_id.0, summary.org_id);
    assert_eq!(policy.timezone.name(), "America/New_York");
    assert_eq!(policy.required_fields, vec!["reason".to_string()]);
    assert_eq!(policy.windows.len(), 5, "Monday through Friday");
    for window in &policy.windows {
        assert_eq!(window.start_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(window.end_time, NaiveTime::from_hms_opt(17, 0, 0).unwrap());
    }

    pool.close().await;
}

#[tokio::test]
async fn seed_resources_have_weekly_schedules() {
    let (pool, summary) = seeded_pool().await;

    let resources = SqlResourceRepository::new(pool.clone())
        .list_for_bot(&BotId(summary.bot_id.clone()), true)
        .await
        .expect("list resources");
    assert_eq!(resources.len(), 2);
    assert!(resources.iter().all(|resource| resource.active));

    let capacities: Vec<u32> =
        resources.iter().map(|resource| resource.capacity_per_slot).collect();
    assert!(capacities.contains(&1), "the person resource takes one booking per slot");
    assert!(capacities.contains(&4), "the room resource takes four");

    let schedules = SqlScheduleRepository::new(pool.clone());
    for resource_id in &summary.resource_ids {
        let windows =
            schedules.list_for_resource(&ResourceId(resource_id.clone())).await.expect("list");
        assert_eq!(windows.len(), 5);
        assert!(windows
            .iter()
            .all(|window| matches!(window.rule, ScheduleRule::Weekly(_)) && window.available));
    }

    pool.close().await;
}

#[tokio::test]
async fn seeded_appointments_occupy_their_slots() {
    let (pool, summary) = seeded_pool().await;

    let appointments = SqlAppointmentRepository::new(pool.clone());
    let first = appointments
        .find_by_id(&AppointmentId(summary.appointment_ids[0].clone()))
        .await
        .expect("find appointment")
        .expect("appointment exists");

    let scope = SlotScope::Resource(first.resource_id.clone().expect("seeded on a resource"));
    let active = appointments
        .list_active_for_date(&scope, first.date)
        .await
        .expect("list active appointments");
    assert_eq!(active.len(), 2);
    assert!(active[0].start_time < active[1].start_time, "ascending by start time");

    // Capacity 1: the seeded 10:00 slot refuses another booking.
    let mut contender = first.clone();
    contender.id = AppointmentId("apt-contender".to_string());
    contender.customer_email = "someone-else@example.com".to_string();
    let outcome = appointments
        .insert_within_capacity(&contender, &scope, 1)
        .await
        .expect("capacity check");
    assert_eq!(outcome, bookline_db::repositories::CapacityOutcome::Exhausted);

    pool.close().await;
}
