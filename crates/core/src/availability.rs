//! Availability calculator.
//!
//! Turns a wall-clock range, the configured windows, and the existing
//! reservations into the list of bookable slots. Pure function: "now" is an
//! explicit argument so lead-time and horizon rules are testable with
//! synthetic clocks.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::conflict::{overlap_count, Interval};
use crate::domain::policy::PolicyWindow;
use crate::domain::schedule::{ScheduleRule, ScheduleWindow};

/// A window rule as seen by the calculator: either weekly-recurring or bound
/// to one calendar date. Date rules override weekly rules for their date; an
/// unavailable date rule closes the whole date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WindowRule {
    Weekly { weekday: Weekday, start_time: NaiveTime, end_time: NaiveTime, available: bool },
    Date { date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime, available: bool },
}

impl WindowRule {
    pub fn from_schedule(window: &ScheduleWindow) -> Self {
        match window.rule {
            ScheduleRule::Weekly(weekday) => Self::Weekly {
                weekday,
                start_time: window.start_time,
                end_time: window.end_time,
                available: window.available,
            },
            ScheduleRule::Date(date) => Self::Date {
                date,
                start_time: window.start_time,
                end_time: window.end_time,
                available: window.available,
            },
        }
    }

    pub fn from_policy(window: &PolicyWindow) -> Self {
        Self::Weekly {
            weekday: window.weekday,
            start_time: window.start_time,
            end_time: window.end_time,
            available: true,
        }
    }

    fn span(&self) -> (NaiveTime, NaiveTime) {
        match self {
            Self::Weekly { start_time, end_time, .. }
            | Self::Date { start_time, end_time, .. } => (*start_time, *end_time),
        }
    }

    /// Misconfigured (end <= start, e.g. attempted midnight-crossing)
    /// windows are skipped rather than treated as errors.
    fn degenerate(&self) -> bool {
        let (start, end) = self.span();
        end <= start
    }

    fn contains(&self, time: NaiveTime) -> bool {
        let (start, end) = self.span();
        start <= time && time < end
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub remaining_capacity: u32,
}

pub struct AvailabilityInput<'a> {
    /// Local wall-clock range to scan, typically one full day.
    pub range_start: NaiveDateTime,
    pub range_end: NaiveDateTime,
    pub slot_minutes: u32,
    pub capacity: u32,
    pub timezone: Tz,
    pub windows: &'a [WindowRule],
    /// Non-cancelled/rejected reservations as local wall-clock intervals.
    pub existing: &'a [Interval],
    /// Externally supplied occupancy keyed by slot start (e.g. busy counts
    /// imported from a mirrored calendar).
    pub extra_occupied: &'a BTreeMap<NaiveDateTime, u32>,
    pub min_notice_minutes: Option<u32>,
    pub max_future_days: Option<u32>,
}

/// Walks `range_start..range_end` in `slot_minutes` steps and returns the
/// slots that are inside a configured window, under capacity, past the
/// minimum-notice lead time, and within the future horizon. Ascending by
/// start time.
pub fn compute_slots(input: &AvailabilityInput<'_>, now: DateTime<Utc>) -> Vec<Slot> {
    if input.slot_minutes == 0 || input.capacity == 0 {
        return Vec::new();
    }

    let step = Duration::minutes(i64::from(input.slot_minutes));
    let now_local = now.with_timezone(&input.timezone).naive_local();
    let earliest =
        now_local + Duration::minutes(i64::from(input.min_notice_minutes.unwrap_or(0)));
    let latest = input.max_future_days.map(|days| now_local + Duration::days(i64::from(days)));

    let mut slots = Vec::new();
    let mut cursor = input.range_start;

    while cursor < input.range_end {
        let end = cursor + step;
        if end > input.range_end {
            break;
        }

        if in_window(input.windows, cursor)
            && cursor >= earliest
            && latest.map_or(true, |limit| cursor <= limit)
        {
            let candidate = Interval::new(cursor, end);
            let occupied = overlap_count(input.existing, &candidate)
                + input.extra_occupied.get(&cursor).copied().unwrap_or(0);
            if occupied < input.capacity {
                slots.push(Slot { start: cursor, end, remaining_capacity: input.capacity - occupied });
            }
        }

        cursor = end;
    }

    slots
}

/// Window check in local time. No configured windows means no business-hours
/// restriction at all. Only the slot START is tested; a slot that begins
/// inside a window may run past its end.
pub fn in_window(windows: &[WindowRule], slot_start: NaiveDateTime) -> bool {
    if windows.is_empty() {
        return true;
    }

    let date = slot_start.date();
    let time = slot_start.time();

    let overrides: Vec<&WindowRule> = windows
        .iter()
        .filter(|window| matches!(window, WindowRule::Date { date: d, .. } if *d == date))
        .collect();

    if !overrides.is_empty() {
        // An unavailable override closes the whole date.
        if overrides
            .iter()
            .any(|window| matches!(window, WindowRule::Date { available: false, .. }))
        {
            return false;
        }
        return overrides
            .iter()
            .any(|window| !window.degenerate() && window.contains(time));
    }

    let weekday = date.weekday();
    let mut open = false;
    for window in windows {
        if let WindowRule::Weekly { weekday: day, available, .. } = window {
            if *day != weekday || window.degenerate() {
                continue;
            }
            if window.contains(time) {
                if !available {
                    return false;
                }
                open = true;
            }
        }
    }
    open
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
    use chrono_tz::Tz;

    use super::{compute_slots, AvailabilityInput, WindowRule};
    use crate::conflict::Interval;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn local(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
        date(y, m, d).and_hms_opt(hh, mm, 0).unwrap()
    }

    fn time(hh: u32, mm: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hh, mm, 0).unwrap()
    }

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).unwrap().with_timezone(&Utc)
    }

    fn weekly(weekday: Weekday, start: (u32, u32), end: (u32, u32)) -> WindowRule {
        WindowRule::Weekly {
            weekday,
            start_time: time(start.0, start.1),
            end_time: time(end.0, end.1),
            available: true,
        }
    }

    struct Fixture {
        windows: Vec<WindowRule>,
        existing: Vec<Interval>,
        extra: BTreeMap<NaiveDateTime, u32>,
    }

    impl Fixture {
        fn new() -> Self {
            Self { windows: Vec::new(), existing: Vec::new(), extra: BTreeMap::new() }
        }

        // 2025-01-01 is a Wednesday.
        fn input(&self, capacity: u32) -> AvailabilityInput<'_> {
            AvailabilityInput {
                range_start: local(2025, 1, 1, 0, 0),
                range_end: local(2025, 1, 2, 0, 0),
                slot_minutes: 30,
                capacity,
                timezone: Tz::UTC,
                windows: &self.windows,
                existing: &self.existing,
                extra_occupied: &self.extra,
                min_notice_minutes: None,
                max_future_days: None,
            }
        }
    }

    #[test]
    fn no_windows_means_whole_range_is_open() {
        let fixture = Fixture::new();
        let slots = compute_slots(&fixture.input(1), utc("2024-12-01T00:00:00Z"));

        assert_eq!(slots.len(), 48);
        assert_eq!(slots.first().unwrap().start, local(2025, 1, 1, 0, 0));
        assert_eq!(slots.last().unwrap().end, local(2025, 1, 2, 0, 0));
    }

    #[test]
    fn slots_outside_every_window_are_never_returned() {
        let mut fixture = Fixture::new();
        fixture.windows = vec![weekly(Weekday::Wed, (9, 0), (12, 0))];

        let slots = compute_slots(&fixture.input(1), utc("2024-12-01T00:00:00Z"));

        assert_eq!(slots.len(), 6);
        assert!(slots.iter().all(|slot| {
            slot.start.time() >= time(9, 0) && slot.start.time() < time(12, 0)
        }));
    }

    #[test]
    fn window_for_another_weekday_does_not_open_the_day() {
        let mut fixture = Fixture::new();
        fixture.windows = vec![weekly(Weekday::Thu, (9, 0), (12, 0))];

        let slots = compute_slots(&fixture.input(1), utc("2024-12-01T00:00:00Z"));

        assert!(slots.is_empty());
    }

    #[test]
    fn midnight_crossing_window_is_ignored_as_misconfiguration() {
        let mut fixture = Fixture::new();
        fixture.windows = vec![weekly(Weekday::Wed, (22, 0), (2, 0))];

        let slots = compute_slots(&fixture.input(1), utc("2024-12-01T00:00:00Z"));

        assert!(slots.is_empty());
    }

    #[test]
    fn unavailable_date_override_closes_the_whole_day() {
        let mut fixture = Fixture::new();
        fixture.windows = vec![
            weekly(Weekday::Wed, (9, 0), (17, 0)),
            WindowRule::Date {
                date: date(2025, 1, 1),
                start_time: time(0, 0),
                end_time: time(23, 59),
                available: false,
            },
        ];

        let slots = compute_slots(&fixture.input(1), utc("2024-12-01T00:00:00Z"));

        assert!(slots.is_empty());
    }

    #[test]
    fn date_override_takes_precedence_over_weekly_rules() {
        let mut fixture = Fixture::new();
        fixture.windows = vec![
            weekly(Weekday::Wed, (9, 0), (17, 0)),
            WindowRule::Date {
                date: date(2025, 1, 1),
                start_time: time(14, 0),
                end_time: time(16, 0),
                available: true,
            },
        ];

        let slots = compute_slots(&fixture.input(1), utc("2024-12-01T00:00:00Z"));

        // Only the 14:00-16:00 override applies on the 1st.
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0].start, local(2025, 1, 1, 14, 0));
    }

    #[test]
    fn unavailable_weekly_window_subtracts_its_span() {
        let mut fixture = Fixture::new();
        fixture.windows = vec![
            weekly(Weekday::Wed, (9, 0), (17, 0)),
            WindowRule::Weekly {
                weekday: Weekday::Wed,
                start_time: time(12, 0),
                end_time: time(13, 0),
                available: false,
            },
        ];

        let slots = compute_slots(&fixture.input(1), utc("2024-12-01T00:00:00Z"));

        assert!(slots.iter().all(|slot| {
            slot.start.time() < time(12, 0) || slot.start.time() >= time(13, 0)
        }));
        assert_eq!(slots.len(), 14);
    }

    #[test]
    fn min_notice_excludes_slots_inside_the_lead_window() {
        let fixture = Fixture::new();
        let mut input = fixture.input(1);
        input.min_notice_minutes = Some(60);

        // "now" = 2025-01-01T09:00 UTC: a 09:30 slot is inside the lead
        // window; 10:00 and 10:30 are not (the calculator emits fixed
        // 30-minute slots, so 10:05 from the property rounds to 10:30).
        let slots = compute_slots(&input, utc("2025-01-01T09:00:00Z"));

        let starts: Vec<NaiveDateTime> = slots.iter().map(|slot| slot.start).collect();
        assert!(!starts.contains(&local(2025, 1, 1, 9, 30)));
        assert!(starts.contains(&local(2025, 1, 1, 10, 0)));
        assert!(starts.contains(&local(2025, 1, 1, 10, 30)));
        assert_eq!(starts.first(), Some(&local(2025, 1, 1, 10, 0)));
    }

    #[test]
    fn without_min_notice_past_slots_are_still_filtered_by_now() {
        let fixture = Fixture::new();
        let slots = compute_slots(&fixture.input(1), utc("2025-01-01T12:00:00Z"));

        assert_eq!(slots.first().map(|slot| slot.start), Some(local(2025, 1, 1, 12, 0)));
    }

    #[test]
    fn max_future_days_includes_the_boundary_day_and_excludes_the_next() {
        let fixture = Fixture::new();

        let on_boundary = AvailabilityInput {
            range_start: local(2025, 3, 2, 0, 0), // day 60 from 2025-01-01
            range_end: local(2025, 3, 3, 0, 0),
            max_future_days: Some(60),
            ..fixture.input(1)
        };
        let past_boundary = AvailabilityInput {
            range_start: local(2025, 3, 3, 0, 0), // day 61
            range_end: local(2025, 3, 4, 0, 0),
            max_future_days: Some(60),
            ..fixture.input(1)
        };

        let now = utc("2025-01-01T09:00:00Z");
        assert!(!compute_slots(&on_boundary, now).is_empty());
        assert!(compute_slots(&past_boundary, now).is_empty());
    }

    #[test]
    fn lead_time_is_evaluated_in_the_policy_timezone() {
        let fixture = Fixture::new();
        let mut input = fixture.input(1);
        input.timezone = "America/New_York".parse::<Tz>().unwrap();
        input.min_notice_minutes = Some(60);

        // 14:00 UTC on 2025-01-01 is 09:00 in New York; local slots before
        // 10:00 must be excluded.
        let slots = compute_slots(&input, utc("2025-01-01T14:00:00Z"));

        assert_eq!(slots.first().map(|slot| slot.start), Some(local(2025, 1, 1, 10, 0)));
    }

    #[test]
    fn full_slots_are_omitted_and_remaining_capacity_is_reported() {
        let mut fixture = Fixture::new();
        fixture.existing = vec![
            Interval::new(local(2025, 1, 1, 9, 0), local(2025, 1, 1, 9, 30)),
            Interval::new(local(2025, 1, 1, 9, 0), local(2025, 1, 1, 9, 30)),
            Interval::new(local(2025, 1, 1, 10, 0), local(2025, 1, 1, 10, 30)),
        ];

        let slots = compute_slots(&fixture.input(2), utc("2024-12-01T00:00:00Z"));
        let at = |hh: u32, mm: u32| {
            slots.iter().find(|slot| slot.start == local(2025, 1, 1, hh, mm))
        };

        assert!(at(9, 0).is_none(), "slot at capacity must be omitted");
        assert_eq!(at(10, 0).unwrap().remaining_capacity, 1);
        assert_eq!(at(11, 0).unwrap().remaining_capacity, 2);
    }

    #[test]
    fn reservation_overlapping_two_slots_occupies_both() {
        let mut fixture = Fixture::new();
        fixture.existing =
            vec![Interval::new(local(2025, 1, 1, 9, 15), local(2025, 1, 1, 9, 45))];

        let slots = compute_slots(&fixture.input(1), utc("2024-12-01T00:00:00Z"));
        let starts: Vec<NaiveDateTime> = slots.iter().map(|slot| slot.start).collect();

        assert!(!starts.contains(&local(2025, 1, 1, 9, 0)));
        assert!(!starts.contains(&local(2025, 1, 1, 9, 30)));
        assert!(starts.contains(&local(2025, 1, 1, 10, 0)));
    }

    #[test]
    fn extra_occupancy_counts_against_capacity() {
        let mut fixture = Fixture::new();
        fixture.extra.insert(local(2025, 1, 1, 9, 0), 1);

        let slots = compute_slots(&fixture.input(1), utc("2024-12-01T00:00:00Z"));

        assert!(!slots.iter().any(|slot| slot.start == local(2025, 1, 1, 9, 0)));
    }

    #[test]
    fn output_is_ascending_by_start() {
        let fixture = Fixture::new();
        let slots = compute_slots(&fixture.input(1), utc("2024-12-01T00:00:00Z"));

        assert!(slots.windows(2).all(|pair| pair[0].start < pair[1].start));
    }

    #[test]
    fn zero_slot_duration_yields_no_slots() {
        let fixture = Fixture::new();
        let mut input = fixture.input(1);
        input.slot_minutes = 0;

        assert!(compute_slots(&input, utc("2024-12-01T00:00:00Z")).is_empty());
    }
}
