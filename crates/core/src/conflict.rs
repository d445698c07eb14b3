//! Interval-overlap capacity checking.
//!
//! All intervals are half-open `[start, end)` wall-clock times in the owning
//! tenant's timezone. Two back-to-back slots that touch at a boundary do not
//! conflict. The pure predicates here are also evaluated inside the
//! persistence layer's insert/update transaction; they must stay in sync
//! with the SQL overlap clause in `bookline-db`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Interval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }
}

/// True iff the two half-open intervals share at least one instant,
/// including full containment in either direction.
pub fn overlaps(a: &Interval, b: &Interval) -> bool {
    a.start < b.end && a.end > b.start
}

pub fn overlap_count(existing: &[Interval], candidate: &Interval) -> u32 {
    existing.iter().filter(|interval| overlaps(interval, candidate)).count() as u32
}

/// True iff one more reservation at `candidate` stays within `capacity`.
pub fn has_capacity(existing: &[Interval], candidate: &Interval, capacity: u32) -> bool {
    overlap_count(existing, candidate) < capacity
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::{has_capacity, overlap_count, overlaps, Interval};

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 6).unwrap().and_hms_opt(hour, minute, 0).unwrap()
    }

    fn interval(start: (u32, u32), end: (u32, u32)) -> Interval {
        Interval::new(at(start.0, start.1), at(end.0, end.1))
    }

    #[test]
    fn disjoint_before_does_not_overlap() {
        assert!(!overlaps(&interval((8, 0), (8, 30)), &interval((9, 0), (9, 30))));
    }

    #[test]
    fn disjoint_after_does_not_overlap() {
        assert!(!overlaps(&interval((10, 0), (10, 30)), &interval((9, 0), (9, 30))));
    }

    #[test]
    fn touching_at_boundary_does_not_overlap() {
        // Half-open intervals: 09:00-09:30 then 09:30-10:00 are compatible.
        assert!(!overlaps(&interval((9, 0), (9, 30)), &interval((9, 30), (10, 0))));
        assert!(!overlaps(&interval((9, 30), (10, 0)), &interval((9, 0), (9, 30))));
    }

    #[test]
    fn partial_overlap_on_the_left() {
        assert!(overlaps(&interval((8, 45), (9, 15)), &interval((9, 0), (9, 30))));
    }

    #[test]
    fn partial_overlap_on_the_right() {
        assert!(overlaps(&interval((9, 15), (9, 45)), &interval((9, 0), (9, 30))));
    }

    #[test]
    fn containment_in_both_directions() {
        assert!(overlaps(&interval((9, 5), (9, 25)), &interval((9, 0), (9, 30))));
        assert!(overlaps(&interval((9, 0), (9, 30)), &interval((9, 5), (9, 25))));
    }

    #[test]
    fn identical_intervals_overlap() {
        assert!(overlaps(&interval((9, 0), (9, 30)), &interval((9, 0), (9, 30))));
    }

    #[test]
    fn capacity_counts_only_overlapping_intervals() {
        let existing = vec![
            interval((9, 0), (9, 30)),
            interval((9, 15), (9, 45)),
            interval((11, 0), (11, 30)),
        ];
        let candidate = interval((9, 15), (9, 45));

        assert_eq!(overlap_count(&existing, &candidate), 2);
        assert!(!has_capacity(&existing, &candidate, 2));
        assert!(has_capacity(&existing, &candidate, 3));
    }

    #[test]
    fn empty_schedule_always_has_capacity() {
        assert!(has_capacity(&[], &interval((9, 0), (9, 30)), 1));
    }
}
