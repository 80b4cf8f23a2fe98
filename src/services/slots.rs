//! Bookable start times within a provider's working day.
//!
//! Everything here is provider-local wall-clock time. Conversion to instants
//! happens in the caller with the provider's fixed UTC offset; there is no
//! handling of days whose offset changes (single-timezone assumption).

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::models::WorkingHours;

/// Every `start + k·step` whose appointment fits before `end`, ascending,
/// skipping starts already in `taken`.
pub fn generate_start_slots(
    date: NaiveDate,
    hours: &WorkingHours,
    step_minutes: u32,
    duration_minutes: u32,
    taken: &BTreeSet<NaiveDateTime>,
) -> Vec<NaiveDateTime> {
    if step_minutes == 0 {
        return vec![];
    }

    let step = Duration::minutes(i64::from(step_minutes));
    let duration = Duration::minutes(i64::from(duration_minutes));
    let end = date.and_time(hours.end);

    let mut slots = vec![];
    let mut t = date.and_time(hours.start);
    while t + duration <= end {
        if !taken.contains(&t) {
            slots.push(t);
        }
        t += step;
    }
    slots
}

/// Local-day bounds `[00:00, next day 00:00)` used to bucket taken slots.
pub fn local_day_bounds(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = date.and_time(chrono::NaiveTime::MIN);
    (start, start + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn hours(start: &str, end: &str) -> WorkingHours {
        WorkingHours::parse(start, end).unwrap()
    }

    fn local(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_full_day_fifteen_minute_step() {
        let slots = generate_start_slots(day(), &hours("09:00", "19:00"), 15, 30, &BTreeSet::new());
        assert_eq!(slots.first(), Some(&local(9, 0)));
        // last start must leave 30 minutes before 19:00
        assert_eq!(slots.last(), Some(&local(18, 30)));
        assert_eq!(slots.len(), 39);
        assert!(slots.iter().all(|t| t.minute() % 15 == 0));
        assert!(slots.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_taken_starts_are_excluded() {
        let taken: BTreeSet<_> = [local(9, 0), local(9, 30)].into_iter().collect();
        let slots = generate_start_slots(day(), &hours("09:00", "10:00"), 15, 15, &taken);
        assert_eq!(slots, vec![local(9, 15), local(9, 45)]);
    }

    #[test]
    fn test_duration_longer_than_day_yields_nothing() {
        let slots = generate_start_slots(day(), &hours("09:00", "10:00"), 15, 90, &BTreeSet::new());
        assert!(slots.is_empty());
    }

    #[test]
    fn test_exact_fit_is_included() {
        let slots = generate_start_slots(day(), &hours("09:00", "10:00"), 60, 60, &BTreeSet::new());
        assert_eq!(slots, vec![local(9, 0)]);
    }

    #[test]
    fn test_zero_step_yields_nothing() {
        let slots = generate_start_slots(day(), &hours("09:00", "19:00"), 0, 30, &BTreeSet::new());
        assert!(slots.is_empty());
    }

    #[test]
    fn test_inverted_hours_yield_nothing() {
        let slots = generate_start_slots(day(), &hours("19:00", "09:00"), 15, 30, &BTreeSet::new());
        assert!(slots.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let taken: BTreeSet<_> = [local(11, 0)].into_iter().collect();
        let h = hours("09:00", "19:00");
        let a = generate_start_slots(day(), &h, 15, 45, &taken);
        let b = generate_start_slots(day(), &h, 15, 45, &taken);
        assert_eq!(a, b);
    }

    #[test]
    fn test_local_day_bounds() {
        let (start, end) = local_day_bounds(day());
        assert_eq!(start, local(0, 0));
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 3, 3).unwrap().and_hms_opt(0, 0, 0).unwrap());
    }
}
