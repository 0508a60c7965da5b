//! Slot generation: weekly availability rules to bookable start times.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::HashSet;

use crate::db::Counselor;

/// Generate the ordered free start-times for a counselor on a UTC date.
///
/// Pure function of its inputs: the same rules, date, bookings, and `now`
/// always yield the same sequence. `booked_starts` holds the start instants
/// of the counselor's non-cancelled appointments; matching is exact since
/// every booked appointment starts on a slot boundary by construction.
///
/// A date whose weekday matches no rule yields an empty sequence: closed
/// that day, not an error. An inactive counselor always yields an empty
/// sequence. Rules whose end is earlier than their start cross midnight and
/// extend into the next day; a window not evenly divisible by the slot
/// duration loses its trailing partial slot.
pub fn generate_slots(
    counselor: &Counselor,
    date: NaiveDate,
    booked_starts: &HashSet<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    if !counselor.is_active || counselor.slot_duration <= 0 {
        return Vec::new();
    }

    let weekday = date.weekday().num_days_from_sunday() as u8;
    let midnight = date.and_time(NaiveTime::MIN).and_utc();
    let duration = counselor.slot_duration as u32;

    let mut slots = Vec::new();
    for rule in counselor.rules() {
        if rule.day_of_week != weekday {
            continue;
        }
        let Some((start_min, end_min)) = rule.window_minutes() else {
            continue;
        };

        let mut offset = start_min;
        while offset + duration <= end_min {
            let slot = midnight + Duration::minutes(offset as i64);
            if slot > now && !booked_starts.contains(&slot) {
                slots.push(slot);
            }
            offset += duration;
        }
    }

    // Overlapping rules for one day are rejected on write, but stored data
    // predating that check must not emit duplicate start-times.
    slots.sort();
    slots.dedup();
    slots
}
