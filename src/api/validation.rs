//! Input validation for API requests.
//!
//! For collecting multiple validation errors and returning them as an
//! ApiError, use the `ValidationErrorBuilder` from the `error` module.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::db::counselor::parse_hhmm;
use crate::db::AvailabilityRule;

use super::error::{ApiError, ValidationErrorBuilder};

lazy_static! {
    /// Regex for validating email addresses (pragmatic, not RFC-complete)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"
    ).unwrap();
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

/// Validate a display name
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name is required".to_string());
    }
    if name.len() > 100 {
        return Err("Name is too long (max 100 characters)".to_string());
    }
    Ok(())
}

/// Parse a calendar date in YYYY-MM-DD form
pub fn validate_date(date: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| "Date must be in YYYY-MM-DD format".to_string())
}

/// Validate an id is a UUID
pub fn validate_uuid(id: &str) -> Result<(), String> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| "Invalid id format".to_string())
}

/// Validate a replacement availability rule set.
///
/// Each rule must carry a real weekday and well-formed HH:MM bounds, and
/// rules for the same day must not overlap: two overlapping windows would
/// make the slot generator emit the same start-time twice.
pub fn validate_availability_rules(rules: &[AvailabilityRule]) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    for (i, rule) in rules.iter().enumerate() {
        if rule.day_of_week > 6 {
            errors.add(
                format!("availability[{}].day_of_week", i),
                "Must be between 0 (Sunday) and 6 (Saturday)",
            );
        }
        if parse_hhmm(&rule.start_time).is_none() {
            errors.add(
                format!("availability[{}].start_time", i),
                "Must be a HH:MM time",
            );
        }
        if parse_hhmm(&rule.end_time).is_none() {
            errors.add(
                format!("availability[{}].end_time", i),
                "Must be a HH:MM time",
            );
        }
    }
    errors.finish()?;

    let mut errors = ValidationErrorBuilder::new();
    for (i, a) in rules.iter().enumerate() {
        for (j, b) in rules.iter().enumerate().skip(i + 1) {
            if a.day_of_week != b.day_of_week {
                continue;
            }
            let (Some((a_start, a_end)), Some((b_start, b_end))) =
                (a.window_minutes(), b.window_minutes())
            else {
                continue;
            };
            if a_start < b_end && b_start < a_end {
                errors.add(
                    format!("availability[{}]", j),
                    format!("Overlaps the rule at index {} on the same day", i),
                );
            }
        }
    }
    errors.finish()
}

/// Validate a slot duration in minutes
pub fn validate_slot_duration(minutes: i64) -> Result<(), String> {
    if minutes <= 0 {
        return Err("Slot duration must be a positive number of minutes".to_string());
    }
    if minutes > 24 * 60 {
        return Err("Slot duration cannot exceed 24 hours".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(day: u8, start: &str, end: &str) -> AvailabilityRule {
        AvailabilityRule {
            day_of_week: day,
            start_time: start.to_string(),
            end_time: end.to_string(),
        }
    }

    #[test]
    fn email_validation() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("not-an-email").is_err());
    }

    #[test]
    fn date_validation() {
        assert!(validate_date("2026-03-09").is_ok());
        assert!(validate_date("03/09/2026").is_err());
        assert!(validate_date("2026-13-01").is_err());
    }

    #[test]
    fn accepts_disjoint_rules() {
        let rules = vec![
            rule(1, "09:00", "12:00"),
            rule(1, "13:00", "17:00"),
            rule(2, "09:00", "12:00"),
        ];
        assert!(validate_availability_rules(&rules).is_ok());
    }

    #[test]
    fn rejects_overlapping_rules_on_the_same_day() {
        let rules = vec![rule(1, "09:00", "12:00"), rule(1, "11:00", "14:00")];
        assert!(validate_availability_rules(&rules).is_err());
    }

    #[test]
    fn back_to_back_rules_do_not_overlap() {
        let rules = vec![rule(1, "09:00", "12:00"), rule(1, "12:00", "15:00")];
        assert!(validate_availability_rules(&rules).is_ok());
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(validate_availability_rules(&[rule(7, "09:00", "12:00")]).is_err());
        assert!(validate_availability_rules(&[rule(1, "9am", "12:00")]).is_err());
        assert!(validate_availability_rules(&[rule(1, "09:00", "25:00")]).is_err());
    }

    #[test]
    fn midnight_crossing_rules_can_overlap_too() {
        let rules = vec![rule(5, "22:00", "02:00"), rule(5, "23:00", "23:30")];
        assert!(validate_availability_rules(&rules).is_err());
    }

    #[test]
    fn slot_duration_bounds() {
        assert!(validate_slot_duration(30).is_ok());
        assert!(validate_slot_duration(0).is_err());
        assert!(validate_slot_duration(-15).is_err());
        assert!(validate_slot_duration(25 * 60).is_err());
    }
}
