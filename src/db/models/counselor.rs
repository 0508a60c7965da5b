//! Counselor profiles and weekly availability rules.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A recurring weekly window during which a counselor accepts bookings.
///
/// `day_of_week` uses the UTC weekday with 0 = Sunday. Times are "HH:MM"
/// wall-clock strings; an `end_time` earlier than `start_time` means the
/// window crosses midnight into the next day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailabilityRule {
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
}

impl AvailabilityRule {
    /// Window as minutes since the rule day's midnight. The end is extended
    /// past 1440 when the rule crosses midnight.
    pub fn window_minutes(&self) -> Option<(u32, u32)> {
        let start = parse_hhmm(&self.start_time)?;
        let end = parse_hhmm(&self.end_time)?;
        if end < start {
            Some((start, end + 24 * 60))
        } else {
            Some((start, end))
        }
    }
}

/// Parse "HH:MM" into minutes since midnight.
pub fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let hours: u32 = h.parse().ok()?;
    let minutes: u32 = m.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Counselor {
    pub id: String,
    pub user_id: String,
    pub full_name: String,
    pub bio: Option<String>,
    pub specialization: Option<String>,
    /// JSON array of `AvailabilityRule`
    pub availability: String,
    pub slot_duration: i64,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Counselor {
    pub fn rules(&self) -> Vec<AvailabilityRule> {
        parse_rules(&self.availability)
    }
}

/// Helper to parse availability rules JSON from the database
pub fn parse_rules(json: &str) -> Vec<AvailabilityRule> {
    serde_json::from_str(json).unwrap_or_default()
}

/// Helper to serialize availability rules to JSON for the database
pub fn serialize_rules(rules: &[AvailabilityRule]) -> String {
    serde_json::to_string(rules).unwrap_or_else(|_| "[]".to_string())
}

/// Counselor as exposed through the API (no owning-user internals).
#[derive(Debug, Clone, Serialize)]
pub struct CounselorResponse {
    pub id: String,
    pub full_name: String,
    pub bio: Option<String>,
    pub specialization: Option<String>,
    pub availability: Vec<AvailabilityRule>,
    pub slot_duration: i64,
    pub is_active: bool,
}

impl From<Counselor> for CounselorResponse {
    fn from(c: Counselor) -> Self {
        let availability = c.rules();
        Self {
            id: c.id,
            full_name: c.full_name,
            bio: c.bio,
            specialization: c.specialization,
            availability,
            slot_duration: c.slot_duration,
            is_active: c.is_active,
        }
    }
}

/// Request to create a counselor profile, binding it to an existing user
#[derive(Debug, Deserialize)]
pub struct CreateCounselorRequest {
    pub user_id: String,
    pub full_name: String,
    pub bio: Option<String>,
    pub specialization: Option<String>,
    #[serde(default)]
    pub availability: Vec<AvailabilityRule>,
    pub slot_duration: i64,
}

/// Request to update a counselor profile (admin)
#[derive(Debug, Deserialize)]
pub struct UpdateCounselorRequest {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub specialization: Option<String>,
    pub slot_duration: Option<i64>,
    pub is_active: Option<bool>,
}

/// Request to replace the whole availability rule set
#[derive(Debug, Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub availability: Vec<AvailabilityRule>,
}
