//! Appointment model and status lifecycle.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Storage format for appointment instants. Fixed-width UTC so that string
/// comparison in SQL is chronological comparison.
pub const TIME_FMT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format_utc(t: DateTime<Utc>) -> String {
    t.format(TIME_FMT).to_string()
}

pub fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIME_FMT)
        .ok()
        .map(|n| n.and_utc())
}

/// Appointment lifecycle status.
///
/// `Completed` is normally a read-time projection (see
/// [`Appointment::effective_status`]); it is only stored when an admin sets
/// it explicitly through the status escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked,
    Confirmed,
    Completed,
    CancelledByUser,
    CancelledByCounselor,
}

impl AppointmentStatus {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::CancelledByUser | AppointmentStatus::CancelledByCounselor
        )
    }

    /// Statuses that count toward the counselor overlap invariant.
    pub fn is_live(&self) -> bool {
        !self.is_cancelled()
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppointmentStatus::Booked => "booked",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::CancelledByUser => "cancelled_by_user",
            AppointmentStatus::CancelledByCounselor => "cancelled_by_counselor",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booked" => Ok(AppointmentStatus::Booked),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled_by_user" => Ok(AppointmentStatus::CancelledByUser),
            "cancelled_by_counselor" => Ok(AppointmentStatus::CancelledByCounselor),
            _ => Err(format!("Unknown appointment status: {}", s)),
        }
    }
}

impl From<String> for AppointmentStatus {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(AppointmentStatus::Booked)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub id: String,
    pub user_id: String,
    pub counselor_id: String,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Appointment {
    pub fn status_enum(&self) -> AppointmentStatus {
        AppointmentStatus::from(self.status.clone())
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        parse_utc(&self.start_time)
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        parse_utc(&self.end_time)
    }

    /// Status with the wall-clock `completed` projection applied: a booked
    /// or confirmed appointment whose end has passed reads as completed.
    /// Never written back to storage.
    pub fn effective_status(&self, now: DateTime<Utc>) -> AppointmentStatus {
        let status = self.status_enum();
        match status {
            AppointmentStatus::Booked | AppointmentStatus::Confirmed => match self.end() {
                Some(end) if now > end => AppointmentStatus::Completed,
                _ => status,
            },
            _ => status,
        }
    }

    /// Live-session eligibility: confirmed and currently inside the
    /// appointment window, inclusive of both ends. Evaluated at query time,
    /// never cached.
    pub fn can_join(&self, now: DateTime<Utc>) -> bool {
        if self.status_enum() != AppointmentStatus::Confirmed {
            return false;
        }
        match (self.start(), self.end()) {
            (Some(start), Some(end)) => now >= start && now <= end,
            _ => false,
        }
    }
}

/// Appointment as exposed through the API, with the derived status applied.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentResponse {
    pub id: String,
    pub user_id: String,
    pub counselor_id: String,
    pub start_time: String,
    pub end_time: String,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: String,
}

impl AppointmentResponse {
    pub fn project(appointment: Appointment, now: DateTime<Utc>) -> Self {
        let status = appointment.effective_status(now);
        Self {
            id: appointment.id,
            user_id: appointment.user_id,
            counselor_id: appointment.counselor_id,
            start_time: appointment.start_time,
            end_time: appointment.end_time,
            status,
            notes: appointment.notes,
            created_at: appointment.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BookAppointmentRequest {
    pub counselor_id: String,
    /// Desired slot start, `YYYY-MM-DDTHH:MM:SSZ`
    pub start_time: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppointmentStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct JoinEligibilityResponse {
    pub can_join: bool,
    pub status: AppointmentStatus,
    pub start_time: String,
    pub end_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn appointment(status: &str, start: &str, end: &str) -> Appointment {
        Appointment {
            id: "a1".to_string(),
            user_id: "u1".to_string(),
            counselor_id: "c1".to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            status: status.to_string(),
            notes: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn status_round_trips() {
        for s in [
            "booked",
            "confirmed",
            "completed",
            "cancelled_by_user",
            "cancelled_by_counselor",
        ] {
            let status: AppointmentStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!("no_show".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn time_format_round_trips_and_orders() {
        let t = Utc.with_ymd_and_hms(2026, 3, 9, 14, 30, 0).unwrap();
        let s = format_utc(t);
        assert_eq!(s, "2026-03-09T14:30:00Z");
        assert_eq!(parse_utc(&s), Some(t));

        // String order must agree with time order
        let later = format_utc(t + chrono::Duration::minutes(45));
        assert!(later > s);
    }

    #[test]
    fn effective_status_projects_completed() {
        let appt = appointment("confirmed", "2026-03-09T14:00:00Z", "2026-03-09T15:00:00Z");

        let during = Utc.with_ymd_and_hms(2026, 3, 9, 14, 30, 0).unwrap();
        assert_eq!(appt.effective_status(during), AppointmentStatus::Confirmed);

        let after = Utc.with_ymd_and_hms(2026, 3, 9, 16, 0, 0).unwrap();
        assert_eq!(appt.effective_status(after), AppointmentStatus::Completed);
    }

    #[test]
    fn cancelled_never_projects_to_completed() {
        let appt = appointment(
            "cancelled_by_user",
            "2026-03-09T14:00:00Z",
            "2026-03-09T15:00:00Z",
        );
        let after = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(
            appt.effective_status(after),
            AppointmentStatus::CancelledByUser
        );
    }

    #[test]
    fn join_requires_confirmed_and_window() {
        let appt = appointment("confirmed", "2026-03-09T14:00:00Z", "2026-03-09T15:00:00Z");

        let before = Utc.with_ymd_and_hms(2026, 3, 9, 13, 59, 59).unwrap();
        let at_start = Utc.with_ymd_and_hms(2026, 3, 9, 14, 0, 0).unwrap();
        let at_end = Utc.with_ymd_and_hms(2026, 3, 9, 15, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 9, 15, 0, 1).unwrap();

        assert!(!appt.can_join(before));
        assert!(appt.can_join(at_start));
        assert!(appt.can_join(at_end));
        assert!(!appt.can_join(after));

        let booked = appointment("booked", "2026-03-09T14:00:00Z", "2026-03-09T15:00:00Z");
        assert!(!booked.can_join(at_start));
    }
}
