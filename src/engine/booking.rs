//! Booking transaction coordinator and appointment status transitions.
//!
//! Slot lists handed to clients are advisory and can go stale; the only
//! authoritative overlap check is the one re-run here, inside the same
//! transaction that inserts the appointment.

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::db::appointment::{format_utc, parse_utc};
use crate::db::{Appointment, AppointmentStatus, Counselor, User};
use crate::DbPool;

/// Book a slot for a client with a counselor.
///
/// The conflict re-check and the insert share one transaction, so two racing
/// requests for the same slot serialize at the storage layer and only one
/// observes "no conflict". The loser gets a Conflict the client handles by
/// refreshing the slot list.
pub async fn book_appointment(
    pool: &DbPool,
    client_id: &str,
    counselor_id: &str,
    start_time: &str,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<Appointment, ApiError> {
    let start = parse_utc(start_time).ok_or_else(|| {
        ApiError::validation_field("start_time", "Must be a UTC timestamp (YYYY-MM-DDTHH:MM:SSZ)")
    })?;
    if start <= now {
        return Err(ApiError::validation_field(
            "start_time",
            "Must be in the future",
        ));
    }

    let counselor: Option<Counselor> = sqlx::query_as("SELECT * FROM counselors WHERE id = ?")
        .bind(counselor_id)
        .fetch_optional(pool)
        .await?;
    let counselor = match counselor {
        Some(c) if c.is_active => c,
        _ => return Err(ApiError::not_found("Counselor not found")),
    };

    // end_time is frozen at booking time; later slot_duration changes do not
    // touch existing appointments
    let end = start + Duration::minutes(counselor.slot_duration);
    let start_s = format_utc(start);
    let end_s = format_utc(end);

    let mut tx = pool.begin().await?;

    // Touch the counselor row first so the transaction holds the write lock
    // before the conflict check: no other booking for this database can
    // interleave between the check and the insert.
    sqlx::query("UPDATE counselors SET updated_at = updated_at WHERE id = ?")
        .bind(counselor_id)
        .execute(&mut *tx)
        .await?;

    // Half-open interval overlap against every live appointment of this
    // counselor: existing.start < candidate.end AND existing.end > candidate.start
    let conflict: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT id FROM appointments
        WHERE counselor_id = ?
          AND status NOT IN ('cancelled_by_user', 'cancelled_by_counselor')
          AND start_time < ?
          AND end_time > ?
        LIMIT 1
        "#,
    )
    .bind(counselor_id)
    .bind(&end_s)
    .bind(&start_s)
    .fetch_optional(&mut *tx)
    .await?;

    if conflict.is_some() {
        return Err(ApiError::conflict(
            "This slot is no longer available. Refresh the slot list and pick another time.",
        ));
    }

    let appointment = Appointment {
        id: Uuid::new_v4().to_string(),
        user_id: client_id.to_string(),
        counselor_id: counselor_id.to_string(),
        start_time: start_s,
        end_time: end_s,
        status: AppointmentStatus::Booked.to_string(),
        notes,
        created_at: format_utc(now),
        updated_at: format_utc(now),
    };

    sqlx::query(
        r#"
        INSERT INTO appointments (id, user_id, counselor_id, start_time, end_time, status, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&appointment.id)
    .bind(&appointment.user_id)
    .bind(&appointment.counselor_id)
    .bind(&appointment.start_time)
    .bind(&appointment.end_time)
    .bind(&appointment.status)
    .bind(&appointment.notes)
    .bind(&appointment.created_at)
    .bind(&appointment.updated_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        appointment_id = %appointment.id,
        counselor_id = %appointment.counselor_id,
        start_time = %appointment.start_time,
        "Appointment booked"
    );

    Ok(appointment)
}

/// Cancel an appointment on behalf of the client or the counselor.
///
/// The requester determines the terminal status: the owning client yields
/// `cancelled_by_user`, the counselor's owning user `cancelled_by_counselor`.
/// Anyone else is rejected, admins included; support operations go through
/// the status escape hatch instead.
pub async fn cancel_appointment(
    pool: &DbPool,
    appointment_id: &str,
    requester_id: &str,
    now: DateTime<Utc>,
) -> Result<Appointment, ApiError> {
    let appointment: Option<Appointment> =
        sqlx::query_as("SELECT * FROM appointments WHERE id = ?")
            .bind(appointment_id)
            .fetch_optional(pool)
            .await?;
    let appointment = appointment.ok_or_else(|| ApiError::not_found("Appointment not found"))?;

    let counselor_owner: Option<(String,)> =
        sqlx::query_as("SELECT user_id FROM counselors WHERE id = ?")
            .bind(&appointment.counselor_id)
            .fetch_optional(pool)
            .await?;

    let new_status = if requester_id == appointment.user_id {
        AppointmentStatus::CancelledByUser
    } else if counselor_owner.map(|(owner,)| owner) == Some(requester_id.to_string()) {
        AppointmentStatus::CancelledByCounselor
    } else {
        return Err(ApiError::forbidden(
            "Only the client or the counselor may cancel this appointment",
        ));
    };

    match appointment.effective_status(now) {
        AppointmentStatus::Booked | AppointmentStatus::Confirmed => {}
        AppointmentStatus::Completed => {
            return Err(ApiError::invalid_state(
                "Appointment has already completed",
            ))
        }
        _ => {
            return Err(ApiError::invalid_state(
                "Appointment has already been cancelled",
            ))
        }
    }

    // Guarded update: a concurrent transition between the read above and
    // this write leaves rows_affected at zero.
    let result = sqlx::query(
        "UPDATE appointments SET status = ?, updated_at = ? WHERE id = ? AND status IN ('booked', 'confirmed')",
    )
    .bind(new_status.to_string())
    .bind(format_utc(now))
    .bind(appointment_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::invalid_state(
            "Appointment is no longer in a cancellable state",
        ));
    }

    info!(
        appointment_id = %appointment_id,
        status = %new_status,
        "Appointment cancelled"
    );

    let mut cancelled = appointment;
    cancelled.status = new_status.to_string();
    cancelled.updated_at = format_utc(now);
    Ok(cancelled)
}

/// Set an appointment's status directly.
///
/// Admins may set any valid enum value (the support escape hatch). The
/// counselor owning the appointment's profile may only confirm a booked
/// appointment. Values outside the enum are rejected either way.
pub async fn update_status(
    pool: &DbPool,
    appointment_id: &str,
    actor: &User,
    new_status: &str,
    now: DateTime<Utc>,
) -> Result<Appointment, ApiError> {
    let status: AppointmentStatus = new_status.parse().map_err(|_| {
        ApiError::validation_field(
            "status",
            "Must be one of: booked, confirmed, completed, cancelled_by_user, cancelled_by_counselor",
        )
    })?;

    let appointment: Option<Appointment> =
        sqlx::query_as("SELECT * FROM appointments WHERE id = ?")
            .bind(appointment_id)
            .fetch_optional(pool)
            .await?;
    let appointment = appointment.ok_or_else(|| ApiError::not_found("Appointment not found"))?;

    if !actor.is_admin {
        let counselor_owner: Option<(String,)> =
            sqlx::query_as("SELECT user_id FROM counselors WHERE id = ?")
                .bind(&appointment.counselor_id)
                .fetch_optional(pool)
                .await?;
        let owns_profile = counselor_owner.map(|(owner,)| owner) == Some(actor.id.clone());

        let confirming = owns_profile
            && status == AppointmentStatus::Confirmed
            && appointment.status_enum() == AppointmentStatus::Booked;
        if !confirming {
            return Err(ApiError::forbidden(
                "Only an admin may set this appointment status",
            ));
        }
    }

    sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.to_string())
        .bind(format_utc(now))
        .bind(appointment_id)
        .execute(pool)
        .await?;

    info!(
        appointment_id = %appointment_id,
        status = %status,
        actor = %actor.id,
        "Appointment status updated"
    );

    let mut updated = appointment;
    updated.status = status.to_string();
    updated.updated_at = format_utc(now);
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;
    use crate::db::{self, serialize_rules, AvailabilityRule};
    use chrono::TimeZone;
    use futures::future::join_all;

    async fn test_pool(dir: &tempfile::TempDir) -> DbPool {
        db::init(dir.path()).await.unwrap()
    }

    async fn seed_user(pool: &DbPool, id: &str, is_admin: bool) -> User {
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, is_admin) VALUES (?, ?, '', ?, ?)",
        )
        .bind(id)
        .bind(format!("{}@example.com", id))
        .bind(id)
        .bind(is_admin)
        .execute(pool)
        .await
        .unwrap();

        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn seed_counselor(pool: &DbPool, id: &str, user_id: &str) {
        let rules = vec![AvailabilityRule {
            day_of_week: 1,
            start_time: "09:00".to_string(),
            end_time: "17:00".to_string(),
        }];
        sqlx::query(
            r#"
            INSERT INTO counselors (id, user_id, full_name, availability, slot_duration, is_active, created_at, updated_at)
            VALUES (?, ?, 'Dana Reeve', ?, 60, 1, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(serialize_rules(&rules))
        .execute(pool)
        .await
        .unwrap();
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn booking_creates_a_booked_appointment() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        seed_user(&pool, "client", false).await;
        seed_user(&pool, "cuser", false).await;
        seed_counselor(&pool, "c1", "cuser").await;

        let appt =
            book_appointment(&pool, "client", "c1", "2026-03-09T10:00:00Z", None, now())
                .await
                .unwrap();

        assert_eq!(appt.status_enum(), AppointmentStatus::Booked);
        assert_eq!(appt.start_time, "2026-03-09T10:00:00Z");
        // end frozen at start + slot_duration
        assert_eq!(appt.end_time, "2026-03-09T11:00:00Z");
    }

    #[tokio::test]
    async fn overlapping_booking_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        seed_user(&pool, "a", false).await;
        seed_user(&pool, "b", false).await;
        seed_user(&pool, "cuser", false).await;
        seed_counselor(&pool, "c1", "cuser").await;

        book_appointment(&pool, "a", "c1", "2026-03-09T10:00:00Z", None, now())
            .await
            .unwrap();

        // Same slot
        let err = book_appointment(&pool, "b", "c1", "2026-03-09T10:00:00Z", None, now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);

        // Partial overlap still conflicts (half-open intervals)
        let err = book_appointment(&pool, "b", "c1", "2026-03-09T10:30:00Z", None, now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);

        // Adjacent slot is fine: [10:00, 11:00) and [11:00, 12:00) do not overlap
        book_appointment(&pool, "b", "c1", "2026-03-09T11:00:00Z", None, now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_slot_can_be_rebooked() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        seed_user(&pool, "a", false).await;
        seed_user(&pool, "b", false).await;
        seed_user(&pool, "cuser", false).await;
        seed_counselor(&pool, "c1", "cuser").await;

        let appt = book_appointment(&pool, "a", "c1", "2026-03-09T10:00:00Z", None, now())
            .await
            .unwrap();
        cancel_appointment(&pool, &appt.id, "a", now()).await.unwrap();

        book_appointment(&pool, "b", "c1", "2026-03-09T10:00:00Z", None, now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_bookings_for_one_slot_admit_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        for i in 0..8 {
            seed_user(&pool, &format!("client{}", i), false).await;
        }
        seed_user(&pool, "cuser", false).await;
        seed_counselor(&pool, "c1", "cuser").await;

        let attempts = (0..8).map(|i| {
            let pool = pool.clone();
            async move {
                book_appointment(
                    &pool,
                    &format!("client{}", i),
                    "c1",
                    "2026-03-09T10:00:00Z",
                    None,
                    now(),
                )
                .await
            }
        });
        let results = join_all(attempts).await;

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.code() == ErrorCode::Conflict))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(conflicts, 7);

        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM appointments WHERE counselor_id = 'c1' AND status NOT IN ('cancelled_by_user', 'cancelled_by_counselor')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn booking_unknown_or_inactive_counselor_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        seed_user(&pool, "client", false).await;
        seed_user(&pool, "cuser", false).await;
        seed_counselor(&pool, "c1", "cuser").await;
        sqlx::query("UPDATE counselors SET is_active = 0 WHERE id = 'c1'")
            .execute(&pool)
            .await
            .unwrap();

        let err = book_appointment(&pool, "client", "ghost", "2026-03-09T10:00:00Z", None, now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err = book_appointment(&pool, "client", "c1", "2026-03-09T10:00:00Z", None, now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn cancel_is_owner_only_and_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        seed_user(&pool, "client", false).await;
        seed_user(&pool, "cuser", false).await;
        seed_user(&pool, "stranger", false).await;
        seed_counselor(&pool, "c1", "cuser").await;

        let appt = book_appointment(&pool, "client", "c1", "2026-03-09T10:00:00Z", None, now())
            .await
            .unwrap();

        let err = cancel_appointment(&pool, &appt.id, "stranger", now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        let cancelled = cancel_appointment(&pool, &appt.id, "client", now())
            .await
            .unwrap();
        assert_eq!(
            cancelled.status_enum(),
            AppointmentStatus::CancelledByUser
        );

        // Cancelling again is InvalidState, not success
        let err = cancel_appointment(&pool, &appt.id, "client", now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[tokio::test]
    async fn counselor_cancel_marks_cancelled_by_counselor() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        seed_user(&pool, "client", false).await;
        seed_user(&pool, "cuser", false).await;
        seed_counselor(&pool, "c1", "cuser").await;

        let appt = book_appointment(&pool, "client", "c1", "2026-03-09T10:00:00Z", None, now())
            .await
            .unwrap();
        let cancelled = cancel_appointment(&pool, &appt.id, "cuser", now())
            .await
            .unwrap();
        assert_eq!(
            cancelled.status_enum(),
            AppointmentStatus::CancelledByCounselor
        );
    }

    #[tokio::test]
    async fn status_escape_hatch_is_admin_gated() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        let client = seed_user(&pool, "client", false).await;
        let admin = seed_user(&pool, "admin", true).await;
        let cuser = seed_user(&pool, "cuser", false).await;
        seed_counselor(&pool, "c1", "cuser").await;

        let appt = book_appointment(&pool, "client", "c1", "2026-03-09T10:00:00Z", None, now())
            .await
            .unwrap();

        // Out-of-enum value rejected before any permission check
        let err = update_status(&pool, &appt.id, &admin, "no_show", now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        // Client may not drive the escape hatch
        let err = update_status(&pool, &appt.id, &client, "confirmed", now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        // The owning counselor may confirm a booked appointment
        let confirmed = update_status(&pool, &appt.id, &cuser, "confirmed", now())
            .await
            .unwrap();
        assert_eq!(confirmed.status_enum(), AppointmentStatus::Confirmed);

        // ...but may not do anything else
        let err = update_status(&pool, &appt.id, &cuser, "completed", now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);

        // Admin may set any enum value
        let done = update_status(&pool, &appt.id, &admin, "completed", now())
            .await
            .unwrap();
        assert_eq!(done.status_enum(), AppointmentStatus::Completed);
    }
}
