//! Appointment endpoints: slot listing, booking, cancellation, status.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, NaiveTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::db::appointment::{format_utc, parse_utc};
use crate::db::{
    Appointment, AppointmentResponse, BookAppointmentRequest, Counselor,
    JoinEligibilityResponse, UpdateAppointmentStatusRequest, User,
};
use crate::engine::{booking, slots};
use crate::notifications::{spawn_appointment_mails, AppointmentEvent, AppointmentMail};
use crate::AppState;

use super::error::ApiError;
use super::validation::validate_date;

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: String,
}

/// List a counselor's free slots for a given UTC date.
///
/// The list is advisory: another client can take a slot between this read
/// and a booking attempt, which then fails with a Conflict.
pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    Path(counselor_id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let date =
        validate_date(&query.date).map_err(|e| ApiError::validation_field("date", e))?;

    let counselor: Option<Counselor> =
        sqlx::query_as("SELECT * FROM counselors WHERE id = ? AND is_active = 1")
            .bind(&counselor_id)
            .fetch_optional(&state.db)
            .await?;
    let counselor = counselor.ok_or_else(|| ApiError::not_found("Counselor not found"))?;

    // Two-day window so slots from a midnight-crossing rule compare against
    // the bookings they can actually collide with
    let window_start = date.and_time(NaiveTime::MIN).and_utc();
    let window_end = window_start + Duration::days(2);
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT start_time FROM appointments
        WHERE counselor_id = ?
          AND status NOT IN ('cancelled_by_user', 'cancelled_by_counselor')
          AND start_time >= ? AND start_time < ?
        "#,
    )
    .bind(&counselor_id)
    .bind(format_utc(window_start))
    .bind(format_utc(window_end))
    .fetch_all(&state.db)
    .await?;

    let booked: HashSet<_> = rows.iter().filter_map(|(s,)| parse_utc(s)).collect();
    let free = slots::generate_slots(&counselor, date, &booked, Utc::now());

    Ok(Json(free.into_iter().map(format_utc).collect()))
}

/// Book a slot with a counselor
pub async fn book_appointment(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<AppointmentResponse>), ApiError> {
    let now = Utc::now();
    let appointment = booking::book_appointment(
        &state.db,
        &user.id,
        &request.counselor_id,
        &request.start_time,
        request.notes,
        now,
    )
    .await?;

    // Committed; notification failures must not affect the response
    notify_parties(&state, &appointment, &user, AppointmentEvent::Booked).await;

    Ok((
        StatusCode::CREATED,
        Json(AppointmentResponse::project(appointment, now)),
    ))
}

/// List the requester's appointments, on either side of the table
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<AppointmentResponse>>, ApiError> {
    let appointments: Vec<Appointment> = sqlx::query_as(
        r#"
        SELECT * FROM appointments
        WHERE user_id = ?
           OR counselor_id IN (SELECT id FROM counselors WHERE user_id = ?)
        ORDER BY start_time DESC
        "#,
    )
    .bind(&user.id)
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;

    let now = Utc::now();
    Ok(Json(
        appointments
            .into_iter()
            .map(|a| AppointmentResponse::project(a, now))
            .collect(),
    ))
}

/// Fetch one appointment (participant or admin)
pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    let appointment = load_for_participant(&state, &user, &id).await?;
    Ok(Json(AppointmentResponse::project(appointment, Utc::now())))
}

/// Cancel an appointment as the client or the counselor
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    let now = Utc::now();
    let appointment = booking::cancel_appointment(&state.db, &id, &user.id, now).await?;

    notify_parties(&state, &appointment, &user, AppointmentEvent::Cancelled).await;

    Ok(Json(AppointmentResponse::project(appointment, now)))
}

/// Set an appointment's status directly (admin, or counselor confirming)
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(request): Json<UpdateAppointmentStatusRequest>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    let now = Utc::now();
    let appointment =
        booking::update_status(&state.db, &id, &user, &request.status, now).await?;
    Ok(Json(AppointmentResponse::project(appointment, now)))
}

/// Live-session eligibility, evaluated at query time
pub async fn join_eligibility(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<JoinEligibilityResponse>, ApiError> {
    let appointment = load_for_participant(&state, &user, &id).await?;
    let now = Utc::now();

    Ok(Json(JoinEligibilityResponse {
        can_join: appointment.can_join(now),
        status: appointment.effective_status(now),
        start_time: appointment.start_time,
        end_time: appointment.end_time,
    }))
}

/// Load an appointment the requester participates in (or administers)
async fn load_for_participant(
    state: &AppState,
    user: &User,
    appointment_id: &str,
) -> Result<Appointment, ApiError> {
    let appointment: Option<Appointment> =
        sqlx::query_as("SELECT * FROM appointments WHERE id = ?")
            .bind(appointment_id)
            .fetch_optional(&state.db)
            .await?;
    let appointment = appointment.ok_or_else(|| ApiError::not_found("Appointment not found"))?;

    if appointment.user_id == user.id || user.is_admin {
        return Ok(appointment);
    }

    let counselor_owner: Option<(String,)> =
        sqlx::query_as("SELECT user_id FROM counselors WHERE id = ?")
            .bind(&appointment.counselor_id)
            .fetch_optional(&state.db)
            .await?;
    if counselor_owner.map(|(owner,)| owner) == Some(user.id.clone()) {
        return Ok(appointment);
    }

    Err(ApiError::forbidden(
        "You are not a participant in this appointment",
    ))
}

/// Resolve both parties' addresses and fire the side-channel mails.
/// Any lookup problem is logged and swallowed: the transaction already
/// committed and the response must not change.
async fn notify_parties(
    state: &Arc<AppState>,
    appointment: &Appointment,
    requester: &User,
    event: AppointmentEvent,
) {
    let (Some(start), Some(end)) = (appointment.start(), appointment.end()) else {
        tracing::error!(appointment_id = %appointment.id, "Unparseable appointment window, skipping notification");
        return;
    };

    let client: Option<User> = if requester.id == appointment.user_id {
        Some(requester.clone())
    } else {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&appointment.user_id)
            .fetch_optional(&state.db)
            .await
            .unwrap_or(None)
    };

    let counselor: Option<Counselor> = sqlx::query_as("SELECT * FROM counselors WHERE id = ?")
        .bind(&appointment.counselor_id)
        .fetch_optional(&state.db)
        .await
        .unwrap_or(None);
    let counselor_owner: Option<User> = match &counselor {
        Some(c) => sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&c.user_id)
            .fetch_optional(&state.db)
            .await
            .unwrap_or(None),
        None => None,
    };

    let (Some(client), Some(counselor), Some(owner)) = (client, counselor, counselor_owner) else {
        tracing::error!(appointment_id = %appointment.id, "Could not resolve notification recipients");
        return;
    };

    spawn_appointment_mails(
        state.notifier.clone(),
        AppointmentMail {
            event,
            appointment_id: appointment.id.clone(),
            client_name: client.name,
            client_email: client.email,
            counselor_name: counselor.full_name,
            counselor_email: owner.email,
            start_time: start,
            end_time: end,
        },
    );
}
