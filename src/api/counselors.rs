//! Counselor endpoints: public listing, profile management, availability.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::appointment::format_utc;
use crate::db::{
    serialize_rules, Counselor, CounselorResponse, CreateCounselorRequest,
    UpdateAvailabilityRequest, UpdateCounselorRequest, User,
};
use crate::engine::cascade;
use crate::AppState;

use super::auth::require_admin;
use super::error::ApiError;
use super::validation::{validate_availability_rules, validate_name, validate_slot_duration};

/// List active counselors
pub async fn list_counselors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CounselorResponse>>, ApiError> {
    let counselors: Vec<Counselor> =
        sqlx::query_as("SELECT * FROM counselors WHERE is_active = 1 ORDER BY full_name")
            .fetch_all(&state.db)
            .await?;

    Ok(Json(
        counselors.into_iter().map(CounselorResponse::from).collect(),
    ))
}

/// Get a single active counselor
pub async fn get_counselor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CounselorResponse>, ApiError> {
    let counselor: Option<Counselor> =
        sqlx::query_as("SELECT * FROM counselors WHERE id = ? AND is_active = 1")
            .bind(&id)
            .fetch_optional(&state.db)
            .await?;

    counselor
        .map(|c| Json(CounselorResponse::from(c)))
        .ok_or_else(|| ApiError::not_found("Counselor not found"))
}

/// Create a counselor profile bound to an existing user (admin)
pub async fn create_counselor(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(request): Json<CreateCounselorRequest>,
) -> Result<(StatusCode, Json<CounselorResponse>), ApiError> {
    require_admin(&user)?;

    if let Err(e) = validate_name(&request.full_name) {
        return Err(ApiError::validation_field("full_name", e));
    }
    if let Err(e) = validate_slot_duration(request.slot_duration) {
        return Err(ApiError::validation_field("slot_duration", e));
    }
    validate_availability_rules(&request.availability)?;

    let owner: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
        .bind(&request.user_id)
        .fetch_optional(&state.db)
        .await?;
    if owner.is_none() {
        return Err(ApiError::not_found("User not found"));
    }

    // One profile per user, enforced here since the storage layer does not
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM counselors WHERE user_id = ?")
        .bind(&request.user_id)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict(
            "This user already has a counselor profile",
        ));
    }

    let now = format_utc(Utc::now());
    let counselor = Counselor {
        id: Uuid::new_v4().to_string(),
        user_id: request.user_id,
        full_name: request.full_name,
        bio: request.bio,
        specialization: request.specialization,
        availability: serialize_rules(&request.availability),
        slot_duration: request.slot_duration,
        is_active: true,
        created_at: now.clone(),
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO counselors (id, user_id, full_name, bio, specialization, availability, slot_duration, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(&counselor.id)
    .bind(&counselor.user_id)
    .bind(&counselor.full_name)
    .bind(&counselor.bio)
    .bind(&counselor.specialization)
    .bind(&counselor.availability)
    .bind(counselor.slot_duration)
    .bind(&counselor.created_at)
    .bind(&counselor.updated_at)
    .execute(&state.db)
    .await?;

    tracing::info!(counselor_id = %counselor.id, user_id = %counselor.user_id, "Created counselor profile");

    Ok((StatusCode::CREATED, Json(CounselorResponse::from(counselor))))
}

/// Update a counselor profile (admin)
pub async fn update_counselor(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(request): Json<UpdateCounselorRequest>,
) -> Result<Json<CounselorResponse>, ApiError> {
    require_admin(&user)?;

    let counselor: Option<Counselor> = sqlx::query_as("SELECT * FROM counselors WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?;
    let mut counselor = counselor.ok_or_else(|| ApiError::not_found("Counselor not found"))?;

    if let Some(full_name) = request.full_name {
        if let Err(e) = validate_name(&full_name) {
            return Err(ApiError::validation_field("full_name", e));
        }
        counselor.full_name = full_name;
    }
    if let Some(bio) = request.bio {
        counselor.bio = Some(bio);
    }
    if let Some(specialization) = request.specialization {
        counselor.specialization = Some(specialization);
    }
    if let Some(slot_duration) = request.slot_duration {
        if let Err(e) = validate_slot_duration(slot_duration) {
            return Err(ApiError::validation_field("slot_duration", e));
        }
        // Existing appointments keep the end_time they were booked with
        counselor.slot_duration = slot_duration;
    }
    if let Some(is_active) = request.is_active {
        counselor.is_active = is_active;
    }
    counselor.updated_at = format_utc(Utc::now());

    sqlx::query(
        r#"
        UPDATE counselors
        SET full_name = ?, bio = ?, specialization = ?, slot_duration = ?, is_active = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&counselor.full_name)
    .bind(&counselor.bio)
    .bind(&counselor.specialization)
    .bind(counselor.slot_duration)
    .bind(counselor.is_active)
    .bind(&counselor.updated_at)
    .bind(&id)
    .execute(&state.db)
    .await?;

    Ok(Json(CounselorResponse::from(counselor)))
}

/// Replace a counselor's whole availability rule set (owning counselor or admin).
///
/// A plain replace: in-flight bookings need no coordination with this write
/// because the booking transaction never trusts stale availability.
pub async fn update_availability(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(request): Json<UpdateAvailabilityRequest>,
) -> Result<Json<CounselorResponse>, ApiError> {
    let counselor: Option<Counselor> = sqlx::query_as("SELECT * FROM counselors WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?;
    let mut counselor = counselor.ok_or_else(|| ApiError::not_found("Counselor not found"))?;

    if counselor.user_id != user.id {
        require_admin(&user)?;
    }

    validate_availability_rules(&request.availability)?;

    counselor.availability = serialize_rules(&request.availability);
    counselor.updated_at = format_utc(Utc::now());

    sqlx::query("UPDATE counselors SET availability = ?, updated_at = ? WHERE id = ?")
        .bind(&counselor.availability)
        .bind(&counselor.updated_at)
        .bind(&id)
        .execute(&state.db)
        .await?;

    tracing::info!(counselor_id = %id, "Replaced availability rules");

    Ok(Json(CounselorResponse::from(counselor)))
}

/// Delete a counselor profile and everything that depends on it (admin)
pub async fn delete_counselor(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<cascade::DeletionReport>, ApiError> {
    require_admin(&user)?;

    let report = cascade::delete_counselor(&state.db, &id).await?;
    Ok(Json(report))
}
