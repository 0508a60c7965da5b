//! User endpoints: self-service profile read, admin user management.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::db::appointment::format_utc;
use crate::db::{UpdateUserRequest, User, UserResponse};
use crate::engine::cascade;
use crate::AppState;

use super::auth::require_admin;
use super::error::ApiError;
use super::validation::{validate_email, validate_name};

/// The authenticated user's own profile
pub async fn me(user: User) -> Json<UserResponse> {
    Json(UserResponse::from(user))
}

/// List all users (admin)
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    require_admin(&user)?;

    let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY created_at")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Whether the update may change the target's admin flag. A requester
/// stripping their own admin bit would lock themselves out mid-session, so
/// that one change is silently ignored.
fn effective_admin_flag(
    requester_id: &str,
    target_id: &str,
    requested: Option<bool>,
    current: bool,
) -> bool {
    match requested {
        None => current,
        Some(false) if requester_id == target_id => current,
        Some(flag) => flag,
    }
}

/// Update a user's profile or admin flag (admin)
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    requester: User,
    Path(id): Path<String>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    require_admin(&requester)?;

    let target: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?;
    let mut target = target.ok_or_else(|| ApiError::not_found("User not found"))?;

    if let Some(email) = request.email {
        if let Err(e) = validate_email(&email) {
            return Err(ApiError::validation_field("email", e));
        }
        target.email = email;
    }
    if let Some(name) = request.name {
        if let Err(e) = validate_name(&name) {
            return Err(ApiError::validation_field("name", e));
        }
        target.name = name;
    }
    target.is_admin =
        effective_admin_flag(&requester.id, &target.id, request.is_admin, target.is_admin);
    target.updated_at = format_utc(Utc::now());

    sqlx::query("UPDATE users SET email = ?, name = ?, is_admin = ?, updated_at = ? WHERE id = ?")
        .bind(&target.email)
        .bind(&target.name)
        .bind(target.is_admin)
        .bind(&target.updated_at)
        .bind(&id)
        .execute(&state.db)
        .await?;

    Ok(Json(UserResponse::from(target)))
}

/// Business-policy guard layered on top of the generic cascade: an admin
/// removing their own account would orphan the very session making the call.
fn ensure_not_self_delete(requester_id: &str, target_id: &str) -> Result<(), ApiError> {
    if requester_id == target_id {
        return Err(ApiError::forbidden(
            "Admins cannot delete their own account",
        ));
    }
    Ok(())
}

/// Delete a user and everything that depends on them (admin)
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    requester: User,
    Path(id): Path<String>,
) -> Result<Json<cascade::DeletionReport>, ApiError> {
    require_admin(&requester)?;
    ensure_not_self_delete(&requester.id, &id)?;

    let report = cascade::delete_user(&state.db, &id).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;

    #[test]
    fn self_deletion_is_forbidden() {
        let err = ensure_not_self_delete("u1", "u1").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert!(ensure_not_self_delete("u1", "u2").is_ok());
    }

    #[test]
    fn self_demotion_is_silently_ignored() {
        assert!(effective_admin_flag("u1", "u1", Some(false), true));
    }

    #[test]
    fn other_admins_can_be_demoted() {
        assert!(!effective_admin_flag("u1", "u2", Some(false), true));
    }

    #[test]
    fn promotion_and_no_change_pass_through() {
        assert!(effective_admin_flag("u1", "u2", Some(true), false));
        assert!(effective_admin_flag("u1", "u1", Some(true), true));
        assert!(effective_admin_flag("u1", "u2", None, true));
        assert!(!effective_admin_flag("u1", "u2", None, false));
    }
}
