mod appointments;
pub mod auth;
mod counselors;
pub mod error;
mod users;
mod validation;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public)
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/register", post(auth::register))
        .route("/setup-status", get(auth::setup_status))
        .route("/setup", post(auth::setup));

    // Protected API routes
    let api_routes = Router::new()
        // Counselors
        .route("/counselors", get(counselors::list_counselors))
        .route("/counselors", post(counselors::create_counselor))
        .route("/counselors/:id", get(counselors::get_counselor))
        .route("/counselors/:id", put(counselors::update_counselor))
        .route("/counselors/:id", delete(counselors::delete_counselor))
        .route(
            "/counselors/:id/availability",
            put(counselors::update_availability),
        )
        .route("/counselors/:id/slots", get(appointments::list_slots))
        // Appointments
        .route("/appointments", post(appointments::book_appointment))
        .route("/appointments", get(appointments::list_appointments))
        .route("/appointments/:id", get(appointments::get_appointment))
        .route(
            "/appointments/:id/cancel",
            post(appointments::cancel_appointment),
        )
        .route("/appointments/:id/status", put(appointments::update_status))
        .route("/appointments/:id/join", get(appointments::join_eligibility))
        // Users
        .route("/users/me", get(users::me))
        .route("/users", get(users::list_users))
        .route("/users/:id", put(users::update_user))
        .route("/users/:id", delete(users::delete_user))
        // Protected by auth
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
