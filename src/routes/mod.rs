use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{auth, coordinator, events, health_check, students, tickets};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let security = create_security_headers_layer(&state.config);
    let cors = create_cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/login", post(auth::event_login))
        .route("/main-login", post(auth::main_login))
        .route("/logout", post(auth::logout))
        .route("/coordinator/session", get(auth::session_info))
        .route("/coordinator/dashboard", get(coordinator::dashboard))
        .route("/coordinator/participants", get(coordinator::participants))
        .route(
            "/coordinator/event-participants",
            get(coordinator::event_participants),
        )
        .route("/coordinator/all-events", get(coordinator::all_events))
        .route(
            "/coordinator/event",
            get(coordinator::get_event).post(coordinator::update_event),
        )
        .route(
            "/coordinator/winners",
            get(coordinator::get_winners).post(coordinator::set_winners),
        )
        .route("/tickets/generate", post(tickets::generate))
        .route("/tickets/scan", post(tickets::scan))
        .route("/tickets/mark-attendance", post(tickets::mark_attendance))
        .route("/tickets/reconcile", post(tickets::reconcile))
        .route("/events", get(events::list_events))
        .route("/events/close", post(events::close_event))
        .route("/students/register", post(students::register))
        .route("/students/login", post(students::login))
        .route("/students/profile", post(students::update_profile))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(security)
        .layer(cors)
}
