use axum::extract::State;
use axum::response::Response;
use serde::Serialize;

use crate::state::AppState;
use crate::store::bounded;
use crate::utils::response::success;

pub mod auth;
pub mod coordinator;
pub mod events;
pub mod guard;
pub mod students;
pub mod tickets;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
    primary_store: &'static str,
}

/// Liveness plus a best-effort ping of the primary store.
pub async fn health_check(State(state): State<AppState>) -> Response {
    let primary_store = match bounded(state.config.store_timeout, state.store.ping()).await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Primary store health check failed");
            "unavailable"
        }
    };
    let payload = HealthPayload {
        status: "ok",
        service: "rollcall-api",
        primary_store,
    };

    success(payload, "Health check successful")
}
