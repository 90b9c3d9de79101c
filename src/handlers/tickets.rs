use axum::extract::State;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::guard::EventCoordinator;
use crate::services::lifecycle::IssueRequest;
use crate::state::AppState;
use crate::utils::response::{success, success_with_meta};
use crate::utils::{AppError, JsonBody};

#[derive(Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub ticket_id: String,
    #[serde(default)]
    pub event_id: String,
}

#[derive(Deserialize)]
pub struct MarkRequest {
    #[serde(default)]
    pub ticket_id: String,
    #[serde(default)]
    pub stud_id: String,
    #[serde(default)]
    pub event_id: String,
}

#[derive(Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub ticket_id: String,
}

#[derive(Serialize)]
struct GeneratedTicket {
    ticket_id: String,
    event_id: String,
    team_name: Option<String>,
    stud_ids: Vec<String>,
    unlinked: Vec<String>,
}

pub async fn generate(
    State(state): State<AppState>,
    auth: EventCoordinator,
    JsonBody(request): JsonBody<IssueRequest>,
) -> Result<Response, AppError> {
    auth.ensure_event(&request.event_id)?;
    let issued = state.lifecycle.issue_ticket(request).await?;

    let message = if issued.unlinked.is_empty() {
        "Ticket generated"
    } else {
        "Ticket generated, some students could not be linked yet"
    };
    let ticket = issued.ticket;
    Ok(success(
        GeneratedTicket {
            ticket_id: ticket.id,
            event_id: ticket.event_id,
            team_name: ticket.team_name,
            stud_ids: ticket.stud_ids,
            unlinked: issued.unlinked,
        },
        message,
    ))
}

pub async fn scan(
    State(state): State<AppState>,
    auth: EventCoordinator,
    JsonBody(request): JsonBody<ScanRequest>,
) -> Result<Response, AppError> {
    if request.ticket_id.trim().is_empty() || request.event_id.trim().is_empty() {
        return Err(AppError::ValidationError(
            "ticket_id and event_id are required".to_string(),
        ));
    }
    auth.ensure_event(&request.event_id)?;

    let scan = state
        .lifecycle
        .scan_ticket(&request.ticket_id, &request.event_id)
        .await?;
    let meta = json!({ "sources": { "ticket": scan.source } });
    let message = if scan.ticket_active {
        "Ticket scanned"
    } else {
        "Ticket is no longer active"
    };
    Ok(success_with_meta(scan, meta, message))
}

pub async fn mark_attendance(
    State(state): State<AppState>,
    auth: EventCoordinator,
    JsonBody(request): JsonBody<MarkRequest>,
) -> Result<Response, AppError> {
    if request.event_id.trim().is_empty() {
        return Err(AppError::ValidationError("event_id is required".to_string()));
    }
    auth.ensure_event(&request.event_id)?;

    let marked = state
        .lifecycle
        .mark_attendance(&request.ticket_id, &request.stud_id, &request.event_id)
        .await?;
    Ok(success(
        json!({
            "ticket_id": request.ticket_id.trim(),
            "stud_id": request.stud_id.trim(),
            "present": true,
        }),
        marked.message(),
    ))
}

pub async fn reconcile(
    State(state): State<AppState>,
    auth: EventCoordinator,
    JsonBody(request): JsonBody<ReconcileRequest>,
) -> Result<Response, AppError> {
    if request.ticket_id.trim().is_empty() {
        return Err(AppError::ValidationError("ticket_id is required".to_string()));
    }
    let outcome = state
        .lifecycle
        .reconcile(&request.ticket_id, &auth.event_id)
        .await?;
    let message = if outcome.unlinked.is_empty() {
        "All students linked"
    } else {
        "Some students could not be linked"
    };
    Ok(success(outcome, message))
}
