use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::guard::{CoordinatorAuth, EventCoordinator, MainCoordinator};
use crate::models::{CoordinatorRole, EventUpdate, Winner};
use crate::state::AppState;
use crate::store::bounded;
use crate::utils::response::{success, success_with_meta};
use crate::utils::{AppError, JsonBody, QueryParams};

#[derive(Deserialize)]
pub struct ParticipantsParams {
    pub event_id: Option<String>,
}

#[derive(Deserialize)]
pub struct WinnerInput {
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct WinnersRequest {
    pub winners: Vec<WinnerInput>,
}

/// Checks every entry and returns the list ordered by position.
pub fn validate_winners(inputs: Vec<WinnerInput>) -> Result<Vec<Winner>, AppError> {
    let mut winners = inputs
        .into_iter()
        .map(|input| {
            let name = input.name.as_deref().map(str::trim).unwrap_or_default();
            match input.position {
                Some(position) if position > 0 && !name.is_empty() => Ok(Winner {
                    position,
                    name: name.to_string(),
                }),
                _ => Err(AppError::ValidationError(
                    "Each winner must have a position and a name".to_string(),
                )),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    winners.sort_by_key(|winner| winner.position);
    Ok(winners)
}

pub async fn dashboard(
    State(state): State<AppState>,
    auth: EventCoordinator,
) -> Result<Response, AppError> {
    let report = state.aggregator.aggregate(&auth.event_id).await?;
    let meta = json!({ "sources": report.sources });
    Ok(success_with_meta(
        json!({ "event": report.event, "stats": report.stats }),
        meta,
        "Dashboard data retrieved",
    ))
}

pub async fn participants(
    State(state): State<AppState>,
    auth: EventCoordinator,
) -> Result<Response, AppError> {
    let list = state.aggregator.participants(&auth.event_id).await?;
    Ok(success(list, "Participants retrieved"))
}

/// Participants of any event for the main coordinator; an event coordinator
/// may only ask for its own.
pub async fn event_participants(
    State(state): State<AppState>,
    auth: CoordinatorAuth,
    QueryParams(params): QueryParams<ParticipantsParams>,
) -> Result<Response, AppError> {
    let requested = params
        .event_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let event_id = match (requested, auth.session.role) {
        (Some(id), _) => id,
        (None, CoordinatorRole::Event) => auth.session.event_id.clone().unwrap_or_default(),
        (None, CoordinatorRole::Main) => {
            return Err(AppError::ValidationError("event_id is required".to_string()));
        }
    };
    auth.ensure_scope(&event_id)?;

    let list = state.aggregator.participants(&event_id).await?;
    Ok(success(list, "Participants retrieved"))
}

pub async fn all_events(
    State(state): State<AppState>,
    _auth: MainCoordinator,
) -> Result<Response, AppError> {
    let reports = state.aggregator.overview().await?;
    Ok(success(
        json!({ "count": reports.len(), "events": reports }),
        "Events retrieved",
    ))
}

pub async fn get_event(
    State(state): State<AppState>,
    auth: EventCoordinator,
) -> Result<Response, AppError> {
    let fetched = state
        .fetcher
        .event(&auth.event_id)
        .await
        .map_err(|e| AppError::from_fetch(e, "Event"))?;
    let meta = json!({ "sources": { "event": fetched.source } });
    Ok(success_with_meta(fetched.value, meta, "Event retrieved"))
}

pub async fn update_event(
    State(state): State<AppState>,
    auth: EventCoordinator,
    JsonBody(update): JsonBody<EventUpdate>,
) -> Result<Response, AppError> {
    let update = EventUpdate {
        venue: update.venue.map(|v| v.trim().to_string()),
        date: update.date.map(|v| v.trim().to_string()),
        time: update.time.map(|v| v.trim().to_string()),
        slot: update.slot.map(|v| v.trim().to_string()),
    };
    if update.is_empty() {
        return Err(AppError::ValidationError(
            "At least one of venue, date, time or slot is required".to_string(),
        ));
    }

    let timeout = state.config.store_timeout;
    if !bounded(timeout, state.store.update_event_details(&auth.event_id, &update)).await? {
        return Err(AppError::NotFound("Event not found".to_string()));
    }
    let event = bounded(timeout, state.store.get_event(&auth.event_id))
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;
    info!(event_id = %event.id, "Event details updated");
    Ok(success(event, "Event updated"))
}

pub async fn get_winners(
    State(state): State<AppState>,
    auth: EventCoordinator,
) -> Result<Response, AppError> {
    let event = state
        .fetcher
        .event(&auth.event_id)
        .await
        .map_err(|e| AppError::from_fetch(e, "Event"))?
        .value;
    Ok(success(
        json!({ "event_id": event.id, "winners": event.winners }),
        "Winners retrieved",
    ))
}

pub async fn set_winners(
    State(state): State<AppState>,
    auth: EventCoordinator,
    JsonBody(request): JsonBody<WinnersRequest>,
) -> Result<Response, AppError> {
    let winners = validate_winners(request.winners)?;
    let saved = bounded(
        state.config.store_timeout,
        state.store.set_winners(&auth.event_id, &winners),
    )
    .await?;
    if !saved {
        return Err(AppError::NotFound("Event not found".to_string()));
    }
    info!(event_id = %auth.event_id, count = winners.len(), "Winners saved");
    Ok(success(
        json!({ "event_id": auth.event_id, "winners": winners }),
        "Winners saved successfully",
    ))
}
