use axum::extract::State;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::guard::EventCoordinator;
use crate::models::event::EventQuery;
use crate::models::Event;
use crate::state::AppState;
use crate::utils::response::{success, success_with_meta};
use crate::utils::{AppError, JsonBody, QueryParams};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Deserialize)]
pub struct CloseRequest {
    #[serde(default)]
    pub event_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub completed: Option<bool>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub total_pages: usize,
}

impl ListParams {
    fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    fn to_query(&self) -> EventQuery {
        let text = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        EventQuery {
            search: text(&self.search),
            category: text(&self.category),
            completed: self.completed,
            offset: (self.page() - 1).saturating_mul(self.limit()) as usize,
            limit: self.limit() as usize,
        }
    }

    fn pagination(&self, total: usize) -> Pagination {
        let limit = self.limit();
        Pagination {
            page: self.page(),
            limit,
            total,
            total_pages: total.div_ceil(limit as usize),
        }
    }
}

#[derive(Serialize)]
struct EventPage {
    events: Vec<Event>,
    pagination: Pagination,
}

pub async fn close_event(
    State(state): State<AppState>,
    auth: EventCoordinator,
    JsonBody(request): JsonBody<CloseRequest>,
) -> Result<Response, AppError> {
    if request.event_id.trim().is_empty() {
        return Err(AppError::ValidationError("event_id is required".to_string()));
    }
    auth.ensure_event(&request.event_id)?;

    let outcome = state.lifecycle.close_event(request.event_id.trim()).await?;
    let message = if outcome.already_completed {
        "Event already completed"
    } else {
        "Event completed and all tickets closed"
    };
    Ok(success(outcome, message))
}

/// Public listing. Coordinator pass hashes are never serialized.
pub async fn list_events(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<ListParams>,
) -> Result<Response, AppError> {
    let query = params.to_query();
    let fetched = state
        .fetcher
        .events(&query)
        .await
        .map_err(|e| AppError::from_fetch(e, "Events"))?;
    let (events, total) = fetched.value;

    let page = EventPage {
        events,
        pagination: params.pagination(total),
    };
    let meta = json!({ "sources": { "events": fetched.source } });
    Ok(success_with_meta(page, meta, "Events retrieved"))
}
