use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::guard::CoordinatorAuth;
use crate::models::{CoordinatorRole, CoordinatorSession};
use crate::services::credentials::verify_blocking;
use crate::services::session::token_from_headers;
use crate::state::AppState;
use crate::store::FetchError;
use crate::utils::response::{empty_success, success, with_cookie};
use crate::utils::{AppError, ClientIp, JsonBody};

const INVALID_EVENT_LOGIN: &str = "Invalid event ID or password";
const INVALID_MAIN_LOGIN: &str = "Invalid coordinator ID or password";

#[derive(Deserialize)]
pub struct EventLoginRequest {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub event_pass: String,
}

#[derive(Deserialize)]
pub struct MainLoginRequest {
    #[serde(default)]
    pub coordinator_id: String,
    #[serde(default)]
    pub coordinator_pass: String,
}

#[derive(Serialize)]
struct CoordinatorInfo {
    role: CoordinatorRole,
    event_id: Option<String>,
    event_code: Option<String>,
    event_name: Option<String>,
    expires_at: DateTime<Utc>,
}

/// Rate-limit key for coordinator logins from `ip`.
pub(crate) fn coordinator_key(ip: &str) -> String {
    format!("coordinator:{ip}")
}

pub(crate) fn check_rate(state: &AppState, key: &str) -> Result<(), AppError> {
    state.limiter.check(key).map_err(|retry_after| {
        warn!(key, retry_after_ms = retry_after.as_millis() as u64, "Login blocked");
        AppError::RateLimited { retry_after }
    })
}

pub async fn event_login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    JsonBody(request): JsonBody<EventLoginRequest>,
) -> Result<Response, AppError> {
    let key = coordinator_key(&ip);
    check_rate(&state, &key)?;

    let code = request.event_id.trim();
    if code.is_empty() || request.event_pass.is_empty() {
        return Err(AppError::ValidationError(
            "event_id and event_pass are required".to_string(),
        ));
    }

    let event = match state.fetcher.event_by_code(code).await {
        Ok(found) => Some(found.value),
        Err(FetchError::NotFound) => None,
        Err(e) => return Err(AppError::from_fetch(e, "Event")),
    };
    let hash = event
        .as_ref()
        .map(|e| e.pass_hash.clone())
        .filter(|hash| !hash.is_empty());

    let verified = verify_blocking(hash, request.event_pass).await?;
    let event = match event {
        Some(event) if verified => event,
        _ => {
            warn!(ip = %ip, event_code = code, "Event coordinator login rejected");
            return Err(AppError::AuthError(INVALID_EVENT_LOGIN.to_string()));
        }
    };

    state.limiter.reset(&key);
    let (token, session) = state
        .sessions
        .issue(CoordinatorRole::Event, Some(event.id.clone()))?;
    info!(event_id = %event.id, "Event coordinator logged in");

    let info = CoordinatorInfo {
        role: session.role,
        event_id: session.event_id,
        event_code: Some(event.event_code),
        event_name: Some(event.name),
        expires_at: session.expires_at,
    };
    let cookie = state.sessions.cookie(&token)?;
    Ok(with_cookie(success(info, "Login successful"), cookie))
}

pub async fn main_login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    JsonBody(request): JsonBody<MainLoginRequest>,
) -> Result<Response, AppError> {
    let key = coordinator_key(&ip);
    check_rate(&state, &key)?;

    if request.coordinator_id.trim().is_empty() || request.coordinator_pass.is_empty() {
        return Err(AppError::ValidationError(
            "coordinator_id and coordinator_pass are required".to_string(),
        ));
    }

    let verified = state
        .credentials
        .verify_main(request.coordinator_id.trim(), &request.coordinator_pass)
        .await?;
    if !verified {
        warn!(ip = %ip, "Main coordinator login rejected");
        return Err(AppError::AuthError(INVALID_MAIN_LOGIN.to_string()));
    }

    state.limiter.reset(&key);
    let (token, session) = state.sessions.issue(CoordinatorRole::Main, None)?;
    info!("Main coordinator logged in");

    let info = CoordinatorInfo {
        role: session.role,
        event_id: None,
        event_code: None,
        event_name: None,
        expires_at: session.expires_at,
    };
    let cookie = state.sessions.cookie(&token)?;
    Ok(with_cookie(success(info, "Login successful"), cookie))
}

/// Always succeeds, with or without a live session.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = token_from_headers(&headers) {
        if state.sessions.revoke(&token) {
            info!("Coordinator logged out");
        }
    }
    with_cookie(empty_success("Logged out"), state.sessions.clear_cookie())
}

pub async fn session_info(auth: CoordinatorAuth) -> Response {
    let CoordinatorSession {
        role,
        event_id,
        expires_at,
    } = auth.session;
    success(
        serde_json::json!({
            "role": role,
            "event_id": event_id,
            "expires_at": expires_at,
        }),
        "Session active",
    )
}
