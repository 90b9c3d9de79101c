//! Coordinator session extractors.
//!
//! [`CoordinatorAuth`] accepts any live session, [`EventCoordinator`] only an
//! event-bound one and [`MainCoordinator`] only the global one. A missing or
//! expired session is a 401; the wrong kind of session is a 403.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::models::{CoordinatorRole, CoordinatorSession};
use crate::services::session::token_from_headers;
use crate::state::AppState;
use crate::utils::AppError;

pub struct CoordinatorAuth {
    pub token: String,
    pub session: CoordinatorSession,
}

impl CoordinatorAuth {
    /// The main coordinator may read any event; an event coordinator only its own.
    pub fn ensure_scope(&self, event_id: &str) -> Result<(), AppError> {
        match self.session.role {
            CoordinatorRole::Main => Ok(()),
            CoordinatorRole::Event if self.session.is_bound_to(event_id) => Ok(()),
            CoordinatorRole::Event => Err(scope_error()),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CoordinatorAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers)
            .ok_or_else(|| AppError::AuthError("Not authenticated".to_string()))?;
        let session = state
            .sessions
            .validate(&token)
            .ok_or_else(|| AppError::AuthError("Session expired or invalid".to_string()))?;
        Ok(Self { token, session })
    }
}

pub struct EventCoordinator {
    pub event_id: String,
    pub session: CoordinatorSession,
}

impl EventCoordinator {
    pub fn ensure_event(&self, event_id: &str) -> Result<(), AppError> {
        if self.session.is_bound_to(event_id.trim()) {
            Ok(())
        } else {
            Err(scope_error())
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for EventCoordinator {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = CoordinatorAuth::from_request_parts(parts, state).await?;
        match (auth.session.role, auth.session.event_id.clone()) {
            (CoordinatorRole::Event, Some(event_id)) => Ok(Self {
                event_id,
                session: auth.session,
            }),
            _ => Err(AppError::Forbidden(
                "An event coordinator session is required".to_string(),
            )),
        }
    }
}

pub struct MainCoordinator(pub CoordinatorSession);

#[async_trait]
impl FromRequestParts<AppState> for MainCoordinator {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = CoordinatorAuth::from_request_parts(parts, state).await?;
        if auth.session.role == CoordinatorRole::Main {
            Ok(Self(auth.session))
        } else {
            Err(AppError::Forbidden(
                "The main coordinator session is required".to_string(),
            ))
        }
    }
}

fn scope_error() -> AppError {
    AppError::Forbidden("Session is not authorized for this event".to_string())
}
