//! Coordinator sessions.
//!
//! A session is an opaque random token handed to the browser in an HttpOnly
//! cookie. The server keeps only a SHA-256 digest of each token, mapped to the
//! role and (for event coordinators) the bound event.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use super::clock::{Clock, SystemClock};
use crate::models::{CoordinatorRole, CoordinatorSession};
use crate::utils::AppError;

pub const SESSION_COOKIE: &str = "coord_session";

pub struct SessionManager {
    sessions: RwLock<HashMap<String, CoordinatorSession>>,
    ttl: Duration,
    secure_cookies: bool,
    clock: Arc<dyn Clock>,
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

impl SessionManager {
    pub fn new(ttl: Duration, secure_cookies: bool) -> Self {
        Self::with_clock(ttl, secure_cookies, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, secure_cookies: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            secure_cookies,
            clock,
        }
    }

    /// Creates a session. `event_id` is required for event coordinators and
    /// ignored for the main coordinator.
    pub fn issue(
        &self,
        role: CoordinatorRole,
        event_id: Option<String>,
    ) -> Result<(String, CoordinatorSession), AppError> {
        let event_id = match role {
            CoordinatorRole::Event => Some(event_id.ok_or_else(|| {
                AppError::InternalServerError("event session without an event".to_string())
            })?),
            CoordinatorRole::Main => None,
        };
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| AppError::InternalServerError(format!("session ttl out of range: {e}")))?;
        let session = CoordinatorSession {
            role,
            event_id,
            expires_at: self.clock.now() + ttl,
        };

        let token = generate_token();
        self.write().insert(digest(&token), session.clone());
        tracing::info!(role = ?session.role, event_id = ?session.event_id, "Coordinator session issued");
        Ok((token, session))
    }

    /// The live session for `token`, if any. Expired sessions are dropped.
    pub fn validate(&self, token: &str) -> Option<CoordinatorSession> {
        let key = digest(token);
        let now = self.clock.now();
        let session = self.read().get(&key).cloned()?;
        if session.is_expired(now) {
            self.write().remove(&key);
            return None;
        }
        Some(session)
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.write().remove(&digest(token)).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        before - sessions.len()
    }

    pub fn spawn_purger(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = manager.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired coordinator sessions");
                }
            }
        })
    }

    pub fn cookie(&self, token: &str) -> Result<HeaderValue, AppError> {
        let mut cookie = format!(
            "{SESSION_COOKIE}={token}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
            self.ttl.as_secs()
        );
        if self.secure_cookies {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
            .map_err(|e| AppError::InternalServerError(format!("invalid session cookie: {e}")))
    }

    pub fn clear_cookie(&self) -> HeaderValue {
        if self.secure_cookies {
            HeaderValue::from_static(
                "coord_session=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0; Secure",
            )
        } else {
            HeaderValue::from_static("coord_session=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0")
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CoordinatorSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CoordinatorSession>> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Pulls the session token out of the request's `Cookie` headers.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
