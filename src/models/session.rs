use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorRole {
    /// Bound to a single event; may scan, mark and close it.
    Event,
    /// The one global identity; read-only across all events.
    Main,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSession {
    pub role: CoordinatorRole,
    /// Internal id of the bound event. Always `None` for `Main`.
    pub event_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl CoordinatorSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_bound_to(&self, event_id: &str) -> bool {
        self.role == CoordinatorRole::Event && self.event_id.as_deref() == Some(event_id)
    }
}
