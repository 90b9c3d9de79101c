use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A placing recorded after the event, ordered by `position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub position: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Internal document id. Tickets and attendance reference this.
    pub id: String,
    /// Human-facing business id coordinators log in with.
    pub event_code: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub venue: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub slot: String,
    /// Seat capacity.
    #[serde(default)]
    pub slots: u32,
    #[serde(default)]
    pub completed: bool,
    #[serde(skip_serializing, default)]
    pub pass_hash: String,
    #[serde(default)]
    pub winners: Vec<Winner>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn summary(&self) -> EventSummary {
        EventSummary {
            id: self.id.clone(),
            event_code: self.event_code.clone(),
            name: self.name.clone(),
            venue: self.venue.clone(),
            date: self.date.clone(),
            time: self.time.clone(),
            slots: self.slots,
            completed: self.completed,
        }
    }
}

/// Dashboard-facing slice of an event.
#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub id: String,
    pub event_code: String,
    pub name: String,
    pub venue: String,
    pub date: String,
    pub time: String,
    pub slots: u32,
    pub completed: bool,
}

/// Partial update of the free-text scheduling fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
}

impl EventUpdate {
    pub fn is_empty(&self) -> bool {
        self.venue.is_none() && self.date.is_none() && self.time.is_none() && self.slot.is_none()
    }

    pub fn apply(&self, event: &mut Event) {
        if let Some(venue) = &self.venue {
            event.venue = venue.clone();
        }
        if let Some(date) = &self.date {
            event.date = date.clone();
        }
        if let Some(time) = &self.time {
            event.time = time.clone();
        }
        if let Some(slot) = &self.slot {
            event.slot = slot.clone();
        }
    }
}

/// Filters for the public event listing.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub completed: Option<bool>,
    pub offset: usize,
    pub limit: usize,
}

impl EventQuery {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(search) = &self.search {
            if !event.name.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &event.category != category {
                return false;
            }
        }
        if let Some(completed) = self.completed {
            if event.completed != completed {
                return false;
            }
        }
        true
    }
}
