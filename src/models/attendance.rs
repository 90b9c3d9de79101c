use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Proof that one member of a ticket checked in. `created_at` is the check-in time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttendanceRecord {
    pub id: String,
    pub ticket_id: String,
    pub event_id: String,
    pub stud_id: String,
    pub created_at: DateTime<Utc>,
}

impl AttendanceRecord {
    pub fn new(ticket_id: &str, event_id: &str, stud_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ticket_id: ticket_id.to_string(),
            event_id: event_id.to_string(),
            stud_id: stud_id.to_string(),
            created_at: Utc::now(),
        }
    }
}
