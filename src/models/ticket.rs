use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Team label shown for multi-student tickets issued without a name.
pub const INDIVIDUAL_TEAM: &str = "Individual";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub event_id: String,
    /// Always a list once loaded; older rows stored a bare string.
    #[serde(alias = "stud_id", default, deserialize_with = "deserialize_membership")]
    pub stud_ids: Vec<String>,
    #[serde(default)]
    pub team_name: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Ticket {
    pub fn has_member(&self, stud_id: &str) -> bool {
        self.stud_ids.iter().any(|id| id == stud_id)
    }

    pub fn display_team_name(&self) -> &str {
        self.team_name.as_deref().unwrap_or(INDIVIDUAL_TEAM)
    }
}

/// Collapses every historical shape of the membership field into a list.
///
/// Arrays are taken element-wise, a bare scalar becomes a one-element list,
/// and null or anything unrecognisable becomes empty. Blank entries are dropped.
pub fn normalize_membership(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_id).collect(),
        other => scalar_id(other).into_iter().collect(),
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_membership<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().map(normalize_membership).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_membership_becomes_single_element_list() {
        let ticket: Ticket =
            serde_json::from_value(json!({"id": "t1", "event_id": "e1", "stud_id": "A"})).unwrap();
        assert_eq!(ticket.stud_ids, vec!["A".to_string()]);
        assert!(ticket.active);
    }

    #[test]
    fn array_membership_is_kept_and_blanks_dropped() {
        let ticket: Ticket = serde_json::from_value(
            json!({"id": "t1", "event_id": "e1", "stud_ids": ["A", " ", "B", null]}),
        )
        .unwrap();
        assert_eq!(ticket.stud_ids, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn missing_or_null_membership_is_empty() {
        let absent: Ticket =
            serde_json::from_value(json!({"id": "t1", "event_id": "e1"})).unwrap();
        assert!(absent.stud_ids.is_empty());

        let null: Ticket =
            serde_json::from_value(json!({"id": "t1", "event_id": "e1", "stud_id": null}))
                .unwrap();
        assert!(null.stud_ids.is_empty());
    }

    #[test]
    fn numeric_ids_are_stringified() {
        assert_eq!(normalize_membership(&json!(42)), vec!["42".to_string()]);
        assert!(normalize_membership(&json!({"nested": true})).is_empty());
    }

    #[test]
    fn unnamed_team_displays_as_individual() {
        let ticket: Ticket =
            serde_json::from_value(json!({"id": "t1", "event_id": "e1", "stud_ids": ["A", "B"]}))
                .unwrap();
        assert_eq!(ticket.display_team_name(), INDIVIDUAL_TEAM);
        assert!(ticket.has_member("B"));
        assert!(!ticket.has_member("C"));
    }
}
