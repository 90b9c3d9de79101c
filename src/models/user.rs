use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub college: Option<String>,
    /// Ticket ids, appended on issuance and never removed.
    #[serde(default)]
    pub tickets: Vec<String>,
    #[serde(default)]
    pub certificates: Vec<String>,
    #[serde(skip_serializing, default)]
    pub pass_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn to_public(&self) -> StudentPublic {
        StudentPublic {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            tickets: self.tickets.clone(),
            certificates: self.certificates.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentPublic {
    pub id: String,
    pub name: String,
    pub email: String,
    pub tickets: Vec<String>,
    pub certificates: Vec<String>,
}

/// Profile fields a student may change. `pass_hash` is already hashed.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub pass_hash: Option<String>,
}

impl ProfileUpdate {
    pub fn apply(&self, student: &mut Student) {
        if let Some(name) = &self.name {
            student.name = name.clone();
        }
        if let Some(email) = &self.email {
            student.email = email.clone();
        }
        if let Some(hash) = &self.pass_hash {
            student.pass_hash = hash.clone();
        }
    }
}
