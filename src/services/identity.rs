//! Student id → display identity.
//!
//! Ticket membership has held document ids, emails and phone numbers over the
//! years. Lookup goes by exact id first; only when that finds nobody does it
//! scan a bounded slice of the user table and match on id, email or phone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::models::Student;
use crate::store::{bounded, DataFetcher};

const BATCH_SIZE: usize = 100;
const UNKNOWN_NAME: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub college: String,
}

impl Identity {
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN_NAME.to_string(),
            email: String::new(),
            phone: String::new(),
            college: String::new(),
        }
    }
}

impl From<&Student> for Identity {
    fn from(student: &Student) -> Self {
        Self {
            name: if student.name.is_empty() {
                UNKNOWN_NAME.to_string()
            } else {
                student.name.clone()
            },
            email: student.email.clone(),
            phone: student.phone.clone().unwrap_or_default(),
            college: student.college.clone().unwrap_or_default(),
        }
    }
}

#[derive(Clone)]
pub struct IdentityResolver {
    fetcher: Arc<DataFetcher>,
    scan_cap: usize,
    timeout: Duration,
}

impl IdentityResolver {
    pub fn new(fetcher: Arc<DataFetcher>, scan_cap: usize, timeout: Duration) -> Self {
        Self {
            fetcher,
            scan_cap,
            timeout,
        }
    }

    /// Best effort: ids that cannot be resolved are simply absent from the map,
    /// and store failures are logged rather than returned.
    pub async fn resolve(&self, ids: &[String]) -> HashMap<String, Identity> {
        let mut resolved = HashMap::new();
        if ids.is_empty() {
            return resolved;
        }

        for batch in ids.chunks(BATCH_SIZE) {
            match self.fetcher.users_by_ids(batch).await {
                Ok(users) => {
                    for user in &users.value {
                        resolved.insert(user.id.clone(), Identity::from(user));
                    }
                }
                Err(e) => warn!(error = %e, "User batch lookup failed"),
            }
        }

        if resolved.is_empty() {
            debug!(wanted = ids.len(), "No exact id matches, scanning users");
            self.scan(ids, &mut resolved).await;
        }
        resolved
    }

    /// Display name for each id, `"Unknown"` where unresolved.
    pub async fn names(&self, ids: &[String]) -> HashMap<String, String> {
        let identities = self.resolve(ids).await;
        ids.iter()
            .map(|id| {
                let name = identities
                    .get(id)
                    .map_or_else(|| UNKNOWN_NAME.to_string(), |identity| identity.name.clone());
                (id.clone(), name)
            })
            .collect()
    }

    async fn scan(&self, ids: &[String], resolved: &mut HashMap<String, Identity>) {
        let primary = self.fetcher.primary();
        let users = match bounded(self.timeout, primary.list_users(self.scan_cap)).await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "Fallback user scan failed");
                return;
            }
        };

        for user in &users {
            if let Some(id) = ids.iter().find(|id| matches_user(user, id)) {
                resolved
                    .entry(id.clone())
                    .or_insert_with(|| Identity::from(user));
            }
        }
    }
}

fn matches_user(user: &Student, id: &str) -> bool {
    user.id == id || user.email == id || user.phone.as_deref() == Some(id)
}
