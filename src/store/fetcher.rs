use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::{bounded, ReadStore, StoreResult};
use crate::models::event::EventQuery;
use crate::models::{AttendanceRecord, Event, Student, Ticket};

/// Where a read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Secondary,
    Primary,
    Error,
}

/// A value together with the store that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct Sourced<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Sourced<T> {
    pub fn new(value: T, source: Source) -> Self {
        Self { value, source }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    #[error("not found in either store")]
    NotFound,

    #[error("no store could answer")]
    Unavailable,
}

impl FetchError {
    pub fn origin(&self) -> Source {
        match self {
            FetchError::NotFound => Source::Primary,
            FetchError::Unavailable => Source::Error,
        }
    }
}

pub type Fetched<T> = Result<Sourced<T>, FetchError>;

type StoreCall<T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send>>;

/// Reads from the replica when it can answer, otherwise from the primary store.
///
/// Single lookups trust any hit from the replica. Collection lookups trust only a
/// non-empty replica result: an empty list might just be unreplicated, so the
/// primary store is asked instead. Nothing here ever writes.
pub struct DataFetcher {
    primary: Arc<dyn ReadStore>,
    secondary: Option<Arc<dyn ReadStore>>,
    timeout: Duration,
}

impl DataFetcher {
    pub fn new(
        primary: Arc<dyn ReadStore>,
        secondary: Option<Arc<dyn ReadStore>>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            timeout,
        }
    }

    pub fn primary(&self) -> Arc<dyn ReadStore> {
        Arc::clone(&self.primary)
    }

    pub async fn event(&self, id: &str) -> Fetched<Event> {
        let id = id.to_string();
        self.single("event", move |store| {
            let id = id.clone();
            Box::pin(async move { store.get_event(&id).await })
        })
        .await
    }

    pub async fn event_by_code(&self, event_code: &str) -> Fetched<Event> {
        let code = event_code.to_string();
        self.single("event_by_code", move |store| {
            let code = code.clone();
            Box::pin(async move { store.find_event_by_code(&code).await })
        })
        .await
    }

    pub async fn ticket(&self, id: &str) -> Fetched<Ticket> {
        let id = id.to_string();
        self.single("ticket", move |store| {
            let id = id.clone();
            Box::pin(async move { store.get_ticket(&id).await })
        })
        .await
    }

    pub async fn tickets_for_event(&self, event_id: &str) -> Fetched<Vec<Ticket>> {
        let id = event_id.to_string();
        self.collection("tickets_for_event", move |store| {
            let id = id.clone();
            Box::pin(async move { store.tickets_for_event(&id).await })
        })
        .await
    }

    pub async fn attendance_for_event(&self, event_id: &str) -> Fetched<Vec<AttendanceRecord>> {
        let id = event_id.to_string();
        self.collection("attendance_for_event", move |store| {
            let id = id.clone();
            Box::pin(async move { store.attendance_for_event(&id).await })
        })
        .await
    }

    /// Every event, newest first, capped at `limit`.
    pub async fn all_events(&self, limit: usize) -> Fetched<Vec<Event>> {
        self.collection("all_events", move |store| {
            let query = EventQuery {
                limit,
                ..Default::default()
            };
            Box::pin(async move { store.list_events(&query).await.map(|(events, _)| events) })
        })
        .await
    }

    /// One page of the event listing plus the total match count.
    pub async fn events(&self, query: &EventQuery) -> Fetched<(Vec<Event>, usize)> {
        let query = query.clone();
        self.trusted(
            "events",
            move |store| {
                let query = query.clone();
                Box::pin(async move { store.list_events(&query).await })
            },
            |(events, _): &(Vec<Event>, usize)| !events.is_empty(),
        )
        .await
    }

    /// Batch user lookup. The replica answer is only used when it covers every id,
    /// since a partial hit usually means replication lag.
    pub async fn users_by_ids(&self, ids: &[String]) -> Fetched<Vec<Student>> {
        if ids.is_empty() {
            return Ok(Sourced::new(Vec::new(), Source::Primary));
        }
        let ids = ids.to_vec();
        let wanted = ids.iter().collect::<HashSet<_>>().len();
        self.trusted(
            "users_by_ids",
            move |store| {
                let ids = ids.clone();
                Box::pin(async move { store.users_by_ids(&ids).await })
            },
            |users: &Vec<Student>| users.len() >= wanted,
        )
        .await
    }

    async fn single<T, F>(&self, kind: &'static str, query: F) -> Fetched<T>
    where
        F: Fn(Arc<dyn ReadStore>) -> StoreCall<Option<T>>,
    {
        if let Some(secondary) = self.available_secondary().await {
            match bounded(self.timeout, query(secondary)).await {
                Ok(Some(value)) => {
                    debug!(kind, "Served from secondary store");
                    return Ok(Sourced::new(value, Source::Secondary));
                }
                Ok(None) => debug!(kind, "Secondary store miss, asking primary"),
                Err(e) => warn!(kind, error = %e, "Secondary lookup failed, falling back"),
            }
        }

        match self.from_primary(kind, query).await?.value {
            Some(value) => Ok(Sourced::new(value, Source::Primary)),
            None => Err(FetchError::NotFound),
        }
    }

    async fn collection<T, F>(&self, kind: &'static str, query: F) -> Fetched<Vec<T>>
    where
        F: Fn(Arc<dyn ReadStore>) -> StoreCall<Vec<T>>,
    {
        self.trusted(kind, query, |items: &Vec<T>| !items.is_empty())
            .await
    }

    /// Uses the replica's answer only when `complete` accepts it; anything
    /// else goes to the primary store.
    async fn trusted<T, F, C>(&self, kind: &'static str, query: F, complete: C) -> Fetched<T>
    where
        F: Fn(Arc<dyn ReadStore>) -> StoreCall<T>,
        C: Fn(&T) -> bool,
    {
        if let Some(secondary) = self.available_secondary().await {
            match bounded(self.timeout, query(secondary)).await {
                Ok(value) if complete(&value) => {
                    debug!(kind, "Served from secondary store");
                    return Ok(Sourced::new(value, Source::Secondary));
                }
                Ok(_) => debug!(kind, "Secondary answer incomplete, asking primary"),
                Err(e) => warn!(kind, error = %e, "Secondary lookup failed, falling back"),
            }
        }

        self.from_primary(kind, query).await
    }

    async fn from_primary<T, F>(&self, kind: &'static str, query: F) -> Fetched<T>
    where
        F: Fn(Arc<dyn ReadStore>) -> StoreCall<T>,
    {
        match bounded(self.timeout, query(self.primary())).await {
            Ok(value) => Ok(Sourced::new(value, Source::Primary)),
            Err(e) => {
                error!(kind, error = %e, "Primary store lookup failed");
                Err(FetchError::Unavailable)
            }
        }
    }

    /// The replica, if configured and answering its ping in time.
    async fn available_secondary(&self) -> Option<Arc<dyn ReadStore>> {
        let secondary = self.secondary.as_ref()?;
        match bounded(self.timeout, secondary.ping()).await {
            Ok(()) => Some(Arc::clone(secondary)),
            Err(e) => {
                warn!(error = %e, "Secondary store unavailable, using primary");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use serde_json::json;

    fn event(id: &str) -> Event {
        Event {
            id: id.into(),
            event_code: format!("CODE-{id}"),
            name: "Robotics".into(),
            category: String::new(),
            venue: String::new(),
            date: String::new(),
            time: String::new(),
            slot: String::new(),
            slots: 4,
            completed: false,
            pass_hash: String::new(),
            winners: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn fetcher(primary: &Arc<MemoryStore>, secondary: &Arc<MemoryStore>) -> DataFetcher {
        DataFetcher::new(
            primary.clone(),
            Some(secondary.clone() as Arc<dyn ReadStore>),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn secondary_hit_is_tagged_secondary() {
        let primary = Arc::new(MemoryStore::new());
        let secondary = Arc::new(MemoryStore::new());
        primary.seed_event(event("e1"));
        secondary.seed_event(event("e1"));

        let fetched = fetcher(&primary, &secondary).event("e1").await.unwrap();
        assert_eq!(fetched.source, Source::Secondary);
    }

    #[tokio::test]
    async fn unreachable_secondary_falls_back_to_primary() {
        let primary = Arc::new(MemoryStore::new());
        let secondary = Arc::new(MemoryStore::new());
        primary.seed_event(event("e1"));
        secondary.seed_event(event("e1"));
        secondary.set_available(false);
        primary
            .seed_raw_ticket(json!({"id": "t1", "event_id": "e1", "stud_ids": ["A"]}))
            .unwrap();

        let f = fetcher(&primary, &secondary);
        assert_eq!(f.event("e1").await.unwrap().source, Source::Primary);
        assert_eq!(f.ticket("t1").await.unwrap().source, Source::Primary);
        assert_eq!(
            f.attendance_for_event("e1").await.unwrap().source,
            Source::Primary
        );
    }

    #[tokio::test]
    async fn empty_secondary_collection_defers_to_primary() {
        let primary = Arc::new(MemoryStore::new());
        let secondary = Arc::new(MemoryStore::new());
        for i in 0..3 {
            primary
                .seed_raw_ticket(json!({"id": format!("t{i}"), "event_id": "e1", "stud_ids": ["A"]}))
                .unwrap();
        }

        let fetched = fetcher(&primary, &secondary)
            .tickets_for_event("e1")
            .await
            .unwrap();
        assert_eq!(fetched.source, Source::Primary);
        assert_eq!(fetched.value.len(), 3);
    }

    #[tokio::test]
    async fn non_empty_secondary_collection_is_trusted() {
        let primary = Arc::new(MemoryStore::new());
        let secondary = Arc::new(MemoryStore::new());
        secondary
            .seed_raw_ticket(json!({"id": "t1", "event_id": "e1", "stud_ids": ["A"]}))
            .unwrap();

        let fetched = fetcher(&primary, &secondary)
            .tickets_for_event("e1")
            .await
            .unwrap();
        assert_eq!(fetched.source, Source::Secondary);
        assert_eq!(fetched.value.len(), 1);
    }

    #[tokio::test]
    async fn absent_everywhere_is_not_found() {
        let primary = Arc::new(MemoryStore::new());
        let secondary = Arc::new(MemoryStore::new());
        let err = fetcher(&primary, &secondary).event("nope").await.unwrap_err();
        assert_eq!(err, FetchError::NotFound);
    }

    #[tokio::test]
    async fn both_stores_down_is_unavailable() {
        let primary = Arc::new(MemoryStore::new());
        let secondary = Arc::new(MemoryStore::new());
        primary.set_available(false);
        secondary.set_available(false);

        let f = fetcher(&primary, &secondary);
        let err = f.event("e1").await.unwrap_err();
        assert_eq!(err, FetchError::Unavailable);
        assert_eq!(err.origin(), Source::Error);
        assert_eq!(
            f.tickets_for_event("e1").await.unwrap_err(),
            FetchError::Unavailable
        );
    }

    #[tokio::test]
    async fn partial_user_coverage_in_secondary_defers_to_primary() {
        let primary = Arc::new(MemoryStore::new());
        let secondary = Arc::new(MemoryStore::new());
        for store in [&primary, &secondary] {
            store.seed_event(event("e1"));
        }
        let student = |id: &str| Student {
            id: id.into(),
            name: id.into(),
            email: format!("{id}@example.com"),
            phone: None,
            college: None,
            tickets: Vec::new(),
            certificates: Vec::new(),
            pass_hash: String::new(),
            created_at: Utc::now(),
        };
        primary.seed_user(student("u1"));
        primary.seed_user(student("u2"));
        secondary.seed_user(student("u1"));

        let f = fetcher(&primary, &secondary);
        let users = f.users_by_ids(&["u1".into(), "u2".into()]).await.unwrap();
        assert_eq!(users.source, Source::Primary);
        assert_eq!(users.value.len(), 2);

        let one = f.users_by_ids(&["u1".into()]).await.unwrap();
        assert_eq!(one.source, Source::Secondary);

        let repeated = f.users_by_ids(&["u1".into(), "u1".into()]).await.unwrap();
        assert_eq!(repeated.source, Source::Secondary);
        assert_eq!(repeated.value.len(), 1);

        let page = f.events(&EventQuery { limit: 10, ..Default::default() }).await.unwrap();
        assert_eq!(page.source, Source::Secondary);
        assert_eq!(page.value.1, 1);
    }

    #[tokio::test]
    async fn works_without_a_secondary_store() {
        let primary = Arc::new(MemoryStore::new());
        primary.seed_event(event("e1"));
        let f = DataFetcher::new(primary, None, Duration::from_millis(200));
        assert_eq!(f.event("e1").await.unwrap().source, Source::Primary);
        assert!(f.users_by_ids(&[]).await.unwrap().value.is_empty());
    }
}
