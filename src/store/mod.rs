//! Document stores and the dual-source read path.
//!
//! The primary store is authoritative and the only one ever written to.
//! The secondary store is a read replica filled by an out-of-band process;
//! it is typed as [`ReadStore`] so nothing here can write to it.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::event::EventQuery;
use crate::models::user::ProfileUpdate;
use crate::models::{AttendanceRecord, Event, EventUpdate, Student, Ticket, Winner};

pub mod fetcher;
pub mod memory;
pub mod postgres;

pub use fetcher::{DataFetcher, FetchError, Fetched, Source, Sourced};
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store call timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt document: {0}")]
    Corrupt(String),

    #[error("unique constraint violated: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Runs a store call under a deadline so a slow backend cannot stall the caller.
pub async fn bounded<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout)?
}

#[async_trait]
pub trait ReadStore: Send + Sync {
    /// Cheap liveness check.
    async fn ping(&self) -> StoreResult<()>;

    async fn get_event(&self, id: &str) -> StoreResult<Option<Event>>;

    async fn find_event_by_code(&self, event_code: &str) -> StoreResult<Option<Event>>;

    /// Newest first. Returns the page and the total number of matches.
    async fn list_events(&self, query: &EventQuery) -> StoreResult<(Vec<Event>, usize)>;

    async fn get_ticket(&self, id: &str) -> StoreResult<Option<Ticket>>;

    async fn tickets_for_event(&self, event_id: &str) -> StoreResult<Vec<Ticket>>;

    async fn attendance_for_event(&self, event_id: &str) -> StoreResult<Vec<AttendanceRecord>>;

    async fn attendance_for_ticket(&self, ticket_id: &str) -> StoreResult<Vec<AttendanceRecord>>;

    async fn users_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Student>>;

    /// At most `limit` users, in no particular order.
    async fn list_users(&self, limit: usize) -> StoreResult<Vec<Student>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<Student>>;
}

#[async_trait]
pub trait WriteStore: ReadStore {
    async fn insert_event(&self, event: &Event) -> StoreResult<()>;

    /// Returns false when the event does not exist.
    async fn update_event_details(&self, id: &str, update: &EventUpdate) -> StoreResult<bool>;

    /// Returns false when the event does not exist.
    async fn set_winners(&self, id: &str, winners: &[Winner]) -> StoreResult<bool>;

    /// Flips `completed` to true only if it was false.
    /// Returns true when this call performed the transition.
    async fn mark_event_completed(&self, id: &str) -> StoreResult<bool>;

    /// Sets `active = false` on every still-active ticket of the event.
    /// Returns how many tickets changed.
    async fn deactivate_tickets_for_event(&self, event_id: &str) -> StoreResult<u64>;

    /// Writes the ticket only while its event exists and is not completed.
    /// Returns false when the insert was refused.
    async fn insert_ticket(&self, ticket: &Ticket) -> StoreResult<bool>;

    /// Appends `ticket_id` to the student's tickets unless already present.
    /// Returns false when the student does not exist.
    async fn link_ticket_to_student(&self, student_id: &str, ticket_id: &str) -> StoreResult<bool>;

    /// Insert-or-ignore keyed on (ticket, student).
    /// Returns true when a new record was written.
    async fn insert_attendance_if_absent(&self, record: &AttendanceRecord) -> StoreResult<bool>;

    /// Fails with [`StoreError::Conflict`] when the email is taken.
    async fn insert_user(&self, student: &Student) -> StoreResult<()>;

    async fn update_user_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
    ) -> StoreResult<Option<Student>>;
}
