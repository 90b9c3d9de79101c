//! Event, ticket and attendance transitions.
//!
//! Every write goes to the primary store. Reads that decide a transition are
//! taken from the primary store as well; the replica is only consulted where
//! the result is purely for display.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::identity::IdentityResolver;
use crate::models::{AttendanceRecord, Event, Ticket};
use crate::store::{bounded, DataFetcher, Source, WriteStore};
use crate::utils::AppError;

const DEFAULT_LINK_ATTEMPTS: u32 = 3;
const DEFAULT_LINK_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CloseOutcome {
    pub already_completed: bool,
    pub tickets_closed: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueRequest {
    pub event_id: String,
    #[serde(default)]
    pub stud_ids: Vec<String>,
    #[serde(default)]
    pub team_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedTicket {
    pub ticket: Ticket,
    /// Students whose record could not be linked to the ticket. A later
    /// reconcile run picks these up.
    pub unlinked: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reconciled {
    pub ticket_id: String,
    pub linked: Vec<String>,
    pub unlinked: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marked {
    Recorded,
    AlreadyPresent,
}

impl Marked {
    pub fn message(self) -> &'static str {
        match self {
            Marked::Recorded => "Attendance marked successfully",
            Marked::AlreadyPresent => "Already marked present",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannedMember {
    pub stud_id: String,
    pub name: String,
    pub present: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub ticket_id: String,
    pub ticket_active: bool,
    pub event_id: String,
    pub team_name: String,
    pub members: Vec<ScannedMember>,
    pub source: Source,
}

pub struct Lifecycle {
    store: Arc<dyn WriteStore>,
    fetcher: Arc<DataFetcher>,
    identities: IdentityResolver,
    timeout: Duration,
    link_attempts: u32,
    link_backoff: Duration,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn WriteStore>,
        fetcher: Arc<DataFetcher>,
        identities: IdentityResolver,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            identities,
            timeout,
            link_attempts: DEFAULT_LINK_ATTEMPTS,
            link_backoff: DEFAULT_LINK_BACKOFF,
        }
    }

    pub fn with_link_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.link_attempts = attempts.max(1);
        self.link_backoff = backoff;
        self
    }

    async fn primary_event(&self, event_id: &str) -> Result<Event, AppError> {
        bounded(self.timeout, self.store.get_event(event_id))
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
    }

    async fn primary_ticket(&self, ticket_id: &str) -> Result<Ticket, AppError> {
        bounded(self.timeout, self.store.get_ticket(ticket_id))
            .await?
            .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))
    }

    /// Moves the event to completed and deactivates its tickets.
    ///
    /// Closing twice is not an error. The deactivation still runs on a re-close
    /// so a cascade interrupted part way is finished; on a clean re-close it
    /// touches nothing.
    pub async fn close_event(&self, event_id: &str) -> Result<CloseOutcome, AppError> {
        let event = self.primary_event(event_id).await?;

        let transitioned = bounded(self.timeout, self.store.mark_event_completed(&event.id)).await?;
        let tickets_closed =
            bounded(self.timeout, self.store.deactivate_tickets_for_event(&event.id)).await?;

        if transitioned {
            info!(event_id = %event.id, tickets_closed, "Event completed");
        } else if tickets_closed > 0 {
            warn!(
                event_id = %event.id,
                tickets_closed,
                "Completed event still had active tickets, repaired"
            );
        } else {
            info!(event_id = %event.id, "Event already completed");
        }

        Ok(CloseOutcome {
            already_completed: !transitioned,
            tickets_closed,
        })
    }

    /// Creates a ticket and links it to each member's record.
    ///
    /// The ticket is written before any link. Links that still fail after
    /// retrying are reported in [`IssuedTicket::unlinked`].
    pub async fn issue_ticket(&self, request: IssueRequest) -> Result<IssuedTicket, AppError> {
        let event_id = request.event_id.trim();
        if event_id.is_empty() {
            return Err(AppError::ValidationError("event_id is required".to_string()));
        }
        let stud_ids = dedupe_ids(&request.stud_ids);
        if stud_ids.is_empty() {
            return Err(AppError::ValidationError(
                "At least one student is required".to_string(),
            ));
        }

        let event = self.primary_event(event_id).await?;
        if event.completed {
            return Err(AppError::ValidationError(
                "Cannot issue tickets for a completed event".to_string(),
            ));
        }

        let students = bounded(self.timeout, self.store.users_by_ids(&stud_ids)).await?;
        let known: HashSet<&str> = students.iter().map(|s| s.id.as_str()).collect();
        let missing: Vec<&str> = stud_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !known.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(AppError::ValidationError(format!(
                "Unknown student(s): {}",
                missing.join(", ")
            )));
        }

        let team_name = if stud_ids.len() == 1 {
            students
                .iter()
                .find(|s| s.id == stud_ids[0])
                .map(|s| s.name.clone())
                .filter(|name| !name.is_empty())
        } else {
            request
                .team_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        };

        let ticket = Ticket {
            id: Uuid::new_v4().to_string(),
            event_id: event.id.clone(),
            stud_ids,
            team_name,
            active: true,
            created_at: Utc::now(),
        };
        // The event may have been closed since it was read above.
        if !bounded(self.timeout, self.store.insert_ticket(&ticket)).await? {
            return Err(AppError::ValidationError(
                "Cannot issue tickets for a completed event".to_string(),
            ));
        }
        info!(
            ticket_id = %ticket.id,
            event_id = %ticket.event_id,
            members = ticket.stud_ids.len(),
            "Ticket issued"
        );

        let (_, unlinked) = self.link_members(&ticket).await;
        if !unlinked.is_empty() {
            warn!(
                ticket_id = %ticket.id,
                unlinked = ?unlinked,
                "Ticket issued with unlinked students"
            );
        }
        Ok(IssuedTicket { ticket, unlinked })
    }

    /// Re-runs the linking step for an existing ticket of `event_id`. Safe to repeat.
    pub async fn reconcile(&self, ticket_id: &str, event_id: &str) -> Result<Reconciled, AppError> {
        let ticket = self.primary_ticket(ticket_id.trim()).await?;
        if ticket.event_id != event_id {
            return Err(AppError::Forbidden(
                "Ticket does not belong to this event".to_string(),
            ));
        }
        let (linked, unlinked) = self.link_members(&ticket).await;
        info!(
            ticket_id = %ticket.id,
            linked = linked.len(),
            unlinked = unlinked.len(),
            "Ticket reconciled"
        );
        Ok(Reconciled {
            ticket_id: ticket.id,
            linked,
            unlinked,
        })
    }

    async fn link_members(&self, ticket: &Ticket) -> (Vec<String>, Vec<String>) {
        let mut tasks = JoinSet::new();
        for stud_id in &ticket.stud_ids {
            let store = Arc::clone(&self.store);
            let stud_id = stud_id.clone();
            let ticket_id = ticket.id.clone();
            let timeout = self.timeout;
            let attempts = self.link_attempts;
            let backoff = self.link_backoff;
            tasks.spawn(async move {
                let linked =
                    link_with_retry(store, timeout, attempts, backoff, &stud_id, &ticket_id).await;
                (stud_id, linked)
            });
        }

        let mut linked = Vec::new();
        let mut unlinked = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((stud_id, true)) => linked.push(stud_id),
                Ok((stud_id, false)) => unlinked.push(stud_id),
                Err(e) => warn!(error = %e, "Link task aborted"),
            }
        }
        // Keep the ticket's member order in the report.
        let order = |id: &String| ticket.stud_ids.iter().position(|m| m == id);
        linked.sort_by_key(order);
        unlinked.sort_by_key(order);
        (linked, unlinked)
    }

    /// Records one student's check-in. A second mark for the same pair is
    /// reported as [`Marked::AlreadyPresent`].
    pub async fn mark_attendance(
        &self,
        ticket_id: &str,
        stud_id: &str,
        event_id: &str,
    ) -> Result<Marked, AppError> {
        let (ticket_id, stud_id, event_id) = (ticket_id.trim(), stud_id.trim(), event_id.trim());
        if ticket_id.is_empty() || stud_id.is_empty() || event_id.is_empty() {
            return Err(AppError::ValidationError(
                "ticket_id, stud_id and event_id are required".to_string(),
            ));
        }

        let ticket = self.primary_ticket(ticket_id).await?;
        if ticket.event_id != event_id {
            return Err(AppError::Forbidden(
                "Ticket does not belong to this event".to_string(),
            ));
        }
        if !ticket.has_member(stud_id) {
            return Err(AppError::ValidationError(
                "Student is not on this ticket".to_string(),
            ));
        }
        if !ticket.active {
            let recorded = bounded(self.timeout, self.store.attendance_for_ticket(&ticket.id))
                .await?
                .iter()
                .any(|r| r.stud_id == stud_id);
            if recorded {
                return Ok(Marked::AlreadyPresent);
            }
            return Err(AppError::ValidationError(
                "Ticket is no longer active".to_string(),
            ));
        }

        let record = AttendanceRecord::new(&ticket.id, &ticket.event_id, stud_id);
        let created = bounded(self.timeout, self.store.insert_attendance_if_absent(&record)).await?;
        let marked = if created {
            info!(ticket_id = %ticket.id, stud_id, "Attendance marked");
            Marked::Recorded
        } else {
            Marked::AlreadyPresent
        };
        Ok(marked)
    }

    /// Ticket status and per-member presence for the gate.
    pub async fn scan_ticket(&self, ticket_id: &str, event_id: &str) -> Result<ScanResult, AppError> {
        let (ticket_id, event_id) = (ticket_id.trim(), event_id.trim());
        if ticket_id.is_empty() || event_id.is_empty() {
            return Err(AppError::ValidationError(
                "ticket_id and event_id are required".to_string(),
            ));
        }

        let fetched = self
            .fetcher
            .ticket(ticket_id)
            .await
            .map_err(|e| AppError::from_fetch(e, "Ticket"))?;
        let ticket = fetched.value;
        if ticket.event_id != event_id {
            return Err(AppError::Forbidden(
                "Ticket does not belong to this event".to_string(),
            ));
        }

        // Presence comes from the primary store so a check-in shows up at once.
        let (attendance, names) = tokio::join!(
            bounded(self.timeout, self.store.attendance_for_ticket(&ticket.id)),
            self.identities.names(&ticket.stud_ids),
        );
        let present: HashSet<String> = attendance?.into_iter().map(|r| r.stud_id).collect();

        let members = ticket
            .stud_ids
            .iter()
            .map(|stud_id| ScannedMember {
                stud_id: stud_id.clone(),
                name: names
                    .get(stud_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string()),
                present: present.contains(stud_id),
            })
            .collect();

        Ok(ScanResult {
            team_name: ticket.display_team_name().to_string(),
            ticket_id: ticket.id,
            ticket_active: ticket.active,
            event_id: ticket.event_id,
            members,
            source: fetched.source,
        })
    }
}

/// Trimmed, blank-free, first occurrence wins.
fn dedupe_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

async fn link_with_retry(
    store: Arc<dyn WriteStore>,
    timeout: Duration,
    attempts: u32,
    backoff: Duration,
    stud_id: &str,
    ticket_id: &str,
) -> bool {
    for attempt in 1..=attempts {
        match bounded(timeout, store.link_ticket_to_student(stud_id, ticket_id)).await {
            Ok(true) => return true,
            Ok(false) => {
                warn!(stud_id, ticket_id, "Student record missing, cannot link ticket");
                return false;
            }
            Err(e) => {
                warn!(stud_id, ticket_id, attempt, error = %e, "Linking ticket failed");
                if attempt < attempts {
                    tokio::time::sleep(backoff * attempt).await;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::EventQuery;
    use crate::models::user::ProfileUpdate;
    use crate::models::{EventUpdate, Student, Winner};
    use crate::store::{MemoryStore, ReadStore, StoreResult};
    use async_trait::async_trait;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn event(id: &str, slots: u32) -> Event {
        Event {
            id: id.into(),
            event_code: format!("CODE-{id}"),
            name: format!("Event {id}"),
            category: String::new(),
            venue: String::new(),
            date: String::new(),
            time: String::new(),
            slot: String::new(),
            slots,
            completed: false,
            pass_hash: String::new(),
            winners: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn student(id: &str, name: &str) -> Student {
        Student {
            id: id.into(),
            name: name.into(),
            email: format!("{id}@example.com"),
            phone: None,
            college: None,
            tickets: Vec::new(),
            certificates: Vec::new(),
            pass_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    fn lifecycle(store: &Arc<MemoryStore>) -> Lifecycle {
        let fetcher = Arc::new(DataFetcher::new(store.clone(), None, TIMEOUT));
        let identities = IdentityResolver::new(fetcher.clone(), 1000, TIMEOUT);
        Lifecycle::new(store.clone(), fetcher, identities, TIMEOUT)
            .with_link_retry(3, Duration::from_millis(1))
    }

    /// Closes the ticket's event right before inserting it.
    struct ClosingStore {
        inner: Arc<MemoryStore>,
    }

    #[async_trait]
    impl ReadStore for ClosingStore {
        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }
        async fn get_event(&self, id: &str) -> StoreResult<Option<Event>> {
            self.inner.get_event(id).await
        }
        async fn find_event_by_code(&self, code: &str) -> StoreResult<Option<Event>> {
            self.inner.find_event_by_code(code).await
        }
        async fn list_events(&self, query: &EventQuery) -> StoreResult<(Vec<Event>, usize)> {
            self.inner.list_events(query).await
        }
        async fn get_ticket(&self, id: &str) -> StoreResult<Option<Ticket>> {
            self.inner.get_ticket(id).await
        }
        async fn tickets_for_event(&self, event_id: &str) -> StoreResult<Vec<Ticket>> {
            self.inner.tickets_for_event(event_id).await
        }
        async fn attendance_for_event(&self, event_id: &str) -> StoreResult<Vec<AttendanceRecord>> {
            self.inner.attendance_for_event(event_id).await
        }
        async fn attendance_for_ticket(&self, ticket_id: &str) -> StoreResult<Vec<AttendanceRecord>> {
            self.inner.attendance_for_ticket(ticket_id).await
        }
        async fn users_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Student>> {
            self.inner.users_by_ids(ids).await
        }
        async fn list_users(&self, limit: usize) -> StoreResult<Vec<Student>> {
            self.inner.list_users(limit).await
        }
        async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<Student>> {
            self.inner.find_user_by_email(email).await
        }
    }

    #[async_trait]
    impl WriteStore for ClosingStore {
        async fn insert_event(&self, event: &Event) -> StoreResult<()> {
            self.inner.insert_event(event).await
        }
        async fn update_event_details(&self, id: &str, update: &EventUpdate) -> StoreResult<bool> {
            self.inner.update_event_details(id, update).await
        }
        async fn set_winners(&self, id: &str, winners: &[Winner]) -> StoreResult<bool> {
            self.inner.set_winners(id, winners).await
        }
        async fn mark_event_completed(&self, id: &str) -> StoreResult<bool> {
            self.inner.mark_event_completed(id).await
        }
        async fn deactivate_tickets_for_event(&self, event_id: &str) -> StoreResult<u64> {
            self.inner.deactivate_tickets_for_event(event_id).await
        }
        async fn insert_ticket(&self, ticket: &Ticket) -> StoreResult<bool> {
            self.inner.mark_event_completed(&ticket.event_id).await?;
            self.inner.deactivate_tickets_for_event(&ticket.event_id).await?;
            self.inner.insert_ticket(ticket).await
        }
        async fn link_ticket_to_student(&self, student_id: &str, ticket_id: &str) -> StoreResult<bool> {
            self.inner.link_ticket_to_student(student_id, ticket_id).await
        }
        async fn insert_attendance_if_absent(&self, record: &AttendanceRecord) -> StoreResult<bool> {
            self.inner.insert_attendance_if_absent(record).await
        }
        async fn insert_user(&self, student: &Student) -> StoreResult<()> {
            self.inner.insert_user(student).await
        }
        async fn update_user_profile(
            &self,
            id: &str,
            update: &ProfileUpdate,
        ) -> StoreResult<Option<Student>> {
            self.inner.update_user_profile(id, update).await
        }
    }

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed_event(event("e1", 2));
        store.seed_user(student("S1", "Asha"));
        store.seed_user(student("S2", "Ravi"));
        store
    }

    fn issue(ids: &[&str], team: Option<&str>) -> IssueRequest {
        IssueRequest {
            event_id: "e1".into(),
            stud_ids: ids.iter().map(|s| s.to_string()).collect(),
            team_name: team.map(Into::into),
        }
    }

    #[tokio::test]
    async fn single_student_ticket_takes_student_name() {
        let store = seeded();
        let issued = lifecycle(&store).issue_ticket(issue(&["S1"], Some("ignored"))).await.unwrap();
        assert_eq!(issued.ticket.team_name.as_deref(), Some("Asha"));
        assert!(issued.unlinked.is_empty());
        assert_eq!(store.user("S1").unwrap().tickets, vec![issued.ticket.id.clone()]);
    }

    #[tokio::test]
    async fn team_ticket_without_name_has_none() {
        let store = seeded();
        let issued = lifecycle(&store)
            .issue_ticket(issue(&["S1", "S2", "S1"], None))
            .await
            .unwrap();
        assert_eq!(issued.ticket.stud_ids, vec!["S1", "S2"]);
        assert_eq!(issued.ticket.team_name, None);
        assert_eq!(issued.ticket.display_team_name(), "Individual");
        assert!(store.ticket(&issued.ticket.id).unwrap().active);
    }

    #[tokio::test]
    async fn issuance_rejects_bad_requests() {
        let store = seeded();
        let lc = lifecycle(&store);
        assert!(matches!(
            lc.issue_ticket(issue(&[" "], None)).await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            lc.issue_ticket(issue(&["S1", "ghost"], None)).await,
            Err(AppError::ValidationError(_))
        ));
        let mut wrong_event = issue(&["S1"], None);
        wrong_event.event_id = "nope".into();
        assert!(matches!(
            lc.issue_ticket(wrong_event).await,
            Err(AppError::NotFound(_))
        ));

        lc.close_event("e1").await.unwrap();
        assert!(matches!(
            lc.issue_ticket(issue(&["S1"], None)).await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn transient_link_failures_are_retried() {
        let store = seeded();
        store.fail_links_for("S2", 2);
        let issued = lifecycle(&store).issue_ticket(issue(&["S1", "S2"], Some("Team"))).await.unwrap();
        assert!(issued.unlinked.is_empty());
        assert_eq!(store.user("S2").unwrap().tickets.len(), 1);
    }

    #[tokio::test]
    async fn persistent_link_failure_is_reported_and_reconciled() {
        let store = seeded();
        store.fail_links_for("S2", 3);
        let lc = lifecycle(&store);
        let issued = lc.issue_ticket(issue(&["S1", "S2"], Some("Team"))).await.unwrap();
        assert_eq!(issued.unlinked, vec!["S2".to_string()]);
        assert!(store.user("S2").unwrap().tickets.is_empty());

        assert!(matches!(
            lc.reconcile(&issued.ticket.id, "e2").await,
            Err(AppError::Forbidden(_))
        ));
        let repaired = lc.reconcile(&issued.ticket.id, "e1").await.unwrap();
        assert_eq!(repaired.linked, vec!["S1".to_string(), "S2".to_string()]);
        assert!(repaired.unlinked.is_empty());
        assert_eq!(store.user("S1").unwrap().tickets.len(), 1);
        assert_eq!(store.user("S2").unwrap().tickets.len(), 1);
    }

    #[tokio::test]
    async fn marking_twice_creates_one_record() {
        let store = seeded();
        let lc = lifecycle(&store);
        let ticket = lc.issue_ticket(issue(&["S1", "S2"], None)).await.unwrap().ticket;

        assert_eq!(lc.mark_attendance(&ticket.id, "S1", "e1").await.unwrap(), Marked::Recorded);
        assert_eq!(
            lc.mark_attendance(&ticket.id, "S1", "e1").await.unwrap(),
            Marked::AlreadyPresent
        );
        assert_eq!(store.attendance_len(), 1);
    }

    #[tokio::test]
    async fn marking_checks_event_and_membership() {
        let store = seeded();
        store.seed_event(event("e2", 5));
        let lc = lifecycle(&store);
        let ticket = lc.issue_ticket(issue(&["S1"], None)).await.unwrap().ticket;

        assert!(matches!(
            lc.mark_attendance(&ticket.id, "S1", "e2").await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            lc.mark_attendance(&ticket.id, "S2", "e1").await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            lc.mark_attendance("missing", "S1", "e1").await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(store.attendance_len(), 0);
    }

    #[tokio::test]
    async fn scan_reflects_check_ins_immediately() {
        let store = seeded();
        let lc = lifecycle(&store);
        let ticket = lc.issue_ticket(issue(&["S1", "S2"], None)).await.unwrap().ticket;

        let scan = lc.scan_ticket(&ticket.id, "e1").await.unwrap();
        assert!(scan.ticket_active);
        assert_eq!(scan.members.len(), 2);
        assert!(scan.members.iter().all(|m| !m.present));
        assert_eq!(scan.members[0].name, "Asha");

        lc.mark_attendance(&ticket.id, "S1", "e1").await.unwrap();
        let scan = lc.scan_ticket(&ticket.id, "e1").await.unwrap();
        assert!(scan.members[0].present);
        assert!(!scan.members[1].present);

        assert!(matches!(
            lc.scan_ticket(&ticket.id, "other").await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn scan_normalizes_legacy_scalar_membership() {
        let store = seeded();
        store
            .seed_raw_ticket(json!({"id": "legacy", "event_id": "e1", "stud_id": "S2"}))
            .unwrap();
        let scan = lifecycle(&store).scan_ticket("legacy", "e1").await.unwrap();
        assert_eq!(scan.members.len(), 1);
        assert_eq!(scan.members[0].name, "Ravi");
        assert_eq!(scan.team_name, "Individual");
    }

    #[tokio::test]
    async fn closing_cascades_once() {
        let store = seeded();
        store.seed_event(event("e2", 5));
        let lc = lifecycle(&store);
        for _ in 0..3 {
            lc.issue_ticket(issue(&["S1"], None)).await.unwrap();
        }
        let other = lc
            .issue_ticket(IssueRequest {
                event_id: "e2".into(),
                stud_ids: vec!["S2".into()],
                team_name: None,
            })
            .await
            .unwrap()
            .ticket;

        let first = lc.close_event("e1").await.unwrap();
        assert_eq!(first, CloseOutcome { already_completed: false, tickets_closed: 3 });
        assert!(store.event("e1").unwrap().completed);
        let tickets = store.tickets_for_event("e1").await.unwrap();
        assert!(tickets.iter().all(|t| !t.active));
        assert!(store.ticket(&other.id).unwrap().active);

        let second = lc.close_event("e1").await.unwrap();
        assert_eq!(second, CloseOutcome { already_completed: true, tickets_closed: 0 });
    }

    #[tokio::test]
    async fn closed_event_tickets_cannot_be_marked() {
        let store = seeded();
        let lc = lifecycle(&store);
        let ticket = lc.issue_ticket(issue(&["S1"], None)).await.unwrap().ticket;
        lc.close_event("e1").await.unwrap();
        assert!(matches!(
            lc.mark_attendance(&ticket.id, "S1", "e1").await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn remarking_after_close_is_still_a_no_op() {
        let store = seeded();
        let lc = lifecycle(&store);
        let ticket = lc.issue_ticket(issue(&["S1", "S2"], None)).await.unwrap().ticket;
        assert_eq!(lc.mark_attendance(&ticket.id, "S1", "e1").await.unwrap(), Marked::Recorded);
        lc.close_event("e1").await.unwrap();

        assert_eq!(
            lc.mark_attendance(&ticket.id, "S1", "e1").await.unwrap(),
            Marked::AlreadyPresent
        );
        assert!(matches!(
            lc.mark_attendance(&ticket.id, "S2", "e1").await,
            Err(AppError::ValidationError(_))
        ));
        assert_eq!(store.attendance_len(), 1);
    }

    #[tokio::test]
    async fn insert_refused_after_concurrent_close_is_rejected() {
        let store = seeded();
        // Close lands between the event read and the ticket write.
        let racing = Arc::new(ClosingStore { inner: store.clone() });
        let fetcher = Arc::new(DataFetcher::new(store.clone(), None, TIMEOUT));
        let identities = IdentityResolver::new(fetcher.clone(), 1000, TIMEOUT);
        let lc = Lifecycle::new(racing, fetcher, identities, TIMEOUT);

        assert!(matches!(
            lc.issue_ticket(issue(&["S1"], None)).await,
            Err(AppError::ValidationError(_))
        ));
        assert!(store.tickets_for_event("e1").await.unwrap().is_empty());
        assert!(store.user("S1").unwrap().tickets.is_empty());
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_store_error() {
        let store = seeded();
        let lc = lifecycle(&store);
        store.set_available(false);
        assert!(matches!(lc.close_event("e1").await, Err(AppError::Store(_))));
    }
}
