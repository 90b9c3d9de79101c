//! Per-event participation statistics and participant listings.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::debug;

use super::identity::{Identity, IdentityResolver};
use crate::models::event::EventSummary;
use crate::models::{AttendanceRecord, Event, Ticket};
use crate::store::{DataFetcher, Source};
use crate::utils::AppError;

/// Events shown on the all-events overview.
pub const OVERVIEW_LIMIT: usize = 100;

/// What a seat is when computing remaining capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotPolicy {
    /// One seat per distinct student.
    #[default]
    Participants,
    /// One seat per ticket, whatever its size.
    Tickets,
}

impl FromStr for SlotPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "participants" => Ok(SlotPolicy::Participants),
            "tickets" => Ok(SlotPolicy::Tickets),
            other => Err(format!("unknown slot policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EventStats {
    pub total_registrations: usize,
    /// Seats used; a student on two tickets counts twice.
    pub total_participants: usize,
    pub unique_participants: usize,
    pub checked_in: usize,
    pub pending: usize,
    pub remaining_slots: usize,
}

/// Pure statistics over already-normalized tickets.
///
/// Check-ins are counted once per (ticket, student) pair and only for students
/// who actually hold a ticket, so orphaned or duplicated records do not inflate
/// the figure.
///
/// `remaining_slots` follows `policy`. [`SlotPolicy::Tickets`] reproduces the
/// legacy dashboard figure of capacity minus registrations; the default
/// [`SlotPolicy::Participants`] subtracts distinct students instead.
pub fn compute_stats(
    capacity: u32,
    tickets: &[Ticket],
    attendance: &[AttendanceRecord],
    policy: SlotPolicy,
) -> EventStats {
    let total_registrations = tickets.len();
    let total_participants = tickets.iter().map(|t| t.stud_ids.len()).sum();
    let unique: HashSet<&str> = tickets
        .iter()
        .flat_map(|t| t.stud_ids.iter().map(String::as_str))
        .collect();

    let checked_in = attendance
        .iter()
        .filter(|record| unique.contains(record.stud_id.as_str()))
        .map(|record| (record.ticket_id.as_str(), record.stud_id.as_str()))
        .collect::<HashSet<_>>()
        .len();

    let seats_taken = match policy {
        SlotPolicy::Participants => unique.len(),
        SlotPolicy::Tickets => total_registrations,
    };

    EventStats {
        total_registrations,
        total_participants,
        unique_participants: unique.len(),
        checked_in,
        pending: total_participants.saturating_sub(checked_in),
        remaining_slots: (capacity as usize).saturating_sub(seats_taken),
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReportSources {
    pub event: Source,
    pub tickets: Source,
    pub attendance: Source,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    pub event: EventSummary,
    pub stats: EventStats,
    pub sources: ReportSources,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantRow {
    pub ticket_id: String,
    pub team_name: Option<String>,
    pub student_name: String,
    pub email: String,
    pub phone: String,
    pub college: String,
    pub stud_id: String,
    pub checked_in: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantList {
    pub event_id: String,
    pub event_name: String,
    pub count: usize,
    pub participants: Vec<ParticipantRow>,
}

#[derive(Clone)]
pub struct Aggregator {
    fetcher: Arc<DataFetcher>,
    identities: IdentityResolver,
    policy: SlotPolicy,
}

impl Aggregator {
    pub fn new(fetcher: Arc<DataFetcher>, identities: IdentityResolver, policy: SlotPolicy) -> Self {
        Self {
            fetcher,
            identities,
            policy,
        }
    }

    pub async fn aggregate(&self, event_id: &str) -> Result<EventReport, AppError> {
        let (event, tickets, attendance) = tokio::join!(
            self.fetcher.event(event_id),
            self.fetcher.tickets_for_event(event_id),
            self.fetcher.attendance_for_event(event_id),
        );
        let event = event.map_err(|e| AppError::from_fetch(e, "Event"))?;
        self.report(event.value, event.source, tickets, attendance)
    }

    /// Statistics for an event that has already been loaded.
    pub async fn aggregate_loaded(&self, event: Event, source: Source) -> Result<EventReport, AppError> {
        let (tickets, attendance) = tokio::join!(
            self.fetcher.tickets_for_event(&event.id),
            self.fetcher.attendance_for_event(&event.id),
        );
        self.report(event, source, tickets, attendance)
    }

    fn report(
        &self,
        event: Event,
        event_source: Source,
        tickets: crate::store::Fetched<Vec<Ticket>>,
        attendance: crate::store::Fetched<Vec<AttendanceRecord>>,
    ) -> Result<EventReport, AppError> {
        let tickets = tickets.map_err(|e| AppError::from_fetch(e, "Tickets"))?;
        let attendance = attendance.map_err(|e| AppError::from_fetch(e, "Attendance"))?;

        let stats = compute_stats(event.slots, &tickets.value, &attendance.value, self.policy);
        debug!(
            event_id = %event.id,
            registrations = stats.total_registrations,
            checked_in = stats.checked_in,
            tickets_source = ?tickets.source,
            attendance_source = ?attendance.source,
            "Aggregated event"
        );

        Ok(EventReport {
            event: event.summary(),
            stats,
            sources: ReportSources {
                event: event_source,
                tickets: tickets.source,
                attendance: attendance.source,
            },
        })
    }

    /// One row per (ticket, member), in ticket order.
    pub async fn participants(&self, event_id: &str) -> Result<ParticipantList, AppError> {
        let event = self
            .fetcher
            .event(event_id)
            .await
            .map_err(|e| AppError::from_fetch(e, "Event"))?
            .value;
        let (tickets, attendance) = tokio::join!(
            self.fetcher.tickets_for_event(event_id),
            self.fetcher.attendance_for_event(event_id),
        );
        let tickets = tickets.map_err(|e| AppError::from_fetch(e, "Tickets"))?.value;
        let attendance = attendance
            .map_err(|e| AppError::from_fetch(e, "Attendance"))?
            .value;

        let present: HashSet<(&str, &str)> = attendance
            .iter()
            .map(|r| (r.ticket_id.as_str(), r.stud_id.as_str()))
            .collect();

        let mut ids: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for id in tickets.iter().flat_map(|t| t.stud_ids.iter()) {
            if seen.insert(id.as_str()) {
                ids.push(id.clone());
            }
        }
        let identities = self.identities.resolve(&ids).await;

        let participants: Vec<ParticipantRow> = tickets
            .iter()
            .flat_map(|ticket| {
                ticket.stud_ids.iter().map(|stud_id| {
                    let identity = identities.get(stud_id).cloned().unwrap_or_else(Identity::unknown);
                    ParticipantRow {
                        ticket_id: ticket.id.clone(),
                        team_name: ticket.team_name.clone(),
                        student_name: identity.name,
                        email: identity.email,
                        phone: identity.phone,
                        college: identity.college,
                        stud_id: stud_id.clone(),
                        checked_in: present.contains(&(ticket.id.as_str(), stud_id.as_str())),
                    }
                })
            })
            .collect();

        Ok(ParticipantList {
            event_id: event.id,
            event_name: event.name,
            count: participants.len(),
            participants,
        })
    }

    /// Every event with its statistics, newest first.
    pub async fn overview(&self) -> Result<Vec<EventReport>, AppError> {
        let events = self
            .fetcher
            .all_events(OVERVIEW_LIMIT)
            .await
            .map_err(|e| AppError::from_fetch(e, "Events"))?;
        let events_source = events.source;

        let mut tasks = JoinSet::new();
        for (index, event) in events.value.into_iter().enumerate() {
            let aggregator = self.clone();
            tasks.spawn(async move {
                let report = aggregator.aggregate_loaded(event, events_source).await;
                (index, report)
            });
        }

        let mut reports = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, report) = joined.map_err(|e| {
                AppError::InternalServerError(format!("overview task failed: {e}"))
            })?;
            reports.push((index, report?));
        }
        reports.sort_by_key(|(index, _)| *index);
        Ok(reports.into_iter().map(|(_, report)| report).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn ticket(id: &str, members: serde_json::Value) -> Ticket {
        serde_json::from_value(json!({"id": id, "event_id": "e1", "stud_id": members})).unwrap()
    }

    fn record(ticket_id: &str, stud_id: &str) -> AttendanceRecord {
        AttendanceRecord::new(ticket_id, "e1", stud_id)
    }

    #[test]
    fn mixed_membership_shapes_are_counted_exactly() {
        let tickets = vec![ticket("t1", json!(["A", "B"])), ticket("t2", json!("A"))];
        let stats = compute_stats(10, &tickets, &[], SlotPolicy::Participants);
        assert_eq!(stats.total_registrations, 2);
        assert_eq!(stats.total_participants, 3);
        assert_eq!(stats.unique_participants, 2);
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.remaining_slots, 8);
    }

    #[test]
    fn check_ins_ignore_orphans_and_duplicates() {
        let tickets = vec![ticket("t1", json!(["A", "B"]))];
        let attendance = vec![record("t1", "A"), record("t1", "A"), record("t9", "Z")];
        let stats = compute_stats(2, &tickets, &attendance, SlotPolicy::Participants);
        assert_eq!(stats.checked_in, 1);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn remaining_slots_floor_at_zero_under_both_policies() {
        let tickets = vec![ticket("t1", json!(["A", "B", "C"]))];
        let by_student = compute_stats(2, &tickets, &[], SlotPolicy::Participants);
        assert_eq!(by_student.remaining_slots, 0);
        let by_ticket = compute_stats(2, &tickets, &[], SlotPolicy::Tickets);
        assert_eq!(by_ticket.remaining_slots, 1);
    }

    #[test]
    fn slot_policy_parses() {
        assert_eq!("Tickets".parse::<SlotPolicy>(), Ok(SlotPolicy::Tickets));
        assert_eq!(" participants ".parse::<SlotPolicy>(), Ok(SlotPolicy::Participants));
        assert!("seats".parse::<SlotPolicy>().is_err());
    }

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

    fn aggregator(primary: Arc<MemoryStore>, secondary: Option<Arc<MemoryStore>>) -> Aggregator {
        let fetcher = Arc::new(DataFetcher::new(
            primary,
            secondary.map(|s| s as Arc<dyn crate::store::ReadStore>),
            Duration::from_millis(200),
        ));
        let identities = IdentityResolver::new(fetcher.clone(), 1000, Duration::from_millis(200));
        Aggregator::new(fetcher, identities, SlotPolicy::Participants)
    }

    #[tokio::test]
    async fn report_carries_provenance() {
        let primary = Arc::new(MemoryStore::new());
        let secondary = Arc::new(MemoryStore::new());
        primary.seed_event(event("e1", 5));
        secondary.seed_event(event("e1", 5));
        primary.seed_ticket(ticket("t1", json!(["A"])));
        primary.seed_attendance(record("t1", "A"));

        let report = aggregator(primary, Some(secondary))
            .aggregate("e1")
            .await
            .unwrap();
        assert_eq!(report.sources.event, Source::Secondary);
        assert_eq!(report.sources.tickets, Source::Primary);
        assert_eq!(report.stats.checked_in, 1);
        assert_eq!(report.stats.remaining_slots, 4);
    }

    #[tokio::test]
    async fn participants_list_marks_check_ins() {
        let primary = Arc::new(MemoryStore::new());
        primary.seed_event(event("e1", 5));
        primary.seed_ticket(ticket("t1", json!(["A", "B"])));
        primary.seed_attendance(record("t1", "B"));

        let list = aggregator(primary, None).participants("e1").await.unwrap();
        assert_eq!(list.count, 2);
        assert!(!list.participants[0].checked_in);
        assert!(list.participants[1].checked_in);
        assert_eq!(list.participants[0].student_name, "Unknown");
    }

    #[tokio::test]
    async fn overview_covers_every_event() {
        let primary = Arc::new(MemoryStore::new());
        primary.seed_event(event("e1", 5));
        primary.seed_event(event("e2", 1));
        primary.seed_ticket(ticket("t1", json!(["A"])));

        let reports = aggregator(primary, None).overview().await.unwrap();
        assert_eq!(reports.len(), 2);
        let e1 = reports.iter().find(|r| r.event.id == "e1").unwrap();
        assert_eq!(e1.stats.total_registrations, 1);
    }

    #[tokio::test]
    async fn missing_event_is_not_found() {
        let primary = Arc::new(MemoryStore::new());
        let err = aggregator(primary, None).aggregate("nope").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
