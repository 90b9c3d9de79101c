//! In-process store used as the test double for both store roles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{ReadStore, StoreError, StoreResult, WriteStore};
use crate::models::event::EventQuery;
use crate::models::user::ProfileUpdate;
use crate::models::{AttendanceRecord, Event, EventUpdate, Student, Ticket, Winner};

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
    tickets: Vec<Ticket>,
    attendance: Vec<AttendanceRecord>,
    users: Vec<Student>,
    /// student id -> remaining forced link failures
    link_failures: HashMap<String, u32>,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }

    /// While unavailable every call fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next `times` link attempts for `student_id` fail.
    pub fn fail_links_for(&self, student_id: &str, times: u32) {
        self.write().link_failures.insert(student_id.to_string(), times);
    }

    pub fn seed_event(&self, event: Event) {
        self.write().events.push(event);
    }

    pub fn seed_ticket(&self, ticket: Ticket) {
        self.write().tickets.push(ticket);
    }

    /// Seeds a ticket from its stored document form, whatever membership shape it has.
    pub fn seed_raw_ticket(&self, document: Value) -> StoreResult<()> {
        let ticket: Ticket =
            serde_json::from_value(document).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.seed_ticket(ticket);
        Ok(())
    }

    pub fn seed_user(&self, student: Student) {
        self.write().users.push(student);
    }

    pub fn seed_attendance(&self, record: AttendanceRecord) {
        self.write().attendance.push(record);
    }

    pub fn ticket(&self, id: &str) -> Option<Ticket> {
        self.read().tickets.iter().find(|t| t.id == id).cloned()
    }

    pub fn event(&self, id: &str) -> Option<Event> {
        self.read().events.iter().find(|e| e.id == id).cloned()
    }

    pub fn user(&self, id: &str) -> Option<Student> {
        self.read().users.iter().find(|u| u.id == id).cloned()
    }

    pub fn attendance_len(&self) -> usize {
        self.read().attendance.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

#[async_trait]
impl ReadStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    async fn get_event(&self, id: &str) -> StoreResult<Option<Event>> {
        self.check()?;
        Ok(self.event(id))
    }

    async fn find_event_by_code(&self, event_code: &str) -> StoreResult<Option<Event>> {
        self.check()?;
        Ok(self
            .read()
            .events
            .iter()
            .find(|e| e.event_code == event_code)
            .cloned())
    }

    async fn list_events(&self, query: &EventQuery) -> StoreResult<(Vec<Event>, usize)> {
        self.check()?;
        let inner = self.read();
        let mut matching: Vec<&Event> = inner.events.iter().filter(|e| query.matches(e)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn get_ticket(&self, id: &str) -> StoreResult<Option<Ticket>> {
        self.check()?;
        Ok(self.ticket(id))
    }

    async fn tickets_for_event(&self, event_id: &str) -> StoreResult<Vec<Ticket>> {
        self.check()?;
        Ok(self
            .read()
            .tickets
            .iter()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn attendance_for_event(&self, event_id: &str) -> StoreResult<Vec<AttendanceRecord>> {
        self.check()?;
        Ok(self
            .read()
            .attendance
            .iter()
            .filter(|a| a.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn attendance_for_ticket(&self, ticket_id: &str) -> StoreResult<Vec<AttendanceRecord>> {
        self.check()?;
        Ok(self
            .read()
            .attendance
            .iter()
            .filter(|a| a.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn users_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Student>> {
        self.check()?;
        Ok(self
            .read()
            .users
            .iter()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn list_users(&self, limit: usize) -> StoreResult<Vec<Student>> {
        self.check()?;
        Ok(self.read().users.iter().take(limit).cloned().collect())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<Student>> {
        self.check()?;
        Ok(self.read().users.iter().find(|u| u.email == email).cloned())
    }
}

#[async_trait]
impl WriteStore for MemoryStore {
    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        self.check()?;
        self.write().events.push(event.clone());
        Ok(())
    }

    async fn update_event_details(&self, id: &str, update: &EventUpdate) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.write();
        match inner.events.iter_mut().find(|e| e.id == id) {
            Some(event) => {
                update.apply(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_winners(&self, id: &str, winners: &[Winner]) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.write();
        match inner.events.iter_mut().find(|e| e.id == id) {
            Some(event) => {
                event.winners = winners.to_vec();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_event_completed(&self, id: &str) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.write();
        match inner.events.iter_mut().find(|e| e.id == id) {
            Some(event) if !event.completed => {
                event.completed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_tickets_for_event(&self, event_id: &str) -> StoreResult<u64> {
        self.check()?;
        let mut changed = 0;
        for ticket in self
            .write()
            .tickets
            .iter_mut()
            .filter(|t| t.event_id == event_id && t.active)
        {
            ticket.active = false;
            changed += 1;
        }
        Ok(changed)
    }

    async fn insert_ticket(&self, ticket: &Ticket) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.write();
        let open = inner
            .events
            .iter()
            .any(|e| e.id == ticket.event_id && !e.completed);
        if open {
            inner.tickets.push(ticket.clone());
        }
        Ok(open)
    }

    async fn link_ticket_to_student(&self, student_id: &str, ticket_id: &str) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.write();
        if let Some(remaining) = inner.link_failures.get_mut(student_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Unavailable(format!(
                    "injected link failure for {student_id}"
                )));
            }
        }
        match inner.users.iter_mut().find(|u| u.id == student_id) {
            Some(user) => {
                if !user.tickets.iter().any(|t| t == ticket_id) {
                    user.tickets.push(ticket_id.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_attendance_if_absent(&self, record: &AttendanceRecord) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.write();
        let exists = inner
            .attendance
            .iter()
            .any(|a| a.ticket_id == record.ticket_id && a.stud_id == record.stud_id);
        if exists {
            return Ok(false);
        }
        inner.attendance.push(record.clone());
        Ok(true)
    }

    async fn insert_user(&self, student: &Student) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.write();
        if inner.users.iter().any(|u| u.email == student.email) {
            return Err(email_taken());
        }
        inner.users.push(student.clone());
        Ok(())
    }

    async fn update_user_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
    ) -> StoreResult<Option<Student>> {
        self.check()?;
        let mut inner = self.write();
        if let Some(email) = &update.email {
            if inner.users.iter().any(|u| u.id != id && &u.email == email) {
                return Err(email_taken());
            }
        }
        Ok(inner.users.iter_mut().find(|u| u.id == id).map(|user| {
            update.apply(user);
            user.clone()
        }))
    }
}

fn email_taken() -> StoreError {
    StoreError::Conflict("Email is already registered".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: &str, completed: bool) -> Event {
        serde_json::from_value(json!({
            "id": id,
            "event_code": id.to_uppercase(),
            "name": id,
            "slots": 10,
            "completed": completed,
            "created_at": "2026-01-01T00:00:00Z",
        }))
        .unwrap()
    }

    fn student(id: &str, email: &str) -> Student {
        serde_json::from_value(json!({
            "id": id,
            "name": id,
            "email": email,
            "created_at": "2026-01-01T00:00:00Z",
        }))
        .unwrap()
    }

    fn ticket(id: &str, event_id: &str) -> Ticket {
        serde_json::from_value(json!({"id": id, "event_id": event_id, "stud_ids": ["S1"]})).unwrap()
    }

    #[tokio::test]
    async fn ticket_insert_requires_an_open_event() {
        let store = MemoryStore::new();
        store.seed_event(event("open", false));
        store.seed_event(event("done", true));

        assert!(store.insert_ticket(&ticket("t1", "open")).await.unwrap());
        assert!(!store.insert_ticket(&ticket("t2", "done")).await.unwrap());
        assert!(!store.insert_ticket(&ticket("t3", "missing")).await.unwrap());
        assert!(store.ticket("t1").is_some());
        assert!(store.ticket("t2").is_none());
        assert!(store.ticket("t3").is_none());
    }

    #[tokio::test]
    async fn duplicate_emails_conflict() {
        let store = MemoryStore::new();
        store.insert_user(&student("S1", "asha@example.com")).await.unwrap();
        store.insert_user(&student("S2", "ravi@example.com")).await.unwrap();

        assert!(matches!(
            store.insert_user(&student("S3", "asha@example.com")).await,
            Err(StoreError::Conflict(_))
        ));

        let steal = ProfileUpdate {
            email: Some("asha@example.com".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_user_profile("S2", &steal).await,
            Err(StoreError::Conflict(_))
        ));
        let keep = ProfileUpdate {
            email: Some("ravi@example.com".into()),
            ..Default::default()
        };
        assert!(store.update_user_profile("S2", &keep).await.unwrap().is_some());
    }
}
