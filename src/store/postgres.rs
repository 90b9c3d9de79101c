use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, QueryBuilder};

use super::{ReadStore, StoreError, StoreResult, WriteStore};
use crate::models::event::EventQuery;
use crate::models::ticket::normalize_membership;
use crate::models::user::ProfileUpdate;
use crate::models::{AttendanceRecord, Event, EventUpdate, Student, Ticket, Winner};

const EVENT_COLUMNS: &str = "id, event_code, name, category, venue, event_date, event_time, \
     slot, slots, completed, pass_hash, winners, created_at";
const TICKET_COLUMNS: &str = "id, event_id, stud_ids, team_name, active, created_at";
const ATTENDANCE_COLUMNS: &str = "id, ticket_id, event_id, stud_id, created_at";
const USER_COLUMNS: &str =
    "id, name, email, phone, college, tickets, certificates, pass_hash, created_at";

/// PostgreSQL-backed store. The same type serves the primary database and the
/// read replica; the replica is only ever handed out as a [`ReadStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Connects on first use, so an unreachable replica does not block startup.
    pub fn connect_lazy(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct EventRow {
    id: String,
    event_code: String,
    name: String,
    category: String,
    venue: String,
    event_date: String,
    event_time: String,
    slot: String,
    slots: i32,
    completed: bool,
    pass_hash: String,
    winners: Json<Value>,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        let winners = match serde_json::from_value::<Vec<Winner>>(row.winners.0) {
            Ok(winners) => winners,
            Err(e) => {
                tracing::warn!(event_id = %row.id, error = %e, "Unreadable winners list, ignoring");
                Vec::new()
            }
        };
        Event {
            id: row.id,
            event_code: row.event_code,
            name: row.name,
            category: row.category,
            venue: row.venue,
            date: row.event_date,
            time: row.event_time,
            slot: row.slot,
            slots: u32::try_from(row.slots).unwrap_or(0),
            completed: row.completed,
            pass_hash: row.pass_hash,
            winners,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct TicketRow {
    id: String,
    event_id: String,
    stud_ids: Json<Value>,
    team_name: Option<String>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<TicketRow> for Ticket {
    fn from(row: TicketRow) -> Self {
        Ticket {
            stud_ids: normalize_membership(&row.stud_ids.0),
            id: row.id,
            event_id: row.event_id,
            team_name: row.team_name,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

fn email_conflict(err: sqlx::Error) -> StoreError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => {
            StoreError::Conflict("Email is already registered".to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn push_event_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &EventQuery) {
    if let Some(search) = &query.search {
        builder
            .push(" AND name ILIKE '%' || ")
            .push_bind(search.clone())
            .push(" || '%'");
    }
    if let Some(category) = &query.category {
        builder.push(" AND category = ").push_bind(category.clone());
    }
    if let Some(completed) = query.completed {
        builder.push(" AND completed = ").push_bind(completed);
    }
}

#[async_trait]
impl ReadStore for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_event(&self, id: &str) -> StoreResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Event::from))
    }

    async fn find_event_by_code(&self, event_code: &str) -> StoreResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE event_code = $1"
        ))
        .bind(event_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Event::from))
    }

    async fn list_events(&self, query: &EventQuery) -> StoreResult<(Vec<Event>, usize)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM events WHERE TRUE");
        push_event_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut page = QueryBuilder::<Postgres>::new(format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE TRUE"
        ));
        push_event_filters(&mut page, query);
        page.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));
        let rows: Vec<EventRow> = page.build_query_as().fetch_all(&self.pool).await?;

        Ok((
            rows.into_iter().map(Event::from).collect(),
            usize::try_from(total).unwrap_or(0),
        ))
    }

    async fn get_ticket(&self, id: &str) -> StoreResult<Option<Ticket>> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Ticket::from))
    }

    async fn tickets_for_event(&self, event_id: &str) -> StoreResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE event_id = $1 ORDER BY created_at"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Ticket::from).collect())
    }

    async fn attendance_for_event(&self, event_id: &str) -> StoreResult<Vec<AttendanceRecord>> {
        let rows = sqlx::query_as::<_, AttendanceRecord>(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE event_id = $1"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn attendance_for_ticket(&self, ticket_id: &str) -> StoreResult<Vec<AttendanceRecord>> {
        let rows = sqlx::query_as::<_, AttendanceRecord>(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE ticket_id = $1"
        ))
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn users_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Student>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, Student>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"
        ))
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_users(&self, limit: usize) -> StoreResult<Vec<Student>> {
        let rows = sqlx::query_as::<_, Student>(&format!(
            "SELECT {USER_COLUMNS} FROM users LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<Student>> {
        let row = sqlx::query_as::<_, Student>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl WriteStore for PgStore {
    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        let slots = i32::try_from(event.slots)
            .map_err(|_| StoreError::Corrupt(format!("slots out of range: {}", event.slots)))?;
        sqlx::query(&format!(
            "INSERT INTO events ({EVENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(&event.id)
        .bind(&event.event_code)
        .bind(&event.name)
        .bind(&event.category)
        .bind(&event.venue)
        .bind(&event.date)
        .bind(&event.time)
        .bind(&event.slot)
        .bind(slots)
        .bind(event.completed)
        .bind(&event.pass_hash)
        .bind(Json(event.winners.clone()))
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_event_details(&self, id: &str, update: &EventUpdate) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE events SET \
                 venue = COALESCE($2, venue), \
                 event_date = COALESCE($3, event_date), \
                 event_time = COALESCE($4, event_time), \
                 slot = COALESCE($5, slot) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.venue.as_deref())
        .bind(update.date.as_deref())
        .bind(update.time.as_deref())
        .bind(update.slot.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_winners(&self, id: &str, winners: &[Winner]) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE events SET winners = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(winners.to_vec()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_event_completed(&self, id: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE events SET completed = TRUE WHERE id = $1 AND completed = FALSE")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn deactivate_tickets_for_event(&self, event_id: &str) -> StoreResult<u64> {
        let result =
            sqlx::query("UPDATE tickets SET active = FALSE WHERE event_id = $1 AND active = TRUE")
                .bind(event_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn insert_ticket(&self, ticket: &Ticket) -> StoreResult<bool> {
        // The share lock makes a concurrent close wait for this insert, so its
        // deactivation pass sees the new ticket.
        let result = sqlx::query(&format!(
            "INSERT INTO tickets ({TICKET_COLUMNS}) \
             SELECT $1, $2, $3, $4, $5, $6 FROM events \
             WHERE id = $2 AND completed = FALSE FOR SHARE"
        ))
        .bind(&ticket.id)
        .bind(&ticket.event_id)
        .bind(Json(ticket.stud_ids.clone()))
        .bind(ticket.team_name.as_deref())
        .bind(ticket.active)
        .bind(ticket.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn link_ticket_to_student(&self, student_id: &str, ticket_id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET tickets = CASE \
                 WHEN $2 = ANY(tickets) THEN tickets \
                 ELSE array_append(tickets, $2) END \
             WHERE id = $1",
        )
        .bind(student_id)
        .bind(ticket_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_attendance_if_absent(&self, record: &AttendanceRecord) -> StoreResult<bool> {
        let result = sqlx::query(&format!(
            "INSERT INTO attendance ({ATTENDANCE_COLUMNS}) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (ticket_id, stud_id) DO NOTHING"
        ))
        .bind(&record.id)
        .bind(&record.ticket_id)
        .bind(&record.event_id)
        .bind(&record.stud_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_user(&self, student: &Student) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(&student.id)
        .bind(&student.name)
        .bind(&student.email)
        .bind(student.phone.as_deref())
        .bind(student.college.as_deref())
        .bind(&student.tickets)
        .bind(&student.certificates)
        .bind(&student.pass_hash)
        .bind(student.created_at)
        .execute(&self.pool)
        .await
        .map_err(email_conflict)?;
        Ok(())
    }

    async fn update_user_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
    ) -> StoreResult<Option<Student>> {
        let row = sqlx::query_as::<_, Student>(&format!(
            "UPDATE users SET \
                 name = COALESCE($2, name), \
                 email = COALESCE($3, email), \
                 pass_hash = COALESCE($4, pass_hash) \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(update.name.as_deref())
        .bind(update.email.as_deref())
        .bind(update.pass_hash.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(email_conflict)?;
        Ok(row)
    }
}
