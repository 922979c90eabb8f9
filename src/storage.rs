use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A confirmed episode about to be recorded. Always inserted unverified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMalpracticeEvent {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub malpractice: String,
    pub proof: String,
    pub lecture_hall_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MalpracticeEvent {
    pub id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub malpractice: String,
    pub proof: String,
    pub lecture_hall_id: Option<i64>,
    pub verified: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// `Some(v)` keeps only events whose verified flag equals `v`.
    pub verified: Option<bool>,
    pub limit: Option<usize>,
}

impl EventFilter {
    fn matches(&self, event: &MalpracticeEvent) -> bool {
        self.verified.map_or(true, |v| event.verified == v)
    }
}

pub trait MalpracticeStore: Send {
    /// Look up a hall by name and building.
    fn lecture_hall_id(&mut self, name: &str, building: &str) -> Result<Option<i64>>;

    /// Register a hall, returning its id. Existing halls are not duplicated.
    fn add_lecture_hall(&mut self, name: &str, building: &str) -> Result<i64>;

    /// Insert one record and commit. Returns the new record id.
    fn insert_event(&mut self, event: &NewMalpracticeEvent) -> Result<i64>;

    /// Events in insertion order.
    fn list_events(&mut self, filter: &EventFilter) -> Result<Vec<MalpracticeEvent>>;

    fn set_verified(&mut self, id: i64, verified: bool) -> Result<()>;
}

// -------------------- SQLite --------------------

pub struct SqliteMalpracticeStore {
    conn: Connection,
}

impl SqliteMalpracticeStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open event database {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS app_lecturehall (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              hall_name TEXT NOT NULL,
              building TEXT NOT NULL,
              UNIQUE(hall_name, building)
            );

            CREATE TABLE IF NOT EXISTS app_malpraticedetection (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              date TEXT NOT NULL,
              time TEXT NOT NULL,
              malpractice TEXT NOT NULL,
              proof TEXT NOT NULL,
              lecture_hall_id INTEGER REFERENCES app_lecturehall(id),
              verified INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_malpractice_verified
              ON app_malpraticedetection(verified);
            "#,
        )?;
        Ok(())
    }
}

struct EventRow {
    id: i64,
    date: String,
    time: String,
    malpractice: String,
    proof: String,
    lecture_hall_id: Option<i64>,
    verified: bool,
    created_at: String,
}

impl EventRow {
    fn parse(self) -> Result<MalpracticeEvent> {
        let bad = |field: &str| anyhow!("corrupt event {}: invalid {}", self.id, field);
        Ok(MalpracticeEvent {
            id: self.id,
            date: NaiveDate::parse_from_str(&self.date, DATE_FORMAT).map_err(|_| bad("date"))?,
            time: NaiveTime::parse_from_str(&self.time, TIME_FORMAT).map_err(|_| bad("time"))?,
            malpractice: self.malpractice.clone(),
            proof: self.proof.clone(),
            lecture_hall_id: self.lecture_hall_id,
            verified: self.verified,
            created_at: NaiveDateTime::parse_from_str(&self.created_at, CREATED_AT_FORMAT)
                .map_err(|_| bad("created_at"))?,
        })
    }
}

impl MalpracticeStore for SqliteMalpracticeStore {
    fn lecture_hall_id(&mut self, name: &str, building: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM app_lecturehall WHERE hall_name = ?1 AND building = ?2",
                params![name, building],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn add_lecture_hall(&mut self, name: &str, building: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO app_lecturehall(hall_name, building) VALUES (?1, ?2)",
            params![name, building],
        )?;
        self.lecture_hall_id(name, building)?
            .ok_or_else(|| anyhow!("lecture hall {} / {} missing after insert", name, building))
    }

    fn insert_event(&mut self, event: &NewMalpracticeEvent) -> Result<i64> {
        let created_at = Local::now().format(CREATED_AT_FORMAT).to_string();
        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO app_malpraticedetection(
              date, time, malpractice, proof, lecture_hall_id, verified, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
            "#,
            params![
                event.date.format(DATE_FORMAT).to_string(),
                event.time.format(TIME_FORMAT).to_string(),
                event.malpractice,
                event.proof,
                event.lecture_hall_id,
                created_at
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    fn list_events(&mut self, filter: &EventFilter) -> Result<Vec<MalpracticeEvent>> {
        let limit = filter.limit.map_or(-1, |n| n as i64);
        let rows = {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT id, date, time, malpractice, proof, lecture_hall_id, verified, created_at
                FROM app_malpraticedetection
                WHERE ?1 IS NULL OR verified = ?1
                ORDER BY id ASC
                LIMIT ?2
                "#,
            )?;
            let mut rows = stmt.query(params![filter.verified, limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(EventRow {
                    id: row.get(0)?,
                    date: row.get(1)?,
                    time: row.get(2)?,
                    malpractice: row.get(3)?,
                    proof: row.get(4)?,
                    lecture_hall_id: row.get(5)?,
                    verified: row.get(6)?,
                    created_at: row.get(7)?,
                });
            }
            out
        };
        rows.into_iter().map(EventRow::parse).collect()
    }

    fn set_verified(&mut self, id: i64, verified: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE app_malpraticedetection SET verified = ?1 WHERE id = ?2",
            params![verified, id],
        )?;
        if changed == 0 {
            return Err(anyhow!("no malpractice event with id {}", id));
        }
        Ok(())
    }
}

// -------------------- In memory --------------------

#[derive(Clone, Debug)]
struct InMemoryHall {
    id: i64,
    name: String,
    building: String,
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryMalpracticeStore {
    halls: Vec<InMemoryHall>,
    events: Vec<MalpracticeEvent>,
}

impl InMemoryMalpracticeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[MalpracticeEvent] {
        &self.events
    }
}

impl MalpracticeStore for InMemoryMalpracticeStore {
    fn lecture_hall_id(&mut self, name: &str, building: &str) -> Result<Option<i64>> {
        Ok(self
            .halls
            .iter()
            .find(|h| h.name == name && h.building == building)
            .map(|h| h.id))
    }

    fn add_lecture_hall(&mut self, name: &str, building: &str) -> Result<i64> {
        if let Some(id) = self.lecture_hall_id(name, building)? {
            return Ok(id);
        }
        let id = self.halls.len() as i64 + 1;
        self.halls.push(InMemoryHall {
            id,
            name: name.to_string(),
            building: building.to_string(),
        });
        Ok(id)
    }

    fn insert_event(&mut self, event: &NewMalpracticeEvent) -> Result<i64> {
        if let Some(hall) = event.lecture_hall_id {
            if !self.halls.iter().any(|h| h.id == hall) {
                return Err(anyhow!("unknown lecture hall id {}", hall));
            }
        }
        let id = self.events.last().map_or(1, |e| e.id + 1);
        self.events.push(MalpracticeEvent {
            id,
            date: event.date,
            time: event.time,
            malpractice: event.malpractice.clone(),
            proof: event.proof.clone(),
            lecture_hall_id: event.lecture_hall_id,
            verified: false,
            created_at: Local::now().naive_local(),
        });
        Ok(id)
    }

    fn list_events(&mut self, filter: &EventFilter) -> Result<Vec<MalpracticeEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn set_verified(&mut self, id: i64, verified: bool) -> Result<()> {
        let event = self
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| anyhow!("no malpractice event with id {}", id))?;
        event.verified = verified;
        Ok(())
    }
}
