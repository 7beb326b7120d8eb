//! SQLite persistence: the student roster and recorded attendance.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to create database directory {0}")]
    CreateDir(String, #[source] std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("student not in roster: {0}")]
    UnknownStudent(String),
}

/// Handle to the attendance database. Single-threaded; the engine thread
/// owns it for the process lifetime.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (and if needed create) the database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::CreateDir(parent.display().to_string(), e))?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self { conn };
        store.migrate()?;

        tracing::info!(path = %db_path.display(), "opened attendance database");
        Ok(store)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS students (
                id   TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS attendance (
                date       TEXT NOT NULL,
                student_id TEXT NOT NULL,
                marked_at  TEXT NOT NULL,
                PRIMARY KEY (date, student_id)
            );",
        )?;
        Ok(())
    }

    /// Display name for a student id.
    ///
    /// A confirmed identification whose id is missing from the roster is
    /// an explicit error, not a panic.
    pub fn student_name(&self, student_id: &str) -> Result<String, StoreError> {
        self.conn
            .query_row(
                "SELECT name FROM students WHERE id = ?1",
                params![student_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::UnknownStudent(student_id.to_string()))
    }

    /// Add or update a roster entry.
    pub fn upsert_student(&self, student_id: &str, name: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO students (id, name) VALUES (?1, ?2)
             ON CONFLICT (id) DO UPDATE SET name = excluded.name",
            params![student_id, name],
        )?;
        Ok(())
    }

    /// Full roster, ordered by id.
    pub fn roster(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM students ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Persist one session's sheet under a calendar date.
    ///
    /// `INSERT OR IGNORE` keeps a repeated flush of the same date
    /// idempotent: the first recorded time for a student stands.
    pub fn record_day(
        &self,
        date: NaiveDate,
        entries: &BTreeMap<String, String>,
    ) -> Result<usize, StoreError> {
        let date = date.format("%Y-%m-%d").to_string();
        let mut inserted = 0usize;

        for (student_id, marked_at) in entries {
            inserted += self.conn.execute(
                "INSERT OR IGNORE INTO attendance (date, student_id, marked_at)
                 VALUES (?1, ?2, ?3)",
                params![date, student_id, marked_at],
            )?;
        }

        tracing::info!(date = %date, students = entries.len(), inserted, "attendance recorded");
        Ok(inserted)
    }

    /// Attendance recorded on a calendar date: student id → marked-at time.
    pub fn attendance_on(&self, date: NaiveDate) -> Result<BTreeMap<String, String>, StoreError> {
        let date = date.format("%Y-%m-%d").to_string();
        let mut stmt = self
            .conn
            .prepare("SELECT student_id, marked_at FROM attendance WHERE date = ?1")?;
        let rows = stmt
            .query_map(params![date], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sheet(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(id, at)| (id.to_string(), at.to_string()))
            .collect()
    }

    #[test]
    fn roster_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_student("s1001", "Ada Lovelace").unwrap();
        store.upsert_student("s1002", "Alan Turing").unwrap();

        assert_eq!(store.student_name("s1001").unwrap(), "Ada Lovelace");
        assert_eq!(store.roster().unwrap().len(), 2);
    }

    #[test]
    fn upsert_replaces_name() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_student("s1001", "Ada").unwrap();
        store.upsert_student("s1001", "Ada Lovelace").unwrap();
        assert_eq!(store.student_name("s1001").unwrap(), "Ada Lovelace");
        assert_eq!(store.roster().unwrap().len(), 1);
    }

    #[test]
    fn missing_student_is_explicit_error() {
        let store = Store::open_in_memory().unwrap();
        let err = store.student_name("nobody").unwrap_err();
        assert!(matches!(err, StoreError::UnknownStudent(id) if id == "nobody"));
    }

    #[test]
    fn record_day_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let day = date(2024, 3, 11);

        let inserted = store
            .record_day(day, &sheet(&[("s1001", "09:01:12"), ("s1002", "09:03:45")]))
            .unwrap();
        assert_eq!(inserted, 2);

        let recorded = store.attendance_on(day).unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded["s1001"], "09:01:12");
        assert_eq!(recorded["s1002"], "09:03:45");
    }

    #[test]
    fn rerecording_a_date_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let day = date(2024, 3, 11);

        store.record_day(day, &sheet(&[("s1001", "09:01:12")])).unwrap();
        // Second flush with a later time must not overwrite or duplicate.
        let inserted = store
            .record_day(day, &sheet(&[("s1001", "09:59:59")]))
            .unwrap();
        assert_eq!(inserted, 0);

        let recorded = store.attendance_on(day).unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded["s1001"], "09:01:12");
    }

    #[test]
    fn dates_are_kept_separate() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_day(date(2024, 3, 11), &sheet(&[("s1001", "09:01:12")]))
            .unwrap();
        store
            .record_day(date(2024, 3, 12), &sheet(&[("s1001", "09:00:02")]))
            .unwrap();

        assert_eq!(store.attendance_on(date(2024, 3, 11)).unwrap()["s1001"], "09:01:12");
        assert_eq!(store.attendance_on(date(2024, 3, 12)).unwrap()["s1001"], "09:00:02");
        assert!(store.attendance_on(date(2024, 3, 13)).unwrap().is_empty());
    }
}
