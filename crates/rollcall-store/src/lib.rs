//! rollcall-store: the SQLite attendance ledger.
//!
//! Two tables: `students` maps roster codes to row ids, `attendance`
//! holds one row per (student, course, date) with a present flag. The
//! UNIQUE constraint on that triple is what makes every write path
//! idempotent; a session can mark the same student any number of times
//! without growing the table.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    roll_number TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id INTEGER NOT NULL REFERENCES students(id),
    course_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    present INTEGER NOT NULL DEFAULT 0,
    UNIQUE(student_id, course_id, date)
);
";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("failed to create data directory {dir}: {source}")]
    CreateDir {
        dir: String,
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A student known to the ledger.
#[derive(Debug, Clone)]
pub struct Student {
    pub id: i64,
    pub code: String,
    pub name: String,
}

/// What a `mark_present` call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The present flag flipped on this call.
    NewlyMarked,
    /// The student was already marked present for this course and date.
    AlreadyPresent,
    /// No student row carries this code. Non-fatal; the caller logs it
    /// and the session continues.
    UnknownStudent,
}

/// Handle to the attendance database. All access is synchronous and
/// single-threaded; the session owns exactly one.
pub struct AttendanceLedger {
    conn: Connection,
}

impl AttendanceLedger {
    /// Open (creating if needed) the database at `path`, including parent
    /// directories, and apply the schema.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| LedgerError::CreateDir {
                    dir: parent.display().to_string(),
                    source,
                })?;
            }
        }

        tracing::info!(path = %path.display(), "opening attendance ledger");
        Self::init(Connection::open(path)?)
    }

    /// In-memory ledger, for tests.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Register a student. The code must be unused.
    pub fn add_student(&self, code: &str, name: &str) -> Result<i64, LedgerError> {
        self.conn.execute(
            "INSERT INTO students (roll_number, name) VALUES (?1, ?2)",
            params![code, name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All students, in registration order.
    pub fn enrolled_students(&self) -> Result<Vec<Student>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, roll_number, name FROM students ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Student {
                id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
            })
        })?;

        let mut students = Vec::new();
        for student in rows {
            students.push(student?);
        }
        Ok(students)
    }

    /// Insert an absent row for every student for (course, date), leaving
    /// any existing rows untouched. Returns how many rows were inserted.
    ///
    /// Runs once at session start so the day's report shows explicit
    /// absences rather than missing rows.
    pub fn prepopulate(&self, course_id: i64, date: NaiveDate) -> Result<usize, LedgerError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO attendance (student_id, course_id, date, present)
             SELECT id, ?1, ?2, 0 FROM students",
            params![course_id, date_key(date)],
        )?;
        Ok(inserted)
    }

    /// Mark the student with `code` present for (course, date).
    ///
    /// Upserts, so it also works for a student the prepopulation pass
    /// missed. Calling it again for the same triple is a no-op reported
    /// as [`MarkOutcome::AlreadyPresent`].
    pub fn mark_present(
        &self,
        code: &str,
        course_id: i64,
        date: NaiveDate,
    ) -> Result<MarkOutcome, LedgerError> {
        let student_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM students WHERE roll_number = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()?;

        let Some(student_id) = student_id else {
            return Ok(MarkOutcome::UnknownStudent);
        };

        let date = date_key(date);
        let present: Option<i64> = self
            .conn
            .query_row(
                "SELECT present FROM attendance
                 WHERE student_id = ?1 AND course_id = ?2 AND date = ?3",
                params![student_id, course_id, date],
                |row| row.get(0),
            )
            .optional()?;

        if present == Some(1) {
            return Ok(MarkOutcome::AlreadyPresent);
        }

        self.conn.execute(
            "INSERT INTO attendance (student_id, course_id, date, present)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(student_id, course_id, date) DO UPDATE SET present = 1",
            params![student_id, course_id, date],
        )?;

        Ok(MarkOutcome::NewlyMarked)
    }

    /// Whether the student is recorded present for (course, date).
    pub fn is_present(
        &self,
        code: &str,
        course_id: i64,
        date: NaiveDate,
    ) -> Result<bool, LedgerError> {
        let present: Option<i64> = self
            .conn
            .query_row(
                "SELECT a.present FROM attendance a
                 JOIN students s ON s.id = a.student_id
                 WHERE s.roll_number = ?1 AND a.course_id = ?2 AND a.date = ?3",
                params![code, course_id, date_key(date)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(present == Some(1))
    }

    /// How many students are marked present for (course, date).
    pub fn present_count(&self, course_id: i64, date: NaiveDate) -> Result<i64, LedgerError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM attendance
             WHERE course_id = ?1 AND date = ?2 AND present = 1",
            params![course_id, date_key(date)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Total attendance rows for (course, date), present or absent.
    pub fn roster_row_count(&self, course_id: i64, date: NaiveDate) -> Result<i64, LedgerError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE course_id = ?1 AND date = ?2",
            params![course_id, date_key(date)],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Stored date format. Everything keys on the rendered string, so this
/// never changes shape.
fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_students() -> AttendanceLedger {
        let ledger = AttendanceLedger::open_in_memory().unwrap();
        ledger.add_student("S001", "Alice Johnson").unwrap();
        ledger.add_student("S002", "Bob Okafor").unwrap();
        ledger.add_student("S003", "Chen Wei").unwrap();
        ledger
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn prepopulate_inserts_one_absent_row_per_student() {
        let ledger = ledger_with_students();
        let date = day(2024, 5, 14);

        assert_eq!(ledger.prepopulate(7, date).unwrap(), 3);
        assert_eq!(ledger.roster_row_count(7, date).unwrap(), 3);
        assert_eq!(ledger.present_count(7, date).unwrap(), 0);
    }

    #[test]
    fn prepopulate_is_idempotent() {
        let ledger = ledger_with_students();
        let date = day(2024, 5, 14);

        assert_eq!(ledger.prepopulate(7, date).unwrap(), 3);
        assert_eq!(ledger.prepopulate(7, date).unwrap(), 0);
        assert_eq!(ledger.roster_row_count(7, date).unwrap(), 3);
    }

    #[test]
    fn prepopulate_never_clears_an_existing_mark() {
        let ledger = ledger_with_students();
        let date = day(2024, 5, 14);

        ledger.prepopulate(7, date).unwrap();
        ledger.mark_present("S002", 7, date).unwrap();

        // A restarted session prepopulates again mid-day.
        assert_eq!(ledger.prepopulate(7, date).unwrap(), 0);
        assert!(ledger.is_present("S002", 7, date).unwrap());
    }

    #[test]
    fn mark_present_flips_once_then_reports_already() {
        let ledger = ledger_with_students();
        let date = day(2024, 5, 14);
        ledger.prepopulate(7, date).unwrap();

        assert_eq!(
            ledger.mark_present("S001", 7, date).unwrap(),
            MarkOutcome::NewlyMarked
        );
        for _ in 0..5 {
            assert_eq!(
                ledger.mark_present("S001", 7, date).unwrap(),
                MarkOutcome::AlreadyPresent
            );
        }

        assert!(ledger.is_present("S001", 7, date).unwrap());
        assert_eq!(ledger.present_count(7, date).unwrap(), 1);
        // Still exactly one row per student.
        assert_eq!(ledger.roster_row_count(7, date).unwrap(), 3);
    }

    #[test]
    fn mark_present_without_prepopulation_upserts() {
        let ledger = ledger_with_students();
        let date = day(2024, 5, 14);

        assert_eq!(
            ledger.mark_present("S003", 7, date).unwrap(),
            MarkOutcome::NewlyMarked
        );
        assert!(ledger.is_present("S003", 7, date).unwrap());
        assert_eq!(ledger.roster_row_count(7, date).unwrap(), 1);
    }

    #[test]
    fn unknown_code_is_reported_not_written() {
        let ledger = ledger_with_students();
        let date = day(2024, 5, 14);
        ledger.prepopulate(7, date).unwrap();

        assert_eq!(
            ledger.mark_present("S999", 7, date).unwrap(),
            MarkOutcome::UnknownStudent
        );
        assert_eq!(ledger.present_count(7, date).unwrap(), 0);
        assert_eq!(ledger.roster_row_count(7, date).unwrap(), 3);
    }

    #[test]
    fn marks_are_scoped_to_course_and_date() {
        let ledger = ledger_with_students();
        let monday = day(2024, 5, 13);
        let tuesday = day(2024, 5, 14);

        ledger.mark_present("S001", 7, monday).unwrap();

        assert!(ledger.is_present("S001", 7, monday).unwrap());
        assert!(!ledger.is_present("S001", 7, tuesday).unwrap());
        assert!(!ledger.is_present("S001", 8, monday).unwrap());

        // Same student, different course, same day: distinct row.
        assert_eq!(
            ledger.mark_present("S001", 8, monday).unwrap(),
            MarkOutcome::NewlyMarked
        );
    }

    #[test]
    fn enrolled_students_come_back_in_registration_order() {
        let ledger = ledger_with_students();
        let students = ledger.enrolled_students().unwrap();

        let codes: Vec<&str> = students.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, ["S001", "S002", "S003"]);
        assert_eq!(students[0].name, "Alice Johnson");
    }

    #[test]
    fn duplicate_student_code_is_rejected() {
        let ledger = ledger_with_students();
        assert!(ledger.add_student("S001", "Another Alice").is_err());
    }

    #[test]
    fn absent_until_marked() {
        let ledger = ledger_with_students();
        let date = day(2024, 5, 14);
        ledger.prepopulate(7, date).unwrap();

        assert!(!ledger.is_present("S001", 7, date).unwrap());
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/attendance.db");

        let ledger = AttendanceLedger::open(&path).unwrap();
        ledger.add_student("S001", "Alice").unwrap();
        drop(ledger);

        // Reopening sees the same data.
        let reopened = AttendanceLedger::open(&path).unwrap();
        assert_eq!(reopened.enrolled_students().unwrap().len(), 1);
    }
}
