use crate::schedule::{
    day_name, parse_day, parse_hhmm, AssignmentRepository, CourseAssignment, TimeInterval,
};
use anyhow::anyhow;
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;

pub const DB_FILE: &str = "schoold.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS counters(
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_assignments(
            id TEXT PRIMARY KEY,
            school_year TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            room_id TEXT,
            day TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_assignments_year ON course_assignments(school_year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_schedules(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            fee_type TEXT NOT NULL,
            school_year TEXT NOT NULL,
            created_at TEXT,
            UNIQUE(student_id, fee_type, school_year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS installments(
            id TEXT PRIMARY KEY,
            schedule_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            label TEXT NOT NULL,
            due_date TEXT,
            amount INTEGER NOT NULL,
            paid_amount INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(schedule_id) REFERENCES fee_schedules(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_installments_schedule ON installments(schedule_id, sort_order)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            schedule_id TEXT NOT NULL,
            installment_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            method TEXT NOT NULL,
            receipt_number TEXT NOT NULL UNIQUE,
            paid_at TEXT NOT NULL,
            FOREIGN KEY(schedule_id) REFERENCES fee_schedules(id),
            FOREIGN KEY(installment_id) REFERENCES installments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_schedule ON payments(schedule_id)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Bumps and returns a named counter. Call inside the caller's transaction
/// so the value is only consumed when the write commits.
pub fn counter_next(conn: &Connection, name: &str) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO counters(name, value) VALUES(?, 1)
         ON CONFLICT(name) DO UPDATE SET value = value + 1",
        [name],
    )?;
    let v: i64 = conn.query_row("SELECT value FROM counters WHERE name = ?", [name], |r| {
        r.get(0)
    })?;
    Ok(v)
}

const ASSIGNMENT_COLUMNS: &str =
    "id, school_year, subject_id, teacher_id, class_id, room_id, day, start_time, end_time";

struct AssignmentRow {
    id: String,
    school_year: String,
    subject_id: String,
    teacher_id: String,
    class_id: String,
    room_id: Option<String>,
    day: String,
    start_time: String,
    end_time: String,
}

impl AssignmentRow {
    fn read(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            school_year: r.get(1)?,
            subject_id: r.get(2)?,
            teacher_id: r.get(3)?,
            class_id: r.get(4)?,
            room_id: r.get(5)?,
            day: r.get(6)?,
            start_time: r.get(7)?,
            end_time: r.get(8)?,
        })
    }

    fn into_assignment(self) -> anyhow::Result<CourseAssignment> {
        let day = parse_day(&self.day)
            .ok_or_else(|| anyhow!("assignment {}: bad day {:?}", self.id, self.day))?;
        let start = parse_hhmm(&self.start_time)
            .ok_or_else(|| anyhow!("assignment {}: bad start {:?}", self.id, self.start_time))?;
        let end = parse_hhmm(&self.end_time)
            .ok_or_else(|| anyhow!("assignment {}: bad end {:?}", self.id, self.end_time))?;
        let slot = TimeInterval::new(day, start, end)
            .map_err(|e| anyhow!("assignment {}: {}", self.id, e))?;
        Ok(CourseAssignment {
            id: self.id,
            school_year: self.school_year,
            subject_id: self.subject_id,
            teacher_id: self.teacher_id,
            class_id: self.class_id,
            room_id: self.room_id,
            slot,
        })
    }
}

/// Workspace-backed source for the conflict checker.
pub struct AssignmentStore<'a> {
    conn: &'a Connection,
}

impl<'a> AssignmentStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Option<CourseAssignment>> {
        let sql = format!(
            "SELECT {} FROM course_assignments WHERE id = ?",
            ASSIGNMENT_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, [id], AssignmentRow::read)
            .optional()?;
        row.map(AssignmentRow::into_assignment).transpose()
    }

    pub fn insert(&self, a: &CourseAssignment) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO course_assignments(
                id, school_year, subject_id, teacher_id, class_id, room_id,
                day, start_time, end_time, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                a.id,
                a.school_year,
                a.subject_id,
                a.teacher_id,
                a.class_id,
                a.room_id,
                day_name(a.slot.day),
                a.slot.start.format("%H:%M").to_string(),
                a.slot.end.format("%H:%M").to_string(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update(&self, a: &CourseAssignment) -> anyhow::Result<bool> {
        let changed = self.conn.execute(
            "UPDATE course_assignments SET
                school_year = ?, subject_id = ?, teacher_id = ?, class_id = ?, room_id = ?,
                day = ?, start_time = ?, end_time = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                a.school_year,
                a.subject_id,
                a.teacher_id,
                a.class_id,
                a.room_id,
                day_name(a.slot.day),
                a.slot.start.format("%H:%M").to_string(),
                a.slot.end.format("%H:%M").to_string(),
                chrono::Utc::now().to_rfc3339(),
                a.id,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM course_assignments WHERE id = ?", [id])?;
        Ok(changed > 0)
    }
}

impl AssignmentRepository for AssignmentStore<'_> {
    fn list_assignments(&self, school_year: &str) -> anyhow::Result<Vec<CourseAssignment>> {
        let sql = format!(
            "SELECT {} FROM course_assignments
             WHERE school_year = ?
             ORDER BY start_time, id",
            ASSIGNMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([school_year], AssignmentRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = rows
            .into_iter()
            .map(AssignmentRow::into_assignment)
            .collect::<anyhow::Result<Vec<_>>>()?;
        // Day names do not sort in week order in SQL.
        out.sort_by_key(|a| (a.slot.day.num_days_from_monday(), a.slot.start));
        Ok(out)
    }
}
