use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "trackademic.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    apply_schema(&conn)?;
    Ok(conn)
}

pub fn apply_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('student', 'teacher', 'admin')),
            created_at TEXT,
            UNIQUE(username)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            UNIQUE(name)
        )",
        [],
    )?;

    // Profiles share the primary key of their users row.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            FOREIGN KEY(id) REFERENCES users(id),
            UNIQUE(email)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_number TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            contact_number TEXT,
            address TEXT,
            date_of_birth TEXT,
            gender TEXT,
            year_level TEXT,
            course_program TEXT,
            FOREIGN KEY(id) REFERENCES users(id),
            UNIQUE(student_number),
            UNIQUE(email)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            teacher_code TEXT NOT NULL,
            department_id TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL,
            contact_number TEXT,
            FOREIGN KEY(id) REFERENCES users(id),
            FOREIGN KEY(department_id) REFERENCES departments(id),
            UNIQUE(teacher_code),
            UNIQUE(email)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_department ON teachers(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_years(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            date_started TEXT,
            date_ended TEXT,
            UNIQUE(label)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id TEXT PRIMARY KEY,
            school_year_id TEXT NOT NULL,
            name TEXT NOT NULL,
            date_started TEXT,
            date_ended TEXT,
            FOREIGN KEY(school_year_id) REFERENCES school_years(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_semesters_year ON semesters(school_year_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            department_id TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            credit_units INTEGER,
            FOREIGN KEY(department_id) REFERENCES departments(id),
            UNIQUE(code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_department ON subjects(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            school_year_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            section TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(school_year_id) REFERENCES school_years(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            UNIQUE(subject_id, school_year_id, semester_id, section)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_term ON classes(school_year_id, semester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_assignments(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            is_primary INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            UNIQUE(class_id, teacher_id)
        )",
        [],
    )?;
    ensure_class_assignments_primary(conn)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_class_assignments_primary
         ON class_assignments(class_id) WHERE is_primary = 1",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_assignments_teacher ON class_assignments(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            enrollment_date TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('enrolled', 'dropped', 'completed')),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(student_id, class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_enrollments_class ON class_enrollments(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL,
            midterm_grade REAL,
            final_grade REAL,
            final_score REAL,
            percentage_score REAL,
            incomplete INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(enrollment_id) REFERENCES class_enrollments(id),
            UNIQUE(enrollment_id)
        )",
        [],
    )?;
    // Workspaces created before the percentage/INC channels existed.
    ensure_grades_percentage_score(conn)?;
    ensure_grades_incomplete(conn)?;

    Ok(())
}

fn ensure_class_assignments_primary(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "class_assignments", "is_primary")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE class_assignments ADD COLUMN is_primary INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    // Older data picked "the first row" as the teacher; make that explicit.
    conn.execute(
        "UPDATE class_assignments SET is_primary = 1
         WHERE rowid IN (SELECT MIN(rowid) FROM class_assignments GROUP BY class_id)",
        [],
    )?;
    Ok(())
}

fn ensure_grades_percentage_score(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "grades", "percentage_score")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE grades ADD COLUMN percentage_score REAL", [])?;
    Ok(())
}

fn ensure_grades_incomplete(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "grades", "incomplete")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE grades ADD COLUMN incomplete INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
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
        Some(text) => Ok(Some(
            serde_json::from_str(&text)
                .with_context(|| format!("setting {} is not valid JSON", key))?,
        )),
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
