//! School years, semesters, departments, subjects, classes and teacher assignments.
//!
//! These are plain records; the invariants worth enforcing here are the unique keys
//! (surfaced as `DuplicateKey` via the store's constraints), the year label format and
//! refusing deletes that would orphan enrollments or grades.

use crate::error::{CoreError, CoreResult};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn reasonable_text(field: &'static str, value: &str) -> CoreResult<String> {
    let v = value.trim();
    if v.chars().count() < 2 {
        return Err(CoreError::invalid(
            field,
            format!("{} must be at least 2 characters", field),
        ));
    }
    Ok(v.to_string())
}

fn check_date_order(start: Option<NaiveDate>, end: Option<NaiveDate>) -> CoreResult<()> {
    if let (Some(s), Some(e)) = (start, end) {
        if s >= e {
            return Err(CoreError::invalid(
                "dateEnded",
                "end date must be after start date",
            ));
        }
    }
    Ok(())
}

fn exists(conn: &Connection, sql: &str, id: &str) -> CoreResult<bool> {
    Ok(conn
        .query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

fn count(conn: &Connection, sql: &str, id: &str) -> CoreResult<i64> {
    Ok(conn.query_row(sql, [id], |r| r.get(0))?)
}

fn fmt_date(d: Option<NaiveDate>) -> Option<String> {
    d.map(|d| d.format("%Y-%m-%d").to_string())
}

/// `YYYY-YYYY` where the second year is exactly the first plus one.
pub fn validate_year_label(label: &str) -> CoreResult<()> {
    let label = label.trim();
    let bad_format = || CoreError::invalid("label", "format must be YYYY-YYYY");
    let (a, b) = label.split_once('-').ok_or_else(bad_format)?;
    let four_digits = |s: &str| s.len() == 4 && s.bytes().all(|c| c.is_ascii_digit());
    if !four_digits(a) || !four_digits(b) {
        return Err(bad_format());
    }
    let (start, end): (i32, i32) = (
        a.parse().map_err(|_| bad_format())?,
        b.parse().map_err(|_| bad_format())?,
    );
    if end != start + 1 {
        return Err(CoreError::invalid("label", "year gap must be exactly 1 year"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolYear {
    pub id: String,
    pub label: String,
    pub date_started: Option<String>,
    pub date_ended: Option<String>,
}

pub fn create_school_year(
    conn: &Connection,
    label: &str,
    date_started: Option<NaiveDate>,
    date_ended: Option<NaiveDate>,
) -> CoreResult<String> {
    validate_year_label(label)?;
    check_date_order(date_started, date_ended)?;
    let id = new_id();
    conn.execute(
        "INSERT INTO school_years(id, label, date_started, date_ended) VALUES(?, ?, ?, ?)",
        (
            &id,
            label.trim(),
            fmt_date(date_started),
            fmt_date(date_ended),
        ),
    )?;
    Ok(id)
}

pub fn update_school_year(
    conn: &Connection,
    id: &str,
    label: &str,
    date_started: Option<NaiveDate>,
    date_ended: Option<NaiveDate>,
) -> CoreResult<()> {
    validate_year_label(label)?;
    check_date_order(date_started, date_ended)?;
    let changed = conn.execute(
        "UPDATE school_years SET label = ?, date_started = ?, date_ended = ? WHERE id = ?",
        (
            label.trim(),
            fmt_date(date_started),
            fmt_date(date_ended),
            id,
        ),
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("school year", id));
    }
    Ok(())
}

pub fn delete_school_year(conn: &Connection, id: &str) -> CoreResult<()> {
    if !exists(conn, "SELECT 1 FROM school_years WHERE id = ?", id)? {
        return Err(CoreError::not_found("school year", id));
    }
    if count(conn, "SELECT COUNT(*) FROM semesters WHERE school_year_id = ?", id)? > 0 {
        return Err(CoreError::InUse {
            entity: "school year",
            dependents: "semesters",
        });
    }
    if count(conn, "SELECT COUNT(*) FROM classes WHERE school_year_id = ?", id)? > 0 {
        return Err(CoreError::InUse {
            entity: "school year",
            dependents: "classes",
        });
    }
    conn.execute("DELETE FROM school_years WHERE id = ?", [id])?;
    Ok(())
}

pub fn list_school_years(conn: &Connection) -> CoreResult<Vec<SchoolYear>> {
    let mut stmt = conn.prepare(
        "SELECT id, label, date_started, date_ended FROM school_years ORDER BY label DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SchoolYear {
                id: row.get(0)?,
                label: row.get(1)?,
                date_started: row.get(2)?,
                date_ended: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Semester {
    pub id: String,
    pub school_year_id: String,
    pub name: String,
    pub date_started: Option<String>,
    pub date_ended: Option<String>,
}

pub fn create_semester(
    conn: &Connection,
    school_year_id: &str,
    name: &str,
    date_started: Option<NaiveDate>,
    date_ended: Option<NaiveDate>,
) -> CoreResult<String> {
    let name = reasonable_text("name", name)?;
    check_date_order(date_started, date_ended)?;
    if !exists(conn, "SELECT 1 FROM school_years WHERE id = ?", school_year_id)? {
        return Err(CoreError::not_found("school year", school_year_id));
    }
    let id = new_id();
    conn.execute(
        "INSERT INTO semesters(id, school_year_id, name, date_started, date_ended)
         VALUES(?, ?, ?, ?, ?)",
        (
            &id,
            school_year_id,
            &name,
            fmt_date(date_started),
            fmt_date(date_ended),
        ),
    )?;
    Ok(id)
}

pub fn update_semester(
    conn: &Connection,
    id: &str,
    name: &str,
    date_started: Option<NaiveDate>,
    date_ended: Option<NaiveDate>,
) -> CoreResult<()> {
    let name = reasonable_text("name", name)?;
    check_date_order(date_started, date_ended)?;
    let changed = conn.execute(
        "UPDATE semesters SET name = ?, date_started = ?, date_ended = ? WHERE id = ?",
        (&name, fmt_date(date_started), fmt_date(date_ended), id),
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("semester", id));
    }
    Ok(())
}

pub fn delete_semester(conn: &Connection, id: &str) -> CoreResult<()> {
    if !exists(conn, "SELECT 1 FROM semesters WHERE id = ?", id)? {
        return Err(CoreError::not_found("semester", id));
    }
    if count(conn, "SELECT COUNT(*) FROM classes WHERE semester_id = ?", id)? > 0 {
        return Err(CoreError::InUse {
            entity: "semester",
            dependents: "classes",
        });
    }
    conn.execute("DELETE FROM semesters WHERE id = ?", [id])?;
    Ok(())
}

pub fn list_semesters(conn: &Connection, school_year_id: Option<&str>) -> CoreResult<Vec<Semester>> {
    let mut stmt = conn.prepare(
        "SELECT id, school_year_id, name, date_started, date_ended
         FROM semesters
         WHERE (?1 IS NULL OR school_year_id = ?1)
         ORDER BY date_started IS NULL, date_started, name",
    )?;
    let rows = stmt
        .query_map([school_year_id], |row| {
            Ok(Semester {
                id: row.get(0)?,
                school_year_id: row.get(1)?,
                name: row.get(2)?,
                date_started: row.get(3)?,
                date_ended: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: String,
    pub name: String,
}

pub fn create_department(conn: &Connection, name: &str) -> CoreResult<String> {
    let name = reasonable_text("name", name)?;
    let id = new_id();
    conn.execute("INSERT INTO departments(id, name) VALUES(?, ?)", (&id, &name))?;
    Ok(id)
}

pub fn rename_department(conn: &Connection, id: &str, name: &str) -> CoreResult<()> {
    let name = reasonable_text("name", name)?;
    let changed = conn.execute("UPDATE departments SET name = ? WHERE id = ?", (&name, id))?;
    if changed == 0 {
        return Err(CoreError::not_found("department", id));
    }
    Ok(())
}

pub fn delete_department(conn: &Connection, id: &str) -> CoreResult<()> {
    if !exists(conn, "SELECT 1 FROM departments WHERE id = ?", id)? {
        return Err(CoreError::not_found("department", id));
    }
    if count(conn, "SELECT COUNT(*) FROM subjects WHERE department_id = ?", id)? > 0 {
        return Err(CoreError::InUse {
            entity: "department",
            dependents: "subjects",
        });
    }
    if count(conn, "SELECT COUNT(*) FROM teachers WHERE department_id = ?", id)? > 0 {
        return Err(CoreError::InUse {
            entity: "department",
            dependents: "teachers",
        });
    }
    conn.execute("DELETE FROM departments WHERE id = ?", [id])?;
    Ok(())
}

pub fn list_departments(conn: &Connection) -> CoreResult<Vec<Department>> {
    let mut stmt = conn.prepare("SELECT id, name FROM departments ORDER BY name")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Department {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn department_exists(conn: &Connection, id: &str) -> CoreResult<bool> {
    exists(conn, "SELECT 1 FROM departments WHERE id = ?", id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub department_id: String,
    pub code: String,
    pub name: String,
    pub credit_units: Option<i64>,
}

pub fn create_subject(
    conn: &Connection,
    department_id: &str,
    code: &str,
    name: &str,
    credit_units: Option<i64>,
) -> CoreResult<String> {
    let code = reasonable_text("code", code)?;
    let name = reasonable_text("name", name)?;
    if let Some(u) = credit_units {
        if !(1..=12).contains(&u) {
            return Err(CoreError::invalid(
                "creditUnits",
                "creditUnits must be in 1..=12",
            ));
        }
    }
    if !department_exists(conn, department_id)? {
        return Err(CoreError::not_found("department", department_id));
    }
    let id = new_id();
    conn.execute(
        "INSERT INTO subjects(id, department_id, code, name, credit_units) VALUES(?, ?, ?, ?, ?)",
        (&id, department_id, &code, &name, credit_units),
    )?;
    Ok(id)
}

pub fn update_subject(conn: &Connection, id: &str, code: &str, name: &str) -> CoreResult<()> {
    let code = reasonable_text("code", code)?;
    let name = reasonable_text("name", name)?;
    let changed = conn.execute(
        "UPDATE subjects SET code = ?, name = ? WHERE id = ?",
        (&code, &name, id),
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("subject", id));
    }
    Ok(())
}

pub fn delete_subject(conn: &Connection, id: &str) -> CoreResult<()> {
    if !exists(conn, "SELECT 1 FROM subjects WHERE id = ?", id)? {
        return Err(CoreError::not_found("subject", id));
    }
    if count(conn, "SELECT COUNT(*) FROM classes WHERE subject_id = ?", id)? > 0 {
        return Err(CoreError::InUse {
            entity: "subject",
            dependents: "classes",
        });
    }
    conn.execute("DELETE FROM subjects WHERE id = ?", [id])?;
    Ok(())
}

pub fn list_subjects(conn: &Connection, department_id: Option<&str>) -> CoreResult<Vec<Subject>> {
    let mut stmt = conn.prepare(
        "SELECT id, department_id, code, name, credit_units
         FROM subjects
         WHERE (?1 IS NULL OR department_id = ?1)
         ORDER BY code",
    )?;
    let rows = stmt
        .query_map([department_id], |row| {
            Ok(Subject {
                id: row.get(0)?,
                department_id: row.get(1)?,
                code: row.get(2)?,
                name: row.get(3)?,
                credit_units: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherRef {
    pub teacher_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDetails {
    pub id: String,
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub credit_units: Option<i64>,
    pub school_year_id: String,
    pub school_year: String,
    pub semester_id: String,
    pub semester: String,
    pub section: String,
    pub total_students: i64,
    pub primary_teacher: Option<TeacherRef>,
}

pub fn create_class(
    conn: &Connection,
    subject_id: &str,
    school_year_id: &str,
    semester_id: &str,
    section: &str,
) -> CoreResult<String> {
    let section = reasonable_text("section", section)?;
    if !exists(conn, "SELECT 1 FROM subjects WHERE id = ?", subject_id)? {
        return Err(CoreError::not_found("subject", subject_id));
    }
    let semester_year: Option<String> = conn
        .query_row(
            "SELECT school_year_id FROM semesters WHERE id = ?",
            [semester_id],
            |r| r.get(0),
        )
        .optional()?;
    match semester_year {
        None => return Err(CoreError::not_found("semester", semester_id)),
        Some(y) if y != school_year_id => {
            return Err(CoreError::invalid(
                "semesterId",
                "semester does not belong to the selected school year",
            ))
        }
        Some(_) => {}
    }
    let id = new_id();
    conn.execute(
        "INSERT INTO classes(id, subject_id, school_year_id, semester_id, section)
         VALUES(?, ?, ?, ?, ?)",
        (&id, subject_id, school_year_id, semester_id, &section),
    )?;
    Ok(id)
}

pub fn rename_class_section(conn: &Connection, id: &str, section: &str) -> CoreResult<()> {
    let section = reasonable_text("section", section)?;
    let changed = conn.execute("UPDATE classes SET section = ? WHERE id = ?", (&section, id))?;
    if changed == 0 {
        return Err(CoreError::not_found("class", id));
    }
    Ok(())
}

pub fn delete_class(conn: &Connection, id: &str) -> CoreResult<()> {
    if !class_exists(conn, id)? {
        return Err(CoreError::not_found("class", id));
    }
    if count(conn, "SELECT COUNT(*) FROM class_enrollments WHERE class_id = ?", id)? > 0 {
        return Err(CoreError::InUse {
            entity: "class",
            dependents: "enrollments",
        });
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM class_assignments WHERE class_id = ?", [id])?;
    tx.execute("DELETE FROM classes WHERE id = ?", [id])?;
    tx.commit()?;
    Ok(())
}

pub fn class_exists(conn: &Connection, id: &str) -> CoreResult<bool> {
    exists(conn, "SELECT 1 FROM classes WHERE id = ?", id)
}

const CLASS_DETAILS_SELECT: &str = "SELECT
       c.id, c.subject_id, s.code, s.name, s.credit_units,
       c.school_year_id, y.label, c.semester_id, sem.name, c.section,
       (SELECT COUNT(*) FROM class_enrollments e WHERE e.class_id = c.id) AS total_students,
       t.id, t.first_name || ' ' || t.last_name
     FROM classes c
     JOIN subjects s ON s.id = c.subject_id
     JOIN school_years y ON y.id = c.school_year_id
     JOIN semesters sem ON sem.id = c.semester_id
     LEFT JOIN class_assignments ca ON ca.class_id = c.id AND ca.is_primary = 1
     LEFT JOIN teachers t ON t.id = ca.teacher_id";

fn class_details_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClassDetails> {
    let teacher_id: Option<String> = row.get(11)?;
    let teacher_name: Option<String> = row.get(12)?;
    Ok(ClassDetails {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        subject_code: row.get(2)?,
        subject_name: row.get(3)?,
        credit_units: row.get(4)?,
        school_year_id: row.get(5)?,
        school_year: row.get(6)?,
        semester_id: row.get(7)?,
        semester: row.get(8)?,
        section: row.get(9)?,
        total_students: row.get(10)?,
        primary_teacher: teacher_id.map(|teacher_id| TeacherRef {
            teacher_id,
            name: teacher_name.unwrap_or_default(),
        }),
    })
}

pub fn get_class(conn: &Connection, id: &str) -> CoreResult<ClassDetails> {
    let sql = format!("{} WHERE c.id = ?", CLASS_DETAILS_SELECT);
    conn.query_row(&sql, [id], class_details_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("class", id))
}

#[derive(Debug, Clone, Default)]
pub struct ClassFilter<'a> {
    pub school_year_id: Option<&'a str>,
    pub semester_id: Option<&'a str>,
    pub subject_id: Option<&'a str>,
    pub teacher_id: Option<&'a str>,
}

pub fn list_classes(conn: &Connection, filter: &ClassFilter<'_>) -> CoreResult<Vec<ClassDetails>> {
    let sql = format!(
        "{} WHERE (?1 IS NULL OR c.school_year_id = ?1)
           AND (?2 IS NULL OR c.semester_id = ?2)
           AND (?3 IS NULL OR c.subject_id = ?3)
           AND (?4 IS NULL OR EXISTS (
                 SELECT 1 FROM class_assignments a
                 WHERE a.class_id = c.id AND a.teacher_id = ?4))
         ORDER BY s.code, c.section",
        CLASS_DETAILS_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (
                filter.school_year_id,
                filter.semester_id,
                filter.subject_id,
                filter.teacher_id,
            ),
            class_details_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Links a teacher to a class. A primary assignment replaces the class's previous
/// primary (which stays assigned as a non-primary teacher).
pub fn assign_teacher(
    conn: &Connection,
    class_id: &str,
    teacher_id: &str,
    primary: bool,
) -> CoreResult<String> {
    if !class_exists(conn, class_id)? {
        return Err(CoreError::not_found("class", class_id));
    }
    if !exists(conn, "SELECT 1 FROM teachers WHERE id = ?", teacher_id)? {
        return Err(CoreError::not_found("teacher", teacher_id));
    }

    let tx = conn.unchecked_transaction()?;
    if primary {
        tx.execute(
            "UPDATE class_assignments SET is_primary = 0 WHERE class_id = ? AND teacher_id <> ?",
            (class_id, teacher_id),
        )?;
    }
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM class_assignments WHERE class_id = ? AND teacher_id = ?",
            (class_id, teacher_id),
            |r| r.get(0),
        )
        .optional()?;
    let assignment_id = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE class_assignments SET is_primary = ? WHERE id = ?",
                (primary as i64, &id),
            )?;
            id
        }
        None => {
            let id = new_id();
            tx.execute(
                "INSERT INTO class_assignments(id, class_id, teacher_id, is_primary)
                 VALUES(?, ?, ?, ?)",
                (&id, class_id, teacher_id, primary as i64),
            )?;
            id
        }
    };
    tx.commit()?;
    Ok(assignment_id)
}

pub fn unassign_teacher(conn: &Connection, class_id: &str, teacher_id: &str) -> CoreResult<()> {
    let removed = conn.execute(
        "DELETE FROM class_assignments WHERE class_id = ? AND teacher_id = ?",
        (class_id, teacher_id),
    )?;
    if removed == 0 {
        return Err(CoreError::not_found("class assignment", class_id));
    }
    Ok(())
}
