//! Student/class links and their paired grade rows.
//!
//! Every enrollment is created together with an empty grade row in one transaction, so
//! "one grade per enrollment" holds from the moment the enrollment exists.

use crate::accounts::student_exists;
use crate::curriculum::{class_exists, new_id};
use crate::error::{CoreError, CoreResult};
use crate::grading::{derive_remark, load_grade};
use crate::model::{full_name, EnrollmentStatus, Remark, RosterEntry};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RemovalOutcome {
    HardDeleted,
    SoftDropped,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterFilter {
    Only(EnrollmentStatus),
    All,
}

impl Default for RosterFilter {
    fn default() -> Self {
        RosterFilter::Only(EnrollmentStatus::Enrolled)
    }
}

#[derive(Debug, Clone)]
pub struct EnrollmentRow {
    pub id: String,
    pub status: EnrollmentStatus,
}

pub fn find_enrollment(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
) -> CoreResult<Option<EnrollmentRow>> {
    Ok(conn
        .query_row(
            "SELECT id, status FROM class_enrollments WHERE student_id = ? AND class_id = ?",
            (student_id, class_id),
            enrollment_from_row,
        )
        .optional()?)
}

pub fn get_enrollment(conn: &Connection, enrollment_id: &str) -> CoreResult<EnrollmentRow> {
    conn.query_row(
        "SELECT id, status FROM class_enrollments WHERE id = ?",
        [enrollment_id],
        enrollment_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("enrollment", enrollment_id))
}

fn enrollment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EnrollmentRow> {
    Ok(EnrollmentRow {
        id: row.get(0)?,
        status: EnrollmentStatus::from_column(&row.get::<_, String>(1)?),
    })
}

/// Links a student to a class with status `enrolled` and an empty grade row.
///
/// The pre-check reports the existing id; a concurrent insert racing past it still
/// lands on the unique index and comes back as `AlreadyEnrolled` without an id.
pub fn enroll(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
    enrollment_date: NaiveDate,
) -> CoreResult<String> {
    if !student_exists(conn, student_id)? {
        return Err(CoreError::not_found("student", student_id));
    }
    if !class_exists(conn, class_id)? {
        return Err(CoreError::not_found("class", class_id));
    }
    if let Some(existing) = find_enrollment(conn, student_id, class_id)? {
        tracing::warn!(student_id, class_id, enrollment_id = %existing.id, "already enrolled");
        return Err(CoreError::AlreadyEnrolled {
            enrollment_id: Some(existing.id),
        });
    }

    let id = new_id();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO class_enrollments(id, student_id, class_id, enrollment_date, status)
         VALUES(?, ?, ?, ?, ?)",
        (
            &id,
            student_id,
            class_id,
            enrollment_date.format("%Y-%m-%d").to_string(),
            EnrollmentStatus::Enrolled.as_str(),
        ),
    )?;
    tx.execute(
        "INSERT INTO grades(id, enrollment_id, incomplete, updated_at) VALUES(?, ?, 0, ?)",
        (new_id(), &id, chrono::Utc::now().to_rfc3339()),
    )?;
    tx.commit()?;

    tracing::info!(student_id, class_id, enrollment_id = %id, "student enrolled");
    Ok(id)
}

/// Hard-deletes an enrollment that has no grade values; otherwise marks it dropped and
/// keeps the grade row as it is.
///
/// A graded enrollment that is already dropped is left alone. A graded completed one
/// cannot be dropped and fails with `InvalidTransition`.
pub fn remove(conn: &Connection, student_id: &str, class_id: &str) -> CoreResult<RemovalOutcome> {
    let Some(enrollment) = find_enrollment(conn, student_id, class_id)? else {
        return Ok(RemovalOutcome::NotFound);
    };
    let graded = load_grade(conn, &enrollment.id)?
        .map(|g| g.has_values())
        .unwrap_or(false);
    if graded {
        if enrollment.status == EnrollmentStatus::Dropped {
            return Ok(RemovalOutcome::SoftDropped);
        }
        if !transition_allowed(enrollment.status, EnrollmentStatus::Dropped) {
            return Err(CoreError::InvalidTransition {
                from: enrollment.status.as_str(),
                to: EnrollmentStatus::Dropped.as_str(),
            });
        }
    }

    let tx = conn.unchecked_transaction()?;
    let outcome = if graded {
        tx.execute(
            "UPDATE class_enrollments SET status = ? WHERE id = ?",
            (EnrollmentStatus::Dropped.as_str(), &enrollment.id),
        )?;
        RemovalOutcome::SoftDropped
    } else {
        tx.execute("DELETE FROM grades WHERE enrollment_id = ?", [&enrollment.id])?;
        tx.execute("DELETE FROM class_enrollments WHERE id = ?", [&enrollment.id])?;
        RemovalOutcome::HardDeleted
    };
    tx.commit()?;

    tracing::info!(
        student_id,
        class_id,
        enrollment_id = %enrollment.id,
        outcome = ?outcome,
        "enrollment removed"
    );
    Ok(outcome)
}

/// Students of a class ordered by last name then first name.
pub fn list_roster(
    conn: &Connection,
    class_id: &str,
    filter: RosterFilter,
) -> CoreResult<Vec<RosterEntry>> {
    if !class_exists(conn, class_id)? {
        return Err(CoreError::not_found("class", class_id));
    }
    let status = match filter {
        RosterFilter::Only(s) => Some(s.as_str()),
        RosterFilter::All => None,
    };
    let mut stmt = conn.prepare(
        "SELECT e.id, s.id, s.student_number, s.last_name, s.first_name, e.status, e.enrollment_date
         FROM class_enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.class_id = ?1 AND (?2 IS NULL OR e.status = ?2)
         ORDER BY s.last_name, s.first_name",
    )?;
    let rows = stmt
        .query_map((class_id, status), |row| {
            let last: String = row.get(3)?;
            let first: String = row.get(4)?;
            Ok(RosterEntry {
                enrollment_id: row.get(0)?,
                student_id: row.get(1)?,
                student_number: row.get(2)?,
                full_name: full_name(&last, &first),
                status: EnrollmentStatus::from_column(&row.get::<_, String>(5)?),
                enrollment_date: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn transition_allowed(from: EnrollmentStatus, to: EnrollmentStatus) -> bool {
    use EnrollmentStatus::*;
    matches!(
        (from, to),
        (Enrolled, Dropped) | (Enrolled, Completed) | (Dropped, Enrolled)
    )
}

/// Moves an enrollment between statuses. Setting the current status again is a no-op.
pub fn set_status(
    conn: &Connection,
    enrollment_id: &str,
    to: EnrollmentStatus,
) -> CoreResult<EnrollmentStatus> {
    let current = get_enrollment(conn, enrollment_id)?;
    if current.status == to {
        return Ok(to);
    }
    if !transition_allowed(current.status, to) {
        return Err(CoreError::InvalidTransition {
            from: current.status.as_str(),
            to: to.as_str(),
        });
    }
    conn.execute(
        "UPDATE class_enrollments SET status = ? WHERE id = ?",
        (to.as_str(), enrollment_id),
    )?;
    tracing::info!(enrollment_id, from = current.status.as_str(), to = to.as_str(), "enrollment status changed");
    Ok(to)
}

/// Restricts student-level queries to one school year and optionally one semester.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermScope<'a> {
    pub school_year_id: Option<&'a str>,
    pub semester_id: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentEnrollment {
    pub enrollment_id: String,
    pub class_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub section: String,
    pub school_year: String,
    pub semester: String,
    pub credit_units: i64,
    pub status: EnrollmentStatus,
    pub enrollment_date: String,
    pub midterm_grade: Option<f64>,
    pub final_grade: Option<f64>,
    pub incomplete: bool,
    pub remark: Remark,
    pub teacher_name: Option<String>,
}

/// A student's enrollments with subject, term and grade fields. Missing credit units
/// fall back to `default_units`.
pub fn list_for_student(
    conn: &Connection,
    student_id: &str,
    scope: TermScope<'_>,
    default_units: i64,
) -> CoreResult<Vec<StudentEnrollment>> {
    if !student_exists(conn, student_id)? {
        return Err(CoreError::not_found("student", student_id));
    }
    let mut stmt = conn.prepare(
        "SELECT e.id, c.id, s.code, s.name, c.section, y.label, sem.name, s.credit_units,
                e.status, e.enrollment_date, g.midterm_grade, g.final_grade,
                COALESCE(g.incomplete, 0), t.first_name || ' ' || t.last_name
         FROM class_enrollments e
         JOIN classes c ON c.id = e.class_id
         JOIN subjects s ON s.id = c.subject_id
         JOIN school_years y ON y.id = c.school_year_id
         JOIN semesters sem ON sem.id = c.semester_id
         LEFT JOIN grades g ON g.enrollment_id = e.id
         LEFT JOIN class_assignments ca ON ca.class_id = c.id AND ca.is_primary = 1
         LEFT JOIN teachers t ON t.id = ca.teacher_id
         WHERE e.student_id = ?1
           AND (?2 IS NULL OR c.school_year_id = ?2)
           AND (?3 IS NULL OR c.semester_id = ?3)
         ORDER BY y.label, sem.date_started IS NULL, sem.date_started, sem.name, s.code",
    )?;
    let rows = stmt
        .query_map(
            (student_id, scope.school_year_id, scope.semester_id),
            |row| {
                let final_grade: Option<f64> = row.get(11)?;
                let incomplete = row.get::<_, i64>(12)? != 0;
                Ok(StudentEnrollment {
                    enrollment_id: row.get(0)?,
                    class_id: row.get(1)?,
                    subject_code: row.get(2)?,
                    subject_name: row.get(3)?,
                    section: row.get(4)?,
                    school_year: row.get(5)?,
                    semester: row.get(6)?,
                    credit_units: row.get::<_, Option<i64>>(7)?.unwrap_or(default_units),
                    status: EnrollmentStatus::from_column(&row.get::<_, String>(8)?),
                    enrollment_date: row.get(9)?,
                    midterm_grade: row.get(10)?,
                    final_grade,
                    incomplete,
                    remark: derive_remark(final_grade, incomplete),
                    teacher_name: row.get(13)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        use EnrollmentStatus::*;
        assert!(transition_allowed(Enrolled, Dropped));
        assert!(transition_allowed(Enrolled, Completed));
        assert!(transition_allowed(Dropped, Enrolled));
        assert!(!transition_allowed(Completed, Enrolled));
        assert!(!transition_allowed(Completed, Dropped));
        assert!(!transition_allowed(Dropped, Completed));
    }

    struct Fixture {
        conn: Connection,
        student: String,
        class: String,
    }

    fn fixture() -> Fixture {
        let conn = Connection::open_in_memory().expect("open");
        crate::db::apply_schema(&conn).expect("schema");
        let student = crate::accounts::create_student(
            &conn,
            &crate::accounts::NewStudent {
                username: "jdelacruz".into(),
                password: "password123".into(),
                student_number: "2024-0001".into(),
                first_name: "Juan".into(),
                last_name: "Dela Cruz".into(),
                ..Default::default()
            },
            8,
        )
        .expect("student");
        let dept = crate::curriculum::create_department(&conn, "Computer Studies").expect("dept");
        let year = crate::curriculum::create_school_year(&conn, "2024-2025", None, None)
            .expect("year");
        let sem = crate::curriculum::create_semester(&conn, &year, "First", None, None)
            .expect("semester");
        let subject = crate::curriculum::create_subject(&conn, &dept, "CS101", "Intro", Some(3))
            .expect("subject");
        let class = crate::curriculum::create_class(&conn, &subject, &year, &sem, "BSIT-1A")
            .expect("class");
        Fixture {
            conn,
            student,
            class,
        }
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).expect("count")
    }

    #[test]
    fn failed_grade_insert_rolls_back_enrollment() {
        let f = fixture();
        f.conn
            .execute_batch(
                "CREATE TRIGGER no_grades BEFORE INSERT ON grades
                 BEGIN SELECT RAISE(ABORT, 'grades locked'); END;",
            )
            .expect("trigger");
        let date = NaiveDate::from_ymd_opt(2024, 8, 12).expect("date");
        assert!(enroll(&f.conn, &f.student, &f.class, date).is_err());
        assert_eq!(count(&f.conn, "SELECT COUNT(*) FROM class_enrollments"), 0);
        assert_eq!(count(&f.conn, "SELECT COUNT(*) FROM grades"), 0);
    }

    #[test]
    fn failed_hard_delete_keeps_both_rows() {
        let f = fixture();
        let date = NaiveDate::from_ymd_opt(2024, 8, 12).expect("date");
        enroll(&f.conn, &f.student, &f.class, date).expect("enroll");
        f.conn
            .execute_batch(
                "CREATE TRIGGER keep_enrollments BEFORE DELETE ON class_enrollments
                 BEGIN SELECT RAISE(ABORT, 'enrollments locked'); END;",
            )
            .expect("trigger");
        assert!(remove(&f.conn, &f.student, &f.class).is_err());
        assert_eq!(count(&f.conn, "SELECT COUNT(*) FROM class_enrollments"), 1);
        assert_eq!(count(&f.conn, "SELECT COUNT(*) FROM grades"), 1);
    }

    #[test]
    fn completed_graded_enrollment_cannot_be_removed() {
        let f = fixture();
        let date = NaiveDate::from_ymd_opt(2024, 8, 12).expect("date");
        let id = enroll(&f.conn, &f.student, &f.class, date).expect("enroll");
        crate::grading::set_grades(
            &f.conn,
            &id,
            crate::grading::GradeInput {
                final_grade: Some(1.5),
                ..Default::default()
            },
            &crate::settings::GradingConfig::default(),
        )
        .expect("grade");
        set_status(&f.conn, &id, EnrollmentStatus::Completed).expect("complete");

        let e = remove(&f.conn, &f.student, &f.class).expect_err("completed");
        assert_eq!(e.code(), "invalid_transition");
        assert_eq!(
            get_enrollment(&f.conn, &id).expect("row").status,
            EnrollmentStatus::Completed
        );
        let summary = crate::aggregate::compute_student_summary(
            &f.conn,
            &f.student,
            TermScope::default(),
            3,
        )
        .expect("summary");
        assert_eq!(summary.passed_count, 1);
        assert_eq!(summary.units_earned, 3);
    }

    #[test]
    fn removing_a_dropped_graded_enrollment_is_a_no_op() {
        let f = fixture();
        let date = NaiveDate::from_ymd_opt(2024, 8, 12).expect("date");
        let id = enroll(&f.conn, &f.student, &f.class, date).expect("enroll");
        crate::grading::set_grades(
            &f.conn,
            &id,
            crate::grading::GradeInput {
                midterm_grade: Some(2.0),
                ..Default::default()
            },
            &crate::settings::GradingConfig::default(),
        )
        .expect("grade");
        assert_eq!(
            remove(&f.conn, &f.student, &f.class).expect("drop"),
            RemovalOutcome::SoftDropped
        );
        assert_eq!(
            remove(&f.conn, &f.student, &f.class).expect("again"),
            RemovalOutcome::SoftDropped
        );
        assert_eq!(
            get_enrollment(&f.conn, &id).expect("row").status,
            EnrollmentStatus::Dropped
        );
    }

    #[test]
    fn roster_defaults_to_active_students() {
        assert_eq!(
            RosterFilter::default(),
            RosterFilter::Only(EnrollmentStatus::Enrolled)
        );
    }
}
