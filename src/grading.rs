use crate::curriculum::new_id;
use crate::error::{CoreError, CoreResult};
use crate::model::{full_name, EnrollmentStatus, GradeRecord, GradeValue, Remark};
use crate::settings::GradingConfig;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub const ACADEMIC_MIN: f64 = 1.0;
pub const ACADEMIC_MAX: f64 = 5.0;
pub const PERCENT_MIN: f64 = 0.0;
pub const PERCENT_MAX: f64 = 100.0;

/// Highest (worst) academic grade that still passes. Inclusive.
pub const PASSING_GRADE_CEILING: f64 = 3.0;

/// Values posted by a grade sheet. `None` clears the field.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradeInput {
    pub midterm_grade: Option<f64>,
    pub final_grade: Option<f64>,
    pub final_score: Option<f64>,
    pub percentage_score: Option<f64>,
}

fn check_range(field: &'static str, value: Option<f64>, min: f64, max: f64) -> CoreResult<()> {
    match value {
        Some(v) if !(min..=max).contains(&v) => Err(CoreError::InvalidGradeRange {
            field,
            value: v,
            min,
            max,
        }),
        _ => Ok(()),
    }
}

/// Rejects out-of-range values before anything is written. Nothing is clamped.
pub fn validate(input: &GradeInput) -> CoreResult<()> {
    check_range("midtermGrade", input.midterm_grade, ACADEMIC_MIN, ACADEMIC_MAX)?;
    check_range("finalGrade", input.final_grade, ACADEMIC_MIN, ACADEMIC_MAX)?;
    check_range("finalScore", input.final_score, ACADEMIC_MIN, ACADEMIC_MAX)?;
    check_range(
        "percentageScore",
        input.percentage_score,
        PERCENT_MIN,
        PERCENT_MAX,
    )?;
    Ok(())
}

/// `incomplete` is the separate INC channel; it wins over any numeric value.
/// Exactly 3.0 passes.
///
/// The remark reads grades only, never enrollment status: a completed enrollment
/// without a final grade still reads `Enrolled`. Status is reported by `grade_value`.
pub fn derive_remark(final_grade: Option<f64>, incomplete: bool) -> Remark {
    if incomplete {
        return Remark::Incomplete;
    }
    match final_grade {
        None => Remark::Enrolled,
        Some(g) if g <= PASSING_GRADE_CEILING => Remark::Passed,
        Some(_) => Remark::Failed,
    }
}

pub fn grade_value(grade: Option<&GradeRecord>, status: EnrollmentStatus) -> GradeValue {
    if status == EnrollmentStatus::Dropped {
        return GradeValue::Dropped;
    }
    match grade {
        Some(g) if g.incomplete => GradeValue::Incomplete,
        Some(GradeRecord {
            final_grade: Some(v),
            ..
        }) => GradeValue::Numeric(*v),
        _ => GradeValue::Unset,
    }
}

fn grade_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GradeRecord> {
    Ok(GradeRecord {
        grade_id: row.get(0)?,
        enrollment_id: row.get(1)?,
        midterm_grade: row.get(2)?,
        final_grade: row.get(3)?,
        final_score: row.get(4)?,
        percentage_score: row.get(5)?,
        incomplete: row.get::<_, i64>(6)? != 0,
    })
}

pub(crate) fn load_grade(conn: &Connection, enrollment_id: &str) -> CoreResult<Option<GradeRecord>> {
    Ok(conn
        .query_row(
            "SELECT id, enrollment_id, midterm_grade, final_grade, final_score,
                    percentage_score, incomplete
             FROM grades WHERE enrollment_id = ?",
            [enrollment_id],
            grade_from_row,
        )
        .optional()?)
}

fn enrollment_exists(conn: &Connection, enrollment_id: &str) -> CoreResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM class_enrollments WHERE id = ?",
            [enrollment_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

pub fn get_grade(conn: &Connection, enrollment_id: &str) -> CoreResult<GradeRecord> {
    if !enrollment_exists(conn, enrollment_id)? {
        return Err(CoreError::not_found("enrollment", enrollment_id));
    }
    load_grade(conn, enrollment_id)?.ok_or_else(|| CoreError::not_found("grade", enrollment_id))
}

/// Writes the grade fields of one enrollment. Remarks are not stored; they are derived
/// on read from `final_grade`.
pub fn set_grades(
    conn: &Connection,
    enrollment_id: &str,
    input: GradeInput,
    cfg: &GradingConfig,
) -> CoreResult<GradeRecord> {
    validate(&input)?;
    if !enrollment_exists(conn, enrollment_id)? {
        return Err(CoreError::not_found("enrollment", enrollment_id));
    }

    let mut input = input;
    if cfg.auto_average_final_score && input.final_score.is_none() {
        if let (Some(m), Some(f)) = (input.midterm_grade, input.final_grade) {
            input.final_score = Some((m + f) / 2.0);
        }
    }

    let updated_at = chrono::Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        "UPDATE grades SET midterm_grade = ?, final_grade = ?, final_score = ?,
                           percentage_score = ?, updated_at = ?
         WHERE enrollment_id = ?",
        (
            input.midterm_grade,
            input.final_grade,
            input.final_score,
            input.percentage_score,
            &updated_at,
            enrollment_id,
        ),
    )?;
    if changed == 0 {
        // Enrollments written before grade rows were paired at enroll time.
        tx.execute(
            "INSERT INTO grades(id, enrollment_id, midterm_grade, final_grade, final_score,
                                percentage_score, incomplete, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, 0, ?)",
            (
                new_id(),
                enrollment_id,
                input.midterm_grade,
                input.final_grade,
                input.final_score,
                input.percentage_score,
                &updated_at,
            ),
        )?;
    }
    tx.commit()?;

    tracing::info!(
        enrollment_id,
        midterm = ?input.midterm_grade,
        final_grade = ?input.final_grade,
        final_score = ?input.final_score,
        percentage = ?input.percentage_score,
        "grades recorded"
    );
    get_grade(conn, enrollment_id)
}

pub fn mark_incomplete(conn: &Connection, enrollment_id: &str, incomplete: bool) -> CoreResult<GradeRecord> {
    if !enrollment_exists(conn, enrollment_id)? {
        return Err(CoreError::not_found("enrollment", enrollment_id));
    }
    let updated_at = chrono::Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        "UPDATE grades SET incomplete = ?, updated_at = ? WHERE enrollment_id = ?",
        (incomplete as i64, &updated_at, enrollment_id),
    )?;
    if changed == 0 {
        tx.execute(
            "INSERT INTO grades(id, enrollment_id, incomplete, updated_at) VALUES(?, ?, ?, ?)",
            (new_id(), enrollment_id, incomplete as i64, &updated_at),
        )?;
    }
    tx.commit()?;
    tracing::info!(enrollment_id, incomplete, "incomplete flag set");
    get_grade(conn, enrollment_id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSheetRow {
    pub enrollment_id: String,
    pub student_id: String,
    pub student_number: String,
    pub student_name: String,
    pub status: EnrollmentStatus,
    pub grade_id: Option<String>,
    pub midterm_grade: Option<f64>,
    pub final_grade: Option<f64>,
    pub final_score: Option<f64>,
    pub percentage_score: Option<f64>,
    pub incomplete: bool,
    pub remark: Remark,
    pub value: GradeValue,
}

/// Every enrollment of a class with its grade fields, ordered by "Last, First".
pub fn class_sheet(conn: &Connection, class_id: &str) -> CoreResult<Vec<GradeSheetRow>> {
    if !crate::curriculum::class_exists(conn, class_id)? {
        return Err(CoreError::not_found("class", class_id));
    }
    let mut stmt = conn.prepare(
        "SELECT e.id, s.id, s.student_number, s.last_name, s.first_name, e.status,
                g.id, g.midterm_grade, g.final_grade, g.final_score, g.percentage_score,
                COALESCE(g.incomplete, 0)
         FROM class_enrollments e
         JOIN students s ON s.id = e.student_id
         LEFT JOIN grades g ON g.enrollment_id = e.id
         WHERE e.class_id = ?
         ORDER BY s.last_name, s.first_name",
    )?;
    let rows = stmt
        .query_map([class_id], |row| {
            let enrollment_id: String = row.get(0)?;
            let last: String = row.get(3)?;
            let first: String = row.get(4)?;
            let status = EnrollmentStatus::from_column(&row.get::<_, String>(5)?);
            let grade_id: Option<String> = row.get(6)?;
            let record = grade_id.as_ref().map(|gid| -> rusqlite::Result<GradeRecord> {
                Ok(GradeRecord {
                    grade_id: gid.clone(),
                    enrollment_id: enrollment_id.clone(),
                    midterm_grade: row.get(7)?,
                    final_grade: row.get(8)?,
                    final_score: row.get(9)?,
                    percentage_score: row.get(10)?,
                    incomplete: row.get::<_, i64>(11)? != 0,
                })
            });
            let record = record.transpose()?;
            let incomplete = record.as_ref().map(|g| g.incomplete).unwrap_or(false);
            let final_grade = record.as_ref().and_then(|g| g.final_grade);
            Ok(GradeSheetRow {
                student_id: row.get(1)?,
                student_number: row.get(2)?,
                student_name: full_name(&last, &first),
                status,
                grade_id,
                midterm_grade: record.as_ref().and_then(|g| g.midterm_grade),
                final_grade,
                final_score: record.as_ref().and_then(|g| g.final_score),
                percentage_score: record.as_ref().and_then(|g| g.percentage_score),
                incomplete,
                remark: derive_remark(final_grade, incomplete),
                value: grade_value(record.as_ref(), status),
                enrollment_id,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
