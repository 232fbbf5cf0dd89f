//! GPA, unit and pass/fail statistics derived from the enrollment and grade tables.
//!
//! Everything here is read-only. Empty inputs produce zero-valued results; nothing
//! divides by zero.

use crate::accounts::student_exists;
use crate::curriculum::{class_exists, department_exists};
use crate::enrollment::TermScope;
use crate::error::{CoreError, CoreResult};
use crate::grading::{derive_remark, PASSING_GRADE_CEILING};
use crate::model::{EnrollmentStatus, Remark, ScoreScale};
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub gpa: f64,
    pub total_units: i64,
    pub units_earned: i64,
    pub passed_count: i64,
    pub failed_count: i64,
}

/// Folds enrollments into a summary. Units attempted and units earned are kept apart:
/// every enrollment adds to `total_units`, only a passing outcome adds to `units_earned`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryAccumulator {
    weighted_sum: f64,
    graded_units: i64,
    total_units: i64,
    units_earned: i64,
    passed: i64,
    failed: i64,
}

impl SummaryAccumulator {
    pub fn add(
        &mut self,
        units: i64,
        status: EnrollmentStatus,
        final_grade: Option<f64>,
        incomplete: bool,
    ) {
        self.total_units += units;
        if let Some(g) = final_grade {
            self.weighted_sum += g * units as f64;
            self.graded_units += units;
        }
        if status == EnrollmentStatus::Dropped {
            return;
        }
        match derive_remark(final_grade, incomplete) {
            Remark::Passed => {
                self.passed += 1;
                self.units_earned += units;
            }
            Remark::Failed => self.failed += 1,
            Remark::Enrolled | Remark::Incomplete => {}
        }
    }

    pub fn has_graded_units(&self) -> bool {
        self.graded_units > 0
    }

    pub fn gpa(&self) -> f64 {
        if self.graded_units == 0 {
            0.0
        } else {
            self.weighted_sum / self.graded_units as f64
        }
    }

    pub fn finish(&self) -> StudentSummary {
        StudentSummary {
            gpa: self.gpa(),
            total_units: self.total_units,
            units_earned: self.units_earned,
            passed_count: self.passed,
            failed_count: self.failed,
        }
    }
}

struct StudentGradeRow {
    year_label: String,
    semester_id: String,
    semester_name: String,
    units: i64,
    status: EnrollmentStatus,
    final_grade: Option<f64>,
    incomplete: bool,
}

/// Rows come back in chronological order: year label, then semester start date (undated
/// semesters last), then semester name.
fn student_grade_rows(
    conn: &Connection,
    student_id: &str,
    scope: TermScope<'_>,
    default_units: i64,
) -> CoreResult<Vec<StudentGradeRow>> {
    if !student_exists(conn, student_id)? {
        return Err(CoreError::not_found("student", student_id));
    }
    let mut stmt = conn.prepare(
        "SELECT y.label, sem.id, sem.name, s.credit_units, e.status,
                g.final_grade, COALESCE(g.incomplete, 0)
         FROM class_enrollments e
         JOIN classes c ON c.id = e.class_id
         JOIN subjects s ON s.id = c.subject_id
         JOIN school_years y ON y.id = c.school_year_id
         JOIN semesters sem ON sem.id = c.semester_id
         LEFT JOIN grades g ON g.enrollment_id = e.id
         WHERE e.student_id = ?1
           AND (?2 IS NULL OR c.school_year_id = ?2)
           AND (?3 IS NULL OR c.semester_id = ?3)
         ORDER BY y.label, sem.date_started IS NULL, sem.date_started, sem.name, sem.id",
    )?;
    let rows = stmt
        .query_map(
            (student_id, scope.school_year_id, scope.semester_id),
            |row| {
                Ok(StudentGradeRow {
                    year_label: row.get(0)?,
                    semester_id: row.get(1)?,
                    semester_name: row.get(2)?,
                    units: row.get::<_, Option<i64>>(3)?.unwrap_or(default_units),
                    status: EnrollmentStatus::from_column(&row.get::<_, String>(4)?),
                    final_grade: row.get(5)?,
                    incomplete: row.get::<_, i64>(6)? != 0,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn compute_student_summary(
    conn: &Connection,
    student_id: &str,
    scope: TermScope<'_>,
    default_units: i64,
) -> CoreResult<StudentSummary> {
    let mut acc = SummaryAccumulator::default();
    for r in student_grade_rows(conn, student_id, scope, default_units)? {
        acc.add(r.units, r.status, r.final_grade, r.incomplete);
    }
    Ok(acc.finish())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermGpa {
    pub term_label: String,
    pub school_year: String,
    pub semester: String,
    pub gpa: f64,
}

/// One GPA per (school year, semester), oldest first. Terms without any graded
/// enrollment are left out rather than reported as 0.
pub fn compute_gpa_history(
    conn: &Connection,
    student_id: &str,
    default_units: i64,
) -> CoreResult<Vec<TermGpa>> {
    let rows = student_grade_rows(conn, student_id, TermScope::default(), default_units)?;

    let mut out = Vec::new();
    let mut current: Option<(String, String, String, SummaryAccumulator)> = None;
    for r in rows {
        let same_term = matches!(&current, Some((_, sem_id, _, _)) if *sem_id == r.semester_id);
        if !same_term {
            if let Some(term) = current.take() {
                push_term(&mut out, term);
            }
            current = Some((
                r.year_label.clone(),
                r.semester_id.clone(),
                r.semester_name.clone(),
                SummaryAccumulator::default(),
            ));
        }
        if let Some((_, _, _, acc)) = current.as_mut() {
            acc.add(r.units, r.status, r.final_grade, r.incomplete);
        }
    }
    if let Some(term) = current.take() {
        push_term(&mut out, term);
    }
    Ok(out)
}

fn push_term(out: &mut Vec<TermGpa>, (year, _, semester, acc): (String, String, String, SummaryAccumulator)) {
    if !acc.has_graded_units() {
        return;
    }
    out.push(TermGpa {
        term_label: format!("{} - {}", year, semester),
        school_year: year,
        semester,
        gpa: acc.gpa(),
    });
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentPerformance {
    pub department_id: String,
    pub department_name: String,
    pub scale: ScoreScale,
    pub classes_offered: i64,
    pub graded_count: i64,
    /// Mean score truncated toward zero.
    pub average_performance: i64,
    pub mean_score: f64,
    /// Whole percent of graded rows that pass on the chosen scale, truncated.
    pub passing_rate: i64,
}

/// Pass test for one score on the given scale. The academic scale ignores the
/// percentage threshold.
pub fn score_passes(scale: ScoreScale, score: f64, percentage_threshold: f64) -> bool {
    match scale {
        ScoreScale::Academic => score <= PASSING_GRADE_CEILING,
        ScoreScale::Percentage => score >= percentage_threshold,
    }
}

/// Collapses a list of scores into (count, truncated mean, mean, truncated pass rate).
pub fn summarize_scores(scores: &[f64], scale: ScoreScale, percentage_threshold: f64) -> (i64, i64, f64, i64) {
    if scores.is_empty() {
        return (0, 0, 0.0, 0);
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let passed = scores
        .iter()
        .filter(|s| score_passes(scale, **s, percentage_threshold))
        .count() as f64;
    (
        scores.len() as i64,
        mean.trunc() as i64,
        mean,
        (passed / n * 100.0).trunc() as i64,
    )
}

/// Reads `final_score` for the academic scale and `percentage_score` for the
/// percentage scale; rows where that field is null are not counted.
pub fn compute_department_performance(
    conn: &Connection,
    department_id: &str,
    school_year_id: &str,
    semester_id: &str,
    scale: ScoreScale,
    percentage_threshold: f64,
) -> CoreResult<DepartmentPerformance> {
    if !department_exists(conn, department_id)? {
        return Err(CoreError::not_found("department", department_id));
    }
    let department_name: String = conn.query_row(
        "SELECT name FROM departments WHERE id = ?",
        [department_id],
        |r| r.get(0),
    )?;
    let classes_offered: i64 = conn.query_row(
        "SELECT COUNT(*) FROM classes c
         JOIN subjects s ON s.id = c.subject_id
         WHERE s.department_id = ? AND c.school_year_id = ? AND c.semester_id = ?",
        (department_id, school_year_id, semester_id),
        |r| r.get(0),
    )?;

    let column = match scale {
        ScoreScale::Academic => "g.final_score",
        ScoreScale::Percentage => "g.percentage_score",
    };
    let sql = format!(
        "SELECT {col} FROM grades g
         JOIN class_enrollments e ON e.id = g.enrollment_id
         JOIN classes c ON c.id = e.class_id
         JOIN subjects s ON s.id = c.subject_id
         WHERE s.department_id = ? AND c.school_year_id = ? AND c.semester_id = ?
           AND {col} IS NOT NULL",
        col = column
    );
    let mut stmt = conn.prepare(&sql)?;
    let scores = stmt
        .query_map((department_id, school_year_id, semester_id), |r| r.get::<_, f64>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let (graded_count, average_performance, mean_score, passing_rate) =
        summarize_scores(&scores, scale, percentage_threshold);
    Ok(DepartmentPerformance {
        department_id: department_id.to_string(),
        department_name,
        scale,
        classes_offered,
        graded_count,
        average_performance,
        mean_score,
        passing_rate,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassPerformance {
    pub class_id: String,
    pub subject_code: String,
    pub section: String,
    pub enrolled_count: i64,
    pub passed_count: i64,
    pub failed_count: i64,
    pub performance_percentage: i64,
}

pub fn compute_class_performance(conn: &Connection, class_id: &str) -> CoreResult<ClassPerformance> {
    if !class_exists(conn, class_id)? {
        return Err(CoreError::not_found("class", class_id));
    }
    let (subject_code, section): (String, String) = conn.query_row(
        "SELECT s.code, c.section FROM classes c JOIN subjects s ON s.id = c.subject_id
         WHERE c.id = ?",
        [class_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let mut stmt = conn.prepare(
        "SELECT g.final_grade, COALESCE(g.incomplete, 0)
         FROM class_enrollments e
         LEFT JOIN grades g ON g.enrollment_id = e.id
         WHERE e.class_id = ?",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok((r.get::<_, Option<f64>>(0)?, r.get::<_, i64>(1)? != 0))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let enrolled_count = rows.len() as i64;
    let mut passed_count = 0;
    let mut failed_count = 0;
    for (final_grade, incomplete) in rows {
        match derive_remark(final_grade, incomplete) {
            Remark::Passed => passed_count += 1,
            Remark::Failed => failed_count += 1,
            Remark::Enrolled | Remark::Incomplete => {}
        }
    }
    let performance_percentage = if enrolled_count > 0 {
        (passed_count as f64 / enrolled_count as f64 * 100.0).trunc() as i64
    } else {
        0
    };
    Ok(ClassPerformance {
        class_id: class_id.to_string(),
        subject_code,
        section,
        enrolled_count,
        passed_count,
        failed_count,
        performance_percentage,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherOverview {
    pub teacher_id: String,
    pub total_classes: i64,
    pub total_students: i64,
    pub classes: Vec<ClassPerformance>,
    pub average_performance: i64,
}

pub fn teacher_overview(conn: &Connection, teacher_id: &str) -> CoreResult<TeacherOverview> {
    let known: i64 = conn.query_row(
        "SELECT COUNT(*) FROM teachers WHERE id = ?",
        [teacher_id],
        |r| r.get(0),
    )?;
    if known == 0 {
        return Err(CoreError::not_found("teacher", teacher_id));
    }
    let class_ids = {
        let mut stmt = conn.prepare(
            "SELECT ca.class_id FROM class_assignments ca
             JOIN classes c ON c.id = ca.class_id
             JOIN subjects s ON s.id = c.subject_id
             WHERE ca.teacher_id = ?
             ORDER BY s.code, c.section",
        )?;
        let ids = stmt
            .query_map([teacher_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    let total_students: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT e.student_id) FROM class_enrollments e
         JOIN class_assignments ca ON ca.class_id = e.class_id
         WHERE ca.teacher_id = ?",
        [teacher_id],
        |r| r.get(0),
    )?;

    let classes = class_ids
        .iter()
        .map(|id| compute_class_performance(conn, id))
        .collect::<CoreResult<Vec<_>>>()?;
    let average_performance = if classes.is_empty() {
        0
    } else {
        let sum: i64 = classes.iter().map(|c| c.performance_percentage).sum();
        (sum as f64 / classes.len() as f64).trunc() as i64
    };
    Ok(TeacherOverview {
        teacher_id: teacher_id.to_string(),
        total_classes: classes.len() as i64,
        total_students,
        classes,
        average_performance,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOverview {
    pub total_students: i64,
    pub total_teachers: i64,
    pub total_departments: i64,
    pub total_subjects: i64,
    pub departments: Vec<DepartmentPerformance>,
}

pub fn admin_overview(
    conn: &Connection,
    school_year_id: &str,
    semester_id: &str,
    scale: ScoreScale,
    percentage_threshold: f64,
) -> CoreResult<AdminOverview> {
    let count = |sql: &str| -> CoreResult<i64> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    let total_students = count("SELECT COUNT(*) FROM students")?;
    let total_teachers = count("SELECT COUNT(*) FROM teachers")?;
    let total_departments = count("SELECT COUNT(*) FROM departments")?;
    let total_subjects = count("SELECT COUNT(*) FROM subjects")?;

    let department_ids = {
        let mut stmt = conn.prepare("SELECT id FROM departments ORDER BY name")?;
        let ids = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    let departments = department_ids
        .iter()
        .map(|id| {
            compute_department_performance(
                conn,
                id,
                school_year_id,
                semester_id,
                scale,
                percentage_threshold,
            )
        })
        .collect::<CoreResult<Vec<_>>>()?;

    Ok(AdminOverview {
        total_students,
        total_teachers,
        total_departments,
        total_subjects,
        departments,
    })
}
