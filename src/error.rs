use rusqlite::ffi;
use thiserror::Error;

/// Errors surfaced by the records core. Every variant except `Storage` is a
/// caller-recoverable outcome that maps onto a form message.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{message}")]
    DuplicateKey {
        constraint: &'static str,
        message: &'static str,
    },

    #[error("student is already enrolled in this class")]
    AlreadyEnrolled { enrollment_id: Option<String> },

    #[error("{field} must be between {min} and {max} (got {value})")]
    InvalidGradeRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{entity} not found")]
    NotFound { entity: &'static str, key: String },

    #[error("{message}")]
    Invalid { field: &'static str, message: String },

    #[error("{entity} is still referenced by {dependents}")]
    InUse {
        entity: &'static str,
        dependents: &'static str,
    },

    #[error("cannot change enrollment status from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("invalid credentials")]
    Unauthorized,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }

    /// Stable IPC error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateKey { .. } => "duplicate_key",
            Self::AlreadyEnrolled { .. } => "already_enrolled",
            Self::InvalidGradeRange { .. } => "invalid_grade_range",
            Self::NotFound { .. } => "not_found",
            Self::Invalid { .. } => "bad_params",
            Self::InUse { .. } => "in_use",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Unauthorized => "unauthorized",
            Self::Hash(_) => "hash_failed",
            Self::Storage(_) => "db_error",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        use serde_json::json;
        match self {
            Self::DuplicateKey { constraint, .. } => Some(json!({ "constraint": constraint })),
            Self::AlreadyEnrolled { enrollment_id } => {
                Some(json!({ "enrollmentId": enrollment_id }))
            }
            Self::InvalidGradeRange {
                field,
                value,
                min,
                max,
            } => Some(json!({ "field": field, "value": value, "min": min, "max": max })),
            Self::NotFound { entity, key } => Some(json!({ "entity": entity, "key": key })),
            Self::Invalid { field, .. } => Some(json!({ "field": field })),
            Self::InUse { entity, dependents } => {
                Some(json!({ "entity": entity, "dependents": dependents }))
            }
            Self::InvalidTransition { from, to } => Some(json!({ "from": from, "to": to })),
            Self::Unauthorized | Self::Hash(_) | Self::Storage(_) => None,
        }
    }
}

/// Column lists as SQLite reports them in "UNIQUE constraint failed: ..." messages.
const UNIQUE_CONSTRAINTS: &[(&str, &str, &str)] = &[
    ("users.username", "users_username", "username taken"),
    (
        "students.student_number",
        "students_student_number",
        "student number already exists",
    ),
    ("students.email", "students_email", "student email already exists"),
    (
        "teachers.teacher_code",
        "teachers_teacher_code",
        "teacher code already exists",
    ),
    ("teachers.email", "teachers_email", "teacher email already exists"),
    ("admins.email", "admins_email", "admin email already exists"),
    ("departments.name", "departments_name", "department already exists"),
    ("school_years.label", "school_years_label", "school year already exists"),
    ("subjects.code", "subjects_code", "subject code already exists"),
    (
        "classes.subject_id, classes.school_year_id, classes.semester_id, classes.section",
        "classes_subject_term_section",
        "class section already exists for this subject/term",
    ),
    (
        "class_assignments.class_id, class_assignments.teacher_id",
        "class_assignments_class_teacher",
        "teacher is already assigned to this class",
    ),
    (
        "class_assignments.class_id",
        "class_assignments_primary",
        "class already has a primary teacher",
    ),
    (
        "grades.enrollment_id",
        "grades_enrollment",
        "a grade record already exists for this enrollment",
    ),
];

pub const ENROLLMENT_UNIQUE_COLUMNS: &str = "class_enrollments.student_id, class_enrollments.class_id";

/// Returns the column list of a UNIQUE/PRIMARY KEY violation, if `e` is one.
pub fn unique_violation_columns(e: &rusqlite::Error) -> Option<&str> {
    match e {
        rusqlite::Error::SqliteFailure(inner, Some(msg))
            if inner.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || inner.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            msg.split_once("constraint failed: ").map(|(_, cols)| cols.trim())
        }
        _ => None,
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        if let Some(cols) = unique_violation_columns(&e) {
            if cols == ENROLLMENT_UNIQUE_COLUMNS {
                return CoreError::AlreadyEnrolled {
                    enrollment_id: None,
                };
            }
            if let Some(&(_, constraint, message)) =
                UNIQUE_CONSTRAINTS.iter().find(|(c, _, _)| *c == cols)
            {
                return CoreError::DuplicateKey {
                    constraint,
                    message,
                };
            }
        }
        CoreError::Storage(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn_with_users() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE users(id TEXT PRIMARY KEY, username TEXT NOT NULL, UNIQUE(username))",
            [],
        )
        .expect("create");
        conn
    }

    #[test]
    fn unique_username_violation_becomes_duplicate_key() {
        let conn = conn_with_users();
        conn.execute("INSERT INTO users(id, username) VALUES('a', 'jdoe')", [])
            .expect("first insert");
        let e = conn
            .execute("INSERT INTO users(id, username) VALUES('b', 'jdoe')", [])
            .expect_err("duplicate insert");
        match CoreError::from(e) {
            CoreError::DuplicateKey {
                constraint,
                message,
            } => {
                assert_eq!(constraint, "users_username");
                assert_eq!(message, "username taken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn enrollment_violation_becomes_already_enrolled() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE class_enrollments(
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                class_id TEXT NOT NULL,
                UNIQUE(student_id, class_id)
            )",
            [],
        )
        .expect("create");
        conn.execute(
            "INSERT INTO class_enrollments(id, student_id, class_id) VALUES('e1', 's', 'c')",
            [],
        )
        .expect("first insert");
        let e = conn
            .execute(
                "INSERT INTO class_enrollments(id, student_id, class_id) VALUES('e2', 's', 'c')",
                [],
            )
            .expect_err("duplicate insert");
        assert!(matches!(
            CoreError::from(e),
            CoreError::AlreadyEnrolled { .. }
        ));
    }

    #[test]
    fn other_failures_stay_storage_errors() {
        let conn = conn_with_users();
        let e = conn
            .execute("INSERT INTO missing_table(id) VALUES('x')", [])
            .expect_err("no such table");
        let core = CoreError::from(e);
        assert_eq!(core.code(), "db_error");
    }
}
