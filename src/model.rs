use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Enrolled,
    Dropped,
    Completed,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::Enrolled => "enrolled",
            EnrollmentStatus::Dropped => "dropped",
            EnrollmentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enrolled" => Some(EnrollmentStatus::Enrolled),
            "dropped" => Some(EnrollmentStatus::Dropped),
            "completed" => Some(EnrollmentStatus::Completed),
            _ => None,
        }
    }

    /// Status column values are constrained by a CHECK; anything else is treated as active.
    pub fn from_column(s: &str) -> Self {
        Self::parse(s).unwrap_or(EnrollmentStatus::Enrolled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Remark {
    Enrolled,
    Passed,
    Failed,
    Incomplete,
}

/// The outcome a grade row stands for once the INC flag and enrollment status are
/// taken into account.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum GradeValue {
    Numeric(f64),
    Incomplete,
    Dropped,
    Unset,
}

/// Which grade field an aggregation reads. The two scales run in opposite directions
/// and are never mixed in one computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScoreScale {
    /// `final_score`, 1.0 (best) to 5.0 (worst); passing is <= 3.0.
    Academic,
    /// `percentage_score`, 0 to 100; passing is >= the configured threshold.
    Percentage,
}

impl ScoreScale {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "academic" => Some(ScoreScale::Academic),
            "percentage" => Some(ScoreScale::Percentage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub grade_id: String,
    pub enrollment_id: String,
    pub midterm_grade: Option<f64>,
    pub final_grade: Option<f64>,
    pub final_score: Option<f64>,
    pub percentage_score: Option<f64>,
    pub incomplete: bool,
}

impl GradeRecord {
    /// True once any grade value has been entered. A zero is the placeholder value
    /// some older rows carry and does not count.
    pub fn has_values(&self) -> bool {
        let entered = |v: Option<f64>| matches!(v, Some(x) if x != 0.0);
        self.incomplete
            || entered(self.midterm_grade)
            || entered(self.final_grade)
            || entered(self.final_score)
            || entered(self.percentage_score)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub enrollment_id: String,
    pub student_id: String,
    pub student_number: String,
    pub full_name: String,
    pub status: EnrollmentStatus,
    pub enrollment_date: String,
}

pub fn full_name(last: &str, first: &str) -> String {
    format!("{}, {}", last, first)
}
