use crate::enrollment::{self, RosterFilter, TermScope};
use crate::ipc::helpers::{
    optional_date, optional_str, required_str, to_json, with_conn, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::EnrollmentStatus;
use crate::settings::GradingConfig;
use rusqlite::Connection;
use serde_json::{json, Value};

fn enroll(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let class_id = required_str(params, "classId")?;
    let date = optional_date(params, "enrollmentDate")?
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let id = enrollment::enroll(conn, student_id, class_id, date)?;
    Ok(json!({ "enrollmentId": id }))
}

fn remove(conn: &Connection, params: &Value) -> HandlerResult {
    let outcome = enrollment::remove(
        conn,
        required_str(params, "studentId")?,
        required_str(params, "classId")?,
    )?;
    Ok(json!({ "outcome": outcome }))
}

/// A missing `status` lists active students only; `"all"` or an explicit null lists
/// every status.
fn parse_roster_filter(params: &Value) -> Result<RosterFilter, HandlerErr> {
    match params.get("status") {
        None => Ok(RosterFilter::default()),
        Some(Value::Null) => Ok(RosterFilter::All),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("all") => Ok(RosterFilter::All),
        Some(Value::String(s)) => EnrollmentStatus::parse(s)
            .map(RosterFilter::Only)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown status: {}", s))),
        Some(_) => Err(HandlerErr::bad_params("status must be a string or null")),
    }
}

fn roster(conn: &Connection, params: &Value) -> HandlerResult {
    let class_id = required_str(params, "classId")?;
    let filter = parse_roster_filter(params)?;
    let rows = enrollment::list_roster(conn, class_id, filter)?;
    Ok(json!({ "students": to_json(&rows)? }))
}

fn set_status(conn: &Connection, params: &Value) -> HandlerResult {
    let enrollment_id = required_str(params, "enrollmentId")?;
    let raw = required_str(params, "status")?;
    let to = EnrollmentStatus::parse(raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown status: {}", raw)))?;
    let status = enrollment::set_status(conn, enrollment_id, to)?;
    Ok(json!({ "enrollmentId": enrollment_id, "status": status }))
}

fn list_for_student(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let scope = TermScope {
        school_year_id: optional_str(params, "schoolYearId")?,
        semester_id: optional_str(params, "semesterId")?,
    };
    let units = GradingConfig::load(conn)?.default_credit_units;
    let rows = enrollment::list_for_student(conn, student_id, scope, units)?;
    Ok(json!({ "enrollments": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "enrollment.enroll" => enroll,
        "enrollment.remove" => remove,
        "enrollment.roster" => roster,
        "enrollment.setStatus" => set_status,
        "enrollment.listForStudent" => list_for_student,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
