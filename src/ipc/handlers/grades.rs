use crate::enrollment;
use crate::grading::{self, GradeInput};
use crate::ipc::helpers::{
    optional_f64, required_str, to_json, with_conn, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::settings::GradingConfig;
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_grade_input(params: &Value) -> Result<GradeInput, HandlerErr> {
    Ok(GradeInput {
        midterm_grade: optional_f64(params, "midtermGrade")?,
        final_grade: optional_f64(params, "finalGrade")?,
        final_score: optional_f64(params, "finalScore")?,
        percentage_score: optional_f64(params, "percentageScore")?,
    })
}

fn grade_json(conn: &Connection, enrollment_id: &str) -> HandlerResult {
    let g = grading::get_grade(conn, enrollment_id)?;
    let status = enrollment::get_enrollment(conn, enrollment_id)?.status;
    Ok(json!({
        "grade": to_json(&g)?,
        "status": status,
        "remark": grading::derive_remark(g.final_grade, g.incomplete),
        "value": grading::grade_value(Some(&g), status),
    }))
}

fn set(conn: &Connection, params: &Value) -> HandlerResult {
    let enrollment_id = required_str(params, "enrollmentId")?;
    let input = parse_grade_input(params)?;
    let cfg = GradingConfig::load(conn)?;
    grading::set_grades(conn, enrollment_id, input, &cfg)?;
    grade_json(conn, enrollment_id)
}

fn get(conn: &Connection, params: &Value) -> HandlerResult {
    grade_json(conn, required_str(params, "enrollmentId")?)
}

fn mark_incomplete(conn: &Connection, params: &Value) -> HandlerResult {
    let enrollment_id = required_str(params, "enrollmentId")?;
    let incomplete = params
        .get("incomplete")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("incomplete must be boolean"))?;
    grading::mark_incomplete(conn, enrollment_id, incomplete)?;
    grade_json(conn, enrollment_id)
}

fn class_sheet(conn: &Connection, params: &Value) -> HandlerResult {
    let rows = grading::class_sheet(conn, required_str(params, "classId")?)?;
    Ok(json!({ "rows": to_json(&rows)? }))
}

/// Each entry is applied on its own; a bad entry is reported and the rest still run.
fn bulk_set(conn: &Connection, params: &Value) -> HandlerResult {
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("entries must be an array"));
    };
    let cfg = GradingConfig::load(conn)?;
    let mut updated = 0usize;
    let mut errors = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let res = (|| -> Result<(), HandlerErr> {
            let enrollment_id = required_str(entry, "enrollmentId")?;
            let input = parse_grade_input(entry)?;
            grading::set_grades(conn, enrollment_id, input, &cfg)?;
            Ok(())
        })();
        match res {
            Ok(()) => updated += 1,
            Err(e) => errors.push(json!({
                "index": i,
                "enrollmentId": entry.get("enrollmentId").cloned().unwrap_or(Value::Null),
                "code": e.code,
                "message": e.message,
                "details": e.details,
            })),
        }
    }
    Ok(json!({ "updated": updated, "rejected": errors.len(), "errors": errors }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "grades.set" => set,
        "grades.get" => get,
        "grades.markIncomplete" => mark_incomplete,
        "grades.classSheet" => class_sheet,
        "grades.bulkSet" => bulk_set,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
