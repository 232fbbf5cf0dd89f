use crate::aggregate;
use crate::enrollment::TermScope;
use crate::ipc::helpers::{optional_str, required_str, to_json, with_conn, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::model::ScoreScale;
use crate::settings::GradingConfig;
use rusqlite::Connection;
use serde_json::{json, Value};

/// Aggregations over scores must say which scale they read; there is no default.
fn parse_scale(params: &Value) -> Result<ScoreScale, HandlerErr> {
    let raw = required_str(params, "scale")?;
    ScoreScale::parse(raw)
        .ok_or_else(|| HandlerErr::bad_params("scale must be academic or percentage"))
}

fn student_summary(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let scope = TermScope {
        school_year_id: optional_str(params, "schoolYearId")?,
        semester_id: optional_str(params, "semesterId")?,
    };
    let cfg = GradingConfig::load(conn)?;
    to_json(&aggregate::compute_student_summary(
        conn,
        student_id,
        scope,
        cfg.default_credit_units,
    )?)
}

fn gpa_history(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let cfg = GradingConfig::load(conn)?;
    let terms = aggregate::compute_gpa_history(conn, student_id, cfg.default_credit_units)?;
    Ok(json!({ "terms": to_json(&terms)? }))
}

fn department_performance(conn: &Connection, params: &Value) -> HandlerResult {
    let scale = parse_scale(params)?;
    let cfg = GradingConfig::load(conn)?;
    to_json(&aggregate::compute_department_performance(
        conn,
        required_str(params, "departmentId")?,
        required_str(params, "schoolYearId")?,
        required_str(params, "semesterId")?,
        scale,
        cfg.percentage_passing_threshold,
    )?)
}

fn class_performance(conn: &Connection, params: &Value) -> HandlerResult {
    to_json(&aggregate::compute_class_performance(
        conn,
        required_str(params, "classId")?,
    )?)
}

fn teacher_overview(conn: &Connection, params: &Value) -> HandlerResult {
    to_json(&aggregate::teacher_overview(
        conn,
        required_str(params, "teacherId")?,
    )?)
}

fn admin_overview(conn: &Connection, params: &Value) -> HandlerResult {
    let scale = parse_scale(params)?;
    let cfg = GradingConfig::load(conn)?;
    to_json(&aggregate::admin_overview(
        conn,
        required_str(params, "schoolYearId")?,
        required_str(params, "semesterId")?,
        scale,
        cfg.percentage_passing_threshold,
    )?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "analytics.studentSummary" => student_summary,
        "analytics.gpaHistory" => gpa_history,
        "analytics.departmentPerformance" => department_performance,
        "analytics.classPerformance" => class_performance,
        "analytics.teacherOverview" => teacher_overview,
        "analytics.adminOverview" => admin_overview,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
