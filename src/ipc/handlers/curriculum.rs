use crate::curriculum::{self, ClassFilter};
use crate::ipc::helpers::{
    optional_bool, optional_date, optional_i64, optional_str, required_str, to_json, with_conn,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::settings::GradingConfig;
use rusqlite::Connection;
use serde_json::{json, Value};

fn years_create(conn: &Connection, params: &Value) -> HandlerResult {
    let id = curriculum::create_school_year(
        conn,
        required_str(params, "label")?,
        optional_date(params, "dateStarted")?,
        optional_date(params, "dateEnded")?,
    )?;
    Ok(json!({ "schoolYearId": id }))
}

fn years_update(conn: &Connection, params: &Value) -> HandlerResult {
    curriculum::update_school_year(
        conn,
        required_str(params, "schoolYearId")?,
        required_str(params, "label")?,
        optional_date(params, "dateStarted")?,
        optional_date(params, "dateEnded")?,
    )?;
    Ok(json!({ "ok": true }))
}

fn years_delete(conn: &Connection, params: &Value) -> HandlerResult {
    curriculum::delete_school_year(conn, required_str(params, "schoolYearId")?)?;
    Ok(json!({ "ok": true }))
}

fn years_list(conn: &Connection, _params: &Value) -> HandlerResult {
    Ok(json!({ "schoolYears": to_json(&curriculum::list_school_years(conn)?)? }))
}

fn semesters_create(conn: &Connection, params: &Value) -> HandlerResult {
    let id = curriculum::create_semester(
        conn,
        required_str(params, "schoolYearId")?,
        required_str(params, "name")?,
        optional_date(params, "dateStarted")?,
        optional_date(params, "dateEnded")?,
    )?;
    Ok(json!({ "semesterId": id }))
}

fn semesters_update(conn: &Connection, params: &Value) -> HandlerResult {
    curriculum::update_semester(
        conn,
        required_str(params, "semesterId")?,
        required_str(params, "name")?,
        optional_date(params, "dateStarted")?,
        optional_date(params, "dateEnded")?,
    )?;
    Ok(json!({ "ok": true }))
}

fn semesters_delete(conn: &Connection, params: &Value) -> HandlerResult {
    curriculum::delete_semester(conn, required_str(params, "semesterId")?)?;
    Ok(json!({ "ok": true }))
}

fn semesters_list(conn: &Connection, params: &Value) -> HandlerResult {
    let year = optional_str(params, "schoolYearId")?;
    Ok(json!({ "semesters": to_json(&curriculum::list_semesters(conn, year)?)? }))
}

fn departments_create(conn: &Connection, params: &Value) -> HandlerResult {
    let id = curriculum::create_department(conn, required_str(params, "name")?)?;
    Ok(json!({ "departmentId": id }))
}

fn departments_rename(conn: &Connection, params: &Value) -> HandlerResult {
    curriculum::rename_department(
        conn,
        required_str(params, "departmentId")?,
        required_str(params, "name")?,
    )?;
    Ok(json!({ "ok": true }))
}

fn departments_delete(conn: &Connection, params: &Value) -> HandlerResult {
    curriculum::delete_department(conn, required_str(params, "departmentId")?)?;
    Ok(json!({ "ok": true }))
}

fn departments_list(conn: &Connection, _params: &Value) -> HandlerResult {
    Ok(json!({ "departments": to_json(&curriculum::list_departments(conn)?)? }))
}

/// Missing `creditUnits` takes the configured default.
fn subjects_create(conn: &Connection, params: &Value) -> HandlerResult {
    let units = match optional_i64(params, "creditUnits")? {
        Some(u) => u,
        None => GradingConfig::load(conn)?.default_credit_units,
    };
    let id = curriculum::create_subject(
        conn,
        required_str(params, "departmentId")?,
        required_str(params, "code")?,
        required_str(params, "name")?,
        Some(units),
    )?;
    Ok(json!({ "subjectId": id }))
}

fn subjects_update(conn: &Connection, params: &Value) -> HandlerResult {
    curriculum::update_subject(
        conn,
        required_str(params, "subjectId")?,
        required_str(params, "code")?,
        required_str(params, "name")?,
    )?;
    Ok(json!({ "ok": true }))
}

fn subjects_delete(conn: &Connection, params: &Value) -> HandlerResult {
    curriculum::delete_subject(conn, required_str(params, "subjectId")?)?;
    Ok(json!({ "ok": true }))
}

fn subjects_list(conn: &Connection, params: &Value) -> HandlerResult {
    let dept = optional_str(params, "departmentId")?;
    Ok(json!({ "subjects": to_json(&curriculum::list_subjects(conn, dept)?)? }))
}

fn classes_create(conn: &Connection, params: &Value) -> HandlerResult {
    let id = curriculum::create_class(
        conn,
        required_str(params, "subjectId")?,
        required_str(params, "schoolYearId")?,
        required_str(params, "semesterId")?,
        required_str(params, "section")?,
    )?;
    Ok(json!({ "classId": id }))
}

fn classes_rename(conn: &Connection, params: &Value) -> HandlerResult {
    curriculum::rename_class_section(
        conn,
        required_str(params, "classId")?,
        required_str(params, "section")?,
    )?;
    Ok(json!({ "ok": true }))
}

fn classes_delete(conn: &Connection, params: &Value) -> HandlerResult {
    curriculum::delete_class(conn, required_str(params, "classId")?)?;
    Ok(json!({ "ok": true }))
}

fn classes_get(conn: &Connection, params: &Value) -> HandlerResult {
    to_json(&curriculum::get_class(conn, required_str(params, "classId")?)?)
}

fn classes_list(conn: &Connection, params: &Value) -> HandlerResult {
    let filter = ClassFilter {
        school_year_id: optional_str(params, "schoolYearId")?,
        semester_id: optional_str(params, "semesterId")?,
        subject_id: optional_str(params, "subjectId")?,
        teacher_id: optional_str(params, "teacherId")?,
    };
    Ok(json!({ "classes": to_json(&curriculum::list_classes(conn, &filter)?)? }))
}

fn classes_assign_teacher(conn: &Connection, params: &Value) -> HandlerResult {
    let primary = optional_bool(params, "primary")?.unwrap_or(true);
    let class_id = required_str(params, "classId")?;
    let teacher_id = required_str(params, "teacherId")?;
    let id = curriculum::assign_teacher(conn, class_id, teacher_id, primary)?;
    tracing::info!(class_id, teacher_id, primary, "teacher assigned");
    Ok(json!({ "assignmentId": id, "primary": primary }))
}

fn classes_unassign_teacher(conn: &Connection, params: &Value) -> HandlerResult {
    curriculum::unassign_teacher(
        conn,
        required_str(params, "classId")?,
        required_str(params, "teacherId")?,
    )?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "years.create" => years_create,
        "years.update" => years_update,
        "years.delete" => years_delete,
        "years.list" => years_list,
        "semesters.create" => semesters_create,
        "semesters.update" => semesters_update,
        "semesters.delete" => semesters_delete,
        "semesters.list" => semesters_list,
        "departments.create" => departments_create,
        "departments.rename" => departments_rename,
        "departments.delete" => departments_delete,
        "departments.list" => departments_list,
        "subjects.create" => subjects_create,
        "subjects.update" => subjects_update,
        "subjects.delete" => subjects_delete,
        "subjects.list" => subjects_list,
        "classes.create" => classes_create,
        "classes.rename" => classes_rename,
        "classes.delete" => classes_delete,
        "classes.get" => classes_get,
        "classes.list" => classes_list,
        "classes.assignTeacher" => classes_assign_teacher,
        "classes.unassignTeacher" => classes_unassign_teacher,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
