use crate::accounts::{self, NewAdmin, NewStudent, NewTeacher};
use crate::error::CoreError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    optional_str, optional_string, required_str, to_json, with_conn, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use crate::settings::SecurityConfig;
use rusqlite::Connection;
use serde_json::{json, Value};

fn min_password_len(conn: &Connection) -> Result<usize, HandlerErr> {
    Ok(SecurityConfig::load(conn)?.min_password_length)
}

fn create_student(conn: &Connection, params: &Value) -> HandlerResult {
    let input = NewStudent {
        username: required_str(params, "username")?.to_string(),
        password: required_str(params, "password")?.to_string(),
        student_number: required_str(params, "studentNumber")?.to_string(),
        first_name: required_str(params, "firstName")?.to_string(),
        last_name: required_str(params, "lastName")?.to_string(),
        email: optional_string(params, "email")?,
        contact_number: optional_string(params, "contactNumber")?,
        year_level: optional_string(params, "yearLevel")?,
        course_program: optional_string(params, "courseProgram")?,
    };
    let id = accounts::create_student(conn, &input, min_password_len(conn)?)?;
    Ok(json!({ "userId": id, "role": Role::Student }))
}

fn create_teacher(conn: &Connection, params: &Value) -> HandlerResult {
    let input = NewTeacher {
        username: required_str(params, "username")?.to_string(),
        password: required_str(params, "password")?.to_string(),
        teacher_code: required_str(params, "teacherCode")?.to_string(),
        department_id: required_str(params, "departmentId")?.to_string(),
        first_name: required_str(params, "firstName")?.to_string(),
        last_name: required_str(params, "lastName")?.to_string(),
        email: required_str(params, "email")?.to_string(),
        contact_number: optional_string(params, "contactNumber")?,
    };
    let id = accounts::create_teacher(conn, &input, min_password_len(conn)?)?;
    Ok(json!({ "userId": id, "role": Role::Teacher }))
}

fn create_admin(conn: &Connection, params: &Value) -> HandlerResult {
    let input = NewAdmin {
        username: required_str(params, "username")?.to_string(),
        password: required_str(params, "password")?.to_string(),
        name: required_str(params, "name")?.to_string(),
        email: required_str(params, "email")?.to_string(),
    };
    let id = accounts::create_admin(conn, &input, min_password_len(conn)?)?;
    Ok(json!({ "userId": id, "role": Role::Admin }))
}

fn login(conn: &Connection, params: &Value) -> HandlerResult {
    let username = required_str(params, "username")?;
    let password = required_str(params, "password")?;
    let role_raw = required_str(params, "role")?;
    let role = Role::parse(role_raw)
        .ok_or_else(|| HandlerErr::bad_params("role must be student, teacher or admin"))?;
    let id = accounts::login(conn, username, password, role)?;
    tracing::info!(user_id = %id, role = role.as_str(), "login succeeded");
    Ok(json!({ "userId": id, "role": role }))
}

fn students_list(conn: &Connection, _params: &Value) -> HandlerResult {
    let students = accounts::list_students(conn)?;
    Ok(json!({ "students": to_json(&students)? }))
}

fn students_search(conn: &Connection, params: &Value) -> HandlerResult {
    let term = required_str(params, "term")?;
    let students = accounts::search_students(conn, term)?;
    Ok(json!({ "students": to_json(&students)? }))
}

fn students_get(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "studentId")?;
    to_json(&accounts::get_student(conn, id)?)
}

fn teachers_list(conn: &Connection, params: &Value) -> HandlerResult {
    let department_id = optional_str(params, "departmentId")?;
    let teachers = accounts::list_teachers(conn, department_id)?;
    Ok(json!({ "teachers": to_json(&teachers)? }))
}

/// Issues a reset code for the account owning `email`. The code is returned so the
/// caller can hand it to whatever delivers mail.
fn handle_reset_issue(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let res = (|| -> HandlerResult {
        let email = required_str(&req.params, "email")?;
        let user_id = accounts::find_user_by_email(conn, email)?
            .ok_or_else(|| CoreError::not_found("email", email.trim()))?;
        let ttl = SecurityConfig::load(conn)?.reset_code_ttl_minutes;
        let issued = state.reset_codes.issue(
            &user_id,
            chrono::Duration::minutes(ttl),
            chrono::Utc::now(),
        )?;
        tracing::info!(
            user_id = %user_id,
            expires_at = %issued.expires_at,
            pending = state.reset_codes.len(),
            "reset code issued"
        );
        Ok(json!({
            "userId": user_id,
            "code": issued.code,
            "expiresAt": issued.expires_at.to_rfc3339(),
        }))
    })();
    match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_reset_complete(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let res = (|| -> HandlerResult {
        let email = required_str(&req.params, "email")?;
        let code = required_str(&req.params, "code")?;
        let new_password = required_str(&req.params, "newPassword")?;
        let min_len = min_password_len(conn)?;
        if new_password.chars().count() < min_len {
            return Err(CoreError::invalid(
                "newPassword",
                format!("password must be at least {} characters", min_len),
            )
            .into());
        }
        let Some(user_id) = accounts::find_user_by_email(conn, email)? else {
            return Err(CoreError::Unauthorized.into());
        };
        if !state.reset_codes.consume(&user_id, code, chrono::Utc::now()) {
            tracing::warn!(user_id = %user_id, "reset code rejected");
            return Err(CoreError::Unauthorized.into());
        }
        accounts::set_password(conn, &user_id, new_password, min_len)?;
        tracing::info!(user_id = %user_id, "password reset");
        Ok(json!({ "userId": user_id }))
    })();
    match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "accounts.createStudent" => Some(with_conn(state, req, create_student)),
        "accounts.createTeacher" => Some(with_conn(state, req, create_teacher)),
        "accounts.createAdmin" => Some(with_conn(state, req, create_admin)),
        "accounts.login" => Some(with_conn(state, req, login)),
        "accounts.resetIssue" => Some(handle_reset_issue(state, req)),
        "accounts.resetComplete" => Some(handle_reset_complete(state, req)),
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.search" => Some(with_conn(state, req, students_search)),
        "students.get" => Some(with_conn(state, req, students_get)),
        "teachers.list" => Some(with_conn(state, req, teachers_list)),
        _ => None,
    }
}
