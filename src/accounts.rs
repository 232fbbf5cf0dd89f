use crate::auth;
use crate::curriculum::{department_exists, new_id};
use crate::error::{CoreError, CoreResult};
use crate::model::{full_name, Role};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct NewStudent {
    pub username: String,
    pub password: String,
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub contact_number: Option<String>,
    pub year_level: Option<String>,
    pub course_program: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTeacher {
    pub username: String,
    pub password: String,
    pub teacher_code: String,
    pub department_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub contact_number: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewAdmin {
    pub username: String,
    pub password: String,
    pub name: String,
    pub email: String,
}

fn required(field: &'static str, v: &str) -> CoreResult<String> {
    let v = v.trim();
    if v.is_empty() {
        return Err(CoreError::invalid(field, format!("{} must not be empty", field)));
    }
    Ok(v.to_string())
}

fn optional(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn check_password(password: &str, min_len: usize) -> CoreResult<()> {
    if password.chars().count() < min_len {
        return Err(CoreError::invalid(
            "password",
            format!("password must be at least {} characters", min_len),
        ));
    }
    Ok(())
}

fn insert_user(
    tx: &rusqlite::Transaction<'_>,
    username: &str,
    password: &str,
    role: Role,
) -> CoreResult<String> {
    let id = new_id();
    let created_at = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO users(id, username, password_hash, role, created_at) VALUES(?, ?, ?, ?, ?)",
        (
            &id,
            username,
            auth::hash_password(password)?,
            role.as_str(),
            created_at,
        ),
    )?;
    Ok(id)
}

pub fn create_student(conn: &Connection, s: &NewStudent, min_password_len: usize) -> CoreResult<String> {
    let username = required("username", &s.username)?;
    let student_number = required("studentNumber", &s.student_number)?;
    let first_name = required("firstName", &s.first_name)?;
    let last_name = required("lastName", &s.last_name)?;
    check_password(&s.password, min_password_len)?;

    let tx = conn.unchecked_transaction()?;
    let id = insert_user(&tx, &username, &s.password, Role::Student)?;
    tx.execute(
        "INSERT INTO students(id, student_number, first_name, last_name, email,
                              contact_number, year_level, course_program)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &student_number,
            &first_name,
            &last_name,
            optional(&s.email),
            optional(&s.contact_number),
            optional(&s.year_level),
            optional(&s.course_program),
        ),
    )?;
    tx.commit()?;
    tracing::info!(student_id = %id, %student_number, "student account created");
    Ok(id)
}

pub fn create_teacher(conn: &Connection, t: &NewTeacher, min_password_len: usize) -> CoreResult<String> {
    let username = required("username", &t.username)?;
    let teacher_code = required("teacherCode", &t.teacher_code)?;
    let first_name = required("firstName", &t.first_name)?;
    let last_name = required("lastName", &t.last_name)?;
    let email = required("email", &t.email)?;
    check_password(&t.password, min_password_len)?;
    if !department_exists(conn, &t.department_id)? {
        return Err(CoreError::not_found("department", t.department_id.as_str()));
    }

    let tx = conn.unchecked_transaction()?;
    let id = insert_user(&tx, &username, &t.password, Role::Teacher)?;
    tx.execute(
        "INSERT INTO teachers(id, teacher_code, department_id, first_name, last_name, email, contact_number)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &teacher_code,
            &t.department_id,
            &first_name,
            &last_name,
            &email,
            optional(&t.contact_number),
        ),
    )?;
    tx.commit()?;
    tracing::info!(teacher_id = %id, %teacher_code, "teacher account created");
    Ok(id)
}

pub fn create_admin(conn: &Connection, a: &NewAdmin, min_password_len: usize) -> CoreResult<String> {
    let username = required("username", &a.username)?;
    let name = required("name", &a.name)?;
    let email = required("email", &a.email)?;
    check_password(&a.password, min_password_len)?;

    let tx = conn.unchecked_transaction()?;
    let id = insert_user(&tx, &username, &a.password, Role::Admin)?;
    tx.execute(
        "INSERT INTO admins(id, name, email) VALUES(?, ?, ?)",
        (&id, &name, &email),
    )?;
    tx.commit()?;
    tracing::info!(admin_id = %id, "admin account created");
    Ok(id)
}

/// Unknown user, wrong password and wrong role are indistinguishable to the caller.
pub fn login(conn: &Connection, username: &str, password: &str, role: Role) -> CoreResult<String> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, password_hash, role FROM users WHERE username = ?",
            [username.trim()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((id, hash, stored_role)) = row else {
        return Err(CoreError::Unauthorized);
    };
    if Role::parse(&stored_role) != Some(role) || !auth::verify_password(password, &hash) {
        return Err(CoreError::Unauthorized);
    }
    Ok(id)
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> CoreResult<Option<String>> {
    let email = email.trim();
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE email = ?1
             UNION ALL SELECT id FROM teachers WHERE email = ?1
             UNION ALL SELECT id FROM admins WHERE email = ?1
             LIMIT 1",
            [email],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn set_password(
    conn: &Connection,
    user_id: &str,
    password: &str,
    min_password_len: usize,
) -> CoreResult<()> {
    check_password(password, min_password_len)?;
    let changed = conn.execute(
        "UPDATE users SET password_hash = ? WHERE id = ?",
        (auth::hash_password(password)?, user_id),
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("user", user_id));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: String,
    pub username: String,
    pub student_number: String,
    pub full_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub contact_number: Option<String>,
    pub year_level: Option<String>,
    pub course_program: Option<String>,
}

const STUDENT_SELECT: &str = "SELECT s.id, u.username, s.student_number, s.first_name, s.last_name,
            s.email, s.contact_number, s.year_level, s.course_program
     FROM students s
     JOIN users u ON u.id = s.id";

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentProfile> {
    let first_name: String = row.get(3)?;
    let last_name: String = row.get(4)?;
    Ok(StudentProfile {
        id: row.get(0)?,
        username: row.get(1)?,
        student_number: row.get(2)?,
        full_name: full_name(&last_name, &first_name),
        first_name,
        last_name,
        email: row.get(5)?,
        contact_number: row.get(6)?,
        year_level: row.get(7)?,
        course_program: row.get(8)?,
    })
}

pub fn get_student(conn: &Connection, id: &str) -> CoreResult<StudentProfile> {
    let sql = format!("{} WHERE s.id = ?", STUDENT_SELECT);
    conn.query_row(&sql, [id], student_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("student", id))
}

pub fn student_exists(conn: &Connection, id: &str) -> CoreResult<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

pub fn list_students(conn: &Connection) -> CoreResult<Vec<StudentProfile>> {
    let sql = format!("{} ORDER BY s.last_name, s.first_name", STUDENT_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub const STUDENT_SEARCH_LIMIT: i64 = 10;

/// Case-insensitive "contains" match on student number, first or last name.
pub fn search_students(conn: &Connection, term: &str) -> CoreResult<Vec<StudentProfile>> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return Ok(Vec::new());
    }
    let pattern = format!("%{}%", term.replace('%', "").replace('_', ""));
    let sql = format!(
        "{} WHERE lower(s.student_number) LIKE ?1
            OR lower(s.first_name) LIKE ?1
            OR lower(s.last_name) LIKE ?1
         ORDER BY s.last_name, s.first_name
         LIMIT ?2",
        STUDENT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((&pattern, STUDENT_SEARCH_LIMIT), student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherProfile {
    pub id: String,
    pub teacher_code: String,
    pub department_id: String,
    pub full_name: String,
    pub email: String,
}

pub fn list_teachers(conn: &Connection, department_id: Option<&str>) -> CoreResult<Vec<TeacherProfile>> {
    let mut stmt = conn.prepare(
        "SELECT id, teacher_code, department_id, first_name, last_name, email
         FROM teachers
         WHERE (?1 IS NULL OR department_id = ?1)
         ORDER BY last_name, first_name",
    )?;
    let rows = stmt
        .query_map([department_id], |row| {
            let first: String = row.get(3)?;
            let last: String = row.get(4)?;
            Ok(TeacherProfile {
                id: row.get(0)?,
                teacher_code: row.get(1)?,
                department_id: row.get(2)?,
                full_name: full_name(&last, &first),
                email: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::apply_schema(&conn).expect("schema");
        conn
    }

    fn student(username: &str, number: &str, last: &str) -> NewStudent {
        NewStudent {
            username: username.into(),
            password: "secret-pass".into(),
            student_number: number.into(),
            first_name: "Ana".into(),
            last_name: last.into(),
            email: Some(format!("{}@example.edu", username)),
            ..Default::default()
        }
    }

    #[test]
    fn login_checks_role_and_password() {
        let conn = conn();
        let id = create_student(&conn, &student("asantos", "2024-0001", "Santos"), 8)
            .expect("create");
        assert_eq!(
            login(&conn, "asantos", "secret-pass", Role::Student).expect("login"),
            id
        );
        assert!(matches!(
            login(&conn, "asantos", "secret-pass", Role::Admin),
            Err(CoreError::Unauthorized)
        ));
        assert!(matches!(
            login(&conn, "asantos", "wrong", Role::Student),
            Err(CoreError::Unauthorized)
        ));
        assert!(matches!(
            login(&conn, "nobody", "secret-pass", Role::Student),
            Err(CoreError::Unauthorized)
        ));
    }

    #[test]
    fn short_password_is_rejected_before_insert() {
        let conn = conn();
        let mut s = student("short", "2024-0002", "Reyes");
        s.password = "abc".into();
        assert_eq!(
            create_student(&conn, &s, 8).expect_err("too short").code(),
            "bad_params"
        );
        assert!(list_students(&conn).expect("list").is_empty());
    }

    #[test]
    fn search_is_capped_and_ordered() {
        let conn = conn();
        for i in 0..12 {
            let last = format!("Lopez{:02}", 11 - i);
            create_student(
                &conn,
                &student(&format!("u{}", i), &format!("2024-1{:03}", i), &last),
                8,
            )
            .expect("create");
        }
        let hits = search_students(&conn, "lopez").expect("search");
        assert_eq!(hits.len(), STUDENT_SEARCH_LIMIT as usize);
        assert_eq!(hits[0].last_name, "Lopez00");
        assert!(search_students(&conn, "   ").expect("blank").is_empty());
    }

    #[test]
    fn email_lookup_spans_roles() {
        let conn = conn();
        let id = create_student(&conn, &student("mcruz", "2024-0003", "Cruz"), 8)
            .expect("create");
        assert_eq!(
            find_user_by_email(&conn, " mcruz@example.edu ").expect("lookup"),
            Some(id)
        );
        assert_eq!(find_user_by_email(&conn, "x@example.edu").expect("lookup"), None);
    }
}
