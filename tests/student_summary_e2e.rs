use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_trackademicd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn trackademicd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().unwrap_or_else(|| json!({}))
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

struct Seed {
    department_id: String,
    year_id: String,
    semester_id: String,
    subject_id: String,
    class_id: String,
    student_id: String,
}

/// One department, year, semester, 3-unit subject, class and student.
fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seed {
    let dept = request_ok(stdin, reader, "seed-dept", "departments.create", json!({ "name": "Computer Studies" }));
    let department_id = str_field(&dept, "departmentId");
    let year = request_ok(
        stdin,
        reader,
        "seed-year",
        "years.create",
        json!({ "label": "2024-2025", "dateStarted": "2024-08-01", "dateEnded": "2025-05-31" }),
    );
    let year_id = str_field(&year, "schoolYearId");
    let sem = request_ok(
        stdin,
        reader,
        "seed-sem",
        "semesters.create",
        json!({ "schoolYearId": year_id, "name": "First", "dateStarted": "2024-08-01", "dateEnded": "2024-12-15" }),
    );
    let semester_id = str_field(&sem, "semesterId");
    let subject = request_ok(
        stdin,
        reader,
        "seed-subject",
        "subjects.create",
        json!({ "departmentId": department_id, "code": "CS101", "name": "Intro to Programming", "creditUnits": 3 }),
    );
    let subject_id = str_field(&subject, "subjectId");
    let class = request_ok(
        stdin,
        reader,
        "seed-class",
        "classes.create",
        json!({ "subjectId": subject_id, "schoolYearId": year_id, "semesterId": semester_id, "section": "BSIT-1A" }),
    );
    let class_id = str_field(&class, "classId");
    let student = request_ok(
        stdin,
        reader,
        "seed-student",
        "accounts.createStudent",
        json!({
            "username": "jdelacruz",
            "password": "password123",
            "studentNumber": "2024-0001",
            "firstName": "Juan",
            "lastName": "Dela Cruz",
            "email": "juan@example.edu"
        }),
    );
    let student_id = str_field(&student, "userId");
    Seed {
        department_id,
        year_id,
        semester_id,
        subject_id,
        class_id,
        student_id,
    }
}

fn summary(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    request_ok(stdin, reader, id, "analytics.studentSummary", params)
}

#[test]
fn enroll_grade_and_summarize_end_to_end() {
    let workspace = temp_dir("trackademic-summary-e2e");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let s = seed(&mut stdin, &mut reader);

    let enrolled = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "enrollment.enroll",
        json!({ "studentId": s.student_id, "classId": s.class_id }),
    );
    let enrollment_id = str_field(&enrolled, "enrollmentId");
    let g = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.set",
        json!({ "enrollmentId": enrollment_id, "midtermGrade": 2.0, "finalGrade": 1.5, "finalScore": 1.75 }),
    );
    assert_eq!(g["remark"].as_str(), Some("passed"));

    let first = summary(&mut stdin, &mut reader, "4", json!({ "studentId": s.student_id }));
    assert_eq!(first["gpa"].as_f64(), Some(1.5));
    assert_eq!(first["totalUnits"].as_i64(), Some(3));
    assert_eq!(first["unitsEarned"].as_i64(), Some(3));
    assert_eq!(first["passedCount"].as_i64(), Some(1));
    assert_eq!(first["failedCount"].as_i64(), Some(0));

    let second = summary(&mut stdin, &mut reader, "5", json!({ "studentId": s.student_id }));
    assert_eq!(first, second);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn student_without_grades_has_zero_gpa() {
    let workspace = temp_dir("trackademic-summary-zero");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let s = seed(&mut stdin, &mut reader);

    let empty = summary(&mut stdin, &mut reader, "2", json!({ "studentId": s.student_id }));
    assert_eq!(empty["gpa"].as_f64(), Some(0.0));
    assert_eq!(empty["totalUnits"].as_i64(), Some(0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "enrollment.enroll",
        json!({ "studentId": s.student_id, "classId": s.class_id }),
    );
    let ungraded = summary(&mut stdin, &mut reader, "4", json!({ "studentId": s.student_id }));
    assert_eq!(ungraded["gpa"].as_f64(), Some(0.0));
    assert_eq!(ungraded["totalUnits"].as_i64(), Some(3));
    assert_eq!(ungraded["unitsEarned"].as_i64(), Some(0));
    assert_eq!(ungraded["passedCount"].as_i64(), Some(0));

    let history = request_ok(&mut stdin, &mut reader, "5", "analytics.gpaHistory", json!({ "studentId": s.student_id }));
    assert!(history["terms"].as_array().map(|a| a.is_empty()).unwrap_or(false));

    let e = request_err(&mut stdin, &mut reader, "6", "analytics.studentSummary", json!({ "studentId": "ghost" }));
    assert_eq!(e["code"].as_str(), Some("not_found"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn gpa_is_unit_weighted_and_history_is_per_term() {
    let workspace = temp_dir("trackademic-summary-history");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let s = seed(&mut stdin, &mut reader);

    let second_sem = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "semesters.create",
            json!({ "schoolYearId": s.year_id, "name": "Second", "dateStarted": "2025-01-06", "dateEnded": "2025-05-31" }),
        ),
        "semesterId",
    );
    let lab = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "subjects.create",
            json!({ "departmentId": s.department_id, "code": "CS102", "name": "Data Structures", "creditUnits": 2 }),
        ),
        "subjectId",
    );
    let lab_class = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "classes.create",
            json!({ "subjectId": lab, "schoolYearId": s.year_id, "semesterId": second_sem, "section": "BSIT-1A" }),
        ),
        "classId",
    );

    let e1 = str_field(
        &request_ok(&mut stdin, &mut reader, "5", "enrollment.enroll", json!({ "studentId": s.student_id, "classId": s.class_id })),
        "enrollmentId",
    );
    let e2 = str_field(
        &request_ok(&mut stdin, &mut reader, "6", "enrollment.enroll", json!({ "studentId": s.student_id, "classId": lab_class })),
        "enrollmentId",
    );
    let _ = request_ok(&mut stdin, &mut reader, "7", "grades.set", json!({ "enrollmentId": e1, "finalGrade": 1.5 }));
    let _ = request_ok(&mut stdin, &mut reader, "8", "grades.set", json!({ "enrollmentId": e2, "finalGrade": 4.0 }));

    // (1.5*3 + 4.0*2) / 5 = 2.5
    let all = summary(&mut stdin, &mut reader, "9", json!({ "studentId": s.student_id }));
    assert!((all["gpa"].as_f64().unwrap_or(-1.0) - 2.5).abs() < 1e-9);
    assert_eq!(all["totalUnits"].as_i64(), Some(5));
    assert_eq!(all["unitsEarned"].as_i64(), Some(3));
    assert_eq!(all["passedCount"].as_i64(), Some(1));
    assert_eq!(all["failedCount"].as_i64(), Some(1));

    let scoped = summary(
        &mut stdin,
        &mut reader,
        "10",
        json!({ "studentId": s.student_id, "schoolYearId": s.year_id, "semesterId": second_sem }),
    );
    assert_eq!(scoped["gpa"].as_f64(), Some(4.0));
    assert_eq!(scoped["totalUnits"].as_i64(), Some(2));
    assert_eq!(scoped["unitsEarned"].as_i64(), Some(0));

    let history = request_ok(&mut stdin, &mut reader, "11", "analytics.gpaHistory", json!({ "studentId": s.student_id }));
    let terms = history["terms"].as_array().cloned().unwrap_or_default();
    assert_eq!(terms.len(), 2);
    assert_eq!(terms[0]["termLabel"].as_str(), Some("2024-2025 - First"));
    assert_eq!(terms[0]["gpa"].as_f64(), Some(1.5));
    assert_eq!(terms[1]["termLabel"].as_str(), Some("2024-2025 - Second"));
    assert_eq!(terms[1]["gpa"].as_f64(), Some(4.0));

    let _ = std::fs::remove_dir_all(workspace);
}
