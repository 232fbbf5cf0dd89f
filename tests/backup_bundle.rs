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

#[test]
fn export_then_import_restores_the_workspace() {
    let workspace = temp_dir("trackademic-backup-src");
    let out_dir = temp_dir("trackademic-backup-out");
    let bundle = out_dir.join("workspace.trackademic.zip");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let _ = request_ok(&mut stdin, &mut reader, "2", "departments.create", json!({ "name": "Mathematics" }));

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"].as_str(), Some("trackademic-workspace-v1"));
    let digest = str_field(&exported, "dbSha256");
    assert_eq!(digest.len(), 64);

    let f = std::fs::File::open(&bundle).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    std::io::Read::read_to_string(
        &mut archive.by_name("manifest.json").expect("manifest entry"),
        &mut manifest,
    )
    .expect("read manifest");
    assert!(manifest.contains(&digest));
    archive
        .by_name("db/trackademic.sqlite3")
        .expect("database entry in bundle");

    // Changes after the export are rolled back by the import.
    let _ = request_ok(&mut stdin, &mut reader, "4", "departments.create", json!({ "name": "Physics" }));
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported["dbSha256"].as_str(), Some(digest.as_str()));

    let depts = request_ok(&mut stdin, &mut reader, "6", "departments.list", json!({}));
    let names: Vec<String> = depts["departments"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|d| str_field(&d, "name"))
        .collect();
    assert_eq!(names, vec!["Mathematics".to_string()]);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn import_rejects_a_non_bundle_and_keeps_the_database() {
    let workspace = temp_dir("trackademic-backup-reject");
    let junk = workspace.join("not-a-bundle.zip");
    std::fs::write(&junk, b"definitely not a zip").expect("write junk");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let _ = request_ok(&mut stdin, &mut reader, "2", "departments.create", json!({ "name": "Mathematics" }));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "backup.import",
        json!({ "inPath": junk.to_string_lossy() }),
    );
    assert_eq!(e["code"].as_str(), Some("import_failed"));

    let depts = request_ok(&mut stdin, &mut reader, "4", "departments.list", json!({}));
    assert_eq!(depts["departments"].as_array().map(|a| a.len()), Some(1));

    let _ = std::fs::remove_dir_all(workspace);
}
