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
    let exe = env!("CARGO_BIN_EXE_simakad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn simakad");
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


fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn assert_routed(value: &serde_json::Value, method: &str) {
    assert_ne!(
        error_code(value),
        "not_implemented",
        "unexpected unknown method for {}",
        method
    );
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("simaka-router-smoke");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let calls: Vec<(&str, serde_json::Value)> = vec![
        ("health", json!({})),
        ("workspace.select", json!({ "path": workspace.to_string_lossy() })),
        (
            "students.create",
            json!({ "nis": "9001", "name": "Smoke", "className": "X IPA 1", "grade": 10 }),
        ),
        ("students.list", json!({})),
        ("students.update", json!({ "studentId": 1, "patch": { "name": "Smoke Updated" } })),
        ("attendance.mark", json!({ "studentId": 1, "status": "hadir" })),
        ("attendance.list", json!({})),
        ("attendance.stats", json!({})),
        ("attendance.resetDay", json!({})),
        (
            "schedules.create",
            json!({
                "teacherName": "Smoke", "subject": "Smoke", "className": "X IPA 1",
                "day": 5, "startTime": "07:00", "endTime": "08:00"
            }),
        ),
        ("schedules.list", json!({})),
        ("schedules.update", json!({ "scheduleId": "missing", "patch": {} })),
        ("schedules.delete", json!({ "scheduleId": "missing" })),
        ("promotion.preview", json!({})),
        ("settings.get", json!({})),
        ("settings.update", json!({ "patch": { "schoolName": "Smoke School" } })),
        ("promotion.apply", json!({})),
        ("students.delete", json!({ "studentId": 1 })),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &i.to_string(), method, params);
        assert_routed(&resp, method);
    }

    // Settings written mid-run survive the promotion and delete that follow.
    let settings = request(&mut stdin, &mut reader, "last", "settings.get", json!({}));
    assert_eq!(settings["result"]["settings"]["schoolName"], "Smoke School");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("bad_json is json");
    assert_eq!(error_code(&bad), "bad_json");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
