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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn enroll(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    nis: &str,
    class_name: &str,
    grade: i64,
) -> i64 {
    let res = request_ok(
        stdin,
        reader,
        &format!("enroll-{nis}"),
        "students.create",
        json!({ "nis": nis, "name": format!("Siswa {nis}"), "className": class_name, "grade": grade }),
    );
    res.get("studentId").and_then(|v| v.as_i64()).expect("studentId")
}

#[test]
fn promotion_advances_grades_and_graduates_final_year() {
    let workspace = temp_dir("simaka-promotion");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let tenth = enroll(&mut stdin, &mut reader, "6001", "X IPA 1", 10);
    let eleventh = enroll(&mut stdin, &mut reader, "6002", "11-B", 11);
    let senior = enroll(&mut stdin, &mut reader, "6003", "XII IPS 2", 12);
    request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "attendance.mark",
        json!({ "studentId": tenth, "status": "tidak-hadir", "clockTime": "07:05" }),
    );

    let preview = request_ok(&mut stdin, &mut reader, "2", "promotion.preview", json!({}));
    let grades = preview["grades"].as_array().cloned().unwrap_or_default();
    assert_eq!(grades.len(), 3);
    assert_eq!(grades[2]["grade"], 12);
    assert_eq!(grades[2]["graduating"], true);
    assert_eq!(grades[0]["graduating"], false);

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "promotion.apply",
        json!({ "academicYear": "2026/2027" }),
    );
    assert_eq!(applied["promoted"], 2);
    assert_eq!(applied["graduated"], 1);
    assert_eq!(applied["academicYear"], "2026/2027");
    assert!(applied["runId"].is_string());

    let active = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    let rows = active["students"].as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 2);
    let by_id = |id: i64| {
        rows.iter()
            .find(|r| r["studentId"].as_i64() == Some(id))
            .cloned()
            .expect("student row")
    };
    let t = by_id(tenth);
    assert_eq!(t["grade"], 11);
    assert_eq!(t["className"], "XI IPA 1");
    // Lifetime tallies survive promotion.
    assert_eq!(t["absentCount"], 1);
    let e = by_id(eleventh);
    assert_eq!(e["grade"], 12);
    assert_eq!(e["className"], "12-B");

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "includeGraduated": true }),
    );
    let grad = all["students"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .find(|r| r["studentId"].as_i64() == Some(senior))
        .expect("graduate row");
    assert_eq!(grad["enrollment"], "graduated");

    let stats = request_ok(&mut stdin, &mut reader, "6", "attendance.stats", json!({}));
    assert_eq!(stats["stats"]["totalStudents"], 2);

    let mark_grad = request(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.mark",
        json!({ "studentId": senior, "status": "hadir" }),
    );
    assert_eq!(error_code(&mark_grad), "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn settings_persist_across_workspace_reopen() {
    let workspace = temp_dir("simaka-settings");
    {
        let (_child, mut stdin, mut reader) = spawn_sidecar();
        let defaults = request_ok(&mut stdin, &mut reader, "1", "settings.get", json!({}));
        assert_eq!(defaults["settings"]["finalGrade"], 12);
        assert_eq!(defaults["settings"]["conflictRetries"], 3);

        request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let updated = request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "settings.update",
            json!({ "patch": { "schoolName": "SMP Negeri 4", "firstGrade": 7, "finalGrade": 9 } }),
        );
        assert_eq!(updated["settings"]["schoolName"], "SMP Negeri 4");

        let bad = request(
            &mut stdin,
            &mut reader,
            "4",
            "settings.update",
            json!({ "patch": { "semester": 5 } }),
        );
        assert_eq!(error_code(&bad), "bad_params");

        // Grade bounds follow the settings.
        request_ok(
            &mut stdin,
            &mut reader,
            "5",
            "students.create",
            json!({ "nis": "7001", "name": "Eka", "className": "VII A", "grade": 7 }),
        );
    }

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let loaded = request_ok(&mut stdin, &mut reader, "2", "settings.get", json!({}));
    assert_eq!(loaded["settings"]["schoolName"], "SMP Negeri 4");
    assert_eq!(loaded["settings"]["finalGrade"], 9);
    assert_eq!(loaded["settings"]["semester"], 1);

    let promoted = request_ok(&mut stdin, &mut reader, "3", "promotion.apply", json!({}));
    assert_eq!(promoted["promoted"], 1);
    assert_eq!(promoted["academicYear"], "2025/2026");
    let rows = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(rows["students"][0]["className"], "VIII A");

    let _ = std::fs::remove_dir_all(workspace);
}
