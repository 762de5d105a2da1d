use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::params::{get_optional_i64, get_optional_str, get_required_str, get_student_id};
use crate::ipc::types::{AppState, Request};
use crate::repo::{self, student_from_row, STUDENT_COLUMNS};
use rusqlite::{Connection, ErrorCode};
use serde_json::json;

fn map_write_err(e: rusqlite::Error, table: &str) -> HandlerErr {
    if let rusqlite::Error::SqliteFailure(f, _) = &e {
        if f.code == ErrorCode::ConstraintViolation
            && f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        {
            return HandlerErr::new("conflict", "nis already registered");
        }
    }
    HandlerErr::new("db_update_failed", e.to_string()).with_details(json!({ "table": table }))
}

fn parse_gender(params: &serde_json::Value) -> Result<Option<String>, HandlerErr> {
    match get_optional_str(params, "gender")?.as_deref() {
        None => Ok(None),
        Some(g @ ("L" | "P")) => Ok(Some(g.to_string())),
        Some(_) => Err(HandlerErr::bad_params("gender must be L or P")),
    }
}

fn check_grade(grade: i64, state: &AppState) -> Result<i64, HandlerErr> {
    let s = &state.settings;
    if grade < s.first_grade || grade > s.final_grade {
        return Err(HandlerErr::bad_params(format!(
            "grade must be between {} and {}",
            s.first_grade, s.final_grade
        )));
    }
    Ok(grade)
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_name = get_optional_str(params, "className")?;
    let grade = get_optional_i64(params, "grade")?;
    let include_graduated = params
        .get("includeGraduated")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students
         WHERE (?1 IS NULL OR class_name = ?1)
           AND (?2 IS NULL OR grade = ?2)
           AND (?3 OR enrollment = 'active')
         ORDER BY class_name, name, student_id"
    ))?;
    let students = stmt
        .query_map(
            rusqlite::params![class_name, grade, include_graduated],
            student_from_row,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "students": students }))
}

fn students_create(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let nis = get_required_str(params, "nis")?;
    let name = get_required_str(params, "name")?;
    let class_name = get_required_str(params, "className")?;
    let gender = parse_gender(params)?;
    let grade = get_optional_i64(params, "grade")?
        .ok_or_else(|| HandlerErr::bad_params("missing grade"))?;
    let grade = check_grade(grade, state)?;

    conn.execute(
        "INSERT INTO students(nis, name, gender, class_name, grade, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            nis,
            name,
            gender,
            class_name,
            grade,
            chrono::Utc::now().to_rfc3339()
        ],
    )
    .map_err(|e| map_write_err(e, "students"))?;
    let student_id = conn.last_insert_rowid();
    tracing::info!(student_id, %nis, %class_name, "student enrolled");
    let student = repo::find_by_student_id(conn, student_id)?;
    Ok(json!({ "studentId": student_id, "student": student }))
}

fn students_update(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_student_id(params)?;
    let Some(patch) = params.get("patch").filter(|p| p.is_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    for key in patch.as_object().into_iter().flat_map(|o| o.keys()) {
        if !matches!(key.as_str(), "nis" | "name" | "gender" | "className" | "grade") {
            return Err(HandlerErr::bad_params(format!("unknown patch key {}", key)));
        }
    }
    let current = repo::find_by_student_id(conn, student_id)?;

    let nis = get_optional_str(patch, "nis")?.unwrap_or(current.nis);
    let name = get_optional_str(patch, "name")?.unwrap_or(current.name);
    let class_name = get_optional_str(patch, "className")?.unwrap_or(current.class_name);
    let gender = if patch.get("gender").is_some() {
        parse_gender(patch)?
    } else {
        current.gender
    };
    let grade = match get_optional_i64(patch, "grade")? {
        Some(g) => check_grade(g, state)?,
        None => current.grade,
    };

    conn.execute(
        "UPDATE students SET nis = ?, name = ?, gender = ?, class_name = ?, grade = ?,
           version = version + 1, updated_at = ?
         WHERE student_id = ?",
        rusqlite::params![
            nis,
            name,
            gender,
            class_name,
            grade,
            chrono::Utc::now().to_rfc3339(),
            student_id
        ],
    )
    .map_err(|e| map_write_err(e, "students"))?;
    let student = repo::find_by_student_id(conn, student_id)?;
    Ok(json!({ "student": student }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_student_id(params)?;
    let changed = conn
        .execute("DELETE FROM students WHERE student_id = ?", [student_id])
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": "students" }))
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    tracing::info!(student_id, "student removed");
    Ok(json!({ "ok": true }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    match students_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_create(state, conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_update(state, conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unique_violations_read_as_duplicate_nis() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute("CREATE TABLE t(x TEXT NOT NULL UNIQUE)", [])
            .expect("create");
        conn.execute("INSERT INTO t(x) VALUES('1')", []).expect("insert");

        let dup = conn
            .execute("INSERT INTO t(x) VALUES('1')", [])
            .expect_err("duplicate");
        assert_eq!(map_write_err(dup, "students").code, "conflict");

        let null = conn
            .execute("INSERT INTO t(x) VALUES(NULL)", [])
            .expect_err("not null");
        let e = map_write_err(null, "students");
        assert_eq!(e.code, "db_update_failed");
        assert_eq!(e.details, Some(json!({ "table": "students" })));
    }
}
