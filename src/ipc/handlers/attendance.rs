use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::params::{get_optional_str, get_required_str, get_student_id, parse_clock};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, AttendanceStatus, LedgerError};
use crate::repo::{self, RepoError};
use rusqlite::Connection;
use serde_json::json;

fn parse_target_status(params: &serde_json::Value) -> Result<AttendanceStatus, HandlerErr> {
    let raw = get_required_str(params, "status")?;
    let status = raw.parse::<AttendanceStatus>().map_err(|e| {
        HandlerErr::bad_params(e.to_string()).with_details(json!({
            "allowed": ["hadir", "terlambat", "tidak-hadir", "izin", "sakit"]
        }))
    })?;
    if status == AttendanceStatus::Unset {
        return Err(HandlerErr::new(
            "invalid_status",
            LedgerError::InvalidStatus(status).to_string(),
        )
        .with_details(json!({ "status": status.as_str() })));
    }
    Ok(status)
}

/// Runs one fetch/transition/save cycle per attempt, starting over while the write keeps
/// losing the race and `attempts` is not used up.
fn retry_on_conflict<T, F>(attempts: u32, mut cycle: F) -> Result<T, HandlerErr>
where
    F: FnMut(u32) -> Result<T, HandlerErr>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match cycle(attempt) {
            Err(e) if e.code == "conflict" && attempt < attempts => continue,
            other => return other,
        }
    }
}

fn stats_json(
    conn: &Connection,
    class_name: Option<&str>,
) -> Result<(serde_json::Value, serde_json::Value), HandlerErr> {
    let records = repo::list_active_records(conn, class_name)?;
    let stats = ledger::compute_system_stats(&records);
    let counts = ledger::count_by_status(&records);
    Ok((json!(stats), json!(counts)))
}

fn attendance_mark(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_student_id(params)?;
    let status = parse_target_status(params)?;
    let clock = match get_optional_str(params, "clockTime")? {
        Some(raw) => parse_clock(&raw)?,
        None => chrono::Local::now().time(),
    };

    let saved = retry_on_conflict(state.settings.conflict_retries, |attempt| {
        let current = repo::find_by_student_id(conn, student_id)?;
        if current.enrollment != "active" {
            return Err(HandlerErr::new("not_found", "student is not actively enrolled"));
        }
        let next = ledger::apply_status_transition(&current.attendance, status, clock).map_err(
            |e: LedgerError| {
                HandlerErr::new("invalid_status", e.to_string())
                    .with_details(json!({ "status": status.as_str() }))
            },
        )?;
        match repo::save_attendance(conn, &current, &next) {
            Ok(()) => {
                tracing::debug!(
                    student_id,
                    from = %current.attendance.status,
                    to = %next.status,
                    attempt,
                    "attendance marked"
                );
                Ok(repo::StoredStudent {
                    attendance: next,
                    version: current.version + 1,
                    ..current
                })
            }
            Err(RepoError::Conflict) => {
                tracing::warn!(student_id, attempt, "attendance write raced");
                Err(RepoError::Conflict.into())
            }
            Err(e) => Err(e.into()),
        }
    })?;

    let (stats, counts) = stats_json(conn, None)?;
    Ok(json!({
        "student": saved,
        "stats": stats,
        "counts": counts,
    }))
}

fn attendance_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_name = get_optional_str(params, "className")?;
    let students = repo::list_active(conn, class_name.as_deref())?;
    let records: Vec<_> = students.iter().map(|s| s.attendance.clone()).collect();
    Ok(json!({
        "students": students,
        "stats": ledger::compute_system_stats(&records),
        "counts": ledger::count_by_status(&records),
    }))
}

fn attendance_stats(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_name = get_optional_str(params, "className")?;
    let (stats, counts) = stats_json(conn, class_name.as_deref())?;
    Ok(json!({ "stats": stats, "counts": counts }))
}

fn attendance_reset_day(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_name = get_optional_str(params, "className")?;
    let reset = repo::reset_day(conn, class_name.as_deref()).map_err(|e| {
        HandlerErr::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "students" }))
    })?;
    tracing::info!(reset, class_name = ?class_name, "attendance day reset");
    let (stats, counts) = stats_json(conn, class_name.as_deref())?;
    Ok(json!({ "reset": reset, "stats": stats, "counts": counts }))
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_mark(state, conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_stats(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_reset_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_reset_day(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.stats" => Some(handle_attendance_stats(state, req)),
        "attendance.resetDay" => Some(handle_attendance_reset_day(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_target_is_rejected_before_any_lookup() {
        let e = parse_target_status(&json!({ "status": "belum-diisi" }))
            .err()
            .expect("rejected");
        assert_eq!(e.code, "invalid_status");
        let e = parse_target_status(&json!({ "status": "present" }))
            .err()
            .expect("rejected");
        assert_eq!(e.code, "bad_params");
        assert_eq!(
            parse_target_status(&json!({ "status": "sakit" })).ok(),
            Some(AttendanceStatus::ExcusedSick)
        );
    }

    #[test]
    fn conflict_is_surfaced_once_retries_run_out() {
        let mut calls = 0;
        let res: Result<(), HandlerErr> = retry_on_conflict(3, |_| {
            calls += 1;
            Err(RepoError::Conflict.into())
        });
        let e = res.err().expect("conflict");
        assert_eq!(e.code, "conflict");
        assert_eq!(calls, 3);
    }

    #[test]
    fn a_later_attempt_can_win_the_race() {
        let mut seen = Vec::new();
        let res = retry_on_conflict(3, |attempt| {
            seen.push(attempt);
            if attempt < 2 {
                Err(RepoError::Conflict.into())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(res.ok(), Some(2));
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let res: Result<(), HandlerErr> = retry_on_conflict(5, |_| {
            calls += 1;
            Err(RepoError::NotFound.into())
        });
        assert_eq!(res.err().map(|e| e.code), Some("not_found"));
        assert_eq!(calls, 1);

        let mut calls = 0;
        let _: Result<(), HandlerErr> = retry_on_conflict(0, |_| {
            calls += 1;
            Err(RepoError::Conflict.into())
        });
        assert_eq!(calls, 1);
    }
}
