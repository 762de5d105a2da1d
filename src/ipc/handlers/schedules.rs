use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::params::{get_optional_i64, get_optional_str, get_required_str, parse_clock};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveTime;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Schedule {
    id: String,
    teacher_name: String,
    subject: String,
    class_name: String,
    day: i64,
    start_time: String,
    end_time: String,
}

const SCHEDULE_COLUMNS: &str =
    "id, teacher_name, subject, class_name, day, start_time, end_time";

fn schedule_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    Ok(Schedule {
        id: r.get(0)?,
        teacher_name: r.get(1)?,
        subject: r.get(2)?,
        class_name: r.get(3)?,
        day: r.get(4)?,
        start_time: r.get(5)?,
        end_time: r.get(6)?,
    })
}

fn check_day(day: i64) -> Result<i64, HandlerErr> {
    // 1 = Senin (Monday) .. 7 = Minggu (Sunday)
    if !(1..=7).contains(&day) {
        return Err(HandlerErr::bad_params("day must be between 1 and 7"));
    }
    Ok(day)
}

fn check_span(start: &str, end: &str) -> Result<(String, String), HandlerErr> {
    let s: NaiveTime = parse_clock(start)?;
    let e: NaiveTime = parse_clock(end)?;
    if s >= e {
        return Err(HandlerErr::bad_params("startTime must be before endTime"));
    }
    Ok((s.format("%H:%M").to_string(), e.format("%H:%M").to_string()))
}

/// Same day, same class or same teacher, overlapping half-open intervals.
fn find_clash(
    conn: &Connection,
    candidate: &Schedule,
) -> Result<Option<Schedule>, HandlerErr> {
    let clash = conn
        .query_row(
            &format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules
                 WHERE day = ?1 AND id <> ?2
                   AND (class_name = ?3 OR teacher_name = ?4)
                   AND start_time < ?6 AND ?5 < end_time
                 ORDER BY start_time LIMIT 1"
            ),
            rusqlite::params![
                candidate.day,
                candidate.id,
                candidate.class_name,
                candidate.teacher_name,
                candidate.start_time,
                candidate.end_time,
            ],
            schedule_from_row,
        )
        .optional()?;
    Ok(clash)
}

fn clash_err(clash: Schedule) -> HandlerErr {
    HandlerErr::new("conflict", "schedule overlaps an existing entry").with_details(json!({
        "scheduleId": clash.id,
        "className": clash.class_name,
        "teacherName": clash.teacher_name,
        "startTime": clash.start_time,
        "endTime": clash.end_time,
    }))
}

fn schedules_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let day = get_optional_i64(params, "day")?.map(check_day).transpose()?;
    let class_name = get_optional_str(params, "className")?;
    let teacher_name = get_optional_str(params, "teacherName")?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules
         WHERE (?1 IS NULL OR day = ?1)
           AND (?2 IS NULL OR class_name = ?2)
           AND (?3 IS NULL OR teacher_name = ?3)
         ORDER BY day, start_time, class_name"
    ))?;
    let schedules = stmt
        .query_map(
            rusqlite::params![day, class_name, teacher_name],
            schedule_from_row,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "schedules": schedules }))
}

fn schedules_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let day = get_optional_i64(params, "day")?
        .ok_or_else(|| HandlerErr::bad_params("missing day"))?;
    let (start_time, end_time) = check_span(
        &get_required_str(params, "startTime")?,
        &get_required_str(params, "endTime")?,
    )?;
    let schedule = Schedule {
        id: Uuid::new_v4().to_string(),
        teacher_name: get_required_str(params, "teacherName")?,
        subject: get_required_str(params, "subject")?,
        class_name: get_required_str(params, "className")?,
        day: check_day(day)?,
        start_time,
        end_time,
    };
    if let Some(clash) = find_clash(conn, &schedule)? {
        return Err(clash_err(clash));
    }
    conn.execute(
        &format!("INSERT INTO schedules({SCHEDULE_COLUMNS}) VALUES(?, ?, ?, ?, ?, ?, ?)"),
        rusqlite::params![
            schedule.id,
            schedule.teacher_name,
            schedule.subject,
            schedule.class_name,
            schedule.day,
            schedule.start_time,
            schedule.end_time,
        ],
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "schedules" }))
    })?;
    Ok(json!({ "scheduleId": schedule.id, "schedule": schedule }))
}

fn schedules_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let schedule_id = get_required_str(params, "scheduleId")?;
    let Some(patch) = params.get("patch").filter(|p| p.is_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let current = conn
        .query_row(
            &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?"),
            [&schedule_id],
            schedule_from_row,
        )
        .optional()?
        .ok_or_else(|| HandlerErr::new("not_found", "schedule not found"))?;

    let start = get_optional_str(patch, "startTime")?.unwrap_or(current.start_time);
    let end = get_optional_str(patch, "endTime")?.unwrap_or(current.end_time);
    let (start_time, end_time) = check_span(&start, &end)?;
    let next = Schedule {
        id: current.id,
        teacher_name: get_optional_str(patch, "teacherName")?.unwrap_or(current.teacher_name),
        subject: get_optional_str(patch, "subject")?.unwrap_or(current.subject),
        class_name: get_optional_str(patch, "className")?.unwrap_or(current.class_name),
        day: match get_optional_i64(patch, "day")? {
            Some(d) => check_day(d)?,
            None => current.day,
        },
        start_time,
        end_time,
    };
    if let Some(clash) = find_clash(conn, &next)? {
        return Err(clash_err(clash));
    }
    conn.execute(
        "UPDATE schedules SET teacher_name = ?, subject = ?, class_name = ?, day = ?,
           start_time = ?, end_time = ?
         WHERE id = ?",
        rusqlite::params![
            next.teacher_name,
            next.subject,
            next.class_name,
            next.day,
            next.start_time,
            next.end_time,
            next.id,
        ],
    )
    .map_err(|e| {
        HandlerErr::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "schedules" }))
    })?;
    Ok(json!({ "schedule": next }))
}

fn schedules_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let schedule_id = get_required_str(params, "scheduleId")?;
    let changed = conn
        .execute("DELETE FROM schedules WHERE id = ?", [&schedule_id])
        .map_err(|e| {
            HandlerErr::new("db_delete_failed", e.to_string())
                .with_details(json!({ "table": "schedules" }))
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "schedule not found"));
    }
    Ok(json!({ "ok": true }))
}

fn handle_schedules_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "schedules": [] }));
    };
    match schedules_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_schedules_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match schedules_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_schedules_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match schedules_update(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_schedules_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match schedules_delete(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedules.list" => Some(handle_schedules_list(state, req)),
        "schedules.create" => Some(handle_schedules_create(state, req)),
        "schedules.update" => Some(handle_schedules_update(state, req)),
        "schedules.delete" => Some(handle_schedules_delete(state, req)),
        _ => None,
    }
}
