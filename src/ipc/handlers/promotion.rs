use crate::ipc::error::{err, ok};
use crate::ipc::params::get_optional_str;
use crate::ipc::types::{AppState, Request};
use crate::promotion;
use serde_json::json;

fn handle_promotion_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match promotion::preview(conn, state.settings.final_grade) {
        Ok(grades) => ok(
            &req.id,
            json!({
                "finalGrade": state.settings.final_grade,
                "grades": grades,
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_promotion_apply(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let academic_year = match get_optional_str(&req.params, "academicYear") {
        Ok(v) => v.unwrap_or_else(|| state.settings.academic_year.clone()),
        Err(e) => return e.response(&req.id),
    };
    match promotion::apply(conn, state.settings.final_grade, &academic_year) {
        Ok(outcome) => ok(&req.id, promotion::outcome_json(&outcome)),
        Err(e) => err(
            &req.id,
            "db_tx_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "promotion.preview" => Some(handle_promotion_preview(state, req)),
        "promotion.apply" => Some(handle_promotion_apply(state, req)),
        _ => None,
    }
}
