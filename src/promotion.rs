//! Year-end grade advancement.

use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

const ROMAN: [&str; 13] = [
    "", "I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X", "XI", "XII",
];

fn roman(grade: i64) -> Option<&'static str> {
    usize::try_from(grade)
        .ok()
        .and_then(|g| ROMAN.get(g))
        .copied()
        .filter(|s| !s.is_empty())
}

fn strip_grade_prefix<'a>(name: &'a str, token: &str) -> Option<&'a str> {
    let rest = name.strip_prefix(token)?;
    match rest.chars().next() {
        None => Some(rest),
        Some(c) if !c.is_ascii_alphanumeric() => Some(rest),
        _ => None,
    }
}

/// `X IPA 1` -> `XI IPA 1`, `10-A` -> `11-A`. Names that don't lead with the grade are kept.
pub fn rewrite_class_name(name: &str, from: i64, to: i64) -> String {
    if let (Some(rf), Some(rt)) = (roman(from), roman(to)) {
        if let Some(rest) = strip_grade_prefix(name, rf) {
            return format!("{rt}{rest}");
        }
    }
    if let Some(rest) = strip_grade_prefix(name, &from.to_string()) {
        return format!("{to}{rest}");
    }
    name.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradePlan {
    pub grade: i64,
    pub students: usize,
    pub graduating: bool,
}

pub fn preview(conn: &Connection, final_grade: i64) -> rusqlite::Result<Vec<GradePlan>> {
    let mut stmt = conn.prepare(
        "SELECT grade, COUNT(*) FROM students
         WHERE enrollment = 'active'
         GROUP BY grade ORDER BY grade",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let grade: i64 = r.get(0)?;
            let n: i64 = r.get(1)?;
            Ok(GradePlan {
                grade,
                students: n as usize,
                graduating: grade >= final_grade,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Default)]
pub struct PromotionOutcome {
    pub run_id: String,
    pub academic_year: String,
    pub promoted: usize,
    pub graduated: usize,
    pub by_grade: BTreeMap<i64, usize>,
}

/// Advances every active student one grade in a single transaction; students at
/// `final_grade` graduate instead.
pub fn apply(
    conn: &Connection,
    final_grade: i64,
    academic_year: &str,
) -> anyhow::Result<PromotionOutcome> {
    let tx = conn.unchecked_transaction()?;
    let students: Vec<(i64, i64, String)> = {
        let mut stmt = tx.prepare(
            "SELECT student_id, grade, class_name FROM students WHERE enrollment = 'active'",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let now = chrono::Utc::now().to_rfc3339();
    let mut out = PromotionOutcome {
        run_id: uuid::Uuid::new_v4().to_string(),
        academic_year: academic_year.to_string(),
        ..Default::default()
    };
    for (student_id, grade, class_name) in students {
        *out.by_grade.entry(grade).or_default() += 1;
        if grade >= final_grade {
            tx.execute(
                "UPDATE students SET enrollment = 'graduated', version = version + 1, updated_at = ?
                 WHERE student_id = ?",
                (&now, student_id),
            )?;
            out.graduated += 1;
        } else {
            let next_class = rewrite_class_name(&class_name, grade, grade + 1);
            tx.execute(
                "UPDATE students SET grade = ?, class_name = ?, version = version + 1, updated_at = ?
                 WHERE student_id = ?",
                (grade + 1, &next_class, &now, student_id),
            )?;
            out.promoted += 1;
        }
    }
    tx.execute(
        "INSERT INTO promotion_runs(id, academic_year, promoted, graduated, ran_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &out.run_id,
            academic_year,
            out.promoted as i64,
            out.graduated as i64,
            &now,
        ),
    )?;
    tx.commit()?;

    tracing::info!(
        run_id = %out.run_id,
        promoted = out.promoted,
        graduated = out.graduated,
        "promotion applied"
    );
    Ok(out)
}

pub fn outcome_json(out: &PromotionOutcome) -> serde_json::Value {
    let by_grade: Vec<serde_json::Value> = out
        .by_grade
        .iter()
        .map(|(grade, n)| json!({ "grade": grade, "students": n }))
        .collect();
    json!({
        "runId": out.run_id,
        "academicYear": out.academic_year,
        "promoted": out.promoted,
        "graduated": out.graduated,
        "byGrade": by_grade,
    })
}
