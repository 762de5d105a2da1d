//! Student rows and their attendance ledger, read and written against the workspace db.

use crate::ledger::{recompute_percentage, AttendanceStatus, StudentAttendanceRecord};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("student not found")]
    NotFound,
    #[error("student record was modified concurrently")]
    Conflict,
    #[error("stored status is not recognised: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredStudent {
    pub student_id: i64,
    pub nis: String,
    pub name: String,
    pub gender: Option<String>,
    pub class_name: String,
    pub grade: i64,
    pub enrollment: String,
    #[serde(flatten)]
    pub attendance: StudentAttendanceRecord,
    #[serde(skip)]
    pub version: i64,
}

pub const STUDENT_COLUMNS: &str = "student_id, nis, name, gender, class_name, grade, enrollment,
     status, last_marked_time, late_count, absent_count, permission_count, version";

pub fn student_from_row(r: &Row<'_>) -> rusqlite::Result<StoredStudent> {
    let status_raw: String = r.get(7)?;
    let status = status_raw.parse::<AttendanceStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let late_count: u32 = r.get(9)?;
    let absent_count: u32 = r.get(10)?;
    let permission_count: u32 = r.get(11)?;
    Ok(StoredStudent {
        student_id: r.get(0)?,
        nis: r.get(1)?,
        name: r.get(2)?,
        gender: r.get(3)?,
        class_name: r.get(4)?,
        grade: r.get(5)?,
        enrollment: r.get(6)?,
        attendance: StudentAttendanceRecord {
            status,
            last_marked_time: r.get(8)?,
            late_count,
            absent_count,
            permission_count,
            // Always derived; the stored column is only for external readers.
            attendance_percentage: recompute_percentage(absent_count, permission_count),
        },
        version: r.get(12)?,
    })
}

fn map_row_err(e: rusqlite::Error) -> RepoError {
    match e {
        rusqlite::Error::FromSqlConversionFailure(7, _, inner) => {
            RepoError::Corrupt(inner.to_string())
        }
        other => RepoError::Db(other),
    }
}

pub fn find_by_student_id(conn: &Connection, student_id: i64) -> Result<StoredStudent, RepoError> {
    conn.query_row(
        &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE student_id = ?"),
        [student_id],
        student_from_row,
    )
    .optional()
    .map_err(map_row_err)?
    .ok_or(RepoError::NotFound)
}

/// Conditional write keyed on the version that was read. A concurrent writer that got there
/// first bumps the version and this update matches no row.
pub fn save_attendance(
    conn: &Connection,
    prior: &StoredStudent,
    record: &StudentAttendanceRecord,
) -> Result<(), RepoError> {
    let changed = conn.execute(
        "UPDATE students SET
           status = ?, last_marked_time = ?, late_count = ?, absent_count = ?,
           permission_count = ?, attendance_percentage = ?, version = version + 1,
           updated_at = ?
         WHERE student_id = ? AND version = ?",
        rusqlite::params![
            record.status.as_str(),
            record.last_marked_time,
            record.late_count,
            record.absent_count,
            record.permission_count,
            record.attendance_percentage,
            chrono::Utc::now().to_rfc3339(),
            prior.student_id,
            prior.version,
        ],
    )?;
    if changed == 1 {
        return Ok(());
    }
    let exists = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_id = ?",
            [prior.student_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if exists {
        Err(RepoError::Conflict)
    } else {
        Err(RepoError::NotFound)
    }
}

pub fn list_active(
    conn: &Connection,
    class_name: Option<&str>,
) -> Result<Vec<StoredStudent>, RepoError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students
         WHERE enrollment = 'active' AND (?1 IS NULL OR class_name = ?1)
         ORDER BY class_name, name, student_id"
    ))?;
    let rows = stmt
        .query_map([class_name], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(map_row_err)?;
    Ok(rows)
}

pub fn list_active_records(
    conn: &Connection,
    class_name: Option<&str>,
) -> Result<Vec<StudentAttendanceRecord>, RepoError> {
    Ok(list_active(conn, class_name)?
        .into_iter()
        .map(|s| s.attendance)
        .collect())
}

/// Clears today's status for every active student. Tallies are lifetime and stay.
pub fn reset_day(conn: &Connection, class_name: Option<&str>) -> Result<usize, RepoError> {
    let changed = conn.execute(
        "UPDATE students SET status = 'belum-diisi', last_marked_time = '-',
           version = version + 1, updated_at = ?1
         WHERE enrollment = 'active' AND (?2 IS NULL OR class_name = ?2)",
        rusqlite::params![chrono::Utc::now().to_rfc3339(), class_name],
    )?;
    Ok(changed)
}
