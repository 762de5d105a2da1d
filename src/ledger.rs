//! Attendance status transitions and the cumulative counters derived from them.
//!
//! Everything here is pure: callers hand in the full prior record and get a new one back.
//! Persistence and concurrency control live in `repo`.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalization denominator for the attendance percentage. Not a real day count; reports
/// downstream assume this exact scale.
pub const TOTAL_DAYS: i64 = 100;

/// Shown in place of a time when the student was not marked present or late.
pub const NOT_RECORDED: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    #[serde(rename = "hadir")]
    Present,
    #[serde(rename = "terlambat")]
    Late,
    #[serde(rename = "tidak-hadir")]
    Absent,
    #[serde(rename = "izin")]
    ExcusedPermission,
    #[serde(rename = "sakit")]
    ExcusedSick,
    #[serde(rename = "belum-diisi")]
    Unset,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 6] = [
        AttendanceStatus::Present,
        AttendanceStatus::Late,
        AttendanceStatus::Absent,
        AttendanceStatus::ExcusedPermission,
        AttendanceStatus::ExcusedSick,
        AttendanceStatus::Unset,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "hadir",
            AttendanceStatus::Late => "terlambat",
            AttendanceStatus::Absent => "tidak-hadir",
            AttendanceStatus::ExcusedPermission => "izin",
            AttendanceStatus::ExcusedSick => "sakit",
            AttendanceStatus::Unset => "belum-diisi",
        }
    }

    fn counter(self) -> Option<Counter> {
        match self {
            AttendanceStatus::Late => Some(Counter::Late),
            AttendanceStatus::Absent => Some(Counter::Absent),
            AttendanceStatus::ExcusedPermission | AttendanceStatus::ExcusedSick => {
                Some(Counter::Permission)
            }
            AttendanceStatus::Present | AttendanceStatus::Unset => None,
        }
    }

    fn records_time(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown attendance status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for AttendanceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttendanceStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("{0} is not a valid target status")]
    InvalidStatus(AttendanceStatus),
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Late,
    Absent,
    Permission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceRecord {
    pub status: AttendanceStatus,
    pub last_marked_time: String,
    pub late_count: u32,
    pub absent_count: u32,
    pub permission_count: u32,
    pub attendance_percentage: u8,
}

impl Default for StudentAttendanceRecord {
    fn default() -> Self {
        Self {
            status: AttendanceStatus::Unset,
            last_marked_time: NOT_RECORDED.to_string(),
            late_count: 0,
            absent_count: 0,
            permission_count: 0,
            attendance_percentage: recompute_percentage(0, 0),
        }
    }
}

impl StudentAttendanceRecord {
    fn counter_mut(&mut self, counter: Counter) -> &mut u32 {
        match counter {
            Counter::Late => &mut self.late_count,
            Counter::Absent => &mut self.absent_count,
            Counter::Permission => &mut self.permission_count,
        }
    }
}

pub fn recompute_percentage(absent_count: u32, permission_count: u32) -> u8 {
    let present_days = TOTAL_DAYS - i64::from(absent_count) - i64::from(permission_count);
    let pct = (present_days as f64 / TOTAL_DAYS as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Moves `record` to `new_status`, undoing the prior status' counter first so that
/// re-applying the same status leaves the tallies where they were.
pub fn apply_status_transition(
    record: &StudentAttendanceRecord,
    new_status: AttendanceStatus,
    clock: NaiveTime,
) -> Result<StudentAttendanceRecord, LedgerError> {
    if new_status == AttendanceStatus::Unset {
        return Err(LedgerError::InvalidStatus(new_status));
    }

    let mut next = record.clone();
    if let Some(c) = record.status.counter() {
        let slot = next.counter_mut(c);
        *slot = slot.saturating_sub(1);
    }
    if let Some(c) = new_status.counter() {
        let slot = next.counter_mut(c);
        *slot = slot.saturating_add(1);
    }

    next.status = new_status;
    next.last_marked_time = if new_status.records_time() {
        clock.format("%H:%M").to_string()
    } else {
        NOT_RECORDED.to_string()
    };
    next.attendance_percentage = recompute_percentage(next.absent_count, next.permission_count);
    Ok(next)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total_students: usize,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub permission: usize,
    pub attendance_rate: f64,
}

/// `total_students` counts every record. Unmarked ones land in no category, so the categories
/// sum to the total only once everyone has been marked.
pub fn compute_system_stats<'a, I>(records: I) -> AttendanceStats
where
    I: IntoIterator<Item = &'a StudentAttendanceRecord>,
{
    let mut stats = AttendanceStats::default();
    for r in records {
        stats.total_students += 1;
        match r.status {
            AttendanceStatus::Present => stats.present += 1,
            AttendanceStatus::Late => stats.late += 1,
            AttendanceStatus::Absent => stats.absent += 1,
            AttendanceStatus::ExcusedPermission | AttendanceStatus::ExcusedSick => {
                stats.permission += 1
            }
            AttendanceStatus::Unset => {}
        }
    }
    if stats.total_students > 0 {
        let ratio = (stats.present + stats.late) as f64 / stats.total_students as f64;
        stats.attendance_rate = (ratio * 1000.0).round() / 10.0;
    }
    stats
}

/// Per-token tally, including records nobody has marked yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    #[serde(rename = "hadir")]
    pub present: usize,
    #[serde(rename = "terlambat")]
    pub late: usize,
    #[serde(rename = "tidak-hadir")]
    pub absent: usize,
    #[serde(rename = "izin")]
    pub excused_permission: usize,
    #[serde(rename = "sakit")]
    pub excused_sick: usize,
    #[serde(rename = "belum-diisi")]
    pub unset: usize,
}

pub fn count_by_status<'a, I>(records: I) -> StatusCounts
where
    I: IntoIterator<Item = &'a StudentAttendanceRecord>,
{
    let mut counts = StatusCounts::default();
    for r in records {
        let slot = match r.status {
            AttendanceStatus::Present => &mut counts.present,
            AttendanceStatus::Late => &mut counts.late,
            AttendanceStatus::Absent => &mut counts.absent,
            AttendanceStatus::ExcusedPermission => &mut counts.excused_permission,
            AttendanceStatus::ExcusedSick => &mut counts.excused_sick,
            AttendanceStatus::Unset => &mut counts.unset,
        };
        *slot += 1;
    }
    counts
}
