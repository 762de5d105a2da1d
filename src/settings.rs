use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

const SETTINGS_KEY: &str = "settings.school";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchoolSettings {
    pub school_name: String,
    pub academic_year: String,
    pub semester: u8,
    pub first_grade: i64,
    pub final_grade: i64,
    pub conflict_retries: u32,
}

impl Default for SchoolSettings {
    fn default() -> Self {
        Self {
            school_name: String::new(),
            academic_year: "2025/2026".to_string(),
            semester: 1,
            first_grade: 10,
            final_grade: 12,
            conflict_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("semester must be 1 or 2")]
    Semester,
    #[error("firstGrade must not exceed finalGrade")]
    GradeRange,
    #[error("academicYear must look like 2025/2026")]
    AcademicYear,
    #[error("conflictRetries must be between 1 and 10")]
    Retries,
    #[error("invalid settings patch: {0}")]
    Shape(String),
}

impl SchoolSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(1..=2).contains(&self.semester) {
            return Err(SettingsError::Semester);
        }
        if self.first_grade > self.final_grade {
            return Err(SettingsError::GradeRange);
        }
        if !academic_year_ok(&self.academic_year) {
            return Err(SettingsError::AcademicYear);
        }
        if !(1..=10).contains(&self.conflict_retries) {
            return Err(SettingsError::Retries);
        }
        Ok(())
    }

    /// Overlays the keys present in `patch` onto a copy of `self`.
    pub fn merged(&self, patch: &serde_json::Value) -> Result<Self, SettingsError> {
        let Some(patch) = patch.as_object() else {
            return Err(SettingsError::Shape("patch must be an object".to_string()));
        };
        let mut base = serde_json::to_value(self).map_err(|e| SettingsError::Shape(e.to_string()))?;
        if let Some(obj) = base.as_object_mut() {
            for (k, v) in patch {
                if !obj.contains_key(k) {
                    return Err(SettingsError::Shape(format!("unknown key {k}")));
                }
                obj.insert(k.clone(), v.clone());
            }
        }
        let next: SchoolSettings =
            serde_json::from_value(base).map_err(|e| SettingsError::Shape(e.to_string()))?;
        next.validate()?;
        Ok(next)
    }
}

fn academic_year_ok(s: &str) -> bool {
    let Some((a, b)) = s.split_once('/') else {
        return false;
    };
    if a.len() != 4 || b.len() != 4 {
        return false;
    }
    match (a.parse::<i32>(), b.parse::<i32>()) {
        (Ok(a), Ok(b)) => b == a + 1,
        _ => false,
    }
}

pub fn load(conn: &Connection) -> anyhow::Result<SchoolSettings> {
    match db::settings_get_json(conn, SETTINGS_KEY)? {
        Some(v) => Ok(serde_json::from_value(v)?),
        None => Ok(SchoolSettings::default()),
    }
}

pub fn store(conn: &Connection, settings: &SchoolSettings) -> anyhow::Result<()> {
    db::settings_set_json(conn, SETTINGS_KEY, &serde_json::to_value(settings)?)
}
