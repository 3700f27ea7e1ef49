//! Read-side views: the daily dashboard summary and the full JSON export.

use crate::codec::{ts, unavailable};
use crate::SqliteStore;
use attendo_core::{StoreError, Timestamp};
use chrono::NaiveDate;
use rusqlite::params;
use serde::Serialize;

/// Dashboard numbers for one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub registered_count: u64,
    /// Distinct people with an appearance starting that day.
    pub today_count: u64,
    /// Mean appearance duration that day, in minutes.
    #[serde(rename = "avg_duration")]
    pub avg_duration_minutes: f64,
    #[serde(rename = "person_stats")]
    pub people: Vec<PersonSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonSummary {
    pub name: String,
    pub appearances: u64,
    /// Minutes, one decimal.
    #[serde(rename = "total_duration")]
    pub total_duration_minutes: f64,
    pub last_seen: Timestamp,
    pub today_count: u64,
}

/// Everything in the database as one JSON document.
#[derive(Debug, Clone, Serialize)]
pub struct ExportDocument {
    pub export_time: Timestamp,
    pub registered_faces: Vec<ExportedFace>,
    pub appearance_records: Vec<ExportedRecord>,
    pub statistics: Vec<ExportedStatistics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedFace {
    pub name: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedRecord {
    pub person_name: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub duration: f64,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedStatistics {
    pub person_name: String,
    pub total_appearances: u64,
    pub total_duration: f64,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
}

fn minutes_1dp(seconds: f64) -> f64 {
    (seconds / 60.0 * 10.0).round() / 10.0
}

impl SqliteStore {
    pub fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary, StoreError> {
        let day_start = date
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .ok_or_else(|| StoreError::Corrupt(format!("invalid date {date}")))?;
        let from = ts(&day_start);
        let to = ts(&(day_start + chrono::Duration::days(1)));

        let (today_count, avg_seconds): (i64, Option<f64>) = self
            .conn
            .query_row(
                "SELECT COUNT(DISTINCT person_name), AVG(duration) FROM appearance_records
                 WHERE start_time >= ?1 AND start_time < ?2",
                params![from, to],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(unavailable)?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT person_name, COUNT(*) FROM appearance_records
                 WHERE start_time >= ?1 AND start_time < ?2
                 GROUP BY person_name",
            )
            .map_err(unavailable)?;
        let per_person_today: std::collections::HashMap<String, i64> = stmt
            .query_map(params![from, to], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(unavailable)?
            .collect::<Result<_, _>>()
            .map_err(unavailable)?;

        let people = self
            .all_statistics()?
            .into_iter()
            .map(|s| PersonSummary {
                today_count: per_person_today.get(&s.label).copied().unwrap_or(0).max(0) as u64,
                appearances: s.total_appearances,
                total_duration_minutes: minutes_1dp(s.total_duration_seconds),
                last_seen: s.last_seen_ever,
                name: s.label,
            })
            .collect();

        Ok(DailySummary {
            date,
            registered_count: self.registered_count()?,
            today_count: today_count.max(0) as u64,
            avg_duration_minutes: minutes_1dp(avg_seconds.unwrap_or(0.0)),
            people,
        })
    }

    pub fn export(&self, export_time: Timestamp) -> Result<ExportDocument, StoreError> {
        use attendo_core::RosterStore;

        let registered_faces = self
            .load_roster()?
            .into_iter()
            .map(|e| ExportedFace { name: e.label, created_at: e.created_at })
            .collect();

        let appearance_records = self
            .appearances(None)?
            .into_iter()
            .map(|r| ExportedRecord {
                person_name: r.label,
                start_time: r.start_time,
                end_time: r.end_time,
                duration: r.duration_seconds,
                confidence: r.confidence,
            })
            .collect();

        let statistics = self
            .all_statistics()?
            .into_iter()
            .map(|s| ExportedStatistics {
                person_name: s.label,
                total_appearances: s.total_appearances,
                total_duration: s.total_duration_seconds,
                first_seen: s.first_seen_ever,
                last_seen: s.last_seen_ever,
            })
            .collect();

        Ok(ExportDocument {
            export_time,
            registered_faces,
            appearance_records,
            statistics,
        })
    }
}
