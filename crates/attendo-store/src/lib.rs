//! attendo-store: SQLite persistence for the roster and the attendance log.
//!
//! One database file holds three tables: enrolled faces, the append-only
//! appearance log, and per-person statistics derived from that log.

mod codec;
mod report;

pub use report::{DailySummary, ExportDocument, ExportedFace, ExportedRecord, ExportedStatistics, PersonSummary};

use attendo_core::stats::{self, StatisticsBook};
use attendo_core::{AppearanceRecord, EventStore, PersonStatistics, RosterEntry, RosterStore, StoreError};
use codec::{decode_vector, encode_vector, parse_ts, ts, unavailable};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use thiserror::Error;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS registered_faces (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    encoding    BLOB NOT NULL,
    photo_path  TEXT,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS appearance_records (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    person_name TEXT NOT NULL,
    start_time  TEXT NOT NULL,
    end_time    TEXT NOT NULL,
    duration    REAL NOT NULL,
    confidence  REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_appearance_person ON appearance_records(person_name);
CREATE INDEX IF NOT EXISTS idx_appearance_start ON appearance_records(start_time);
CREATE TABLE IF NOT EXISTS person_statistics (
    person_name       TEXT PRIMARY KEY,
    total_appearances INTEGER NOT NULL,
    total_duration    REAL NOT NULL,
    first_seen        TEXT NOT NULL,
    last_seen         TEXT NOT NULL
);
";

/// Errors opening or migrating the database.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    CreateDir(std::io::Error),
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "journal mode set");
        let store = Self::with_connection(conn)?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    pub fn registered_count(&self) -> Result<u64, StoreError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM registered_faces", [], |row| row.get::<_, i64>(0))
            .map(|n| n.max(0) as u64)
            .map_err(unavailable)
    }

    /// Appearance records, newest first, optionally for one label.
    pub fn appearances(&self, label: Option<&str>) -> Result<Vec<AppearanceRecord>, StoreError> {
        let sql = "SELECT person_name, start_time, end_time, duration, confidence
                   FROM appearance_records
                   WHERE ?1 IS NULL OR person_name = ?1
                   ORDER BY start_time DESC, id DESC";
        query_records(&self.conn, sql, label)
    }

    /// Every appearance record in the order it was appended.
    pub fn appearance_log(&self, label: Option<&str>) -> Result<Vec<AppearanceRecord>, StoreError> {
        let sql = "SELECT person_name, start_time, end_time, duration, confidence
                   FROM appearance_records
                   WHERE ?1 IS NULL OR person_name = ?1
                   ORDER BY id";
        query_records(&self.conn, sql, label)
    }

    /// Statistics for everyone, most recently seen first.
    pub fn all_statistics(&self) -> Result<Vec<PersonStatistics>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT person_name, total_appearances, total_duration, first_seen, last_seen
                 FROM person_statistics ORDER BY last_seen DESC, person_name",
            )
            .map_err(unavailable)?;
        let rows = stmt
            .query_map([], stats_row)
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;
        rows.into_iter().map(stats_from_row).collect()
    }

    /// Recompute every label's statistics by replaying the appearance log.
    ///
    /// Returns the number of labels with statistics afterwards.
    pub fn rebuild_statistics(&mut self) -> Result<usize, StoreError> {
        let log = self.appearance_log(None)?;
        let book = StatisticsBook::from_records(&log);
        let count = book.len();

        let tx = self.conn.transaction().map_err(unavailable)?;
        tx.execute("DELETE FROM person_statistics", []).map_err(unavailable)?;
        for stats in book.into_sorted() {
            upsert_statistics_tx(&tx, &stats)?;
        }
        tx.commit().map_err(unavailable)?;

        tracing::info!(records = log.len(), labels = count, "statistics rebuilt from appearance log");
        Ok(count)
    }
}

impl RosterStore for SqliteStore {
    fn load_roster(&self) -> Result<Vec<RosterEntry>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, encoding, photo_path, created_at FROM registered_faces ORDER BY id")
            .map_err(unavailable)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;

        rows.into_iter()
            .map(|(label, blob, photo_ref, created_at)| {
                Ok(RosterEntry {
                    feature_vector: decode_vector(&blob)
                        .map_err(|e| StoreError::Corrupt(format!("vector for {label}: {e}")))?,
                    created_at: parse_ts(&created_at)?,
                    photo_ref,
                    label,
                })
            })
            .collect()
    }

    fn insert_entry(&mut self, entry: &RosterEntry) -> Result<(), StoreError> {
        let result = self.conn.execute(
            "INSERT INTO registered_faces (name, encoding, photo_path, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.label,
                encode_vector(&entry.feature_vector),
                entry.photo_ref,
                ts(&entry.created_at)
            ],
        );
        match result {
            Ok(_) => {
                tracing::info!(label = %entry.label, dim = entry.feature_vector.len(), "roster entry stored");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateLabel(entry.label.clone()))
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    /// Removes the person's appearance records and statistics as well.
    fn delete_entry(&mut self, label: &str) -> Result<RosterEntry, StoreError> {
        let entry = self
            .load_roster()?
            .into_iter()
            .find(|e| e.label == label)
            .ok_or_else(|| StoreError::NotFound(label.to_string()))?;

        let tx = self.conn.transaction().map_err(unavailable)?;
        tx.execute("DELETE FROM registered_faces WHERE name = ?1", [label])
            .map_err(unavailable)?;
        let records = tx
            .execute("DELETE FROM appearance_records WHERE person_name = ?1", [label])
            .map_err(unavailable)?;
        tx.execute("DELETE FROM person_statistics WHERE person_name = ?1", [label])
            .map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;

        tracing::info!(label, records, "roster entry deleted");
        Ok(entry)
    }
}

impl EventStore for SqliteStore {
    fn append_appearance(&mut self, record: &AppearanceRecord) -> Result<(), StoreError> {
        let tx = self.conn.transaction().map_err(unavailable)?;
        append_appearance_tx(&tx, record)?;
        tx.commit().map_err(unavailable)
    }

    fn upsert_statistics(&mut self, stats: &PersonStatistics) -> Result<(), StoreError> {
        let tx = self.conn.transaction().map_err(unavailable)?;
        upsert_statistics_tx(&tx, stats)?;
        tx.commit().map_err(unavailable)
    }

    fn statistics_for(&self, label: &str) -> Result<Option<PersonStatistics>, StoreError> {
        statistics_for_conn(&self.conn, label)
    }

    /// Log append and statistics fold in one transaction.
    fn record_appearance(&mut self, record: &AppearanceRecord) -> Result<PersonStatistics, StoreError> {
        let tx = self.conn.transaction().map_err(unavailable)?;
        let next = stats::apply(statistics_for_conn(&tx, &record.label)?, record);
        append_appearance_tx(&tx, record)?;
        upsert_statistics_tx(&tx, &next)?;
        tx.commit().map_err(unavailable)?;
        Ok(next)
    }
}

type StatsRow = (String, i64, f64, String, String);

fn stats_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StatsRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn stats_from_row((label, total, duration, first, last): StatsRow) -> Result<PersonStatistics, StoreError> {
    Ok(PersonStatistics {
        label,
        total_appearances: total.max(0) as u64,
        total_duration_seconds: duration,
        first_seen_ever: parse_ts(&first)?,
        last_seen_ever: parse_ts(&last)?,
    })
}

fn statistics_for_conn(conn: &Connection, label: &str) -> Result<Option<PersonStatistics>, StoreError> {
    let row = conn
        .query_row(
            "SELECT person_name, total_appearances, total_duration, first_seen, last_seen
             FROM person_statistics WHERE person_name = ?1",
            [label],
            stats_row,
        )
        .optional()
        .map_err(unavailable)?;
    row.map(stats_from_row).transpose()
}

fn append_appearance_tx(tx: &Transaction<'_>, record: &AppearanceRecord) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO appearance_records (person_name, start_time, end_time, duration, confidence)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.label,
            ts(&record.start_time),
            ts(&record.end_time),
            record.duration_seconds,
            record.confidence as f64
        ],
    )
    .map_err(unavailable)?;
    Ok(())
}

fn upsert_statistics_tx(tx: &Transaction<'_>, stats: &PersonStatistics) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO person_statistics (person_name, total_appearances, total_duration, first_seen, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(person_name) DO UPDATE SET
             total_appearances = excluded.total_appearances,
             total_duration = excluded.total_duration,
             first_seen = excluded.first_seen,
             last_seen = excluded.last_seen",
        params![
            stats.label,
            stats.total_appearances as i64,
            stats.total_duration_seconds,
            ts(&stats.first_seen_ever),
            ts(&stats.last_seen_ever)
        ],
    )
    .map_err(unavailable)?;
    Ok(())
}

fn query_records(conn: &Connection, sql: &str, label: Option<&str>) -> Result<Vec<AppearanceRecord>, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(unavailable)?;
    let rows = stmt
        .query_map([label], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })
        .map_err(unavailable)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(unavailable)?;

    rows.into_iter()
        .map(|(label, start, end, duration, confidence)| {
            Ok(AppearanceRecord {
                label,
                start_time: parse_ts(&start)?,
                end_time: parse_ts(&end)?,
                duration_seconds: duration,
                confidence: confidence as f32,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendo_core::{FeatureVector, Timestamp};

    fn at(secs: i64) -> Timestamp {
        Timestamp::default() + chrono::Duration::seconds(secs)
    }

    fn entry(label: &str, values: &[f32]) -> RosterEntry {
        RosterEntry {
            label: label.into(),
            feature_vector: FeatureVector::new(values.to_vec()),
            photo_ref: Some(format!("photos/{label}.png")),
            created_at: at(1),
        }
    }

    fn record(label: &str, start: i64, end: i64) -> AppearanceRecord {
        AppearanceRecord {
            label: label.into(),
            start_time: at(start),
            end_time: at(end),
            duration_seconds: (end - start) as f64,
            confidence: 0.75,
        }
    }

    #[test]
    fn test_roster_round_trip_keeps_order() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.insert_entry(&entry("zed", &[0.5, -1.25])).unwrap();
        store.insert_entry(&entry("amy", &[1.0, 2.0])).unwrap();

        let roster = store.load_roster().unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0], entry("zed", &[0.5, -1.25]));
        assert_eq!(roster[1].label, "amy");
        assert_eq!(store.registered_count().unwrap(), 2);
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.insert_entry(&entry("alice", &[1.0])).unwrap();
        let err = store.insert_entry(&entry("alice", &[2.0])).unwrap_err();
        assert_eq!(err, StoreError::DuplicateLabel("alice".into()));
        assert_eq!(store.load_roster().unwrap()[0].feature_vector.values, vec![1.0]);
    }

    #[test]
    fn test_delete_missing_label() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.delete_entry("ghost").unwrap_err(), StoreError::NotFound("ghost".into()));
    }

    #[test]
    fn test_delete_cascades_to_history() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.insert_entry(&entry("alice", &[1.0])).unwrap();
        store.insert_entry(&entry("bob", &[2.0])).unwrap();
        store.record_appearance(&record("alice", 0, 5)).unwrap();
        store.record_appearance(&record("bob", 0, 3)).unwrap();

        let removed = store.delete_entry("alice").unwrap();
        assert_eq!(removed.photo_ref.as_deref(), Some("photos/alice.png"));
        assert!(store.appearances(Some("alice")).unwrap().is_empty());
        assert!(store.statistics_for("alice").unwrap().is_none());
        assert_eq!(store.appearances(None).unwrap().len(), 1);
        assert!(store.statistics_for("bob").unwrap().is_some());
    }

    #[test]
    fn test_record_appearance_folds_statistics() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let first = store.record_appearance(&record("alice", 0, 2)).unwrap();
        assert_eq!(first.total_appearances, 1);
        let second = store.record_appearance(&record("alice", 10, 15)).unwrap();
        assert_eq!(second.total_appearances, 2);
        assert_eq!(second.total_duration_seconds, 7.0);
        assert_eq!(second.first_seen_ever, at(0));
        assert_eq!(second.last_seen_ever, at(15));

        assert_eq!(store.statistics_for("alice").unwrap(), Some(second));
        let log = store.appearances(Some("alice")).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].start_time, at(10));
        assert_eq!(log[0].confidence, 0.75);
    }

    #[test]
    fn test_rebuild_matches_incremental() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        for r in [record("alice", 0, 2), record("bob", 1, 4), record("alice", 10, 11)] {
            store.record_appearance(&r).unwrap();
        }
        let before = store.all_statistics().unwrap();

        // Corrupt one aggregate, then repair from the log.
        store
            .upsert_statistics(&PersonStatistics { total_appearances: 99, ..before[0].clone() })
            .unwrap();
        assert_eq!(store.rebuild_statistics().unwrap(), 2);
        assert_eq!(store.all_statistics().unwrap(), before);
    }

    #[test]
    fn test_all_statistics_most_recent_first() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.record_appearance(&record("alice", 0, 2)).unwrap();
        store.record_appearance(&record("bob", 5, 9)).unwrap();
        let all = store.all_statistics().unwrap();
        assert_eq!(all[0].label, "bob");
        assert_eq!(all[1].label, "alice");
    }

    #[test]
    fn test_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("attendance.db");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.insert_entry(&entry("alice", &[0.25])).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load_roster().unwrap()[0].label, "alice");
    }
}
