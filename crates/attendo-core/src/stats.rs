//! Folding closed appearances into per-person totals.
//!
//! Applying a record is a fold step, not an idempotent upsert: the same
//! record applied twice is counted twice. Callers deliver each closed
//! interval at most once.

use crate::types::{AppearanceRecord, PersonStatistics};
use std::collections::HashMap;

/// Fold `record` into the current totals for its label.
pub fn apply(current: Option<PersonStatistics>, record: &AppearanceRecord) -> PersonStatistics {
    match current {
        None => PersonStatistics {
            label: record.label.clone(),
            total_appearances: 1,
            total_duration_seconds: record.duration_seconds.max(0.0),
            first_seen_ever: record.start_time,
            last_seen_ever: record.end_time,
        },
        Some(mut stats) => {
            stats.total_appearances += 1;
            stats.total_duration_seconds += record.duration_seconds.max(0.0);
            stats.last_seen_ever = record.end_time;
            stats
        }
    }
}

/// In-memory statistics keyed by label.
#[derive(Debug, Default, Clone)]
pub struct StatisticsBook {
    by_label: HashMap<String, PersonStatistics>,
}

impl StatisticsBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay an appearance log in order.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a AppearanceRecord>) -> Self {
        let mut book = Self::new();
        for record in records {
            book.apply(record);
        }
        book
    }

    pub fn apply(&mut self, record: &AppearanceRecord) -> PersonStatistics {
        let current = self.by_label.remove(&record.label);
        let next = apply(current, record);
        self.by_label.insert(next.label.clone(), next.clone());
        next
    }

    pub fn get(&self, label: &str) -> Option<&PersonStatistics> {
        self.by_label.get(label)
    }

    /// All entries, most recently seen first.
    pub fn into_sorted(self) -> Vec<PersonStatistics> {
        let mut all: Vec<_> = self.by_label.into_values().collect();
        all.sort_by(|a, b| b.last_seen_ever.cmp(&a.last_seen_ever).then_with(|| a.label.cmp(&b.label)));
        all
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }
}
