//! Persistence boundary: what the core needs from a roster store and an
//! event store.

use crate::stats;
use crate::types::{AppearanceRecord, PersonStatistics, RosterEntry};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("label already enrolled: {0}")]
    DuplicateLabel(String),
    #[error("label not enrolled: {0}")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Failures worth retrying later, as opposed to rejected requests.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Durable registry of enrolled people.
pub trait RosterStore {
    /// Every entry, in a stable order (enrollment order).
    fn load_roster(&self) -> Result<Vec<RosterEntry>, StoreError>;

    /// Fails with [`StoreError::DuplicateLabel`] if the label exists.
    fn insert_entry(&mut self, entry: &RosterEntry) -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] if the label is not enrolled.
    fn delete_entry(&mut self, label: &str) -> Result<RosterEntry, StoreError>;
}

/// Durable log of closed intervals and their aggregates.
pub trait EventStore {
    fn append_appearance(&mut self, record: &AppearanceRecord) -> Result<(), StoreError>;

    fn upsert_statistics(&mut self, stats: &PersonStatistics) -> Result<(), StoreError>;

    fn statistics_for(&self, label: &str) -> Result<Option<PersonStatistics>, StoreError>;

    /// Append `record` and fold it into its label's statistics.
    ///
    /// Implementations backed by a transactional store should override this
    /// so both writes land or neither does.
    fn record_appearance(&mut self, record: &AppearanceRecord) -> Result<PersonStatistics, StoreError> {
        let next = stats::apply(self.statistics_for(&record.label)?, record);
        self.append_appearance(record)?;
        self.upsert_statistics(&next)?;
        Ok(next)
    }
}
