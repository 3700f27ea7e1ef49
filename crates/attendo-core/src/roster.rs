//! Copy-on-write cache of enrolled people.
//!
//! Readers take a snapshot and scan it without holding any lock. Writers
//! swap in a complete new snapshot, so a scan never sees an entry half
//! added or half removed.

use crate::types::RosterEntry;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
pub struct Roster {
    entries: RwLock<Arc<[RosterEntry]>>,
}

impl Roster {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self {
            entries: RwLock::new(entries.into()),
        }
    }

    /// Current roster, in store order.
    pub fn snapshot(&self) -> Arc<[RosterEntry]> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Atomically install a freshly loaded roster.
    pub fn replace(&self, entries: Vec<RosterEntry>) {
        let next: Arc<[RosterEntry]> = entries.into();
        let count = next.len();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = next;
        tracing::debug!(count, "roster snapshot replaced");
    }

    pub fn contains(&self, label: &str) -> bool {
        self.snapshot().iter().any(|e| e.label == label)
    }

    pub fn labels(&self) -> Vec<String> {
        self.snapshot().iter().map(|e| e.label.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
