//! Closed intervals waiting to be persisted.
//!
//! A record leaves the outbox once the event store has accepted it, or has
//! rejected it with a permanent error. When the store is unavailable, the
//! failing record and everything queued behind it stay put, in order, for
//! the next flush.

use crate::store::{EventStore, StoreError};
use crate::types::{AppearanceRecord, PersonStatistics};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct Outbox {
    pending: VecDeque<AppearanceRecord>,
}

/// What one flush achieved.
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Statistics after each persisted record, in persistence order.
    pub applied: Vec<PersonStatistics>,
    /// Records still queued after the flush.
    pub pending: usize,
    /// Records dropped because the store refused them permanently.
    pub rejected: Vec<AppearanceRecord>,
    /// The last error met, transient or not.
    pub error: Option<StoreError>,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.pending == 0
    }
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, records: impl IntoIterator<Item = AppearanceRecord>) {
        self.pending.extend(records);
    }

    /// Persist queued records in order.
    ///
    /// Stops at the first transient failure. A record the store rejects
    /// permanently is dropped so it cannot block the queue.
    pub fn flush<S: EventStore + ?Sized>(&mut self, store: &mut S) -> FlushReport {
        let mut report = FlushReport::default();

        while let Some(record) = self.pending.front() {
            match store.record_appearance(record) {
                Ok(stats) => {
                    tracing::info!(
                        label = %record.label,
                        duration = record.duration_seconds,
                        total_appearances = stats.total_appearances,
                        "appearance recorded"
                    );
                    report.applied.push(stats);
                    self.pending.pop_front();
                }
                Err(e) if !e.is_transient() => {
                    tracing::error!(
                        label = %record.label,
                        error = %e,
                        "appearance rejected by the store; dropping it"
                    );
                    if let Some(record) = self.pending.pop_front() {
                        report.rejected.push(record);
                    }
                    report.error = Some(e);
                }
                Err(e) => {
                    tracing::warn!(
                        label = %record.label,
                        error = %e,
                        queued = self.pending.len(),
                        "appearance not persisted; keeping it queued"
                    );
                    report.error = Some(e);
                    break;
                }
            }
        }

        report.pending = self.pending.len();
        report
    }

    /// Drop queued records for a label that no longer exists.
    pub fn discard_label(&mut self, label: &str) -> usize {
        let before = self.pending.len();
        self.pending.retain(|r| r.label != label);
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
