//! Presence tracking: per-frame sightings in, closed intervals out.
//!
//! Each label is either absent or present. The first sighting opens an
//! interval, every later sighting refreshes `last_seen`, and the interval
//! closes once the label has gone unseen for longer than the timeout. A miss
//! shorter than the timeout is absorbed into the interval, so detector
//! flicker does not split one visit into several records.

use crate::clock::Clock;
use crate::types::{seconds_between, AppearanceRecord, Detection, Timestamp, UNKNOWN_LABEL};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Default grace period before an unseen label is considered gone.
pub const DEFAULT_TRACKING_TIMEOUT: Duration = Duration::from_secs(3);

/// A label seen in the current sample, with the matcher's confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub label: String,
    pub confidence: f32,
}

impl Sighting {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self { label: label.into(), confidence }
    }
}

/// What to do with faces the matcher could not identify.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPolicy {
    /// Unknown faces are reported but never tracked.
    #[default]
    Ignore,
    /// All unknown faces share one pseudo-label, [`UNKNOWN_LABEL`].
    Track,
}

/// Turn a frame's detections into tracker input.
pub fn sightings(detections: &[Detection], policy: UnknownPolicy) -> Vec<Sighting> {
    detections
        .iter()
        .filter(|d| d.is_known() || policy == UnknownPolicy::Track)
        .map(|d| {
            let confidence = if d.is_known() { d.confidence } else { 0.0 };
            Sighting::new(d.matched_label.clone(), confidence)
        })
        .collect()
}

/// An open interval for one label.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceState {
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    samples: u32,
    confidence_sum: f64,
}

impl PresenceState {
    fn open(now: Timestamp, confidence: f32) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            samples: 1,
            confidence_sum: confidence as f64,
        }
    }

    fn refresh(&mut self, now: Timestamp, confidence: f32) {
        // Out-of-order samples never shrink the interval.
        if now > self.last_seen {
            self.last_seen = now;
        }
        self.samples += 1;
        self.confidence_sum += confidence as f64;
    }

    /// Mean matcher confidence over the samples of this interval.
    pub fn mean_confidence(&self) -> f32 {
        if self.samples == 0 {
            return 0.0;
        }
        (self.confidence_sum / self.samples as f64) as f32
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    fn close(self, label: String) -> AppearanceRecord {
        AppearanceRecord {
            duration_seconds: seconds_between(self.first_seen, self.last_seen),
            confidence: self.mean_confidence(),
            start_time: self.first_seen,
            end_time: self.last_seen,
            label,
        }
    }
}

/// Presence state machine for one camera session.
pub struct PresenceTracker {
    timeout: chrono::Duration,
    clock: Arc<dyn Clock>,
    open: BTreeMap<String, PresenceState>,
}

impl PresenceTracker {
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            timeout: chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX),
            clock,
            open: BTreeMap::new(),
        }
    }

    /// Feed one sample taken at `now`.
    ///
    /// Returns the intervals that closed on this sample, ordered by label.
    pub fn observe(&mut self, visible: &[Sighting], now: Timestamp) -> Vec<AppearanceRecord> {
        // One sample per label per frame, at the best confidence seen.
        let mut seen: BTreeMap<&str, f32> = BTreeMap::new();
        for s in visible {
            let c = seen.entry(s.label.as_str()).or_insert(s.confidence);
            if s.confidence > *c {
                *c = s.confidence;
            }
        }

        for (&label, &confidence) in &seen {
            match self.open.get_mut(label) {
                Some(state) => state.refresh(now, confidence),
                None => {
                    tracing::debug!(label, %now, "presence opened");
                    self.open.insert(label.to_string(), PresenceState::open(now, confidence));
                }
            }
        }

        let timeout = self.timeout;
        let expired: Vec<String> = self
            .open
            .iter()
            .filter(|(label, state)| !seen.contains_key(label.as_str()) && now - state.last_seen > timeout)
            .map(|(label, _)| label.clone())
            .collect();

        let mut closed = Vec::with_capacity(expired.len());
        for label in expired {
            if let Some(state) = self.open.remove(&label) {
                let record = state.close(label);
                tracing::debug!(
                    label = %record.label,
                    duration = record.duration_seconds,
                    "presence closed"
                );
                closed.push(record);
            }
        }
        closed
    }

    /// [`observe`](Self::observe) at the injected clock's current time.
    pub fn observe_now(&mut self, visible: &[Sighting]) -> Vec<AppearanceRecord> {
        let now = self.clock.now();
        self.observe(visible, now)
    }

    /// Evaluate timeouts without any new sighting.
    pub fn expire(&mut self, now: Timestamp) -> Vec<AppearanceRecord> {
        self.observe(&[], now)
    }

    /// Close every open interval at its last sighting.
    pub fn flush(&mut self) -> Vec<AppearanceRecord> {
        std::mem::take(&mut self.open)
            .into_iter()
            .map(|(label, state)| state.close(label))
            .collect()
    }

    /// Drop the open interval of `label` without emitting a record.
    pub fn forget(&mut self, label: &str) -> bool {
        self.open.remove(label).is_some()
    }

    pub fn state(&self, label: &str) -> Option<&PresenceState> {
        self.open.get(label)
    }

    /// Labels currently considered present, in label order.
    pub fn present(&self) -> Vec<String> {
        self.open.keys().cloned().collect()
    }

    pub fn is_tracking(&self, label: &str) -> bool {
        self.open.contains_key(label)
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }
}

impl std::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("timeout", &self.timeout)
            .field("open", &self.open)
            .finish()
    }
}

/// Whether `label` is the pseudo-label used for unidentified faces.
pub fn is_unknown(label: &str) -> bool {
    label == UNKNOWN_LABEL
}
