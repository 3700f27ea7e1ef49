//! Nearest-neighbour matching of a probe vector against the roster.

use crate::extractor::FaceObservation;
use crate::types::{Detection, FeatureVector, Metric, RosterEntry, UNKNOWN_LABEL};

/// Default distance below which a probe is accepted as a roster entry.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Result of matching one probe vector.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Roster label, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// `1 - distance` for a match, `0.0` otherwise.
    pub confidence: f32,
    /// Distance to the closest entry, `None` for an empty roster.
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn unknown(distance: Option<f32>) -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            confidence: 0.0,
            distance,
        }
    }

    pub fn is_match(&self) -> bool {
        self.label != UNKNOWN_LABEL
    }
}

/// Strategy for comparing a probe against the enrolled roster.
pub trait Matcher {
    fn best_match(&self, probe: &FeatureVector, roster: &[RosterEntry]) -> MatchResult;
}

/// Minimum-distance matcher with a strict acceptance threshold.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    pub threshold: f32,
    pub metric: Metric,
}

impl Default for DistanceMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            metric: Metric::Euclidean,
        }
    }
}

impl DistanceMatcher {
    pub fn new(threshold: f32, metric: Metric) -> Self {
        Self { threshold, metric }
    }
}

impl Matcher for DistanceMatcher {
    fn best_match(&self, probe: &FeatureVector, roster: &[RosterEntry]) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in roster.iter().enumerate() {
            let d = probe.distance(&entry.feature_vector, self.metric);
            // Strict `<` keeps the earliest entry on exact ties.
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((i, d));
            }
        }

        match best {
            Some((idx, d)) if d < self.threshold => MatchResult {
                label: roster[idx].label.clone(),
                confidence: (1.0 - d).clamp(0.0, 1.0),
                distance: Some(d),
            },
            Some((_, d)) => MatchResult::unknown(Some(d)),
            None => MatchResult::unknown(None),
        }
    }
}

/// Label every face extracted from one frame.
pub fn label_faces<M: Matcher + ?Sized>(
    matcher: &M,
    faces: Vec<FaceObservation>,
    roster: &[RosterEntry],
) -> Vec<Detection> {
    faces
        .into_iter()
        .map(|face| {
            let result = matcher.best_match(&face.feature_vector, roster);
            Detection {
                bounding_box: face.bounding_box,
                feature_vector: face.feature_vector,
                matched_label: result.label,
                confidence: result.confidence,
            }
        })
        .collect()
}
