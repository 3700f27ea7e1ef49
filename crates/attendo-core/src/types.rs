use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Instant on the UTC timeline. All tracker and store timestamps use this.
pub type Timestamp = DateTime<Utc>;

/// Label reported for faces that match no roster entry.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Pixel-space bounding box of a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// How two feature vectors are compared. Lower distance = more similar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// L2 distance; the scale the 0.6 default threshold was chosen for.
    #[default]
    Euclidean,
    /// `1 - cosine similarity`, in [0, 2].
    Cosine,
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

/// Identity signature of a face as produced by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Distance under `metric`. Vectors of different length never match,
    /// so they are infinitely far apart.
    pub fn distance(&self, other: &FeatureVector, metric: Metric) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        match metric {
            Metric::Euclidean => self.euclidean_distance(other),
            Metric::Cosine => 1.0 - self.similarity(other),
        }
    }

    /// Cosine similarity in [-1, 1]. Zero vectors are dissimilar to everything.
    pub fn similarity(&self, other: &FeatureVector) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    pub fn euclidean_distance(&self, other: &FeatureVector) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub label: String,
    pub feature_vector: FeatureVector,
    /// Where the enrollment photo was written, if anywhere.
    pub photo_ref: Option<String>,
    pub created_at: Timestamp,
}

/// One face in one sampled frame, after matching.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    #[serde(rename = "bbox")]
    pub bounding_box: BoundingBox,
    #[serde(skip)]
    pub feature_vector: FeatureVector,
    /// Roster label, or [`UNKNOWN_LABEL`].
    #[serde(rename = "name")]
    pub matched_label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn is_known(&self) -> bool {
        self.matched_label != UNKNOWN_LABEL
    }
}

/// A closed presence interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppearanceRecord {
    pub label: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub duration_seconds: f64,
    pub confidence: f32,
}

/// Running totals for one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonStatistics {
    pub label: String,
    pub total_appearances: u64,
    pub total_duration_seconds: f64,
    pub first_seen_ever: Timestamp,
    pub last_seen_ever: Timestamp,
}

/// Seconds between two instants, never negative.
pub fn seconds_between(start: Timestamp, end: Timestamp) -> f64 {
    let millis = (end - start).num_milliseconds();
    (millis.max(0) as f64) / 1000.0
}
