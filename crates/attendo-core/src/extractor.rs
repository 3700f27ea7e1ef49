//! Boundary to the external vision component.
//!
//! Face geometry and feature extraction are not implemented here. An
//! extractor takes a frame and returns every face it found, or nothing;
//! partial results are never returned.

use crate::frame::Frame;
use crate::types::{BoundingBox, FeatureVector};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One face located by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    #[serde(rename = "bbox")]
    pub bounding_box: BoundingBox,
    #[serde(rename = "vector")]
    pub feature_vector: FeatureVector,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("extractor unavailable: {0}")]
    Unavailable(String),
    #[error("extractor returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait FaceExtractor: Send + Sync {
    /// Locate faces in `frame` and compute one feature vector per face.
    async fn detect_faces(&self, frame: &Frame) -> Result<Vec<FaceObservation>, ExtractorError>;
}

/// Extractor that replays a fixed answer for every frame.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct FixedExtractor {
    faces: std::sync::Mutex<Vec<FaceObservation>>,
}

#[cfg(any(test, feature = "test-util"))]
impl FixedExtractor {
    pub fn new(faces: Vec<FaceObservation>) -> Self {
        Self { faces: std::sync::Mutex::new(faces) }
    }

    /// Replace the faces returned from now on.
    pub fn set_faces(&self, faces: Vec<FaceObservation>) {
        let mut guard = self.faces.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = faces;
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl FaceExtractor for FixedExtractor {
    async fn detect_faces(&self, _frame: &Frame) -> Result<Vec<FaceObservation>, ExtractorError> {
        let guard = self.faces.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(guard.clone())
    }
}
