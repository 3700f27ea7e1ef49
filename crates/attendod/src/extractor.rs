use async_trait::async_trait;
use attendo_core::{ExtractorError, FaceExtractor, FaceObservation, Frame};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct ExtractRequest<'a> {
    /// Bare base64 of the encoded image.
    image: &'a str,
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct ExtractResponse {
    faces: Vec<FaceObservation>,
}

/// Face extraction delegated to a vision sidecar over HTTP.
///
/// The sidecar receives `{"image", "width", "height"}` and answers
/// `{"faces": [{"bbox": {...}, "vector": [...]}]}`.
pub struct RemoteExtractor {
    client: reqwest::Client,
    url: String,
}

impl RemoteExtractor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ExtractorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractorError::Unavailable(e.to_string()))?;
        Ok(Self { client, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FaceExtractor for RemoteExtractor {
    async fn detect_faces(&self, frame: &Frame) -> Result<Vec<FaceObservation>, ExtractorError> {
        let image = frame.to_base64();
        let response = self
            .client
            .post(&self.url)
            .json(&ExtractRequest {
                image: &image,
                width: frame.width,
                height: frame.height,
            })
            .send()
            .await
            .map_err(|e| ExtractorError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractorError::Unavailable(format!("sidecar answered {status}")));
        }

        let body: ExtractResponse = response
            .json()
            .await
            .map_err(|e| ExtractorError::InvalidResponse(e.to_string()))?;

        if let Some(bad) = body.faces.iter().find(|f| f.feature_vector.is_empty()) {
            return Err(ExtractorError::InvalidResponse(format!(
                "face at ({}, {}) has an empty feature vector",
                bad.bounding_box.x, bad.bounding_box.y
            )));
        }

        tracing::debug!(faces = body.faces.len(), "extractor responded");
        Ok(body.faces)
    }
}
