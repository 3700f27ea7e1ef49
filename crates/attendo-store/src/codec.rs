//! Column encodings: feature vectors as little-endian f32 blobs, timestamps
//! as fixed-width RFC 3339 text (so string order is time order).

use attendo_core::{FeatureVector, StoreError, Timestamp};
use chrono::{DateTime, SecondsFormat, Utc};

pub(crate) fn encode_vector(vector: &FeatureVector) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.values.len() * 4);
    for value in &vector.values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub(crate) fn decode_vector(blob: &[u8]) -> Result<FeatureVector, String> {
    if blob.len() % 4 != 0 {
        return Err(format!("blob length {} is not a multiple of 4", blob.len()));
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(FeatureVector::new(values))
}

pub(crate) fn ts(t: &Timestamp) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<Timestamp, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {s:?}: {e}")))
}

pub(crate) fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}
