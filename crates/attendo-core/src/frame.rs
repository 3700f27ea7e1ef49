//! Submitted image payloads: data-URL/base64 decoding and validation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::ImageFormat;

/// A submitted camera frame, validated but still in its encoded form.
#[derive(Clone)]
pub struct Frame {
    /// Encoded image bytes (JPEG, PNG, ...).
    pub data: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("bytes", &self.data.len())
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Frame {
    /// Validate raw encoded bytes as an image.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, FrameError> {
        if data.is_empty() {
            return Err(FrameError::Empty);
        }
        let format = image::guess_format(&data).map_err(|e| FrameError::Decode(e.to_string()))?;
        let decoded = image::load_from_memory_with_format(&data, format)
            .map_err(|e| FrameError::Decode(e.to_string()))?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(FrameError::Empty);
        }
        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            format,
            data,
        })
    }

    /// File extension matching the encoded format.
    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("img")
    }

    /// Bare base64 of the encoded bytes.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

/// Decode a browser `data:image/...;base64,` URL, or bare base64.
pub fn decode_image_payload(payload: &str) -> Result<Frame, FrameError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(FrameError::Empty);
    }

    let encoded = match payload.strip_prefix("data:") {
        Some(rest) => {
            let (header, body) = rest.split_once(',').ok_or(FrameError::MalformedDataUrl)?;
            if !header.ends_with(";base64") {
                return Err(FrameError::MalformedDataUrl);
            }
            body
        }
        None => payload,
    };

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| FrameError::Base64(e.to_string()))?;
    Frame::from_bytes(bytes)
}

/// Encode bytes as a data URL for returning stored photos to a browser.
pub fn to_data_url(data: &[u8]) -> String {
    let mime = image::guess_format(data)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");
    format!("data:{mime};base64,{}", STANDARD.encode(data))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty image payload")]
    Empty,
    #[error("malformed data URL: expected data:<mime>;base64,<payload>")]
    MalformedDataUrl,
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("image could not be decoded: {0}")]
    Decode(String),
}
