//! Classifier abstraction
//!
//! The executor only needs "image bytes in, violations out". Anything that
//! can answer that implements [`Classifier`]; the Vertex AI Gemini client in
//! [`gemini`] is the production implementation.

pub mod gemini;
pub mod mime;

pub use gemini::{GeminiClassifier, GeminiConfig};

use crate::error::{ClassifyError, ClassifyResult};
use crate::model::Violation;
use std::path::Path;

/// Image bytes plus the MIME type sent alongside them
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

impl ImagePayload {
    /// Build a payload, sniffing the MIME type from content first and the
    /// file extension second
    pub fn new(path: &Path, bytes: Vec<u8>) -> Self {
        let mime_type = mime::image_mime_type(&bytes, path);
        Self { bytes, mime_type }
    }

    /// Read an image from disk
    pub async fn read(path: &Path) -> ClassifyResult<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ClassifyError::ReadImage {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(path, bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Something that scores an image against the moderation policy
#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one image. One attempt, no retries.
    async fn classify(&self, image: &ImagePayload) -> ClassifyResult<Vec<Violation>>;
}

/// Parse a model reply into violations
///
/// The canonical reply is a JSON array of `{category, risk_score, reason}`.
/// Models sometimes wrap JSON in a markdown code fence, which is stripped.
pub fn parse_violations(text: &str) -> ClassifyResult<Vec<Violation>> {
    let body = strip_code_fence(text.trim());
    serde_json::from_str(body).map_err(|source| ClassifyError::MalformedResponse { source })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening fence line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
