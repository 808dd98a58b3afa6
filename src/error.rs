//! Error types for image-moderator
//!
//! This module defines the error hierarchy for each layer of a batch run:
//! - Discovery errors (the image root cannot be read)
//! - Classification errors (per-image, never fatal to the batch)
//! - Result sink errors
//! - Configuration and worker errors
//!
//! Only discovery and sink-open failures abort a run. Everything that happens
//! to a single image is folded into an [`ItemOutcome`] instead.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the image-moderator application
#[derive(Error, Debug)]
pub enum ModeratorError {
    /// Image discovery failed before any work was dispatched
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Result sink errors
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Errors raised while enumerating images
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The root directory could not be opened or listed
    #[error("Cannot read image directory '{path}': {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The root exists but is not a directory
    #[error("'{path}' is not a directory")]
    NotADirectory { path: PathBuf },
}

/// Per-image classification failures
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// Reading the image file failed
    #[error("Failed to read image '{path}': {source}")]
    ReadImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transport-level failure talking to the model endpoint
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("Model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The reply carried no usable text
    #[error("Model returned no content{}", finish_suffix(.reason))]
    EmptyResponse { reason: Option<String> },

    /// The reply text did not match the violation schema
    #[error("Malformed model response: {source}")]
    MalformedResponse {
        #[source]
        source: serde_json::Error,
    },

    /// The call exceeded its deadline
    #[error("Classification timed out after {0:?}")]
    Timeout(Duration),

    /// Classifier could not be built
    #[error("Invalid classifier setup: {0}")]
    Setup(String),
}

fn finish_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(" (finish reason: {r})"),
        None => String::new(),
    }
}

impl ClassifyError {
    /// Whether a later attempt might succeed. Used for log context only;
    /// a failed image is never retried within a run.
    pub fn is_transient(&self) -> bool {
        match self {
            ClassifyError::Http(e) => e.is_timeout() || e.is_connect(),
            ClassifyError::Status { status, .. } => *status == 429 || *status >= 500,
            ClassifyError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Result sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// The output file could not be opened for appending
    #[error("Failed to open output '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A burst could not be written completely
    #[error("Failed to write records for '{image}': {source}")]
    Write {
        image: String,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid concurrency limit
    #[error("Invalid concurrency {count}: must be between 1 and {max}")]
    InvalidConcurrency { count: usize, max: usize },

    /// Temperature outside the accepted range
    #[error("Invalid temperature {value}: must be between 0.0 and 2.0")]
    InvalidTemperature { value: f32 },

    /// Progress interval must be at least one second
    #[error("Invalid progress interval {secs}s: must be at least 1")]
    InvalidProgressInterval { secs: u64 },

    /// Image directory missing or not a directory
    #[error("Invalid image directory '{path}': {reason}")]
    InvalidImageDir { path: PathBuf, reason: String },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },

    /// The environment file exists but could not be loaded
    #[error("Cannot load environment file '{path}': {reason}")]
    InvalidEnvFile { path: PathBuf, reason: String },

    /// A required setting was empty
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// Worker and dispatch errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The admission semaphore was closed while items were pending
    #[error("Dispatch semaphore closed unexpectedly")]
    SemaphoreClosed,

    /// A worker task panicked
    #[error("Worker panicked: {0}")]
    Panicked(String),

    /// A blocking sink write task could not be joined
    #[error("Sink writer task failed: {0}")]
    WriterJoin(String),
}

/// Result type alias for ModeratorError
pub type Result<T> = std::result::Result<T, ModeratorError>;

/// Result type alias for ClassifyError
pub type ClassifyResult<T> = std::result::Result<T, ClassifyError>;

/// Result type alias for SinkError
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Why a single image failed
#[derive(Error, Debug)]
pub enum ItemError {
    /// The classifier call failed
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    /// Records could not be persisted
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The worker itself broke
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Terminal outcome of one image
#[derive(Debug)]
pub enum ItemOutcome {
    /// Classified and persisted
    Succeeded { path: PathBuf, records: usize },

    /// Failed at some stage; counted as an error
    Failed { path: PathBuf, error: ItemError },
}

impl ItemOutcome {
    /// Returns true if this outcome represents success
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded { .. })
    }

    /// Returns the path associated with this outcome
    pub fn path(&self) -> &std::path::Path {
        match self {
            ItemOutcome::Succeeded { path, .. } => path,
            ItemOutcome::Failed { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error_transient() {
        let throttled = ClassifyError::Status {
            status: 429,
            body: "quota".into(),
        };
        assert!(throttled.is_transient());

        let bad_request = ClassifyError::Status {
            status: 400,
            body: "bad".into(),
        };
        assert!(!bad_request.is_transient());

        assert!(ClassifyError::Timeout(Duration::from_secs(5)).is_transient());
    }

    #[test]
    fn test_error_conversion() {
        let err = DiscoveryError::NotADirectory {
            path: PathBuf::from("/tmp/file.jpg"),
        };
        let top: ModeratorError = err.into();
        assert!(matches!(top, ModeratorError::Discovery(_)));
    }

    #[test]
    fn test_empty_response_message() {
        let err = ClassifyError::EmptyResponse {
            reason: Some("SAFETY".into()),
        };
        assert_eq!(err.to_string(), "Model returned no content (finish reason: SAFETY)");

        let err = ClassifyError::EmptyResponse { reason: None };
        assert_eq!(err.to_string(), "Model returned no content");
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = ItemOutcome::Succeeded {
            path: PathBuf::from("a.jpg"),
            records: 2,
        };
        assert!(ok.is_success());
        assert_eq!(ok.path(), std::path::Path::new("a.jpg"));

        let failed = ItemOutcome::Failed {
            path: PathBuf::from("b.png"),
            error: ClassifyError::Timeout(Duration::from_secs(1)).into(),
        };
        assert!(!failed.is_success());
    }
}
