//! Error types
//!
//! Caller-facing failures of the relay. Failures inside the ingestion loop
//! never surface here; they are absorbed into telemetry and stream state.

use std::time::Duration;

use crate::capture::CaptureError;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for registry and delivery operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Source URI could not be parsed or uses an unsupported scheme
    #[error("Invalid source URI: {0}")]
    InvalidSource(String),

    /// Stream id is empty or not usable in a URL path
    #[error("Invalid stream id: {0:?}")]
    InvalidStreamId(String),

    /// A stream with this id is already registered (or being registered)
    #[error("Stream already exists: {0}")]
    StreamExists(String),

    /// Initial capture session could not be established
    #[error("Failed to open stream {id}: {source}")]
    OpenFailure {
        id: String,
        #[source]
        source: CaptureError,
    },

    /// Initial open did not complete within the configured timeout
    #[error("Timed out opening stream {id} after {timeout:?}")]
    OpenTimeout { id: String, timeout: Duration },

    /// No stream with this id
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Stream exists but has not produced a frame yet
    #[error("No frame available for stream: {0}")]
    NoFrame(String),

    /// JPEG encoding failed
    #[error("Encode error: {0}")]
    Encode(String),

    /// I/O error (bind, accept, config file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error maps to a "not found" response
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::StreamNotFound(_) | Error::NoFrame(_))
    }

    /// Whether the error was caused by the caller's input
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Error::InvalidSource(_)
                | Error::InvalidStreamId(_)
                | Error::StreamExists(_)
                | Error::OpenFailure { .. }
                | Error::OpenTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_class() {
        assert!(Error::StreamNotFound("cam1".into()).is_not_found());
        assert!(Error::NoFrame("cam1".into()).is_not_found());
        assert!(!Error::StreamExists("cam1".into()).is_not_found());
    }

    #[test]
    fn test_bad_request_class() {
        let err = Error::OpenFailure {
            id: "cam1".into(),
            source: CaptureError::Open("connection refused".into()),
        };
        assert!(err.is_bad_request());
        assert!(Error::InvalidSource("nope".into()).is_bad_request());
        assert!(Error::InvalidStreamId(String::new()).is_bad_request());
        assert!(!Error::NoFrame("cam1".into()).is_bad_request());
    }

    #[test]
    fn test_display() {
        let err = Error::StreamNotFound("cam1".into());
        assert_eq!(err.to_string(), "Stream not found: cam1");
    }
}
