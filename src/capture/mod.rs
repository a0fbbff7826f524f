//! Capture sessions
//!
//! A capture session owns one decode handle bound to one camera source. The
//! ingestion worker is the only owner of a session; nothing else in the crate
//! can reach it. Sessions are produced by a [`SourceOpener`], which the worker
//! also uses to reopen the source after a connection loss.
//!
//! Backends:
//! - `stub://` synthetic source (always available)
//! - RTSP/RTMP/HTTP via GStreamer (feature: `rtsp-gstreamer`)
//! - Scripted source for deterministic failure sequences (`scripted`, tests
//!   and the `test-util` feature only)
//!
//! Every session is opened with the stream's [`StopSignal`] and must observe
//! it in all blocking waits, so stopping a worker never waits out a read or
//! open timeout.

pub mod frame;
#[cfg(feature = "rtsp-gstreamer")]
pub mod gstreamer;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod stop;
pub mod synthetic;

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::Error;

pub use frame::Frame;
#[cfg(any(test, feature = "test-util"))]
pub use scripted::{ReadStep, ScriptedSource};
pub use stop::StopSignal;
pub use synthetic::SyntheticSession;

/// URI schemes accepted as camera sources
pub const SUPPORTED_SCHEMES: &[&str] = &["rtsp", "rtsps", "rtmp", "http", "https", "stub"];

/// Error type for capture operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    /// Source could not be opened
    #[error("open failed: {0}")]
    Open(String),
    /// Decoder failed to produce a frame
    #[error("read failed: {0}")]
    Read(String),
    /// No frame arrived within the read timeout
    #[error("read timed out after {0:?}")]
    Timeout(Duration),
    /// Session was already closed
    #[error("session closed")]
    Closed,
    /// The stream's stop signal was raised during a blocking wait
    #[error("interrupted by stop")]
    Interrupted,
    /// No backend compiled in for this scheme
    #[error("unsupported source scheme: {0}")]
    Unsupported(String),
}

/// A live decode handle bound to one source
///
/// Implementations block in [`read_frame`](CaptureSession::read_frame) for
/// at most `timeout`, and return [`CaptureError::Interrupted`] early once
/// the stop signal they were opened with is raised.
pub trait CaptureSession: Send {
    /// Read the next decoded frame
    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, CaptureError>;

    /// Frame dimensions reported by the decoder, if known
    fn resolution(&self) -> Option<(u32, u32)>;

    /// Release the decode handle. Further reads return `Closed`.
    fn close(&mut self);
}

/// Factory for capture sessions
pub trait SourceOpener: Send + Sync {
    /// Open a new session for `uri`, giving up after `timeout` or when
    /// `stop` is raised
    ///
    /// The session keeps `stop` and observes it in its reads.
    fn open(
        &self,
        uri: &str,
        timeout: Duration,
        stop: &Arc<StopSignal>,
    ) -> Result<Box<dyn CaptureSession>, CaptureError>;
}

/// Opener that dispatches on the URI scheme
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultOpener;

impl SourceOpener for DefaultOpener {
    fn open(
        &self,
        uri: &str,
        timeout: Duration,
        stop: &Arc<StopSignal>,
    ) -> Result<Box<dyn CaptureSession>, CaptureError> {
        let parsed = Url::parse(uri).map_err(|e| CaptureError::Open(e.to_string()))?;

        match parsed.scheme() {
            "stub" => Ok(Box::new(SyntheticSession::open(&parsed, Arc::clone(stop))?)),
            #[cfg(feature = "rtsp-gstreamer")]
            _ => Ok(Box::new(gstreamer::GstreamerSession::open(
                uri,
                timeout,
                Arc::clone(stop),
            )?)),
            #[cfg(not(feature = "rtsp-gstreamer"))]
            scheme => {
                let _ = timeout;
                Err(CaptureError::Unsupported(format!(
                    "{} (build with the rtsp-gstreamer feature)",
                    scheme
                )))
            }
        }
    }
}

/// Validate a caller-supplied source URI
///
/// Accepts the schemes in [`SUPPORTED_SCHEMES`]; network schemes must name a
/// host.
pub fn validate_source(uri: &str) -> Result<Url, Error> {
    let parsed = Url::parse(uri).map_err(|e| Error::InvalidSource(format!("{}: {}", uri, e)))?;

    if !SUPPORTED_SCHEMES.contains(&parsed.scheme()) {
        return Err(Error::InvalidSource(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidSource(format!("missing host in '{}'", uri)));
    }

    Ok(parsed)
}

/// Source URI with any password replaced, for logging
pub fn redact_uri(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => uri.to_string(),
    }
}
