//! Stream entry and state types
//!
//! This module defines the per-stream state stored in the registry. Each
//! entry bundles the handles that the ingestion worker writes and the
//! delivery adapters read, so a delivery path that still holds an
//! `Arc<StreamEntry>` after removal keeps valid (if frozen) state and sees
//! the `removed` flag.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::Serialize;

use crate::capture::redact_uri;
use crate::ingest::telemetry::{unix_millis, StateTransition, Telemetry};
use crate::ingest::WorkerHandle;

use super::cache::FrameCache;
use super::config::RegistryConfig;
use super::consumers::ConsumerSet;
use super::queue::DistributionQueue;

/// State of a stream entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum StreamState {
    /// Session open, no frame read yet
    Connecting = 0,
    /// Frames are arriving
    Streaming = 1,
    /// Failure threshold or stall window exceeded
    Degraded = 2,
    /// Session torn down, reopening
    Reconnecting = 3,
}

impl StreamState {
    /// Decode the value stored in telemetry
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::Streaming,
            2 => StreamState::Degraded,
            3 => StreamState::Reconnecting,
            _ => StreamState::Connecting,
        }
    }

    /// Lowercase name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Connecting => "connecting",
            StreamState::Streaming => "streaming",
            StreamState::Degraded => "degraded",
            StreamState::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry for a single stream in the registry
#[derive(Debug)]
pub struct StreamEntry {
    /// Caller-supplied stream id
    pub id: String,

    /// Source URI as supplied (may contain credentials)
    pub source_uri: String,

    /// When the stream was added
    pub created_at: SystemTime,

    /// Registration sequence, used for listing order
    pub registration: u64,

    /// Latest decoded frame
    pub cache: FrameCache,

    /// Encoded frames for push consumers
    pub queue: DistributionQueue,

    /// Live counters and state
    pub telemetry: Telemetry,

    /// Attached push consumers
    pub consumers: Arc<ConsumerSet>,

    /// Whether frames are handed to the frame observer
    enable_ai: AtomicBool,
    /// JPEG quality for queued frames, MJPEG parts and default snapshots
    quality: AtomicU8,
    removed: AtomicBool,
    worker: Mutex<Option<WorkerHandle>>,
}

impl StreamEntry {
    /// Create a new entry in state Connecting
    pub(crate) fn new(
        id: impl Into<String>,
        source_uri: impl Into<String>,
        enable_ai: bool,
        registration: u64,
        config: &RegistryConfig,
    ) -> Self {
        Self {
            id: id.into(),
            source_uri: source_uri.into(),
            created_at: SystemTime::now(),
            registration,
            cache: FrameCache::new(),
            queue: DistributionQueue::new(config.queue_capacity),
            telemetry: Telemetry::new(),
            consumers: Arc::new(ConsumerSet::new()),
            enable_ai: AtomicBool::new(enable_ai),
            quality: AtomicU8::new(config.jpeg_quality.clamp(1, 100)),
            removed: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Current stream state
    pub fn state(&self) -> StreamState {
        self.telemetry.state()
    }

    /// Whether frames are handed to the frame observer
    pub fn enable_ai(&self) -> bool {
        self.enable_ai.load(Ordering::Relaxed)
    }

    pub fn set_enable_ai(&self, enabled: bool) {
        self.enable_ai.store(enabled, Ordering::Relaxed);
    }

    /// Current JPEG quality
    pub fn jpeg_quality(&self) -> u8 {
        self.quality.load(Ordering::Relaxed)
    }

    /// Set the JPEG quality, clamped to 1..=100; returns the stored value
    pub fn set_jpeg_quality(&self, quality: i64) -> u8 {
        let quality = quality.clamp(1, 100) as u8;
        self.quality.store(quality, Ordering::Relaxed);
        quality
    }

    /// Whether the stream has been taken out of the registry
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    pub(super) fn attach_worker(&self, handle: WorkerHandle) {
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub(super) fn take_worker(&self) -> Option<WorkerHandle> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Signal the worker to stop without waiting for it
    pub(super) fn signal_stop(&self) {
        if let Some(handle) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            handle.stop();
        }
    }

    /// Point-in-time description of the stream
    pub fn info(&self) -> StreamInfo {
        let snap = self.telemetry.snapshot();

        StreamInfo {
            stream_id: self.id.clone(),
            source: redact_uri(&self.source_uri),
            state: snap.state,
            is_opened: snap.state != StreamState::Reconnecting,
            fps: snap.fps,
            frame_width: snap.width,
            frame_height: snap.height,
            consecutive_failures: snap.consecutive_failures,
            active_consumers: self.consumers.len(),
            enable_ai: self.enable_ai(),
            jpeg_quality: self.jpeg_quality(),
            created_at_ms: unix_millis(self.created_at),
            last_frame_ms: snap.last_frame_ms,
            last_reconnect_ms: snap.last_reconnect_ms,
            total_frames: snap.total_frames,
            reconnect_attempts: snap.reconnect_attempts,
            dropped_frames: snap.dropped_frames,
            transitions: snap.transitions,
            timestamp: unix_millis(SystemTime::now()),
        }
    }
}

/// Snapshot of a stream, as reported by `get` and `list`
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub stream_id: String,
    /// Source URI with the password redacted
    pub source: String,
    pub state: StreamState,
    /// False while the worker is between sessions
    pub is_opened: bool,
    pub fps: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub consecutive_failures: u32,
    pub active_consumers: usize,
    pub enable_ai: bool,
    pub jpeg_quality: u8,
    pub created_at_ms: u64,
    pub last_frame_ms: Option<u64>,
    pub last_reconnect_ms: Option<u64>,
    pub total_frames: u64,
    pub reconnect_attempts: u64,
    pub dropped_frames: u64,
    pub transitions: Vec<StateTransition>,
    /// Time the snapshot was taken, milliseconds since the Unix epoch
    pub timestamp: u64,
}
