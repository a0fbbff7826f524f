//! Per-stream telemetry
//!
//! Counters are plain atomics written by the ingestion worker and read by
//! anyone, so an info request never waits on the ingestion path. Only the
//! short transition log sits behind a lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::registry::StreamState;

/// Milliseconds since the Unix epoch
pub fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Number of state transitions kept for diagnostics
const TRANSITION_LOG_LEN: usize = 16;

/// One recorded state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub from: StreamState,
    pub to: StreamState,
    /// Milliseconds since the Unix epoch
    pub at_ms: u64,
}

/// Live counters for one stream
#[derive(Debug)]
pub struct Telemetry {
    state: AtomicU8,
    transitions: Mutex<VecDeque<StateTransition>>,
    fps: AtomicU32,
    consecutive_failures: AtomicU32,
    width: AtomicU32,
    height: AtomicU32,
    total_frames: AtomicU64,
    read_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnect_failures: AtomicU64,
    encode_failures: AtomicU64,
    dropped_frames: AtomicU64,
    observed_frames: AtomicU64,
    /// 0 = never
    last_frame_ms: AtomicU64,
    /// 0 = never
    last_reconnect_ms: AtomicU64,
}

impl Telemetry {
    /// Zeroed telemetry in state Connecting
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(StreamState::Connecting as u8),
            transitions: Mutex::new(VecDeque::with_capacity(TRANSITION_LOG_LEN)),
            fps: AtomicU32::new(0),
            consecutive_failures: AtomicU32::new(0),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            total_frames: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            reconnect_failures: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            observed_frames: AtomicU64::new(0),
            last_frame_ms: AtomicU64::new(0),
            last_reconnect_ms: AtomicU64::new(0),
        }
    }

    /// Current stream state
    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Set the stream state, returning the previous one
    ///
    /// Actual changes are appended to the transition log.
    pub fn set_state(&self, state: StreamState) -> StreamState {
        let prev = StreamState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if prev != state {
            let mut log = self.transitions.lock().unwrap_or_else(|e| e.into_inner());
            if log.len() == TRANSITION_LOG_LEN {
                log.pop_front();
            }
            log.push_back(StateTransition {
                from: prev,
                to: state,
                at_ms: unix_millis(SystemTime::now()),
            });
        }
        prev
    }

    /// Recent state changes, oldest first
    pub fn transitions(&self) -> Vec<StateTransition> {
        let log = self.transitions.lock().unwrap_or_else(|e| e.into_inner());
        log.iter().copied().collect()
    }

    /// Record a successful read
    pub fn record_frame(&self, width: u32, height: u32, at: SystemTime) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.total_frames.fetch_add(1, Ordering::Relaxed);
        self.width.store(width, Ordering::Relaxed);
        self.height.store(height, Ordering::Relaxed);
        self.last_frame_ms.store(unix_millis(at), Ordering::Relaxed);
    }

    /// Record a failed read, returning the new streak
    pub fn record_read_failure(&self) -> u32 {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record the start of a reconnect attempt
    pub fn record_reconnect_attempt(&self, at: SystemTime) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        self.last_reconnect_ms.store(unix_millis(at), Ordering::Relaxed);
    }

    /// Record a failed reconnect attempt
    pub fn record_reconnect_failure(&self) {
        self.reconnect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful reconnect. Only the failure streak is reset.
    pub fn record_reconnected(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a frame dropped because encoding failed
    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a queue entry evicted by a newer frame
    pub fn record_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame handed to the observer
    pub fn record_observed(&self) {
        self.observed_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the frame count of the last one-second window
    pub fn set_fps(&self, fps: u32) {
        self.fps.store(fps, Ordering::Relaxed);
    }

    /// Current failure streak
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let nonzero = |v: u64| (v != 0).then_some(v);

        TelemetrySnapshot {
            state: self.state(),
            fps: self.fps.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            width: self.width.load(Ordering::Relaxed),
            height: self.height.load(Ordering::Relaxed),
            total_frames: self.total_frames.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            reconnect_failures: self.reconnect_failures.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            observed_frames: self.observed_frames.load(Ordering::Relaxed),
            last_frame_ms: nonzero(self.last_frame_ms.load(Ordering::Relaxed)),
            last_reconnect_ms: nonzero(self.last_reconnect_ms.load(Ordering::Relaxed)),
            transitions: self.transitions(),
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of a stream's counters
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub state: StreamState,
    pub fps: u32,
    pub consecutive_failures: u32,
    pub width: u32,
    pub height: u32,
    pub total_frames: u64,
    pub read_failures: u64,
    pub reconnect_attempts: u64,
    pub reconnect_failures: u64,
    pub encode_failures: u64,
    pub dropped_frames: u64,
    pub observed_frames: u64,
    pub last_frame_ms: Option<u64>,
    pub last_reconnect_ms: Option<u64>,
    pub transitions: Vec<StateTransition>,
}

/// Rolling one-second frame counter, owned by the worker
#[derive(Debug)]
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
}

impl FpsCounter {
    const WINDOW: Duration = Duration::from_secs(1);

    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
        }
    }

    /// Count a frame; returns the window total when a window closes
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        self.frames += 1;
        self.roll(now)
    }

    /// Close the window if it has elapsed, even without a new frame
    pub fn roll(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.window_start) < Self::WINDOW {
            return None;
        }
        let count = self.frames;
        self.frames = 0;
        self.window_start = now;
        Some(count)
    }
}
