//! Registry configuration
//!
//! Per-stream ingestion tuning shared by every worker the registry spawns.

use std::time::Duration;

use serde::Deserialize;

use crate::config::duration_ms;
use crate::error::{Error, Result};

/// Registry and ingestion configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Capacity of each stream's distribution queue
    pub queue_capacity: usize,

    /// Maximum time to establish a capture session
    #[serde(with = "duration_ms", rename = "open_timeout_ms")]
    pub open_timeout: Duration,

    /// Maximum time a single frame read may block
    #[serde(with = "duration_ms", rename = "read_timeout_ms")]
    pub read_timeout: Duration,

    /// Consecutive read failures before the stream is considered degraded
    pub failure_threshold: u32,

    /// Time without a successful frame before the stream is considered degraded
    #[serde(with = "duration_ms", rename = "stall_timeout_ms")]
    pub stall_timeout: Duration,

    /// Minimum time between reconnect attempts
    #[serde(with = "duration_ms", rename = "reconnect_cooldown_ms")]
    pub reconnect_cooldown: Duration,

    /// Pause between closing the old session and opening a new one
    #[serde(with = "duration_ms", rename = "reopen_delay_ms")]
    pub reopen_delay: Duration,

    /// Pause after a failed read
    #[serde(with = "duration_ms", rename = "failure_backoff_ms")]
    pub failure_backoff: Duration,

    /// Read rate cap (frames per second, 0 = uncapped)
    pub max_fps: u32,

    /// Frames whose long edge exceeds this are downscaled before queueing
    pub max_long_edge: u32,

    /// JPEG quality for queued frames
    pub jpeg_quality: u8,

    /// Hand every Nth frame to the frame observer (AI-enabled streams only)
    pub observer_interval: u32,

    /// Interval of the periodic telemetry log
    #[serde(with = "duration_ms", rename = "stats_interval_ms")]
    pub stats_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 2,
            open_timeout: Duration::from_secs(8),
            read_timeout: Duration::from_secs(5),
            failure_threshold: 30,
            stall_timeout: Duration::from_secs(30),
            reconnect_cooldown: Duration::from_secs(10),
            reopen_delay: Duration::from_secs(1),
            failure_backoff: Duration::from_millis(33),
            max_fps: 30,
            max_long_edge: 1280,
            jpeg_quality: 40,
            observer_interval: 30,
            stats_interval: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    /// Set the distribution queue capacity (minimum 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the open timeout
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the consecutive failure threshold (minimum 1)
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the stall timeout
    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Set the reconnect cooldown
    pub fn reconnect_cooldown(mut self, cooldown: Duration) -> Self {
        self.reconnect_cooldown = cooldown;
        self
    }

    /// Set the reopen delay
    pub fn reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }

    /// Set the pause after a failed read
    pub fn failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }

    /// Set the read rate cap
    pub fn max_fps(mut self, fps: u32) -> Self {
        self.max_fps = fps;
        self
    }

    /// Set the downscale threshold
    pub fn max_long_edge(mut self, edge: u32) -> Self {
        self.max_long_edge = edge.max(1);
        self
    }

    /// Set the JPEG quality (clamped to 1..=100)
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Set the observer interval (minimum 1)
    pub fn observer_interval(mut self, interval: u32) -> Self {
        self.observer_interval = interval.max(1);
        self
    }

    /// Check values that bypassed the setters (configuration files)
    pub fn validate(&self) -> Result<()> {
        let at_least_one = [
            ("queue_capacity", self.queue_capacity as u64),
            ("failure_threshold", u64::from(self.failure_threshold)),
            ("max_long_edge", u64::from(self.max_long_edge)),
            ("observer_interval", u64::from(self.observer_interval)),
        ];
        for (key, value) in at_least_one {
            if value == 0 {
                return Err(Error::Config(format!("registry.{} must be at least 1", key)));
            }
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::Config(format!(
                "registry.jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        for (key, value) in [
            ("open_timeout_ms", self.open_timeout),
            ("read_timeout_ms", self.read_timeout),
            ("stats_interval_ms", self.stats_interval),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("registry.{} must be positive", key)));
            }
        }
        Ok(())
    }

    /// Minimum spacing between reads implied by `max_fps`
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.max_fps > 0).then(|| Duration::from_secs(1) / self.max_fps)
    }
}
