//! Ingestion worker
//!
//! One OS thread per stream. The worker is the only owner of the stream's
//! capture session: it reads frames, publishes them into the frame cache,
//! encodes them for the distribution queue and drives the reconnect state
//! machine:
//!
//! ```text
//! Connecting ──first frame──▶ Streaming ──threshold/stall──▶ Degraded
//!                                 ▲                              │
//!                                 └──reopen + trial read ok── Reconnecting
//!                                                                │ ▲
//!                                                                └─┘ failed, wait cooldown
//! ```
//!
//! There is no terminal state; the worker retries until it is stopped. The
//! stop signal is shared with the capture session and the opener, so every
//! sleep, read and reopen returns as soon as it is raised.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime};

use crate::capture::{CaptureError, CaptureSession, Frame, SourceOpener, StopSignal};
use crate::observer::FrameObserver;
use crate::registry::{RegistryConfig, StreamEntry, StreamState};

use super::encode::encode_for_delivery;
use super::policy::{LinkHealth, ReconnectDecision, ReconnectPolicy};
use super::telemetry::FpsCounter;

/// Handle to a running worker thread
///
/// Dropping the handle signals the worker but does not wait for it.
#[derive(Debug)]
pub struct WorkerHandle {
    stop: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal the worker to stop
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Whether the thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the worker and wait for it to exit
    ///
    /// Reads and reopens observe the signal, so this returns within one poll
    /// slice plus the time to close the session.
    pub fn join(mut self) {
        self.stop.stop();
        if let Some(thread) = self.thread.take() {
            let name = thread.thread().name().unwrap_or("ingest").to_string();
            if thread.join().is_err() {
                tracing::error!(thread = %name, "Ingestion worker panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Start the ingestion worker for `entry` with an already-open session
///
/// `stop` must be the signal `session` was opened with.
pub fn spawn(
    entry: Arc<StreamEntry>,
    session: Box<dyn CaptureSession>,
    stop: Arc<StopSignal>,
    opener: Arc<dyn SourceOpener>,
    observer: Option<Arc<dyn FrameObserver>>,
    config: RegistryConfig,
) -> std::io::Result<WorkerHandle> {
    let now = Instant::now();

    let worker = Worker {
        policy: ReconnectPolicy::from_config(&config),
        health: LinkHealth::new(now),
        fps: FpsCounter::new(now),
        next_read_at: now,
        frames_seen: 0,
        stop: Arc::clone(&stop),
        session: Some(session),
        entry,
        opener,
        observer,
        config,
    };

    let thread = std::thread::Builder::new()
        .name(format!("ingest-{}", worker.entry.id))
        .spawn(move || worker.run())?;

    Ok(WorkerHandle {
        stop,
        thread: Some(thread),
    })
}

struct Worker {
    entry: Arc<StreamEntry>,
    session: Option<Box<dyn CaptureSession>>,
    opener: Arc<dyn SourceOpener>,
    observer: Option<Arc<dyn FrameObserver>>,
    config: RegistryConfig,
    policy: ReconnectPolicy,
    health: LinkHealth,
    fps: FpsCounter,
    stop: Arc<StopSignal>,
    next_read_at: Instant,
    frames_seen: u64,
}

impl Worker {
    fn run(mut self) {
        tracing::info!(stream = %self.entry.id, "Ingestion worker started");

        while !self.stop.is_stopped() {
            let now = Instant::now();
            if let Some(fps) = self.fps.roll(now) {
                self.entry.telemetry.set_fps(fps);
            }

            match self.policy.decide(&self.health, now) {
                ReconnectDecision::Proceed => {}
                ReconnectDecision::Wait(remaining) => {
                    self.mark_degraded();
                    if self.session.is_none() {
                        if self.stop.sleep(remaining) {
                            break;
                        }
                        continue;
                    }
                }
                ReconnectDecision::Reconnect => {
                    self.mark_degraded();
                    self.reconnect();
                    continue;
                }
            }

            if self.pace() {
                break;
            }
            self.read_once();
        }

        self.close_session();
        tracing::info!(stream = %self.entry.id, "Ingestion worker stopped");
    }

    /// Hold reads to the frame-rate cap. Returns `true` if stopped.
    fn pace(&mut self) -> bool {
        let Some(interval) = self.config.frame_interval() else {
            return false;
        };

        let now = Instant::now();
        if self.next_read_at > now && self.stop.sleep(self.next_read_at - now) {
            return true;
        }
        self.next_read_at = Instant::now() + interval;
        false
    }

    fn read_once(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let result = session.read_frame(self.config.read_timeout);

        match result {
            Ok(frame) if frame.is_valid() => self.on_frame(frame),
            Ok(frame) => self.on_read_failure(&CaptureError::Read(format!(
                "malformed {}x{} frame ({} bytes)",
                frame.width,
                frame.height,
                frame.size()
            ))),
            Err(CaptureError::Interrupted) => {}
            Err(CaptureError::Closed) => {
                tracing::warn!(stream = %self.entry.id, "Capture session lost");
                self.entry.telemetry.record_read_failure();
                self.close_session();
                self.health.session_open = false;
            }
            Err(e) => self.on_read_failure(&e),
        }
    }

    fn on_read_failure(&mut self, error: &CaptureError) {
        let streak = self.entry.telemetry.record_read_failure();
        self.health.on_failure();

        if streak == self.policy.failure_threshold {
            tracing::warn!(
                stream = %self.entry.id,
                failures = streak,
                error = %error,
                "Failure threshold reached"
            );
        } else {
            tracing::debug!(stream = %self.entry.id, failures = streak, error = %error, "Read failed");
        }

        self.stop.sleep(self.config.failure_backoff);
    }

    fn on_frame(&mut self, frame: Frame) {
        let now = Instant::now();
        let telemetry = &self.entry.telemetry;

        self.health.on_frame(now);
        telemetry.record_frame(frame.width, frame.height, frame.captured_at);
        if let Some(fps) = self.fps.tick(now) {
            telemetry.set_fps(fps);
        }

        let prev = telemetry.set_state(StreamState::Streaming);
        if prev != StreamState::Streaming {
            tracing::info!(
                stream = %self.entry.id,
                from = %prev,
                width = frame.width,
                height = frame.height,
                "Streaming"
            );
        }

        self.frames_seen += 1;
        if self.entry.enable_ai() {
            if let Some(observer) = &self.observer {
                if self.frames_seen % u64::from(self.config.observer_interval.max(1)) == 0 {
                    observer.on_frame(&self.entry.id, &frame);
                    telemetry.record_observed();
                }
            }
        }

        self.entry.cache.publish(frame.clone());

        match encode_for_delivery(&frame, self.config.max_long_edge, self.entry.jpeg_quality()) {
            Ok(jpeg) => {
                if self.entry.queue.push(jpeg) {
                    telemetry.record_dropped();
                }
            }
            Err(e) => {
                telemetry.record_encode_failure();
                tracing::debug!(stream = %self.entry.id, error = %e, "Frame dropped");
            }
        }
    }

    fn mark_degraded(&self) {
        let telemetry = &self.entry.telemetry;
        if matches!(
            telemetry.state(),
            StreamState::Connecting | StreamState::Streaming
        ) {
            telemetry.set_state(StreamState::Degraded);
            tracing::warn!(
                stream = %self.entry.id,
                failures = telemetry.consecutive_failures(),
                since_last_frame = ?self.health.last_frame_at.elapsed(),
                "Stream degraded"
            );
        }
    }

    fn reconnect(&mut self) {
        let telemetry = &self.entry.telemetry;
        telemetry.set_state(StreamState::Reconnecting);
        telemetry.record_reconnect_attempt(SystemTime::now());
        tracing::info!(stream = %self.entry.id, "Reconnecting");

        self.close_session();
        if self.stop.sleep(self.config.reopen_delay) {
            return;
        }

        let read_timeout = self.config.read_timeout;
        let result = self
            .opener
            .open(&self.entry.source_uri, self.config.open_timeout, &self.stop)
            .and_then(|mut session| match session.read_frame(read_timeout) {
                Ok(frame) if frame.is_valid() => Ok((session, frame)),
                Ok(_) => {
                    session.close();
                    Err(CaptureError::Read("malformed trial frame".into()))
                }
                Err(e) => {
                    session.close();
                    Err(e)
                }
            });

        match result {
            Ok((session, frame)) => {
                self.session = Some(session);
                self.health.on_attempt(Instant::now(), true);
                self.entry.telemetry.record_reconnected();
                tracing::info!(stream = %self.entry.id, "Reconnected");
                self.on_frame(frame);
            }
            Err(CaptureError::Interrupted) => {}
            Err(e) => {
                self.health.on_attempt(Instant::now(), false);
                self.entry.telemetry.record_reconnect_failure();
                tracing::warn!(
                    stream = %self.entry.id,
                    error = %e,
                    retry_in = ?self.policy.cooldown,
                    "Reconnect failed"
                );
            }
        }
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::capture::{ReadStep, ScriptedSource};
    use crate::observer::ChannelObserver;

    const OPEN: Duration = Duration::from_millis(200);

    fn fast_config() -> RegistryConfig {
        RegistryConfig::default()
            .max_fps(0)
            .failure_threshold(3)
            .failure_backoff(Duration::from_millis(1))
            .reopen_delay(Duration::from_millis(1))
            .reconnect_cooldown(Duration::from_millis(20))
            .read_timeout(Duration::from_millis(20))
            .open_timeout(OPEN)
    }

    fn start(
        source: &ScriptedSource,
        config: RegistryConfig,
        enable_ai: bool,
        observer: Option<Arc<dyn FrameObserver>>,
    ) -> (Arc<StreamEntry>, WorkerHandle) {
        let entry = Arc::new(StreamEntry::new("cam1", "stub://cam1", enable_ai, 1, &config));
        let stop = Arc::new(StopSignal::new());
        let session = source.open("stub://cam1", OPEN, &stop).unwrap();
        let handle = spawn(
            Arc::clone(&entry),
            session,
            stop,
            Arc::new(source.clone()),
            observer,
            config,
        )
        .unwrap();
        (entry, handle)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_first_frame_enters_streaming() {
        let source = ScriptedSource::new(64, 48);
        let (entry, handle) = start(&source, fast_config(), false, None);

        assert!(wait_for(|| entry.state() == StreamState::Streaming));
        assert!(wait_for(|| entry.cache.has_frame()));

        let jpeg = loop {
            if let Some(jpeg) = entry.queue.try_pop() {
                break jpeg;
            }
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        handle.join();
    }

    #[test]
    fn test_failures_then_success_resets_streak() {
        let source = ScriptedSource::new(64, 48);
        source.push_reads([ReadStep::Fail; 5]);
        let config = fast_config().failure_threshold(30);
        let (entry, handle) = start(&source, config, false, None);

        assert!(wait_for(|| source.frames_served() >= 1));
        handle.join();

        let snap = entry.telemetry.snapshot();
        assert_eq!(snap.read_failures, 5);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.state, StreamState::Streaming);
        assert_eq!(snap.reconnect_attempts, 0);
    }

    #[test]
    fn test_unreachable_source_keeps_retrying() {
        let source = ScriptedSource::new(64, 48);
        source.push_reads([ReadStep::Frame]);
        source.set_default_read(ReadStep::Fail);
        source.push_opens([true]);
        source.set_default_open(false);
        let (entry, handle) = start(&source, fast_config(), false, None);

        // One initial open plus six failed reopens
        assert!(wait_for(|| source.open_attempts() >= 7));
        assert!(!handle.is_finished());
        assert_eq!(entry.state(), StreamState::Reconnecting);
        assert!(!entry.info().is_opened);

        let snap = entry.telemetry.snapshot();
        assert!(snap.reconnect_failures >= 6);
        let has = |from: StreamState, to: StreamState| {
            snap.transitions
                .iter()
                .any(|t| t.from == from && t.to == to)
        };
        assert!(has(StreamState::Connecting, StreamState::Streaming));
        assert!(has(StreamState::Streaming, StreamState::Degraded));
        assert!(has(StreamState::Degraded, StreamState::Reconnecting));

        handle.join();
    }

    #[test]
    fn test_reconnect_recovers() {
        let source = ScriptedSource::new(64, 48);
        source.push_reads([ReadStep::Frame, ReadStep::Fail, ReadStep::Fail, ReadStep::Fail]);
        let (entry, handle) = start(&source, fast_config(), false, None);

        assert!(wait_for(|| {
            let snap = entry.telemetry.snapshot();
            snap.reconnect_attempts == 1 && snap.state == StreamState::Streaming
        }));
        handle.join();

        let snap = entry.telemetry.snapshot();
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.reconnect_failures, 0);
        assert_eq!(snap.read_failures, 3);
        assert_eq!(source.open_attempts(), 2);
        // Old session closed on reconnect, new one on stop
        assert_eq!(source.close_count(), 2);
    }

    #[test]
    fn test_stall_triggers_reconnect() {
        let source = ScriptedSource::new(32, 32);
        source.push_reads([ReadStep::Frame, ReadStep::Stall, ReadStep::Stall]);
        let config = fast_config()
            .failure_threshold(1000)
            .stall_timeout(Duration::from_millis(30));
        let (entry, handle) = start(&source, config, false, None);

        assert!(wait_for(|| entry.telemetry.snapshot().reconnect_attempts >= 1));
        handle.join();
        assert!(source.open_attempts() >= 2);
    }

    #[test]
    fn test_stop_interrupts_cooldown() {
        let source = ScriptedSource::new(32, 32);
        source.set_default_read(ReadStep::Fail);
        source.push_opens([true]);
        source.set_default_open(false);
        let config = fast_config().reconnect_cooldown(Duration::from_secs(60));
        let (entry, handle) = start(&source, config, false, None);

        assert!(wait_for(|| entry.telemetry.snapshot().reconnect_failures >= 1));

        let started = Instant::now();
        handle.join();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(source.open_attempts(), 2);
    }

    #[test]
    fn test_stop_unblocks_stalled_read() {
        let source = ScriptedSource::new(32, 32);
        source.push_reads([ReadStep::Frame]);
        source.set_default_read(ReadStep::Stall);
        let config = fast_config()
            .read_timeout(Duration::from_secs(30))
            .stall_timeout(Duration::from_secs(60));
        let (entry, handle) = start(&source, config, false, None);

        assert!(wait_for(|| entry.cache.has_frame()));
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        handle.join();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(source.close_count(), 1);
        assert_eq!(entry.telemetry.snapshot().read_failures, 0);
    }

    #[test]
    fn test_stop_unblocks_reopen() {
        let source = ScriptedSource::new(32, 32);
        let config = fast_config().open_timeout(Duration::from_secs(30));
        let (entry, handle) = start(&source, config, false, None);

        assert!(wait_for(|| entry.cache.has_frame()));
        // Every open from here on hangs until stopped
        source.set_open_delay(Duration::from_secs(30));
        source.set_default_read(ReadStep::Fail);
        assert!(wait_for(|| source.open_attempts() >= 2));
        assert_eq!(entry.state(), StreamState::Reconnecting);

        let started = Instant::now();
        handle.join();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(entry.telemetry.snapshot().reconnect_failures, 0);
    }

    #[test]
    fn test_stop_closes_session() {
        let source = ScriptedSource::new(32, 32);
        let (_entry, handle) = start(&source, fast_config().max_fps(100), false, None);

        assert!(wait_for(|| source.frames_served() >= 3));
        handle.join();
        assert_eq!(source.close_count(), 1);
    }

    #[test]
    fn test_oversized_frames_are_downscaled_for_queue() {
        let source = ScriptedSource::new(1920, 1080);
        let (entry, handle) = start(&source, fast_config().max_fps(10), false, None);

        assert!(wait_for(|| !entry.queue.is_empty()));
        handle.join();

        let cached = entry.cache.latest().unwrap();
        assert_eq!((cached.width, cached.height), (1920, 1080));

        let jpeg = entry.queue.try_pop().unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1280, 720));
    }

    #[test]
    fn test_observer_sees_every_nth_frame() {
        let source = ScriptedSource::new(8, 8);
        let (observer, mut rx) = ChannelObserver::new(16);
        let config = fast_config().observer_interval(2);
        let (entry, handle) = start(&source, config, true, Some(Arc::new(observer)));

        assert!(wait_for(|| source.frames_served() >= 6));
        handle.join();

        let observed = rx.try_recv().unwrap();
        assert_eq!(observed.stream_id, "cam1");
        let snap = entry.telemetry.snapshot();
        assert!(snap.observed_frames >= 3);
        assert!(snap.observed_frames <= snap.total_frames / 2);
    }

    #[test]
    fn test_observer_skipped_without_ai() {
        let source = ScriptedSource::new(8, 8);
        let (observer, mut rx) = ChannelObserver::new(16);
        let config = fast_config().observer_interval(1);
        let (entry, handle) = start(&source, config, false, Some(Arc::new(observer)));

        assert!(wait_for(|| source.frames_served() >= 3));
        handle.join();

        assert!(rx.try_recv().is_err());
        assert_eq!(entry.telemetry.snapshot().observed_frames, 0);
    }
}
