//! Scripted capture source
//!
//! A [`SourceOpener`] whose open and read outcomes are queued up front. Used to
//! drive the ingestion worker through failure and reconnect sequences without a
//! camera. Clones share the same script, so a test can keep one handle while
//! the registry owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::frame::Frame;
use super::{CaptureError, CaptureSession, SourceOpener, StopSignal};

/// Outcome of one scripted read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStep {
    /// Produce a frame
    Frame,
    /// Fail immediately with a read error
    Fail,
    /// Block for the full read timeout (or until stopped), then time out
    Stall,
}

#[derive(Debug)]
struct Script {
    width: u32,
    height: u32,
    opens: VecDeque<bool>,
    default_open: bool,
    reads: VecDeque<ReadStep>,
    default_read: ReadStep,
    open_delay: Duration,
    open_attempts: u32,
    closes: u32,
    frames_served: u64,
}

/// Shared handle to a scripted source
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    /// Source producing `width` x `height` frames; every open and read succeeds
    /// until told otherwise
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                width,
                height,
                opens: VecDeque::new(),
                default_open: true,
                reads: VecDeque::new(),
                default_read: ReadStep::Frame,
                open_delay: Duration::ZERO,
                open_attempts: 0,
                closes: 0,
                frames_served: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        // A panicking test thread must not wedge the others
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue open outcomes, consumed one per open attempt
    pub fn push_opens(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.lock().opens.extend(outcomes);
    }

    /// Outcome used once the open queue is empty
    pub fn set_default_open(&self, ok: bool) {
        self.lock().default_open = ok;
    }

    /// Delay every open by `delay` before deciding its outcome
    pub fn set_open_delay(&self, delay: Duration) {
        self.lock().open_delay = delay;
    }

    /// Queue read outcomes, consumed one per read
    pub fn push_reads(&self, steps: impl IntoIterator<Item = ReadStep>) {
        self.lock().reads.extend(steps);
    }

    /// Outcome used once the read queue is empty
    pub fn set_default_read(&self, step: ReadStep) {
        self.lock().default_read = step;
    }

    /// Number of open attempts so far
    pub fn open_attempts(&self) -> u32 {
        self.lock().open_attempts
    }

    /// Number of sessions closed so far
    pub fn close_count(&self) -> u32 {
        self.lock().closes
    }

    /// Number of frames produced so far
    pub fn frames_served(&self) -> u64 {
        self.lock().frames_served
    }

    /// Number of reads still queued
    pub fn pending_reads(&self) -> usize {
        self.lock().reads.len()
    }
}

impl SourceOpener for ScriptedSource {
    fn open(
        &self,
        uri: &str,
        timeout: Duration,
        stop: &Arc<StopSignal>,
    ) -> Result<Box<dyn CaptureSession>, CaptureError> {
        let delay = {
            let mut script = self.lock();
            script.open_attempts += 1;
            script.open_delay
        };

        if stop.sleep(delay.min(timeout)) {
            return Err(CaptureError::Interrupted);
        }
        if delay > timeout {
            return Err(CaptureError::Open(format!("{} timed out", uri)));
        }

        let mut script = self.lock();
        let ok = script.opens.pop_front().unwrap_or(script.default_open);
        if !ok {
            return Err(CaptureError::Open(format!("{} refused connection", uri)));
        }

        Ok(Box::new(ScriptedSession {
            source: self.clone(),
            width: script.width,
            height: script.height,
            stop: Arc::clone(stop),
            closed: false,
        }))
    }
}

struct ScriptedSession {
    source: ScriptedSource,
    width: u32,
    height: u32,
    stop: Arc<StopSignal>,
    closed: bool,
}

impl CaptureSession for ScriptedSession {
    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, CaptureError> {
        if self.closed {
            return Err(CaptureError::Closed);
        }

        let step = {
            let mut script = self.source.lock();
            let step = script.reads.pop_front().unwrap_or(script.default_read);
            if step == ReadStep::Frame {
                script.frames_served += 1;
            }
            step
        };

        match step {
            ReadStep::Frame => Ok(Frame::solid(self.width, self.height, [0x40, 0x80, 0xC0])),
            ReadStep::Fail => Err(CaptureError::Read("scripted failure".into())),
            ReadStep::Stall => {
                if self.stop.sleep(timeout) {
                    return Err(CaptureError::Interrupted);
                }
                Err(CaptureError::Timeout(timeout))
            }
        }
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.source.lock().closes += 1;
        }
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.close();
    }
}
