//! Synthetic `stub://` source
//!
//! Generates moving gradient frames at a fixed rate. Query parameters:
//! `width`, `height` (default 640x480), `fps` (default 15) and `offline=1`,
//! which makes the open fail as an unreachable camera would.

use std::sync::Arc;
use std::time::{Duration, Instant};

use url::Url;

use super::frame::{Frame, RGB_CHANNELS};
use super::{CaptureError, CaptureSession, StopSignal};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;
const MAX_DIMENSION: u32 = 7680;

/// Synthetic capture session
#[derive(Debug)]
pub struct SyntheticSession {
    width: u32,
    height: u32,
    frame_interval: Duration,
    next_frame_at: Instant,
    frame_count: u64,
    stop: Arc<StopSignal>,
    closed: bool,
}

impl SyntheticSession {
    /// Open a synthetic session from a parsed `stub://` URL
    pub fn open(url: &Url, stop: Arc<StopSignal>) -> Result<Self, CaptureError> {
        let mut width = DEFAULT_WIDTH;
        let mut height = DEFAULT_HEIGHT;
        let mut fps = DEFAULT_FPS;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "width" => width = parse_param(&key, &value)?,
                "height" => height = parse_param(&key, &value)?,
                "fps" => fps = parse_param(&key, &value)?,
                "offline" if value != "0" => {
                    return Err(CaptureError::Open(format!(
                        "{} is unreachable",
                        url.host_str().unwrap_or("stub")
                    )));
                }
                _ => {}
            }
        }

        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(CaptureError::Open(format!(
                "invalid synthetic size {}x{}",
                width, height
            )));
        }

        tracing::debug!(source = %url, width, height, fps, "Synthetic source opened");

        Ok(Self {
            width,
            height,
            frame_interval: Duration::from_secs(1) / fps.max(1),
            next_frame_at: Instant::now(),
            frame_count: 0,
            stop,
            closed: false,
        })
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let shift = (self.frame_count % 256) as usize;
        let mut data = vec![0u8; w * h * RGB_CHANNELS];

        for (i, px) in data.chunks_exact_mut(RGB_CHANNELS).enumerate() {
            let (x, y) = (i % w, i / w);
            px[0] = ((x * 255 / w.max(1) + shift) % 256) as u8;
            px[1] = ((y * 255 / h.max(1)) % 256) as u8;
            px[2] = (shift * 3 % 256) as u8;
        }

        data
    }
}

fn parse_param(key: &str, value: &str) -> Result<u32, CaptureError> {
    value
        .parse()
        .map_err(|_| CaptureError::Open(format!("invalid {} '{}'", key, value)))
}

impl CaptureSession for SyntheticSession {
    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, CaptureError> {
        if self.closed {
            return Err(CaptureError::Closed);
        }

        let wait = self.next_frame_at.saturating_duration_since(Instant::now());
        if wait > timeout {
            if self.stop.sleep(timeout) {
                return Err(CaptureError::Interrupted);
            }
            return Err(CaptureError::Timeout(timeout));
        }
        if self.stop.sleep(wait) {
            return Err(CaptureError::Interrupted);
        }

        self.next_frame_at = Instant::now() + self.frame_interval;
        self.frame_count += 1;

        Ok(Frame::new(self.width, self.height, self.render()))
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
