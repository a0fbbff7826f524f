//! GStreamer capture backend
//!
//! Pipeline: `uridecodebin ! videoconvert ! video/x-raw,format=RGB ! appsink`.
//! The appsink keeps a single buffer and drops older ones, so a slow worker
//! always reads the most recent decoded frame.
//!
//! Neither the state change nor `try_pull_sample` can wait on the stop
//! signal, so both are polled in short slices.

use std::sync::Arc;
use std::time::Duration;

use gstreamer::prelude::*;

use super::frame::{Frame, RGB_CHANNELS};
use super::{CaptureError, CaptureSession, StopSignal};

/// Capture session backed by a GStreamer pipeline
pub struct GstreamerSession {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    resolution: Option<(u32, u32)>,
    stop: Arc<StopSignal>,
    closed: bool,
}

fn clock(d: Duration) -> gstreamer::ClockTime {
    gstreamer::ClockTime::from_mseconds(d.as_millis() as u64)
}

impl GstreamerSession {
    /// Build the pipeline and wait up to `timeout` for it to reach Playing
    pub fn open(uri: &str, timeout: Duration, stop: Arc<StopSignal>) -> Result<Self, CaptureError> {
        gstreamer::init().map_err(|e| CaptureError::Open(format!("gstreamer init: {}", e)))?;

        let description = format!(
            "uridecodebin uri=\"{}\" ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            uri.replace('"', "%22")
        );

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| CaptureError::Open(format!("build pipeline: {}", e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| CaptureError::Open("pipeline has unexpected type".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| CaptureError::Open("appsink missing from pipeline".into()))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| CaptureError::Open("appsink has unexpected type".into()))?;

        let mut session = Self {
            pipeline,
            appsink,
            resolution: None,
            stop,
            closed: false,
        };

        if let Err(e) = session.pipeline.set_state(gstreamer::State::Playing) {
            session.close();
            return Err(CaptureError::Open(format!("set Playing: {}", e)));
        }

        let mut last = (Ok(gstreamer::StateChangeSuccess::Async), gstreamer::State::Null);
        let stop = Arc::clone(&session.stop);
        let playing = stop.poll_until(timeout, |slice| {
            let (result, current, _) = session.pipeline.state(clock(slice));
            let settled = result.is_err() || current == gstreamer::State::Playing;
            last = (result, current);
            settled.then_some(())
        });
        let (result, current) = last;

        if playing.is_none() && stop.is_stopped() {
            session.close();
            return Err(CaptureError::Interrupted);
        }

        match result {
            Ok(_) if current == gstreamer::State::Playing => Ok(session),
            Ok(_) => {
                session.close();
                Err(CaptureError::Open(format!(
                    "pipeline stuck in {:?} after {:?}",
                    current, timeout
                )))
            }
            Err(e) => {
                let detail = session.bus_error().unwrap_or_else(|| e.to_string());
                session.close();
                Err(CaptureError::Open(detail))
            }
        }
    }

    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => return Some(err.error().to_string()),
                MessageView::Eos(..) => return Some("end of stream".into()),
                _ => {}
            }
        }
        None
    }
}

impl CaptureSession for GstreamerSession {
    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, CaptureError> {
        if self.closed {
            return Err(CaptureError::Closed);
        }

        if let Some(err) = self.bus_error() {
            return Err(CaptureError::Read(err));
        }

        let appsink = &self.appsink;
        let sample = match self
            .stop
            .poll_until(timeout, |slice| appsink.try_pull_sample(clock(slice)))
        {
            Some(sample) => sample,
            None if self.stop.is_stopped() => return Err(CaptureError::Interrupted),
            None => return Err(CaptureError::Timeout(timeout)),
        };

        let frame = sample_to_frame(&sample)?;
        self.resolution = Some((frame.width, frame.height));
        Ok(frame)
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        self.resolution
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.pipeline.set_state(gstreamer::State::Null);
        }
    }
}

impl Drop for GstreamerSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame, CaptureError> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| CaptureError::Read("sample missing buffer".into()))?;
    let caps = sample
        .caps()
        .ok_or_else(|| CaptureError::Read("sample missing caps".into()))?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|e| CaptureError::Read(format!("parse caps: {}", e)))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * RGB_CHANNELS;
    let stride = info.stride()[0] as usize;

    let map = buffer
        .map_readable()
        .map_err(|e| CaptureError::Read(format!("map buffer: {}", e)))?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok(Frame::new(width, height, data.to_vec()));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let line = data
            .get(start..start + row_bytes)
            .ok_or_else(|| CaptureError::Read("buffer row out of bounds".into()))?;
        pixels.extend_from_slice(line);
    }

    Ok(Frame::new(width, height, pixels))
}
