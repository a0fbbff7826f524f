//! Frame observers
//!
//! Hook for downstream analysis (object or plate detection). The ingestion
//! worker hands a copy of every Nth frame of AI-enabled streams to the
//! registry's observer. Observers run on the worker thread and must return
//! quickly; [`ChannelObserver`] moves frames onto a channel for processing
//! elsewhere and drops them when the consumer falls behind.

use tokio::sync::mpsc;

use crate::capture::Frame;

/// Receives frames from AI-enabled streams
pub trait FrameObserver: Send + Sync {
    /// Called on the ingestion thread with a copy of the frame
    fn on_frame(&self, stream_id: &str, frame: &Frame);
}

/// A frame handed to a [`ChannelObserver`]
#[derive(Debug, Clone)]
pub struct ObservedFrame {
    /// Stream the frame came from
    pub stream_id: String,
    /// The frame
    pub frame: Frame,
}

/// Observer that forwards frames over a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<ObservedFrame>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ObservedFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl FrameObserver for ChannelObserver {
    fn on_frame(&self, stream_id: &str, frame: &Frame) {
        let observed = ObservedFrame {
            stream_id: stream_id.to_string(),
            frame: frame.clone(),
        };

        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(observed) {
            tracing::trace!(stream = %stream_id, "Observer channel full, frame skipped");
        }
    }
}
