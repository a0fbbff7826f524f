//! Multipart JPEG (MJPEG) stream
//!
//! Produces the body of a `multipart/x-mixed-replace` response. A background
//! task polls the frame cache at the configured rate, re-encodes frames it
//! has not sent yet and hands each part to the response through a
//! one-slot channel, so a slow client only slows its own task. While the
//! camera is frozen the last part is repeated every `keepalive`, so viewers
//! keep a picture and proxies see traffic.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;

use crate::ingest::encode::encode_jpeg;
use crate::registry::StreamEntry;

/// Multipart boundary
pub const BOUNDARY: &str = "frame";

/// Response content type
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Body stream of an MJPEG response
pub type MjpegStream = ReceiverStream<std::io::Result<Bytes>>;

/// Frame one JPEG as a multipart part
pub fn part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );

    let mut buf = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    buf.put_slice(header.as_bytes());
    buf.put_slice(jpeg);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Start streaming `entry` as MJPEG
///
/// New frames are encoded at the stream's current quality. The stream ends
/// when the entry is removed from the registry or the receiving side is
/// dropped.
pub fn stream(entry: Arc<StreamEntry>, interval: Duration, keepalive: Duration) -> MjpegStream {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(run(entry, tx, interval, keepalive));
    ReceiverStream::new(rx)
}

async fn run(
    entry: Arc<StreamEntry>,
    tx: mpsc::Sender<std::io::Result<Bytes>>,
    interval: Duration,
    keepalive: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_sent = 0;
    let mut last_part: Option<Bytes> = None;
    let mut last_sent_at = Instant::now();
    let mut parts = 0u64;

    tracing::debug!(stream = %entry.id, "MJPEG client attached");

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            _ = ticker.tick() => {}
        }

        if entry.is_removed() {
            break;
        }
        if entry.cache.latest_sequence() == last_sent {
            if let Some(repeat) = &last_part {
                if last_sent_at.elapsed() >= keepalive {
                    if tx.send(Ok(repeat.clone())).await.is_err() {
                        break;
                    }
                    last_sent_at = Instant::now();
                }
            }
            continue;
        }
        let Some(frame) = entry.cache.latest() else {
            continue;
        };
        last_sent = frame.sequence;

        let quality = entry.jpeg_quality();
        match tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality)).await {
            Ok(Ok(jpeg)) => {
                let next = part(&jpeg);
                if tx.send(Ok(next.clone())).await.is_err() {
                    break;
                }
                last_part = Some(next);
                last_sent_at = Instant::now();
                parts += 1;
            }
            Ok(Err(e)) => {
                tracing::debug!(stream = %entry.id, error = %e, "MJPEG frame skipped");
            }
            Err(e) => {
                tracing::warn!(stream = %entry.id, error = %e, "MJPEG encoder task failed");
                break;
            }
        }
    }

    tracing::debug!(stream = %entry.id, parts = parts, "MJPEG client detached");
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use super::*;
    use crate::capture::Frame;
    use crate::registry::RegistryConfig;

    fn entry() -> Arc<StreamEntry> {
        Arc::new(StreamEntry::new("cam1", "stub://cam1", false, 1, &RegistryConfig::default()))
    }

    #[test]
    fn test_part_layout() {
        let part = part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let expected: &[u8] =
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n\xFF\xD8\xFF\xD9\r\n";
        assert_eq!(&part[..], expected);
    }

    #[tokio::test]
    async fn test_new_frames_before_keepalive() {
        let entry = entry();
        entry.cache.publish(Frame::solid(16, 16, [10, 20, 30]));

        let mut body = stream(Arc::clone(&entry), Duration::from_millis(10), Duration::from_secs(10));
        let first = body.next().await.unwrap().unwrap();
        assert!(first.starts_with(b"--frame\r\n"));

        // No new frame and keepalive not due: nothing arrives
        let idle = tokio::time::timeout(Duration::from_millis(60), body.next()).await;
        assert!(idle.is_err());

        entry.cache.publish(Frame::solid(16, 16, [30, 20, 10]));
        let second = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn test_frozen_camera_repeats_last_part() {
        let entry = entry();
        entry.cache.publish(Frame::solid(16, 16, [10, 20, 30]));

        let mut body = stream(Arc::clone(&entry), Duration::from_millis(10), Duration::from_millis(50));
        let first = body.next().await.unwrap().unwrap();

        for _ in 0..2 {
            let repeat = tokio::time::timeout(Duration::from_secs(2), body.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(repeat, first);
        }
    }

    #[tokio::test]
    async fn test_uses_stream_quality() {
        let entry = entry();
        let pixels: Vec<u8> = (0..64 * 64 * 3).map(|i| (i * 37 % 251) as u8).collect();
        entry.cache.publish(Frame::new(64, 64, pixels.clone()));

        let mut body = stream(Arc::clone(&entry), Duration::from_millis(10), Duration::from_secs(10));
        let default = body.next().await.unwrap().unwrap();

        entry.set_jpeg_quality(95);
        entry.cache.publish(Frame::new(64, 64, pixels));
        let high = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(high.len() > default.len());
    }

    #[tokio::test]
    async fn test_ends_when_removed() {
        let entry = entry();
        let mut body = stream(Arc::clone(&entry), Duration::from_millis(10), Duration::from_secs(1));

        entry.mark_removed();
        let end = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }
}
