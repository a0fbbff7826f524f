//! Delivery adapters
//!
//! Read-side views over a stream's state, independent of the transport that
//! carries them:
//!
//! - [`snapshot`]: latest frame re-encoded on demand
//! - [`mjpeg`]: multipart JPEG body that re-encodes new frames at a capped rate
//! - [`push`]: frames popped from the distribution queue, with heartbeats
//!
//! Adapters never touch a capture session. A stream removed while an adapter
//! is running ends that adapter; it never panics or blocks.

pub mod mjpeg;
pub mod push;
pub mod snapshot;

pub use mjpeg::{MjpegStream, BOUNDARY as MJPEG_BOUNDARY, CONTENT_TYPE as MJPEG_CONTENT_TYPE};
pub use push::{PushMessage, PushSession};
pub use snapshot::snapshot;

/// JPEG quality for a request: the requested value clamped to 1..=100, or
/// `default` when none was given
pub fn resolve_quality(requested: Option<i64>, default: u8) -> u8 {
    match requested {
        Some(q) => q.clamp(1, 100) as u8,
        None => default.clamp(1, 100),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_quality() {
        assert_eq!(resolve_quality(None, 40), 40);
        assert_eq!(resolve_quality(Some(85), 40), 85);
        assert_eq!(resolve_quality(Some(0), 40), 1);
        assert_eq!(resolve_quality(Some(-5), 40), 1);
        assert_eq!(resolve_quality(Some(1000), 40), 100);
    }
}
