//! Latest-frame cache
//!
//! Single slot holding the most recent decoded frame of a stream. The writer
//! builds the complete frame before taking the lock and swaps it in; readers
//! clone it out. The lock is held only for the swap or clone, never for I/O.

use std::sync::{Mutex, MutexGuard};

use crate::capture::Frame;

#[derive(Debug, Default)]
struct Slot {
    frame: Option<Frame>,
    sequence: u64,
}

/// Single-slot frame cache for one stream
#[derive(Debug, Default)]
pub struct FrameCache {
    slot: Mutex<Slot>,
}

impl FrameCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the cached frame, stamping it with the next sequence number
    ///
    /// Returns the assigned sequence number.
    pub fn publish(&self, mut frame: Frame) -> u64 {
        let mut slot = self.lock();
        slot.sequence += 1;
        frame.sequence = slot.sequence;
        slot.frame = Some(frame);
        slot.sequence
    }

    /// Copy of the most recent frame, or `None` if nothing was published yet
    pub fn latest(&self) -> Option<Frame> {
        self.lock().frame.clone()
    }

    /// Sequence number of the most recent frame (0 if none)
    pub fn latest_sequence(&self) -> u64 {
        self.lock().sequence
    }

    /// Whether a frame has been published
    pub fn has_frame(&self) -> bool {
        self.lock().frame.is_some()
    }

    /// Drop the cached frame
    pub fn clear(&self) {
        self.lock().frame = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_empty_cache() {
        let cache = FrameCache::new();
        assert!(cache.latest().is_none());
        assert_eq!(cache.latest_sequence(), 0);
        assert!(!cache.has_frame());
    }

    #[test]
    fn test_publish_overwrites() {
        let cache = FrameCache::new();
        cache.publish(Frame::solid(2, 2, [1, 1, 1]));
        let seq = cache.publish(Frame::solid(2, 2, [2, 2, 2]));

        let latest = cache.latest().unwrap();
        assert_eq!(seq, 2);
        assert_eq!(latest.sequence, 2);
        assert_eq!(&latest.data[..3], &[2, 2, 2]);
    }

    #[test]
    fn test_reader_copy_is_independent() {
        let cache = FrameCache::new();
        cache.publish(Frame::solid(2, 2, [7, 7, 7]));
        let held = cache.latest().unwrap();

        cache.publish(Frame::solid(2, 2, [9, 9, 9]));
        assert_eq!(&held.data[..3], &[7, 7, 7]);
        assert_eq!(held.sequence, 1);
    }

    #[test]
    fn test_monotonic_freshness_under_concurrency() {
        let cache = Arc::new(FrameCache::new());

        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    cache.publish(Frame::solid(1, 1, [0; 3]));
                }
            })
        };

        let mut last_seen = 0;
        while !writer.is_finished() {
            if let Some(frame) = cache.latest() {
                assert!(frame.sequence >= last_seen);
                last_seen = frame.sequence;
            }
        }
        writer.join().unwrap();

        assert_eq!(cache.latest().unwrap().sequence, 500);
    }

    #[test]
    fn test_clear() {
        let cache = FrameCache::new();
        cache.publish(Frame::solid(1, 1, [0; 3]));
        cache.clear();
        assert!(cache.latest().is_none());
        assert_eq!(cache.latest_sequence(), 1);
    }
}
