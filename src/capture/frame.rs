//! Decoded frame type
//!
//! Frames carry packed RGB8 pixels in a `Bytes` buffer. The buffer is
//! immutable once built, so handing a clone to a reader is equivalent to a
//! defensive copy: no writer can touch the pixels a reader holds.

use std::time::SystemTime;

use bytes::Bytes;

/// Bytes per pixel of the packed RGB8 layout
pub const RGB_CHANNELS: usize = 3;

/// A single decoded video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Packed RGB8 pixel data, row-major, no padding
    pub data: Bytes,
    /// Per-stream sequence number, assigned when published to a cache
    pub sequence: u64,
    /// Wall-clock capture time
    pub captured_at: SystemTime,
}

impl Frame {
    /// Create a frame from packed RGB8 pixels
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            data: data.into(),
            sequence: 0,
            captured_at: SystemTime::now(),
        }
    }

    /// Create a frame filled with a single color
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixels * RGB_CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self::new(width, height, data)
    }

    /// Whether the pixel buffer matches the declared dimensions
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * RGB_CHANNELS
    }

    /// Longer of width and height
    pub fn long_edge(&self) -> u32 {
        self.width.max(self.height)
    }

    /// Size of the pixel buffer in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_frame() {
        let frame = Frame::solid(4, 2, [10, 20, 30]);
        assert!(frame.is_valid());
        assert_eq!(frame.size(), 4 * 2 * 3);
        assert_eq!(&frame.data[..3], &[10, 20, 30]);
        assert_eq!(frame.sequence, 0);
    }

    #[test]
    fn test_invalid_frame() {
        let frame = Frame::new(4, 4, vec![0u8; 10]);
        assert!(!frame.is_valid());

        let empty = Frame::new(0, 0, Vec::new());
        assert!(!empty.is_valid());
    }

    #[test]
    fn test_long_edge() {
        assert_eq!(Frame::solid(1920, 1080, [0; 3]).long_edge(), 1920);
        assert_eq!(Frame::solid(720, 1280, [0; 3]).long_edge(), 1280);
    }
}
