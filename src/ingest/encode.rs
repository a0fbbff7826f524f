//! JPEG encoding and downscaling

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, RgbImage};

use crate::capture::Frame;
use crate::error::{Error, Result};

/// Dimensions after capping the long edge at `max_long_edge`, aspect preserved
pub fn scaled_size(width: u32, height: u32, max_long_edge: u32) -> (u32, u32) {
    let long = width.max(height);
    if long <= max_long_edge || long == 0 {
        return (width, height);
    }

    let scale = |v: u32| ((v as u64 * max_long_edge as u64 + long as u64 / 2) / long as u64) as u32;
    (scale(width).max(1), scale(height).max(1))
}

/// Downscale a frame whose long edge exceeds `max_long_edge`
///
/// Frames already within the cap are returned as a cheap clone.
pub fn downscale(frame: &Frame, max_long_edge: u32) -> Result<Frame> {
    let (width, height) = scaled_size(frame.width, frame.height, max_long_edge);
    if (width, height) == (frame.width, frame.height) {
        return Ok(frame.clone());
    }

    let image = RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec())
        .ok_or_else(|| Error::Encode("pixel buffer does not match frame size".into()))?;
    let resized = image::imageops::resize(&image, width, height, FilterType::Triangle);

    Ok(Frame {
        width,
        height,
        data: Bytes::from(resized.into_raw()),
        sequence: frame.sequence,
        captured_at: frame.captured_at,
    })
}

/// Encode a frame as JPEG at `quality` (clamped to 1..=100)
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Bytes> {
    if !frame.is_valid() {
        return Err(Error::Encode(format!(
            "invalid frame {}x{} with {} bytes",
            frame.width,
            frame.height,
            frame.data.len()
        )));
    }

    let mut out = Vec::with_capacity(frame.data.len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .write_image(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| Error::Encode(e.to_string()))?;

    Ok(Bytes::from(out))
}

/// Downscale if needed, then encode
pub fn encode_for_delivery(frame: &Frame, max_long_edge: u32, quality: u8) -> Result<Bytes> {
    let scaled = downscale(frame, max_long_edge)?;
    encode_jpeg(&scaled, quality)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

    #[test]
    fn test_scaled_size() {
        assert_eq!(scaled_size(1920, 1080, 1280), (1280, 720));
        assert_eq!(scaled_size(1080, 1920, 1280), (720, 1280));
        assert_eq!(scaled_size(1280, 720, 1280), (1280, 720));
        assert_eq!(scaled_size(640, 480, 1280), (640, 480));
        assert_eq!(scaled_size(4000, 1, 1280), (1280, 1));
    }

    #[test]
    fn test_downscale_preserves_identity() {
        let mut frame = Frame::solid(64, 32, [1, 2, 3]);
        frame.sequence = 9;

        let scaled = downscale(&frame, 16).unwrap();
        assert_eq!((scaled.width, scaled.height), (16, 8));
        assert_eq!(scaled.sequence, 9);
        assert!(scaled.is_valid());
    }

    #[test]
    fn test_downscale_noop() {
        let frame = Frame::solid(8, 8, [0; 3]);
        let same = downscale(&frame, 1280).unwrap();
        assert_eq!(same.data, frame.data);
    }

    #[test]
    fn test_encode_jpeg() {
        let frame = Frame::solid(16, 16, [200, 100, 50]);
        let jpeg = encode_jpeg(&frame, 80).unwrap();
        assert_eq!(&jpeg[..2], &JPEG_SOI);
    }

    #[test]
    fn test_quality_affects_size() {
        let pixels: Vec<u8> = (0..64 * 64 * 3).map(|i| (i * 37 % 251) as u8).collect();
        let frame = Frame::new(64, 64, pixels);

        let low = encode_jpeg(&frame, 10).unwrap();
        let high = encode_jpeg(&frame, 95).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_encode_invalid_frame() {
        let frame = Frame::new(16, 16, vec![0u8; 5]);
        assert!(matches!(encode_jpeg(&frame, 50), Err(Error::Encode(_))));
    }
}
