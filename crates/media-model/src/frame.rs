//! Video frames as delivered by the live transport.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Bytes per pixel of the packed RGB24 layout used throughout the pipeline.
pub const RGB24_BYTES_PER_PIXEL: usize = 3;

/// Where a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSource {
    /// A participant's camera.
    Camera,
    /// A participant's screen share.
    Screen,
    /// Synthesized filler; never selected as a real frame.
    Placeholder,
}

impl FrameSource {
    /// Whether frames from this source carry live content.
    pub fn is_real(self) -> bool {
        !matches!(self, FrameSource::Placeholder)
    }
}

/// A packed RGB24 image. Cloning shares the pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGB24 pixels, `width * height * 3` bytes.
    pub data: Bytes,
}

/// Why a frame was refused at ingest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame has zero area ({width}x{height})")]
    EmptyDimensions { width: u32, height: u32 },

    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height} rgb24")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

impl VideoFrame {
    /// Wrap an RGB24 buffer, checking that it matches the dimensions.
    pub fn from_rgb24(width: u32, height: u32, data: impl Into<Bytes>) -> Result<Self, FrameError> {
        let frame = Self {
            width,
            height,
            data: data.into(),
        };
        frame.validate()?;
        Ok(frame)
    }

    /// A frame filled with one color.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * RGB24_BYTES_PER_PIXEL);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data: Bytes::from(data),
        }
    }

    /// Expected buffer length for the frame's dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * RGB24_BYTES_PER_PIXEL
    }

    /// Check dimensions and buffer length.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::EmptyDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.expected_len();
        if self.data.len() != expected {
            return Err(FrameError::SizeMismatch {
                width: self.width,
                height: self.height,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Whether the frame already has the given dimensions.
    pub fn has_size(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

/// A frame stamped with its capture time. Immutable once created.
#[derive(Debug, Clone)]
pub struct TimestampedFrame {
    pub frame: VideoFrame,
    /// Seconds since recording start on the monotonic clock.
    pub timestamp_secs: f64,
    pub source: FrameSource,
}

impl TimestampedFrame {
    pub fn new(frame: VideoFrame, timestamp_secs: f64, source: FrameSource) -> Self {
        Self {
            frame,
            timestamp_secs: timestamp_secs.max(0.0),
            source,
        }
    }

    /// Output slot for rate `fps`: `floor(timestamp * fps)`.
    pub fn slot(&self, fps: u32) -> u64 {
        slot_for(self.timestamp_secs, fps)
    }
}

/// Discretize a timestamp into an output slot.
pub fn slot_for(timestamp_secs: f64, fps: u32) -> u64 {
    (timestamp_secs.max(0.0) * fps as f64).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb24_size_is_checked() {
        assert!(VideoFrame::from_rgb24(2, 2, vec![0u8; 12]).is_ok());
        assert_eq!(
            VideoFrame::from_rgb24(2, 2, vec![0u8; 11]),
            Err(FrameError::SizeMismatch {
                width: 2,
                height: 2,
                expected: 12,
                actual: 11
            })
        );
        assert!(matches!(
            VideoFrame::from_rgb24(0, 4, Vec::new()),
            Err(FrameError::EmptyDimensions { .. })
        ));
    }

    #[test]
    fn test_slot_discretization() {
        assert_eq!(slot_for(0.0, 24), 0);
        assert_eq!(slot_for(0.5, 24), 12);
        assert_eq!(slot_for(1.0 / 24.0 - 1e-9, 24), 0);
        assert_eq!(slot_for(-3.0, 24), 0);
    }

    #[test]
    fn test_negative_timestamps_clamp_to_zero() {
        let frame = TimestampedFrame::new(VideoFrame::solid(1, 1, [0, 0, 0]), -0.2, FrameSource::Camera);
        assert_eq!(frame.timestamp_secs, 0.0);
        assert!(frame.source.is_real());
        assert!(!FrameSource::Placeholder.is_real());
    }
}
