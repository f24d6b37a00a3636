use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Frame data shared read-only between every consumer of a source
#[derive(Clone)]
pub struct Frame {
    /// Immutable 8-bit samples, row-major, channels interleaved
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp, drives recording and playback timing
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub shape: Shape,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel geometry of a frame: rows, columns and interleaved channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub height: u32,
    pub width: u32,
    pub channels: u8,
}

impl Shape {
    pub const fn gray(width: u32, height: u32) -> Self {
        Self {
            height,
            width,
            channels: 1,
        }
    }

    pub const fn rgb(width: u32, height: u32) -> Self {
        Self {
            height,
            width,
            channels: 3,
        }
    }

    pub fn is_color(&self) -> bool {
        self.channels > 1
    }

    /// Number of samples a frame of this shape holds
    pub fn len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Pixel formats a device may deliver before decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
}

impl Frame {
    /// Wrap owned samples, checking them against `shape`
    pub fn new(shape: Shape, data: impl Into<Bytes>) -> Result<Self> {
        Self::with_sequence(shape, data, 0)
    }

    pub fn with_sequence(shape: Shape, data: impl Into<Bytes>, sequence: u64) -> Result<Self> {
        let data = data.into();
        if data.len() != shape.len() {
            return Err(Error::ShapeMismatch {
                shape,
                expected: shape.len(),
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                shape,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        })
    }

    /// A frame of `shape` filled with `value`
    pub fn filled(shape: Shape, value: u8) -> Self {
        Self {
            data: Bytes::from(vec![value; shape.len()]),
            meta: Arc::new(FrameMetadata {
                sequence: 0,
                shape,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    /// New samples carrying this frame's sequence number and timestamps
    pub(crate) fn derive(&self, shape: Shape, data: Vec<u8>) -> Self {
        debug_assert_eq!(shape.len(), data.len());
        Self {
            data: Bytes::from(data),
            meta: Arc::new(FrameMetadata {
                sequence: self.meta.sequence,
                shape,
                device_timestamp: self.meta.device_timestamp,
            }),
            timestamp: self.timestamp,
        }
    }

    pub fn shape(&self) -> Shape {
        self.meta.shape
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn is_color(&self) -> bool {
        self.meta.shape.is_color()
    }

    /// Owned copy of the samples for consumers that need to mutate
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("shape", &self.meta.shape)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_wrong_sample_count() {
        let err = Frame::new(Shape::gray(4, 2), vec![0u8; 7]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: 8, .. }));
    }

    #[test]
    fn clones_share_the_same_buffer() {
        let frame = Frame::new(Shape::rgb(2, 2), vec![7u8; 12]).unwrap();
        let copy = frame.clone();
        assert_eq!(frame.data.as_ptr(), copy.data.as_ptr());
        assert!(copy.is_color());
    }
}
