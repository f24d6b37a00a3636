//! Error types shared across capture, filtering and the DVR

use std::path::PathBuf;

use crate::capture::frame::Shape;

/// Errors surfaced by the library
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not open {device}: {reason}")]
    DeviceOpen { device: String, reason: String },

    #[error("device {0} is not open")]
    DeviceClosed(String),

    #[error("frame read failed: {0}")]
    Read(String),

    #[error("device timed out waiting for a frame")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("unsupported video file {0:?}")]
    UnsupportedFormat(PathBuf),

    #[error("corrupt video file {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("frame data holds {actual} samples but shape {shape} needs {expected}")]
    ShapeMismatch {
        shape: Shape,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported pixel format: {0}")]
    PixelFormat(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
