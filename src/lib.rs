pub mod capture;
#[cfg(feature = "display")]
pub mod display;
pub mod dvr;
pub mod error;
pub mod filters;
pub mod pipeline;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::{Camera, Frame, Shape};
pub use error::{Error, Result};
pub use filters::Channel;
pub use pipeline::FrameSource;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix of environment variable overrides, e.g. `ARGUS__DVR__NFRAMES=500`
const ENV_PREFIX: &str = "ARGUS";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub filter: FilterConfig,
    pub dvr: DvrConfig,
    pub pipeline: PipelineConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraKind {
    #[default]
    Noise,
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub camera: CameraKind,
    /// Device node; empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// Synthetic camera produces RGB frames
    pub color: bool,
    /// CPU core for the acquisition thread
    pub pin_core: Option<usize>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera: CameraKind::Noise,
            device: String::new(),
            width: 640,
            height: 480,
            fps: 30.0,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
            color: false,
            pin_core: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[default]
    None,
    Normalize,
    SmoothNormalize,
    SampleHold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub kind: FilterKind,
    /// Median cascade depth; the window spans `3^order` frames
    pub order: u32,
    pub mean: f32,
    pub darkcount: u8,
    pub channel: Channel,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            kind: FilterKind::None,
            order: 3,
            mean: 100.0,
            darkcount: 0,
            channel: Channel::All,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DvrConfig {
    pub filename: Option<PathBuf>,
    /// Playback file; defaults to `filename`
    pub playname: Option<PathBuf>,
    /// Frames counted before a recording finishes
    pub nframes: u64,
    /// Write one of every `nskip` counted frames
    pub nskip: u64,
    pub blank: bool,
}

impl Default for DvrConfig {
    fn default() -> Self {
        Self {
            filename: None,
            playname: None,
            nframes: 10_000,
            nskip: 1,
            blank: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of the display subscription; 0 means unbounded
    pub subscriber_capacity: usize,
    pub log_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 4,
            log_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

impl Config {
    /// Defaults, overlaid by an optional TOML file, overlaid by `ARGUS__*`
    /// environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default())?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let config = Config::default();
        assert_eq!(config.capture.camera, CameraKind::Noise);
        assert_eq!(config.filter.order, 3);
        assert_eq!(config.dvr.nframes, 10_000);
        assert_eq!(config.dvr.nskip, 1);
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("argus.toml");
        std::fs::write(
            &path,
            "[dvr]\nfilename = \"take.vraw\"\nnframes = 50\n\n[filter]\nkind = \"sample_hold\"\nchannel = \"green\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.dvr.filename, Some(PathBuf::from("take.vraw")));
        assert_eq!(config.dvr.nframes, 50);
        assert_eq!(config.dvr.nskip, 1);
        assert_eq!(config.filter.kind, FilterKind::SampleHold);
        assert_eq!(config.filter.channel, Channel::Green);
        assert_eq!(config.capture.width, 640);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
