//! Digital video recorder: file-backed writers and readers, the recorder and
//! player workers, and the controller that keeps them mutually exclusive

pub mod clip;
pub mod controller;
pub mod player;
pub mod raw;
pub mod recorder;

pub use clip::{ClipReader, ClipWriter};
pub use controller::{DvrController, DvrEvent, DvrState};
pub use player::Player;
pub use raw::{RawReader, RawWriter};
pub use recorder::Recorder;

use std::path::Path;

use tracing::{error, warn};

use crate::capture::frame::{Frame, Shape};
use crate::error::{Error, Result};

/// Extension of the timestamp-indexed raw container
pub const RAW_EXTENSION: &str = "vraw";
/// Extension of the fixed-rate compressed container
pub const CLIP_EXTENSION: &str = "vclip";

/// Sink for a sequence of frames
pub trait VideoWriter: Send {
    /// Create the output sized for `frame`; the frame itself is not written
    fn open(&mut self, frame: &Frame) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Append one frame
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and release the output
    fn close(&mut self) -> Result<()>;

    fn path(&self) -> &Path;
}

/// How a reader's frames should be spaced in time on playback
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pacing {
    /// Constant interval of `1 / fps`
    FixedRate(f64),
    /// Follow the stored per-frame capture timestamps
    Timestamped,
}

/// Source of stored frames
pub trait VideoReader: Send {
    /// Next frame in sequence, `None` past the end
    fn read(&mut self) -> Result<Option<Frame>>;

    fn seek(&mut self, frame_number: usize) -> Result<()>;

    fn rewind(&mut self) -> Result<()> {
        self.seek(0)
    }

    /// Number of stored frames
    fn length(&self) -> usize;

    fn fps(&self) -> f64;

    /// Index of the frame the next `read` returns
    fn frame_number(&self) -> usize;

    fn shape(&self) -> Shape;

    fn pacing(&self) -> Pacing;

    /// Capture time of frame `index` in seconds from the first frame
    fn timestamp(&self, _index: usize) -> Option<f64> {
        None
    }
}

/// Notifications from recorder and player workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Recorder counted a frame
    FrameNumber(u64),
    /// Player emitted a frame
    FramePlayed,
    /// Session is over
    Finished,
}

/// Session events are tagged with the id of the session that produced them
pub type SessionSender = flume::Sender<(u64, SessionEvent)>;

/// Result of offering one frame to a [`WriterSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The frame opened the output and fixed its format
    Opened,
    /// The frame was counted and, if on the stride, written
    Counted { frame_number: u64, written: bool },
    /// The frame ended the session without being counted
    Finished,
    /// The session was already over
    Ignored,
}

/// Recording policy wrapped around a [`VideoWriter`]: lazy open, frame
/// target, skip stride and format lock.
pub struct WriterSession {
    writer: Box<dyn VideoWriter>,
    target: u64,
    stride: u64,
    frame_number: u64,
    format: Option<Shape>,
    finished: bool,
    blank: bool,
}

impl WriterSession {
    pub fn new(writer: Box<dyn VideoWriter>, target: u64, stride: u64) -> Self {
        assert!(target > 0, "frame target must be positive");
        assert!(stride > 0, "skip stride must be positive");
        Self {
            writer,
            target,
            stride,
            frame_number: 0,
            format: None,
            finished: false,
            blank: false,
        }
    }

    /// Record zero-valued frames of the incoming shape instead of the data
    pub fn set_blank(&mut self, blank: bool) {
        self.blank = blank;
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    pub fn write(&mut self, frame: &Frame) -> WriteOutcome {
        if self.finished {
            return WriteOutcome::Ignored;
        }
        if !self.writer.is_open() {
            return match self.writer.open(frame) {
                Ok(()) => {
                    self.format = Some(frame.shape());
                    WriteOutcome::Opened
                }
                Err(e) => {
                    warn!("Could not write to {:?}: {}", self.writer.path(), e);
                    self.finish()
                }
            };
        }
        if self.frame_number >= self.target || self.format != Some(frame.shape()) {
            return self.finish();
        }

        let written = self.frame_number % self.stride == 0;
        if written {
            let result = if self.blank {
                self.writer
                    .write_frame(&Frame::filled(frame.shape(), 0))
            } else {
                self.writer.write_frame(frame)
            };
            if let Err(e) = result {
                error!("Write to {:?} failed: {}", self.writer.path(), e);
                return self.finish();
            }
            metrics::counter!("argus_frames_recorded").increment(1);
        }
        self.frame_number += 1;
        if self.frame_number >= self.target {
            self.finished = true;
        }
        WriteOutcome::Counted {
            frame_number: self.frame_number,
            written,
        }
    }

    fn finish(&mut self) -> WriteOutcome {
        self.finished = true;
        WriteOutcome::Finished
    }

    pub fn close(&mut self) -> Result<()> {
        if self.writer.is_open() {
            self.writer.close()?;
        }
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Writer for `path`, chosen by extension
pub fn writer_for(path: &Path, fps: f64) -> Result<Box<dyn VideoWriter>> {
    match extension(path).as_deref() {
        Some(RAW_EXTENSION) => Ok(Box::new(RawWriter::new(path))),
        Some(CLIP_EXTENSION) => Ok(Box::new(ClipWriter::new(path, fps))),
        _ => Err(Error::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Reader for `path`, chosen by extension
pub fn open_reader(path: &Path) -> Result<Box<dyn VideoReader>> {
    match extension(path).as_deref() {
        Some(RAW_EXTENSION) => Ok(Box::new(RawReader::open(path)?)),
        Some(CLIP_EXTENSION) => Ok(Box::new(ClipReader::open(path)?)),
        _ => Err(Error::UnsupportedFormat(path.to_path_buf())),
    }
}
