//! Fixed-rate compressed container (`.vclip`)
//!
//! ```text
//! header:  b"ARGUSCLP" | version: u16 | width: u32 | height: u32 | color: u8 | fps: f64
//! record:  length: u32 | PNG image
//! ```
//!
//! Every frame has the header's geometry and is played back at its rate.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, BufMut, Bytes};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use memmap2::Mmap;
use tracing::debug;

use crate::capture::frame::{Frame, FrameMetadata, Shape};
use crate::dvr::{Pacing, VideoReader, VideoWriter};
use crate::error::{Error, Result};

const MAGIC: &[u8; 8] = b"ARGUSCLP";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 8 + 2 + 4 + 4 + 1 + 8;

fn color_type(shape: Shape) -> Result<ExtendedColorType> {
    match shape.channels {
        1 => Ok(ExtendedColorType::L8),
        3 => Ok(ExtendedColorType::Rgb8),
        n => Err(Error::PixelFormat(format!("{n} channel frames"))),
    }
}

pub struct ClipWriter {
    path: PathBuf,
    fps: f64,
    out: Option<BufWriter<File>>,
    color: ExtendedColorType,
    encoded: Vec<u8>,
}

impl ClipWriter {
    pub fn new(path: impl Into<PathBuf>, fps: f64) -> Self {
        Self {
            path: path.into(),
            fps,
            out: None,
            color: ExtendedColorType::L8,
            encoded: Vec::new(),
        }
    }
}

impl VideoWriter for ClipWriter {
    fn open(&mut self, frame: &Frame) -> Result<()> {
        let shape = frame.shape();
        self.color = color_type(shape)?;

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.put_slice(MAGIC);
        header.put_u16_le(VERSION);
        header.put_u32_le(shape.width);
        header.put_u32_le(shape.height);
        header.put_u8(u8::from(shape.is_color()));
        header.put_f64_le(self.fps);

        let mut out = BufWriter::new(File::create(&self.path)?);
        out.write_all(&header)?;
        self.out = Some(out);
        debug!("Recording {} at {:.1} fps to {:?}", shape, self.fps, self.path);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.out.is_some()
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| Error::DeviceClosed(self.path.display().to_string()))?;
        let shape = frame.shape();

        self.encoded.clear();
        PngEncoder::new(&mut self.encoded).write_image(
            &frame.data,
            shape.width,
            shape.height,
            self.color,
        )?;
        out.write_all(&(self.encoded.len() as u32).to_le_bytes())?;
        out.write_all(&self.encoded)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

pub struct ClipReader {
    path: PathBuf,
    map: Mmap,
    shape: Shape,
    fps: f64,
    /// Byte range of every encoded frame
    index: Vec<(usize, usize)>,
    position: usize,
}

impl ClipReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: read-only map of a file that is not written during playback.
        let map = unsafe { Mmap::map(&file)? };

        let mut buf = &map[..];
        if buf.remaining() < HEADER_LEN || &buf[..MAGIC.len()] != MAGIC {
            return Err(Error::corrupt(&path, "missing clip header"));
        }
        buf.advance(MAGIC.len());
        let version = buf.get_u16_le();
        if version != VERSION {
            return Err(Error::corrupt(&path, format!("version {version}")));
        }
        let width = buf.get_u32_le();
        let height = buf.get_u32_le();
        let shape = if buf.get_u8() != 0 {
            Shape::rgb(width, height)
        } else {
            Shape::gray(width, height)
        };
        let fps = buf.get_f64_le();
        if fps.is_nan() || fps <= 0.0 {
            return Err(Error::corrupt(&path, format!("frame rate {fps}")));
        }

        let mut index = Vec::new();
        while buf.remaining() >= 4 {
            let len = buf.get_u32_le() as usize;
            if buf.remaining() < len {
                break;
            }
            let start = map.len() - buf.remaining();
            index.push((start, start + len));
            buf.advance(len);
        }
        if index.is_empty() {
            return Err(Error::corrupt(&path, "no frames"));
        }
        debug!("Opened {:?}: {} frames of {}", path, index.len(), shape);

        Ok(Self {
            path,
            map,
            shape,
            fps,
            index,
            position: 0,
        })
    }
}

impl VideoReader for ClipReader {
    fn read(&mut self) -> Result<Option<Frame>> {
        let Some(&(start, end)) = self.index.get(self.position) else {
            return Ok(None);
        };
        let image = image::load_from_memory_with_format(&self.map[start..end], ImageFormat::Png)?;
        let samples = if self.shape.is_color() {
            image.into_rgb8().into_raw()
        } else {
            image.into_luma8().into_raw()
        };
        if samples.len() != self.shape.len() {
            return Err(Error::corrupt(
                &self.path,
                format!("frame {} does not match {}", self.position, self.shape),
            ));
        }
        let frame = Frame {
            data: Bytes::from(samples),
            meta: Arc::new(FrameMetadata {
                sequence: self.position as u64,
                shape: self.shape,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        };
        self.position += 1;
        Ok(Some(frame))
    }

    fn seek(&mut self, frame_number: usize) -> Result<()> {
        if frame_number > self.index.len() {
            return Err(Error::corrupt(
                &self.path,
                format!("seek to {frame_number} past {} frames", self.index.len()),
            ));
        }
        self.position = frame_number;
        Ok(())
    }

    fn length(&self) -> usize {
        self.index.len()
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_number(&self) -> usize {
        self.position
    }

    fn shape(&self) -> Shape {
        self.shape
    }

    fn pacing(&self) -> Pacing {
        Pacing::FixedRate(self.fps)
    }
}
