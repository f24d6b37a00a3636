//! Timestamped raw container (`.vraw`)
//!
//! ```text
//! header:  b"ARGUSRAW" | version: u16
//! record:  timestamp: f64 | height: u32 | width: u32 | channels: u8 | samples
//! ```
//!
//! All integers are little endian. The timestamp is in seconds relative to
//! the first recorded frame. Records may change shape between frames; a
//! truncated trailing record is ignored on read.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, BufMut, Bytes};
use memmap2::Mmap;
use tracing::{debug, warn};

use crate::capture::frame::{Frame, FrameMetadata, Shape};
use crate::dvr::{Pacing, VideoReader, VideoWriter};
use crate::error::{Error, Result};

const MAGIC: &[u8; 8] = b"ARGUSRAW";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 10;
const RECORD_HEADER_LEN: usize = 8 + 4 + 4 + 1;
const DEFAULT_FPS: f64 = 30.0;

pub struct RawWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    origin: Option<Instant>,
    frames: u64,
}

impl RawWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            out: None,
            origin: None,
            frames: 0,
        }
    }
}

impl VideoWriter for RawWriter {
    fn open(&mut self, frame: &Frame) -> Result<()> {
        let mut out = BufWriter::new(File::create(&self.path)?);
        out.write_all(MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        self.out = Some(out);
        self.origin = None;
        self.frames = 0;
        debug!("Recording {} frames to {:?}", frame.shape(), self.path);
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
        let origin = *self.origin.get_or_insert(frame.timestamp);
        let shape = frame.shape();

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN);
        record.put_f64_le(frame.timestamp.duration_since(origin).as_secs_f64());
        record.put_u32_le(shape.height);
        record.put_u32_le(shape.width);
        record.put_u8(shape.channels);
        out.write_all(&record)?;
        out.write_all(&frame.data)?;
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
            out.get_ref().sync_all()?;
            debug!("Closed {:?} after {} frames", self.path, self.frames);
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, Copy)]
struct Record {
    offset: usize,
    shape: Shape,
    timestamp: f64,
}

pub struct RawReader {
    path: PathBuf,
    map: Mmap,
    records: Vec<Record>,
    position: usize,
    fps: f64,
}

impl RawReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: the map is read-only and recordings are not modified while
        // they are played back.
        let map = unsafe { Mmap::map(&file)? };

        let mut buf = &map[..];
        if buf.remaining() < HEADER_LEN || &buf[..MAGIC.len()] != MAGIC {
            return Err(Error::corrupt(&path, "missing raw header"));
        }
        buf.advance(MAGIC.len());
        let version = buf.get_u16_le();
        if version != VERSION {
            return Err(Error::corrupt(&path, format!("version {version}")));
        }

        let mut records = Vec::new();
        while buf.remaining() >= RECORD_HEADER_LEN {
            let offset = map.len() - buf.remaining() + RECORD_HEADER_LEN;
            let timestamp = buf.get_f64_le();
            let height = buf.get_u32_le();
            let width = buf.get_u32_le();
            let channels = buf.get_u8();
            let shape = Shape {
                height,
                width,
                channels,
            };
            if buf.remaining() < shape.len() {
                break;
            }
            buf.advance(shape.len());
            records.push(Record {
                offset,
                shape,
                timestamp,
            });
        }
        if buf.has_remaining() {
            warn!(
                "Ignoring {} trailing bytes in {:?}",
                buf.remaining(),
                path
            );
        }
        if records.is_empty() {
            return Err(Error::corrupt(&path, "no frames"));
        }

        let fps = match (records.first(), records.last()) {
            (Some(first), Some(last)) if last.timestamp > first.timestamp => {
                (records.len() - 1) as f64 / (last.timestamp - first.timestamp)
            }
            _ => DEFAULT_FPS,
        };
        debug!("Opened {:?}: {} frames at {:.1} fps", path, records.len(), fps);

        Ok(Self {
            path,
            map,
            records,
            position: 0,
            fps,
        })
    }
}

impl VideoReader for RawReader {
    fn read(&mut self) -> Result<Option<Frame>> {
        let Some(record) = self.records.get(self.position).copied() else {
            return Ok(None);
        };
        let end = record.offset + record.shape.len();
        let data = Bytes::copy_from_slice(&self.map[record.offset..end]);
        let frame = Frame {
            data,
            meta: Arc::new(FrameMetadata {
                sequence: self.position as u64,
                shape: record.shape,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        };
        self.position += 1;
        Ok(Some(frame))
    }

    fn seek(&mut self, frame_number: usize) -> Result<()> {
        if frame_number > self.records.len() {
            return Err(Error::corrupt(
                &self.path,
                format!("seek to {frame_number} past {} frames", self.records.len()),
            ));
        }
        self.position = frame_number;
        Ok(())
    }

    fn length(&self) -> usize {
        self.records.len()
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_number(&self) -> usize {
        self.position
    }

    fn shape(&self) -> Shape {
        self.records[0].shape
    }

    fn pacing(&self) -> Pacing {
        Pacing::Timestamped
    }

    fn timestamp(&self, index: usize) -> Option<f64> {
        self.records.get(index).map(|r| r.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame_at(origin: Instant, ms: u64, value: u8, shape: Shape) -> Frame {
        let mut frame = Frame::filled(shape, value);
        frame.timestamp = origin + Duration::from_millis(ms);
        frame
    }

    #[test]
    fn frames_and_timestamps_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.vraw");
        let origin = Instant::now();
        let shape = Shape::gray(4, 3);

        let mut writer = RawWriter::new(&path);
        writer.open(&Frame::filled(shape, 0)).unwrap();
        for (i, ms) in [0u64, 100, 250].into_iter().enumerate() {
            writer
                .write_frame(&frame_at(origin, 100 + ms, i as u8 + 1, shape))
                .unwrap();
        }
        writer.close().unwrap();

        let mut reader = RawReader::open(&path).unwrap();
        assert_eq!(reader.length(), 3);
        assert_eq!(reader.shape(), shape);
        assert_eq!(reader.pacing(), Pacing::Timestamped);
        assert_eq!(reader.timestamp(0), Some(0.0));
        assert!((reader.timestamp(2).unwrap() - 0.25).abs() < 1e-9);
        assert!((reader.fps() - 8.0).abs() < 1e-9);

        let values: Vec<u8> = std::iter::from_fn(|| reader.read().unwrap())
            .map(|f| f.data[0])
            .collect();
        assert_eq!(values, vec![1, 2, 3]);

        reader.seek(1).unwrap();
        assert_eq!(reader.read().unwrap().unwrap().data[0], 2);
        assert!(reader.seek(4).is_err());
    }

    #[test]
    fn truncated_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.vraw");
        let shape = Shape::gray(2, 2);
        let mut writer = RawWriter::new(&path);
        writer.open(&Frame::filled(shape, 0)).unwrap();
        writer.write_frame(&Frame::filled(shape, 7)).unwrap();
        writer.write_frame(&Frame::filled(shape, 8)).unwrap();
        writer.close().unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 2).unwrap();
        drop(file);

        let reader = RawReader::open(&path).unwrap();
        assert_eq!(reader.length(), 1);
        assert_eq!(reader.fps(), DEFAULT_FPS);
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.vraw");
        std::fs::write(&path, b"not a recording").unwrap();
        assert!(matches!(
            RawReader::open(&path),
            Err(Error::Corrupt { .. })
        ));
    }
}
