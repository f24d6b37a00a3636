//! V4L2 camera backend with memory-mapped streaming

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::camera::{
    dimension, Access, Camera, Property, PropertyInfo, PropertyKind, PropertyTable, PropertyValue,
};
use crate::capture::decoder::decode_frame;
use crate::capture::frame::{Frame, FrameMetadata, PixelFormat, Shape};
use crate::error::{Error, Result};
use crate::CaptureConfig;

/// V4L2 capture device exposed as a [`Camera`]
pub struct V4l2Camera {
    path: String,
    width: u32,
    height: u32,
    fps: f64,
    format: PixelFormat,
    buffer_count: u32,
    device: Option<Box<Device>>,
    stream: Option<MmapStream<'static>>,
    sequence: u64,
    reconfigure: bool,
}

static PROPERTIES: PropertyTable<V4l2Camera> = PropertyTable::new(
    &[
        Property {
            name: "device",
            kind: PropertyKind::Str,
            access: Access::ReadOnly,
            get: |c| PropertyValue::Str(c.path.clone()),
            set: None,
        },
        Property {
            name: "width",
            kind: PropertyKind::Int,
            access: Access::ReadWriteIdle,
            get: |c| PropertyValue::from(c.width),
            set: Some(|c, v| {
                c.width = v.as_int().map_or(c.width, dimension);
                c.reconfigure = true;
            }),
        },
        Property {
            name: "height",
            kind: PropertyKind::Int,
            access: Access::ReadWriteIdle,
            get: |c| PropertyValue::from(c.height),
            set: Some(|c, v| {
                c.height = v.as_int().map_or(c.height, dimension);
                c.reconfigure = true;
            }),
        },
        Property {
            name: "fps",
            kind: PropertyKind::Float,
            access: Access::ReadOnly,
            get: |c| PropertyValue::Float(c.fps),
            set: None,
        },
    ],
    &[],
);

impl V4l2Camera {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            path: config.device.clone(),
            width: config.width,
            height: config.height,
            fps: config.fps,
            format: config.format,
            buffer_count: config.buffer_count,
            device: None,
            stream: None,
            sequence: 0,
            reconfigure: false,
        }
    }

    fn fourcc(&self) -> Result<FourCC> {
        match self.format {
            PixelFormat::Mjpeg => Ok(FourCC::new(b"MJPG")),
            PixelFormat::Yuyv4 => Ok(FourCC::new(b"YUYV")),
            PixelFormat::Rgb24 => Ok(FourCC::new(b"RGB3")),
            PixelFormat::Gray8 => Ok(FourCC::new(b"GREY")),
            other => Err(Error::PixelFormat(format!("{other:?}"))),
        }
    }

    fn open_device(&mut self) -> std::io::Result<()> {
        let device = Device::with_path(&self.path)?;

        // Query capabilities
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(std::io::Error::other("device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = self.width;
        fmt.height = self.height;
        fmt.fourcc = self
            .fourcc()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let fmt = device.set_format(&fmt)?;
        // The driver may round the requested geometry
        self.width = fmt.width;
        self.height = fmt.height;

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, self.buffer_count)?;
        info!("Capture stream started with {} buffers", self.buffer_count);

        self.device = Some(Box::new(device));
        self.stream = Some(stream);
        Ok(())
    }
}

impl Camera for V4l2Camera {
    fn name(&self) -> &str {
        &self.path
    }

    fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        info!("Initializing V4L2 capture: {}", self.path);
        self.open_device().map_err(|e| Error::DeviceOpen {
            device: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn close(&mut self) {
        self.stream = None;
        self.device = None;
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    #[instrument(skip(self))]
    fn read(&mut self) -> Result<Frame> {
        if self.reconfigure && self.is_open() {
            self.reconfigure = false;
            self.close();
            self.open()?;
        }
        let timestamp = Instant::now();

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::DeviceClosed(self.path.clone()))?;

        let (buf, meta) = stream.next().map_err(|e| Error::Read(e.to_string()))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let (shape, samples) = decode_frame(&buf[..used], self.format, self.width, self.height)?;

        self.sequence += 1;

        Ok(Frame {
            data: Bytes::from(samples),
            meta: Arc::new(FrameMetadata {
                sequence: self.sequence,
                shape,
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                ),
            }),
            timestamp,
        })
    }

    fn shape(&self) -> Shape {
        match self.format {
            PixelFormat::Gray8 => Shape::gray(self.width, self.height),
            _ => Shape::rgb(self.width, self.height),
        }
    }

    fn properties(&self) -> Vec<&'static str> {
        PROPERTIES.names()
    }

    fn property(&self, key: &str) -> Option<PropertyInfo> {
        PROPERTIES.info(key)
    }

    fn get(&self, key: &str) -> Option<PropertyValue> {
        PROPERTIES.get(self, key)
    }

    fn set(&mut self, key: &str, value: PropertyValue) {
        PROPERTIES.set(self, key, value)
    }
}

/// Find the first capture device offering a format we can decode
pub fn auto_detect_device() -> Option<(String, PixelFormat)> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            warn!("Cannot enumerate formats of {}", path);
            continue;
        };
        // Prefer devices with MJPEG support
        for fmt in formats {
            if fmt.fourcc == FourCC::new(b"MJPG") {
                info!("Found MJPEG device: {} - {}", path, caps.card);
                return Some((path, PixelFormat::Mjpeg));
            } else if fmt.fourcc == FourCC::new(b"YUYV") {
                info!("Found YUYV device: {} - {}", path, caps.card);
                return Some((path, PixelFormat::Yuyv4));
            }
        }
    }

    None
}
