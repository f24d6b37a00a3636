//! Synthetic camera producing uniformly distributed noise at a fixed rate

use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::capture::camera::{
    dimension, Access, Camera, Command, Property, PropertyInfo, PropertyKind, PropertyTable,
    PropertyValue,
};
use crate::capture::frame::{Frame, Shape};
use crate::error::{Error, Result};

const DEFAULT_FPS: f64 = 30.0;

fn valid_fps(fps: f64) -> bool {
    fps.is_finite() && fps > 0.0
}

pub struct NoiseCamera {
    width: u32,
    height: u32,
    fps: f64,
    color: bool,
    seed: u64,
    rng: Option<StdRng>,
    sequence: u64,
    next_due: Option<Instant>,
}

static PROPERTIES: PropertyTable<NoiseCamera> = PropertyTable::new(
    &[
        Property {
            name: "width",
            kind: PropertyKind::Int,
            access: Access::ReadWriteIdle,
            get: |c| PropertyValue::from(c.width),
            set: Some(|c, v| c.width = v.as_int().map_or(c.width, dimension)),
        },
        Property {
            name: "height",
            kind: PropertyKind::Int,
            access: Access::ReadWriteIdle,
            get: |c| PropertyValue::from(c.height),
            set: Some(|c, v| c.height = v.as_int().map_or(c.height, dimension)),
        },
        Property {
            name: "fps",
            kind: PropertyKind::Float,
            access: Access::ReadWrite,
            get: |c| PropertyValue::Float(c.fps),
            set: Some(|c, v| {
                if let Some(fps) = v.as_float().filter(|f| valid_fps(*f)) {
                    c.fps = fps;
                }
            }),
        },
        Property {
            name: "color",
            kind: PropertyKind::Bool,
            access: Access::ReadWriteIdle,
            get: |c| PropertyValue::Bool(c.color),
            set: Some(|c, v| c.color = v.as_bool().unwrap_or(c.color)),
        },
        Property {
            name: "seed",
            kind: PropertyKind::Int,
            access: Access::ReadWrite,
            get: |c| PropertyValue::Int(c.seed as i64),
            set: Some(|c, v| {
                c.seed = v.as_int().unwrap_or(c.seed as i64) as u64;
                c.reseed();
            }),
        },
    ],
    &[Command {
        name: "reseed",
        run: |c| c.reseed(),
    }],
);

impl NoiseCamera {
    /// A rate that is not a positive finite number falls back to 30 fps
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        let fps = if valid_fps(fps) {
            fps
        } else {
            warn!("Invalid noise frame rate {}, using {}", fps, DEFAULT_FPS);
            DEFAULT_FPS
        };
        Self {
            width: width.max(1),
            height: height.max(1),
            fps,
            color: false,
            seed: 0,
            rng: None,
            sequence: 0,
            next_due: None,
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn reseed(&mut self) {
        if self.rng.is_some() {
            self.rng = Some(StdRng::seed_from_u64(self.seed));
        }
    }

    fn delay(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }
}

impl Default for NoiseCamera {
    fn default() -> Self {
        Self::new(640, 480, DEFAULT_FPS)
    }
}

impl Camera for NoiseCamera {
    fn name(&self) -> &str {
        "noise"
    }

    fn open(&mut self) -> Result<()> {
        if self.rng.is_none() {
            debug!("Opening noise camera {}", self.shape());
            self.rng = Some(StdRng::seed_from_u64(self.seed));
            self.next_due = None;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.rng = None;
    }

    fn is_open(&self) -> bool {
        self.rng.is_some()
    }

    fn read(&mut self) -> Result<Frame> {
        // Pace to the nominal frame rate like a free-running sensor
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + self.delay());

        let shape = self.shape();
        let rng = self
            .rng
            .as_mut()
            .ok_or_else(|| Error::DeviceClosed("noise".into()))?;
        let mut data = vec![0u8; shape.len()];
        rng.fill(&mut data[..]);
        self.sequence += 1;
        Frame::with_sequence(shape, data, self.sequence)
    }

    fn shape(&self) -> Shape {
        if self.color {
            Shape::rgb(self.width, self.height)
        } else {
            Shape::gray(self.width, self.height)
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

    fn commands(&self) -> Vec<&'static str> {
        PROPERTIES.command_names()
    }

    fn execute(&mut self, key: &str) {
        PROPERTIES.execute(self, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_requires_open() {
        let mut camera = NoiseCamera::new(8, 4, 1000.0);
        assert!(camera.read().is_err());
        camera.open().unwrap();
        let frame = camera.read().unwrap();
        assert_eq!(frame.shape(), Shape::gray(8, 4));
        assert_eq!(frame.sequence(), 1);
    }

    #[test]
    fn reseed_repeats_the_stream() {
        let mut camera = NoiseCamera::new(16, 16, 1000.0).with_seed(7);
        camera.open().unwrap();
        let first = camera.read().unwrap();
        camera.execute("reseed");
        let again = camera.read().unwrap();
        assert_eq!(first.data, again.data);
    }

    #[test]
    fn shape_follows_properties() {
        let mut camera = NoiseCamera::default();
        camera.set("width", PropertyValue::Int(32));
        camera.set("color", true.into());
        assert_eq!(camera.shape(), Shape::rgb(32, 480));
        let settings = camera.settings();
        assert_eq!(settings["fps"], PropertyValue::Float(30.0));
        assert_eq!(settings.len(), 5);
    }

    #[test]
    fn unusable_rates_fall_back_to_default() {
        for fps in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let mut camera = NoiseCamera::new(4, 4, fps);
            assert_eq!(camera.get("fps"), Some(PropertyValue::Float(30.0)));
            camera.open().unwrap();
            camera.read().unwrap();
        }

        let mut camera = NoiseCamera::new(4, 4, 50.0);
        camera.set("fps", PropertyValue::Float(f64::INFINITY));
        assert_eq!(camera.get("fps"), Some(PropertyValue::Float(50.0)));
    }

    #[test]
    fn oversized_dimensions_saturate() {
        let mut camera = NoiseCamera::default();
        camera.set("width", PropertyValue::Int(i64::from(u32::MAX) + 10));
        camera.set("height", PropertyValue::Int(-3));
        assert_eq!(camera.get("width"), Some(PropertyValue::from(u32::MAX)));
        assert_eq!(camera.get("height"), Some(PropertyValue::from(1u32)));
    }
}
