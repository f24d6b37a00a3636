pub mod camera;
pub mod decoder;
pub mod frame;
pub mod noise;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use camera::{Access, Camera, PropertyInfo, PropertyKind, PropertyValue, Settings};
pub use frame::{Frame, PixelFormat, Shape};
pub use noise::NoiseCamera;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Camera;
