//! Camera capability and the explicit property registry cameras publish

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capture::frame::{Frame, Shape};
use crate::error::Result;

/// Typed scalar carried by a named camera property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Snapshot of every readable property
pub type Settings = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Bool,
    Int,
    Float,
    Str,
}

/// Write access of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
    /// Writable only while the device is not streaming; the frame source
    /// brackets the write with pause/resume
    ReadWriteIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyInfo {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub access: Access,
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::Bool(_) => PropertyKind::Bool,
            Self::Int(_) => PropertyKind::Int,
            Self::Float(_) => PropertyKind::Float,
            Self::Str(_) => PropertyKind::Str,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            Self::Int(v) => Some(v != 0),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Self::Int(v) => Some(v),
            Self::Bool(v) => Some(v as i64),
            Self::Float(v) if v.fract() == 0.0 => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(v),
            Self::Int(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Converts to `kind` when the value can represent it without loss
    pub fn coerce(self, kind: PropertyKind) -> Option<Self> {
        match kind {
            PropertyKind::Bool => self.as_bool().map(Self::Bool),
            PropertyKind::Int => self.as_int().map(Self::Int),
            PropertyKind::Float => self.as_float().map(Self::Float),
            PropertyKind::Str => match self {
                Self::Str(s) => Some(Self::Str(s)),
                _ => None,
            },
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

/// Image dimension from an integer property, clamped to `1..=u32::MAX`
pub fn dimension(value: i64) -> u32 {
    u32::try_from(value.max(1)).unwrap_or(u32::MAX)
}

/// One registry entry: name, type tag, access mode and accessors
pub struct Property<C> {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub access: Access,
    pub get: fn(&C) -> PropertyValue,
    /// Receives a value already coerced to `kind`
    pub set: Option<fn(&mut C, PropertyValue)>,
}

/// A named device action
pub struct Command<C> {
    pub name: &'static str,
    pub run: fn(&mut C),
}

/// Static table mapping property names to typed accessors.
///
/// Built once per camera type; lookups of unknown names are logged and
/// ignored so a stale UI binding never takes down acquisition.
pub struct PropertyTable<C: 'static> {
    properties: &'static [Property<C>],
    commands: &'static [Command<C>],
}

impl<C> PropertyTable<C> {
    pub const fn new(properties: &'static [Property<C>], commands: &'static [Command<C>]) -> Self {
        Self {
            properties,
            commands,
        }
    }

    fn find(&self, key: &str) -> Option<&Property<C>> {
        self.properties.iter().find(|p| p.name == key)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.properties.iter().map(|p| p.name).collect()
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        self.commands.iter().map(|c| c.name).collect()
    }

    pub fn info(&self, key: &str) -> Option<PropertyInfo> {
        self.find(key).map(|p| PropertyInfo {
            name: p.name,
            kind: p.kind,
            access: p.access,
        })
    }

    pub fn get(&self, camera: &C, key: &str) -> Option<PropertyValue> {
        match self.find(key) {
            Some(p) => Some((p.get)(camera)),
            None => {
                warn!("Unknown property: {}", key);
                None
            }
        }
    }

    pub fn set(&self, camera: &mut C, key: &str, value: PropertyValue) {
        let Some(property) = self.find(key) else {
            warn!("Unknown property: {}", key);
            return;
        };
        let setter = match (property.access, property.set) {
            (Access::ReadOnly, _) | (_, None) => {
                warn!("Property {} is read-only", key);
                return;
            }
            (_, Some(setter)) => setter,
        };
        match value.clone().coerce(property.kind) {
            Some(value) => {
                debug!("Setting {}: {}", key, value);
                setter(camera, value);
            }
            None => warn!(
                "Property {} expects {:?}, got {}",
                key, property.kind, value
            ),
        }
    }

    pub fn execute(&self, camera: &mut C, key: &str) {
        match self.commands.iter().find(|c| c.name == key) {
            Some(command) => (command.run)(camera),
            None => warn!("Unknown command: {}", key),
        }
    }
}

/// An imaging device.
///
/// Implementations are moved onto the acquisition thread of a
/// [`FrameSource`](crate::pipeline::FrameSource); every call happens with the
/// source's camera mutex held, so at most one call is in flight.
pub trait Camera: Send {
    fn name(&self) -> &str;

    /// Configure the device so that `read` will succeed
    fn open(&mut self) -> Result<()>;

    /// Release the device; `open` may be called again afterwards
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Grab one frame. An error is a transient failure, e.g. a grab that
    /// timed out without data.
    fn read(&mut self) -> Result<Frame>;

    /// Current pixel geometry
    fn shape(&self) -> Shape;

    fn properties(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn property(&self, _key: &str) -> Option<PropertyInfo> {
        None
    }

    fn get(&self, key: &str) -> Option<PropertyValue> {
        warn!("Unknown property: {}", key);
        None
    }

    fn set(&mut self, key: &str, _value: PropertyValue) {
        warn!("Unknown property: {}", key);
    }

    fn commands(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn execute(&mut self, key: &str) {
        warn!("Unknown command: {}", key);
    }

    fn settings(&self) -> Settings {
        self.properties()
            .into_iter()
            .filter_map(|name| self.get(name).map(|value| (name.to_owned(), value)))
            .collect()
    }

    fn set_settings(&mut self, settings: &Settings) {
        for (key, value) in settings {
            self.set(key, value.clone());
        }
    }
}

impl<T: Camera + ?Sized> Camera for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }
    fn close(&mut self) {
        (**self).close()
    }
    fn is_open(&self) -> bool {
        (**self).is_open()
    }
    fn read(&mut self) -> Result<Frame> {
        (**self).read()
    }
    fn shape(&self) -> Shape {
        (**self).shape()
    }
    fn properties(&self) -> Vec<&'static str> {
        (**self).properties()
    }
    fn property(&self, key: &str) -> Option<PropertyInfo> {
        (**self).property(key)
    }
    fn get(&self, key: &str) -> Option<PropertyValue> {
        (**self).get(key)
    }
    fn set(&mut self, key: &str, value: PropertyValue) {
        (**self).set(key, value)
    }
    fn commands(&self) -> Vec<&'static str> {
        (**self).commands()
    }
    fn execute(&mut self, key: &str) {
        (**self).execute(key)
    }
}
