use serde::{Deserialize, Serialize};

use crate::capture::frame::{Frame, Shape};
use crate::filters::VideoFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    Green,
    Blue,
    #[default]
    All,
}

impl Channel {
    fn index(self) -> Option<usize> {
        match self {
            Self::Red => Some(0),
            Self::Green => Some(1),
            Self::Blue => Some(2),
            Self::All => None,
        }
    }
}

/// Extracts one color channel as a grayscale frame; gray input passes through
#[derive(Default)]
pub struct ChannelFilter {
    pub channel: Channel,
    frame: Option<Frame>,
}

impl ChannelFilter {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            frame: None,
        }
    }
}

impl VideoFilter for ChannelFilter {
    fn add(&mut self, frame: &Frame) {
        self.frame = Some(frame.clone());
    }

    fn get(&mut self) -> Option<Frame> {
        let frame = self.frame.as_ref()?;
        let shape = frame.shape();
        let index = match self.channel.index() {
            Some(index) if shape.is_color() && index < shape.channels as usize => index,
            _ => return Some(frame.clone()),
        };
        let samples = frame
            .data
            .chunks_exact(shape.channels as usize)
            .map(|px| px[index])
            .collect();
        Some(frame.derive(Shape::gray(shape.width, shape.height), samples))
    }
}
