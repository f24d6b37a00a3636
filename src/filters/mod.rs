//! Frame filters applied between acquisition and the consumers

pub mod channel;
pub mod median;
pub mod normalize;

pub use channel::{Channel, ChannelFilter};
pub use median::{BackgroundEstimator, MedianCascade, SmoothMedian};
pub use normalize::{Normalizer, SampleHold};

use crate::capture::frame::Frame;
use crate::{FilterConfig, FilterKind};

/// A stateful per-frame transform.
///
/// Filters run on the consuming thread; they are not shared between
/// threads while in use.
pub trait VideoFilter: Send {
    /// Incorporate a frame
    fn add(&mut self, frame: &Frame);

    /// Current output, if any
    fn get(&mut self) -> Option<Frame>;

    fn apply(&mut self, frame: &Frame) -> Option<Frame> {
        self.add(frame);
        self.get()
    }
}

/// Ordered chain of filters
#[derive(Default)]
pub struct FilterBank {
    filters: Vec<Box<dyn VideoFilter>>,
}

impl FilterBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, filter: impl VideoFilter + 'static) -> &mut Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        let mut bank = Self::new();
        if config.channel != Channel::All {
            bank.push(ChannelFilter::new(config.channel));
        }
        match config.kind {
            FilterKind::None => {}
            FilterKind::Normalize => {
                bank.push(
                    Normalizer::new(config.order)
                        .with_mean(config.mean)
                        .with_darkcount(config.darkcount),
                );
            }
            FilterKind::SmoothNormalize => {
                bank.push(
                    Normalizer::with_estimator(SmoothMedian::new(config.order))
                        .with_mean(config.mean)
                        .with_darkcount(config.darkcount),
                );
            }
            FilterKind::SampleHold => {
                bank.push(
                    SampleHold::new(config.order)
                        .with_mean(config.mean)
                        .with_darkcount(config.darkcount),
                );
            }
        }
        bank
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run `frame` through every filter; a filter with no output yet passes
    /// its input along
    pub fn apply(&mut self, frame: &Frame) -> Frame {
        let mut current = frame.clone();
        for filter in &mut self.filters {
            if let Some(out) = filter.apply(&current) {
                current = out;
            }
        }
        current
    }
}
