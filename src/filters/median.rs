//! Running median-of-medians background estimators
//!
//! Both estimators approximate the median over a window of `3^order` frames
//! while buffering only two frames per level, using the element-wise
//! three-input median `max(min(a, b), min(max(a, b), c))`.

use crate::capture::frame::Shape;

/// Something that turns a stream of frames into a background estimate
pub trait BackgroundEstimator: Send {
    /// Incorporate new samples. A change of shape discards all state.
    fn add(&mut self, samples: &[u8], shape: Shape);

    /// True while an undrained estimate is pending
    fn ready(&self) -> bool;

    /// Current estimate; clears `ready`
    fn get(&mut self) -> Option<&[u8]>;

    /// Current estimate without draining it
    fn estimate(&self) -> Option<&[u8]>;

    fn shape(&self) -> Option<Shape>;

    fn order(&self) -> u32;

    /// Discard all buffered state
    fn reset(&mut self);
}

#[inline]
fn median3(a: &[u8], b: &[u8], c: &[u8], out: &mut [u8]) {
    for (((o, &a), &b), &c) in out.iter_mut().zip(a).zip(b).zip(c) {
        *o = a.min(b).max(a.max(b).min(c));
    }
}

/// One level of the cascade: two buffered inputs and the last estimate
#[derive(Debug, Clone)]
struct Level {
    buffer: [Vec<u8>; 2],
    index: usize,
    ready: bool,
    estimate: Vec<u8>,
}

impl Level {
    fn new(first: &[u8]) -> Self {
        Self {
            buffer: [vec![0; first.len()], vec![0; first.len()]],
            index: 0,
            ready: false,
            estimate: first.to_vec(),
        }
    }

    /// Returns true when this input completed a triple
    fn push(&mut self, input: &[u8]) -> bool {
        if self.index == 2 {
            median3(&self.buffer[0], &self.buffer[1], input, &mut self.estimate);
            self.index = 0;
            self.ready = true;
            return true;
        }
        self.buffer[self.index].copy_from_slice(input);
        self.index += 1;
        false
    }
}

/// Decimating median cascade.
///
/// Level 0 takes raw frames; level `k` takes one estimate from level `k - 1`
/// for every three that level consumed, so the top level publishes one
/// estimate per `3^order` inputs.
#[derive(Debug, Clone)]
pub struct MedianCascade {
    order: u32,
    shape: Option<Shape>,
    levels: Vec<Level>,
}

impl MedianCascade {
    pub fn new(order: u32) -> Self {
        assert!(order >= 1, "median cascade order must be at least 1");
        Self {
            order,
            shape: None,
            levels: Vec::new(),
        }
    }

    /// Number of inputs contributing to one estimate
    pub fn window(&self) -> usize {
        3usize.pow(self.order)
    }

    pub fn set_order(&mut self, order: u32) {
        assert!(order >= 1, "median cascade order must be at least 1");
        if order != self.order {
            self.order = order;
            self.reset();
        }
    }

    fn initialize(&mut self, samples: &[u8], shape: Shape) {
        self.shape = Some(shape);
        self.levels = (0..self.order).map(|_| Level::new(samples)).collect();
    }
}

impl BackgroundEstimator for MedianCascade {
    fn add(&mut self, samples: &[u8], shape: Shape) {
        if self.shape != Some(shape) {
            self.initialize(samples, shape);
        }
        if !self.levels[0].push(samples) {
            return;
        }
        for k in 1..self.levels.len() {
            let (finer, coarser) = self.levels.split_at_mut(k);
            let input = &mut finer[k - 1];
            input.ready = false;
            if !coarser[0].push(&input.estimate) {
                return;
            }
        }
    }

    fn ready(&self) -> bool {
        self.levels.last().is_some_and(|level| level.ready)
    }

    fn get(&mut self) -> Option<&[u8]> {
        let top = self.levels.last_mut()?;
        top.ready = false;
        Some(&top.estimate)
    }

    fn estimate(&self) -> Option<&[u8]> {
        self.levels.last().map(|level| level.estimate.as_slice())
    }

    fn shape(&self) -> Option<Shape> {
        self.shape
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn reset(&mut self) {
        self.shape = None;
        self.levels.clear();
    }
}

/// Sliding median of medians.
///
/// Every level keeps a rolling pair of its inputs and emits a new estimate
/// for every input, trading the decimating cascade's cadence for a smoother
/// background.
#[derive(Debug, Clone)]
pub struct SmoothMedian {
    order: u32,
    shape: Option<Shape>,
    levels: Vec<Level>,
    scratch: Vec<u8>,
    ready: bool,
}

impl SmoothMedian {
    pub fn new(order: u32) -> Self {
        assert!(order >= 1, "median order must be at least 1");
        Self {
            order,
            shape: None,
            levels: Vec::new(),
            scratch: Vec::new(),
            ready: false,
        }
    }

    fn initialize(&mut self, samples: &[u8], shape: Shape) {
        self.shape = Some(shape);
        self.levels = (0..self.order)
            .map(|_| {
                let mut level = Level::new(samples);
                level.buffer = [samples.to_vec(), samples.to_vec()];
                level
            })
            .collect();
        self.scratch = samples.to_vec();
    }
}

impl BackgroundEstimator for SmoothMedian {
    fn add(&mut self, samples: &[u8], shape: Shape) {
        if self.shape != Some(shape) {
            self.initialize(samples, shape);
        }
        self.scratch.copy_from_slice(samples);
        for level in &mut self.levels {
            median3(
                &level.buffer[0],
                &level.buffer[1],
                &self.scratch,
                &mut level.estimate,
            );
            level.buffer[level.index].copy_from_slice(&self.scratch);
            level.index = (level.index + 1) % 2;
            self.scratch.copy_from_slice(&level.estimate);
        }
        self.ready = true;
    }

    fn ready(&self) -> bool {
        self.ready
    }

    fn get(&mut self) -> Option<&[u8]> {
        self.ready = false;
        self.levels.last().map(|level| level.estimate.as_slice())
    }

    fn estimate(&self) -> Option<&[u8]> {
        self.levels.last().map(|level| level.estimate.as_slice())
    }

    fn shape(&self) -> Option<Shape> {
        self.shape
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn reset(&mut self) {
        self.shape = None;
        self.levels.clear();
        self.ready = false;
    }
}
