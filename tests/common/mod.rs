#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use argus::capture::Camera;
use argus::{Frame, Result, Shape};

/// 8 samples, enough to carry a little-endian `u64`
pub const SHAPE: Shape = Shape::gray(4, 2);

/// Camera whose n-th frame (from 1) carries `n` in its samples and sequence
pub struct CountingCamera {
    count: Arc<AtomicU64>,
    delay: Duration,
    open: bool,
}

impl CountingCamera {
    pub fn new(delay: Duration) -> Self {
        Self {
            count: Arc::new(AtomicU64::new(0)),
            delay,
            open: false,
        }
    }

    /// Handle to the number of frames read so far
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.count)
    }
}

impl Camera for CountingCamera {
    fn name(&self) -> &str {
        "counting"
    }

    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        Frame::with_sequence(SHAPE, n.to_le_bytes().to_vec(), n)
    }

    fn shape(&self) -> Shape {
        SHAPE
    }
}

/// Counter value a frame from [`CountingCamera`] carries
pub fn count_of(frame: &Frame) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&frame.data[..8]);
    u64::from_le_bytes(bytes)
}
