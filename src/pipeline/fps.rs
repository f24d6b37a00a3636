use std::time::Instant;

/// Frame-rate estimate refreshed every `window` ticks
#[derive(Debug)]
pub struct FpsMeter {
    window: u32,
    count: u32,
    start: Instant,
    value: Option<f64>,
}

impl FpsMeter {
    pub fn new(window: u32) -> Self {
        assert!(window > 0, "fps window must be positive");
        Self {
            window,
            count: 0,
            start: Instant::now(),
            value: None,
        }
    }

    /// Records one frame; returns the new estimate when the window completes
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    pub(crate) fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        if self.count < self.window {
            return None;
        }
        let elapsed = now.duration_since(self.start).as_secs_f64();
        self.start = now;
        self.count = 0;
        if elapsed > 0.0 {
            self.value = Some(self.window as f64 / elapsed);
        }
        self.value
    }

    /// Restart the window, e.g. after a pause
    pub fn restart(&mut self) {
        self.count = 0;
        self.start = Instant::now();
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new(10)
    }
}
