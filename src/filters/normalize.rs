//! Background normalization against a running median estimate

use crate::capture::frame::{Frame, Shape};
use crate::filters::median::{BackgroundEstimator, MedianCascade};
use crate::filters::VideoFilter;

/// Divides each frame by a running background estimate.
///
/// `add` subtracts the dark count and feeds the estimator; `get` returns
/// the last foreground divided by the background, scaled to `mean`.
pub struct Normalizer<E = MedianCascade> {
    estimator: E,
    /// Target mean of the normalized image
    pub mean: f32,
    /// Dark count subtracted from every sample before normalizing
    pub darkcount: u8,
    foreground: Option<Frame>,
}

impl Normalizer<MedianCascade> {
    pub fn new(order: u32) -> Self {
        Self::with_estimator(MedianCascade::new(order))
    }
}

impl<E: BackgroundEstimator> Normalizer<E> {
    pub fn with_estimator(estimator: E) -> Self {
        Self {
            estimator,
            mean: 100.0,
            darkcount: 0,
            foreground: None,
        }
    }

    pub fn with_mean(mut self, mean: f32) -> Self {
        self.mean = mean;
        self
    }

    pub fn with_darkcount(mut self, darkcount: u8) -> Self {
        self.darkcount = darkcount;
        self
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut E {
        &mut self.estimator
    }

    fn subtract_darkcount(&self, frame: &Frame) -> Vec<u8> {
        let dark = self.darkcount;
        frame.data.iter().map(|v| v.saturating_sub(dark)).collect()
    }

    /// Replace the foreground without touching the background estimate
    pub(crate) fn hold(&mut self, frame: &Frame) {
        let samples = self.subtract_darkcount(frame);
        self.foreground = Some(frame.derive(frame.shape(), samples));
    }

    /// Foreground over background, unscaled; zero where the background is zero
    pub fn get_ratio(&mut self) -> Option<(Shape, Vec<f32>)> {
        let foreground = self.foreground.as_ref()?;
        let background = self.estimator.get()?;
        if background.len() != foreground.data.len() {
            return None;
        }
        let ratio = foreground
            .data
            .iter()
            .zip(background)
            .map(|(&fg, &bg)| if bg == 0 { 0.0 } else { fg as f32 / bg as f32 })
            .collect();
        Some((foreground.shape(), ratio))
    }
}

impl<E: BackgroundEstimator> VideoFilter for Normalizer<E> {
    fn add(&mut self, frame: &Frame) {
        let samples = self.subtract_darkcount(frame);
        self.estimator.add(&samples, frame.shape());
        self.foreground = Some(frame.derive(frame.shape(), samples));
    }

    fn get(&mut self) -> Option<Frame> {
        let mean = self.mean;
        let (shape, ratio) = self.get_ratio()?;
        let scaled = ratio
            .into_iter()
            .map(|r| (mean * r).round().clamp(0.0, 255.0) as u8)
            .collect();
        let foreground = self.foreground.as_ref()?;
        Some(foreground.derive(shape, scaled))
    }
}

/// Normalizer that freezes its background after one full window.
///
/// The first `3^order` frames feed the cascade; every later frame is divided
/// by that snapshot, so the background cannot drift during a recording.
pub struct SampleHold {
    normalizer: Normalizer<MedianCascade>,
    remaining: usize,
    shape: Option<Shape>,
}

impl SampleHold {
    pub fn new(order: u32) -> Self {
        let normalizer = Normalizer::new(order);
        let remaining = normalizer.estimator().window();
        Self {
            normalizer,
            remaining,
            shape: None,
        }
    }

    pub fn with_mean(mut self, mean: f32) -> Self {
        self.normalizer.mean = mean;
        self
    }

    pub fn with_darkcount(mut self, darkcount: u8) -> Self {
        self.normalizer.darkcount = darkcount;
        self
    }

    /// Re-arm accumulation of a fresh background
    pub fn reset(&mut self) {
        self.normalizer.estimator_mut().reset();
        self.remaining = self.normalizer.estimator().window();
    }

    /// True once the background is frozen
    pub fn is_holding(&self) -> bool {
        self.remaining == 0
    }

    pub fn normalizer(&self) -> &Normalizer<MedianCascade> {
        &self.normalizer
    }
}

impl VideoFilter for SampleHold {
    fn add(&mut self, frame: &Frame) {
        if self.shape != Some(frame.shape()) {
            self.shape = Some(frame.shape());
            self.reset();
        }
        if self.remaining > 0 {
            self.normalizer.add(frame);
            self.remaining -= 1;
        } else {
            self.normalizer.hold(frame);
        }
    }

    fn get(&mut self) -> Option<Frame> {
        self.normalizer.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::median::SmoothMedian;

    const SHAPE: Shape = Shape::gray(2, 2);

    fn frame(values: [u8; 4]) -> Frame {
        Frame::new(SHAPE, values.to_vec()).unwrap()
    }

    #[test]
    fn flat_field_normalizes_to_mean() {
        let mut normalizer = Normalizer::new(1).with_mean(100.0);
        for _ in 0..3 {
            normalizer.add(&frame([50, 60, 70, 80]));
        }
        let out = normalizer.get().unwrap();
        assert_eq!(out.data.as_ref(), &[100, 100, 100, 100]);
    }

    #[test]
    fn feature_is_relative_to_background() {
        let mut normalizer = Normalizer::new(1).with_mean(100.0);
        for _ in 0..3 {
            normalizer.add(&frame([40, 40, 40, 40]));
        }
        normalizer.add(&frame([20, 40, 60, 40]));
        let (_, ratio) = normalizer.get_ratio().unwrap();
        assert_eq!(ratio, vec![0.5, 1.0, 1.5, 1.0]);
    }

    #[test]
    fn zero_background_does_not_divide() {
        let mut normalizer = Normalizer::new(1).with_darkcount(10);
        for _ in 0..3 {
            normalizer.add(&frame([5, 10, 30, 255]));
        }
        let out = normalizer.get().unwrap();
        assert_eq!(out.data.as_ref(), &[0, 0, 100, 100]);
    }

    #[test]
    fn scaled_output_saturates() {
        let mut normalizer = Normalizer::new(1).with_mean(200.0);
        for _ in 0..3 {
            normalizer.add(&frame([10, 10, 10, 10]));
        }
        normalizer.add(&frame([30, 10, 10, 10]));
        assert_eq!(normalizer.get().unwrap().data[0], 255);
    }

    #[test]
    fn smooth_estimator_plugs_in() {
        let mut normalizer = Normalizer::with_estimator(SmoothMedian::new(1));
        normalizer.add(&frame([50, 50, 50, 50]));
        assert_eq!(normalizer.get().unwrap().data.as_ref(), &[100; 4]);
    }

    #[test]
    fn sample_hold_freezes_background() {
        let mut hold = SampleHold::new(1).with_mean(100.0);
        for _ in 0..3 {
            hold.add(&frame([50, 50, 50, 50]));
        }
        assert!(hold.is_holding());
        for _ in 0..9 {
            hold.add(&frame([100, 100, 100, 100]));
        }
        assert_eq!(hold.get().unwrap().data.as_ref(), &[200; 4]);

        hold.reset();
        assert!(!hold.is_holding());
        for _ in 0..3 {
            hold.add(&frame([100, 100, 100, 100]));
        }
        assert_eq!(hold.get().unwrap().data.as_ref(), &[100; 4]);
    }

    #[test]
    fn sample_hold_rearms_on_shape_change() {
        let mut hold = SampleHold::new(1);
        for _ in 0..3 {
            hold.add(&frame([50, 50, 50, 50]));
        }
        assert!(hold.is_holding());
        hold.add(&Frame::filled(Shape::gray(1, 1), 9));
        assert!(!hold.is_holding());
    }
}
