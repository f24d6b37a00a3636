//! Acquisition thread, subscriber fan-out and the synchronization primitives
//! they share

pub mod fps;
pub mod signal;
pub mod source;

pub use fps::FpsMeter;
pub use signal::Latch;
pub use source::{FrameSource, SourceStats};
