use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use flume::Sender;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::frame::Frame;
use crate::dvr::{Pacing, SessionEvent, SessionSender, VideoReader};
use crate::pipeline::signal::lock;

#[derive(Debug, Default)]
struct Control {
    stop: bool,
    paused: bool,
    rewind: bool,
}

/// Background worker emitting a recording's frames at its own pace.
///
/// The worker's timer keeps running while paused; pausing only gates
/// emission, so resuming continues in phase.
pub struct Player {
    control: Arc<(Mutex<Control>, Condvar)>,
    handle: Option<JoinHandle<()>>,
    length: usize,
    fps: f64,
}

impl Player {
    pub fn spawn(
        reader: Box<dyn VideoReader>,
        output: Sender<Frame>,
        events: SessionSender,
        id: u64,
    ) -> Self {
        let control = Arc::new((Mutex::new(Control::default()), Condvar::new()));
        let length = reader.length();
        let fps = reader.fps();
        let worker = Arc::clone(&control);
        let handle = std::thread::Builder::new()
            .name("argus-player".into())
            .spawn(move || run(reader, worker, output, events, id));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Could not start player thread: {}", e);
                None
            }
        };
        Self {
            control,
            handle,
            length,
            fps,
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn pause(&self, paused: bool) {
        lock(&self.control.0).paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.control.0).paused
    }

    /// Return to the first frame on the next tick
    pub fn rewind(&self) {
        lock(&self.control.0).rewind = true;
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        let (control, wake) = &*self.control;
        lock(control).stop = true;
        wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Player thread panicked");
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Interval between frame `index` and its successor
fn frame_interval(reader: &dyn VideoReader, index: usize, period: Duration) -> Duration {
    match reader.pacing() {
        Pacing::FixedRate(_) => period,
        Pacing::Timestamped => match (reader.timestamp(index), reader.timestamp(index + 1)) {
            (Some(this), Some(next)) => Duration::from_secs_f64((next - this).max(0.0)),
            _ => period,
        },
    }
}

#[instrument(skip_all, fields(session = id))]
fn run(
    mut reader: Box<dyn VideoReader>,
    control: Arc<(Mutex<Control>, Condvar)>,
    output: Sender<Frame>,
    events: SessionSender,
    id: u64,
) {
    let period = Duration::from_secs_f64(1.0 / reader.fps().max(f64::EPSILON));
    info!(
        "Playing {} frames at {:.1} fps",
        reader.length(),
        reader.fps()
    );
    let (state, wake) = &*control;
    let mut delay = Duration::ZERO;
    let mut at_end = false;

    loop {
        let guard = lock(state);
        let (mut guard, _) = match wake.wait_timeout_while(guard, delay, |c| !c.stop) {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.stop {
            break;
        }
        let rewind = std::mem::take(&mut guard.rewind);
        let paused = guard.paused;
        drop(guard);

        if rewind {
            match reader.rewind() {
                Ok(()) => at_end = false,
                Err(e) => warn!("Rewind failed: {}", e),
            }
        }
        delay = period;
        if paused || at_end {
            continue;
        }

        let index = reader.frame_number();
        match reader.read() {
            Ok(Some(frame)) => {
                if output.send(frame).is_err() {
                    debug!("Playback output closed");
                    break;
                }
                metrics::counter!("argus_frames_played").increment(1);
                let _ = events.send((id, SessionEvent::FramePlayed));
                delay = frame_interval(reader.as_ref(), index, period);
            }
            Ok(None) => {
                at_end = true;
                let _ = events.send((id, SessionEvent::Finished));
            }
            Err(e) => {
                warn!("Playback stopped at frame {}: {}", index, e);
                at_end = true;
                let _ = events.send((id, SessionEvent::Finished));
            }
        }
    }
    debug!("Player session {} exited", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::Shape;
    use crate::error::Result;
    use std::time::Instant;

    /// In-memory reader with fixed pacing
    struct Tape {
        frames: Vec<u8>,
        position: usize,
        fps: f64,
    }

    impl VideoReader for Tape {
        fn read(&mut self) -> Result<Option<Frame>> {
            let frame = self
                .frames
                .get(self.position)
                .map(|&v| Frame::filled(Shape::gray(1, 1), v));
            if frame.is_some() {
                self.position += 1;
            }
            Ok(frame)
        }
        fn seek(&mut self, frame_number: usize) -> Result<()> {
            self.position = frame_number;
            Ok(())
        }
        fn length(&self) -> usize {
            self.frames.len()
        }
        fn fps(&self) -> f64 {
            self.fps
        }
        fn frame_number(&self) -> usize {
            self.position
        }
        fn shape(&self) -> Shape {
            Shape::gray(1, 1)
        }
        fn pacing(&self) -> Pacing {
            Pacing::FixedRate(self.fps)
        }
    }

    fn tape(n: u8, fps: f64) -> Box<dyn VideoReader> {
        Box::new(Tape {
            frames: (0..n).collect(),
            position: 0,
            fps,
        })
    }

    #[test]
    fn plays_everything_then_finishes() {
        let (out_tx, out_rx) = flume::unbounded();
        let (ev_tx, ev_rx) = flume::unbounded();
        let start = Instant::now();
        let mut player = Player::spawn(tape(5, 100.0), out_tx, ev_tx, 3);

        let values: Vec<u8> = (0..5)
            .map(|_| out_rx.recv_timeout(Duration::from_secs(2)).unwrap().data[0])
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert!(start.elapsed() >= Duration::from_millis(35));

        let finished = ev_rx
            .iter()
            .find(|(_, e)| *e == SessionEvent::Finished)
            .unwrap();
        assert_eq!(finished.0, 3);
        player.stop();
        assert!(!player.is_running());
    }

    #[test]
    fn pause_gates_and_rewind_restarts() {
        let (out_tx, out_rx) = flume::unbounded();
        let (ev_tx, _ev_rx) = flume::unbounded();
        let mut player = Player::spawn(tape(50, 50.0), out_tx, ev_tx, 1);

        out_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        player.pause(true);
        std::thread::sleep(Duration::from_millis(60));
        out_rx.drain().for_each(drop);
        std::thread::sleep(Duration::from_millis(100));
        assert!(out_rx.is_empty());

        player.rewind();
        std::thread::sleep(Duration::from_millis(60));
        assert!(out_rx.is_empty(), "rewind must not resume");
        assert!(player.is_paused());

        player.pause(false);
        let frame = out_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.data[0], 0);
        player.stop();
    }

    #[test]
    fn timestamped_interval_follows_delta() {
        struct Stamped;
        impl VideoReader for Stamped {
            fn read(&mut self) -> Result<Option<Frame>> {
                Ok(None)
            }
            fn seek(&mut self, _: usize) -> Result<()> {
                Ok(())
            }
            fn length(&self) -> usize {
                2
            }
            fn fps(&self) -> f64 {
                10.0
            }
            fn frame_number(&self) -> usize {
                0
            }
            fn shape(&self) -> Shape {
                Shape::gray(1, 1)
            }
            fn pacing(&self) -> Pacing {
                Pacing::Timestamped
            }
            fn timestamp(&self, index: usize) -> Option<f64> {
                [0.0, 0.25].get(index).copied()
            }
        }
        let period = Duration::from_millis(100);
        assert_eq!(
            frame_interval(&Stamped, 0, period),
            Duration::from_millis(250)
        );
        assert_eq!(frame_interval(&Stamped, 1, period), period);
    }
}
