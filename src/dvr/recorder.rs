use std::thread::JoinHandle;

use flume::{Receiver, Sender};
use tracing::{debug, error, info, instrument};

use crate::capture::frame::Frame;
use crate::dvr::{SessionEvent, SessionSender, WriteOutcome, WriterSession};

/// Background worker draining a frame subscription into a [`WriterSession`]
pub struct Recorder {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Recorder {
    /// Start recording `frames`; events are tagged with `id`
    pub fn spawn(
        session: WriterSession,
        frames: Receiver<Frame>,
        events: SessionSender,
        id: u64,
    ) -> Self {
        let (stop, stop_rx) = flume::bounded(1);
        let handle = std::thread::Builder::new()
            .name("argus-recorder".into())
            .spawn(move || run(session, frames, stop_rx, events, id));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Could not start recorder thread: {}", e);
                None
            }
        };
        Self { stop, handle }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the worker and close the output
    pub fn stop(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Recorder thread panicked");
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[instrument(skip_all, fields(session = id))]
fn run(
    mut session: WriterSession,
    frames: Receiver<Frame>,
    stop: Receiver<()>,
    events: SessionSender,
    id: u64,
) {
    info!("Recording to {:?}", session.path());
    let mut announced = false;
    loop {
        let next = flume::Selector::new()
            .recv(&stop, |_| None)
            .recv(&frames, |frame| frame.ok())
            .wait();
        let Some(frame) = next else {
            break;
        };

        if let WriteOutcome::Counted { frame_number, .. } = session.write(&frame) {
            let _ = events.send((id, SessionEvent::FrameNumber(frame_number)));
        }
        if session.is_finished() && !announced {
            announced = true;
            debug!("Recording session {} finished", id);
            let _ = events.send((id, SessionEvent::Finished));
        }
    }
    if let Err(e) = session.close() {
        error!("Closing {:?} failed: {}", session.path(), e);
    }
    info!(
        "Recorded {} frames to {:?}",
        session.frame_number(),
        session.path()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::Shape;
    use crate::dvr::{RawWriter, VideoReader};
    use std::time::Duration;

    #[test]
    fn records_until_target_then_reports_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.vraw");
        let session = WriterSession::new(Box::new(RawWriter::new(&path)), 3, 1);
        let (frames_tx, frames_rx) = flume::unbounded();
        let (events_tx, events_rx) = flume::unbounded();

        let mut recorder = Recorder::spawn(session, frames_rx, events_tx, 7);
        for v in 0..10u8 {
            frames_tx
                .send(Frame::filled(Shape::gray(2, 2), v))
                .unwrap();
        }

        let mut seen = Vec::new();
        while let Ok(event) = events_rx.recv_timeout(Duration::from_secs(2)) {
            seen.push(event);
            if event.1 == SessionEvent::Finished {
                break;
            }
        }
        recorder.stop();

        assert_eq!(
            seen,
            vec![
                (7, SessionEvent::FrameNumber(1)),
                (7, SessionEvent::FrameNumber(2)),
                (7, SessionEvent::FrameNumber(3)),
                (7, SessionEvent::Finished),
            ]
        );
        assert!(events_rx.try_recv().is_err());

        let mut reader = crate::dvr::RawReader::open(&path).unwrap();
        let values: Vec<u8> = std::iter::from_fn(|| reader.read().unwrap())
            .map(|f| f.data[0])
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn stops_when_source_goes_away() {
        let dir = tempfile::tempdir().unwrap();
        let session =
            WriterSession::new(Box::new(RawWriter::new(dir.path().join("x.vraw"))), 5, 1);
        let (frames_tx, frames_rx) = flume::unbounded::<Frame>();
        let (events_tx, _events_rx) = flume::unbounded();
        let mut recorder = Recorder::spawn(session, frames_rx, events_tx, 1);
        drop(frames_tx);
        std::thread::sleep(Duration::from_millis(100));
        assert!(!recorder.is_running());
        recorder.stop();
    }
}
