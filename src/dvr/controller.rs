use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::capture::frame::Frame;
use crate::dvr::{self, Player, Recorder, SessionEvent, WriterSession};
use crate::pipeline::FrameSource;
use crate::DvrConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DvrState {
    Idle,
    Recording,
    Playing,
}

/// Changes observable by user interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DvrEvent {
    Recording(bool),
    Playing(bool),
    FrameNumber(u64),
}

/// Record/play state machine.
///
/// Owns at most one recorder or player at a time. Worker notifications are
/// applied by [`process_events`](Self::process_events) or
/// [`wait`](Self::wait) on the thread that owns the controller.
pub struct DvrController {
    source: Option<Arc<FrameSource>>,
    filename: Option<PathBuf>,
    playname: Option<PathBuf>,
    nframes: u64,
    nskip: u64,
    blank: bool,

    recorder: Option<Recorder>,
    player: Option<Player>,
    session: u64,
    frame_number: u64,

    session_tx: Sender<(u64, SessionEvent)>,
    session_rx: Receiver<(u64, SessionEvent)>,
    observers: Vec<Sender<DvrEvent>>,
    playback_tx: Sender<Frame>,
    playback_rx: Receiver<Frame>,
}

impl DvrController {
    pub fn new(source: Option<Arc<FrameSource>>, config: &DvrConfig) -> Self {
        let (session_tx, session_rx) = flume::unbounded();
        let (playback_tx, playback_rx) = flume::unbounded();
        Self {
            source,
            filename: config.filename.clone(),
            playname: config.playname.clone().or_else(|| config.filename.clone()),
            nframes: config.nframes.max(1),
            nskip: config.nskip.max(1),
            blank: config.blank,
            recorder: None,
            player: None,
            session: 0,
            frame_number: 0,
            session_tx,
            session_rx,
            observers: Vec::new(),
            playback_tx,
            playback_rx,
        }
    }

    pub fn state(&self) -> DvrState {
        if self.recorder.is_some() {
            DvrState::Recording
        } else if self.player.is_some() {
            DvrState::Playing
        } else {
            DvrState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.player.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.player.as_ref().is_some_and(Player::is_paused)
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Subscribe to notifications from now on. Every observer receives
    /// every event; dropping the receiver unsubscribes.
    pub fn events(&mut self) -> Receiver<DvrEvent> {
        let (tx, rx) = flume::unbounded();
        self.observers.push(tx);
        rx
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Frames emitted by playback sessions
    pub fn playback(&self) -> Receiver<Frame> {
        self.playback_rx.clone()
    }

    pub fn source(&self) -> Option<&Arc<FrameSource>> {
        self.source.as_ref()
    }

    pub fn set_source(&mut self, source: Option<Arc<FrameSource>>) {
        if self.recorder.is_some() {
            warn!("Cannot change source while recording");
            return;
        }
        self.source = source;
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    /// Destination for recordings; also becomes the playback file
    pub fn set_filename(&mut self, filename: impl Into<PathBuf>) {
        if self.state() != DvrState::Idle {
            warn!("Cannot change file name during a session");
            return;
        }
        let filename = filename.into();
        self.playname = Some(filename.clone());
        self.filename = Some(filename);
    }

    pub fn playname(&self) -> Option<&Path> {
        self.playname.as_deref()
    }

    pub fn set_playname(&mut self, playname: impl Into<PathBuf>) {
        if self.player.is_some() {
            warn!("Cannot change playback file while playing");
            return;
        }
        self.playname = Some(playname.into());
    }

    pub fn nframes(&self) -> u64 {
        self.nframes
    }

    /// Frame target of the next recording
    pub fn set_nframes(&mut self, nframes: u64) {
        self.nframes = nframes.max(1);
    }

    pub fn nskip(&self) -> u64 {
        self.nskip
    }

    /// Write one of every `nskip` counted frames in the next recording
    pub fn set_nskip(&mut self, nskip: u64) {
        self.nskip = nskip.max(1);
    }

    pub fn set_blank(&mut self, blank: bool) {
        self.blank = blank;
    }

    /// Start recording, or stop the recording in progress. Ignored while
    /// playing.
    pub fn record(&mut self) {
        match self.state() {
            DvrState::Playing => return,
            DvrState::Recording => return self.stop(),
            DvrState::Idle => {}
        }
        let Some(source) = self.source.clone() else {
            debug!("No source to record");
            return;
        };
        let Some(filename) = self.filename.clone() else {
            warn!("No file name to record to");
            return;
        };
        let writer = match dvr::writer_for(&filename, source.fps()) {
            Ok(writer) => writer,
            Err(e) => {
                warn!("Cannot record: {}", e);
                return;
            }
        };
        let mut session = WriterSession::new(writer, self.nframes, self.nskip);
        session.set_blank(self.blank);

        self.session += 1;
        self.set_frame_number(0);
        self.recorder = Some(Recorder::spawn(
            session,
            source.subscribe(),
            self.session_tx.clone(),
            self.session,
        ));
        info!("Recording {} frames to {:?}", self.nframes, filename);
        self.notify(DvrEvent::Recording(true));
    }

    /// Start playback, or resume a paused one. Ignored while recording.
    pub fn play(&mut self) {
        match self.state() {
            DvrState::Recording => return,
            DvrState::Playing => {
                if let Some(player) = &self.player {
                    player.pause(false);
                }
                return;
            }
            DvrState::Idle => {}
        }
        let Some(playname) = self.playname.clone() else {
            warn!("No file to play");
            return;
        };
        let reader = match dvr::open_reader(&playname) {
            Ok(reader) => reader,
            Err(e) => {
                warn!("Cannot play {:?}: {}", playname, e);
                return;
            }
        };

        self.session += 1;
        self.set_frame_number(0);
        self.player = Some(Player::spawn(
            reader,
            self.playback_tx.clone(),
            self.session_tx.clone(),
            self.session,
        ));
        info!("Playing {:?}", playname);
        self.notify(DvrEvent::Playing(true));
    }

    /// Toggle the pause of a playback session
    pub fn pause(&mut self) {
        if let Some(player) = &self.player {
            player.pause(!player.is_paused());
        }
    }

    /// Return playback to the first frame without changing the pause
    pub fn rewind(&mut self) {
        let Some(player) = &self.player else {
            return;
        };
        player.rewind();
        // Progress reported before the rewind no longer applies
        self.session_rx.drain().for_each(drop);
        self.set_frame_number(0);
    }

    /// End whichever session is active
    pub fn stop(&mut self) {
        if let Some(mut recorder) = self.recorder.take() {
            recorder.stop();
            self.notify(DvrEvent::Recording(false));
        } else if let Some(mut player) = self.player.take() {
            player.stop();
            self.notify(DvrEvent::Playing(false));
        } else {
            return;
        }
        // Workers are joined; anything left belongs to the ended session
        self.session_rx.drain().for_each(drop);
        self.set_frame_number(0);
    }

    /// Apply every pending worker notification
    pub fn process_events(&mut self) {
        while let Ok((id, event)) = self.session_rx.try_recv() {
            self.handle(id, event);
        }
    }

    /// Block up to `timeout` for a worker notification, then apply all
    /// pending ones. Returns false on timeout.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        match self.session_rx.recv_timeout(timeout) {
            Ok((id, event)) => {
                self.handle(id, event);
                self.process_events();
                true
            }
            Err(_) => false,
        }
    }

    fn handle(&mut self, id: u64, event: SessionEvent) {
        if id != self.session || self.state() == DvrState::Idle {
            return;
        }
        match event {
            SessionEvent::FrameNumber(n) => self.set_frame_number(n),
            SessionEvent::FramePlayed => self.set_frame_number(self.frame_number + 1),
            SessionEvent::Finished => self.stop(),
        }
    }

    fn set_frame_number(&mut self, n: u64) {
        self.frame_number = n;
        self.notify(DvrEvent::FrameNumber(n));
    }

    fn notify(&mut self, event: DvrEvent) {
        self.observers.retain(|tx| tx.send(event).is_ok());
    }
}

impl Drop for DvrController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::noise::NoiseCamera;

    fn config(dir: &Path, name: &str) -> DvrConfig {
        DvrConfig {
            filename: Some(dir.join(name)),
            nframes: 4,
            ..DvrConfig::default()
        }
    }

    fn source() -> Arc<FrameSource> {
        let source = Arc::new(FrameSource::new(NoiseCamera::new(8, 6, 200.0)));
        source.start().unwrap();
        source
    }

    #[test]
    fn record_needs_a_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut dvr = DvrController::new(None, &config(dir.path(), "a.vraw"));
        dvr.record();
        assert_eq!(dvr.state(), DvrState::Idle);
    }

    #[test]
    fn play_of_missing_file_stays_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut dvr = DvrController::new(None, &config(dir.path(), "missing.vclip"));
        dvr.play();
        assert_eq!(dvr.state(), DvrState::Idle);
    }

    #[test]
    fn unsupported_extension_does_not_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut dvr = DvrController::new(Some(source()), &config(dir.path(), "a.mp4"));
        dvr.record();
        assert_eq!(dvr.state(), DvrState::Idle);
    }

    #[test]
    fn recording_finishes_and_plays_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut dvr = DvrController::new(Some(source()), &config(dir.path(), "take.vraw"));
        let events = dvr.events();

        dvr.record();
        assert!(dvr.is_recording());
        dvr.play();
        assert!(dvr.is_recording(), "play is ignored while recording");

        while dvr.is_recording() {
            assert!(dvr.wait(Duration::from_secs(2)));
        }
        let seen: Vec<_> = events.drain().collect();
        assert_eq!(seen.first(), Some(&DvrEvent::FrameNumber(0)));
        assert!(seen.contains(&DvrEvent::Recording(true)));
        assert!(seen.contains(&DvrEvent::FrameNumber(4)));
        assert_eq!(
            seen.iter()
                .filter(|e| **e == DvrEvent::Recording(false))
                .count(),
            1
        );

        let playback = dvr.playback();
        dvr.play();
        assert!(dvr.is_playing());
        dvr.record();
        assert!(dvr.is_playing(), "record is ignored while playing");
        let mut played = 0;
        while dvr.is_playing() {
            assert!(dvr.wait(Duration::from_secs(2)));
            played += playback.drain().count();
        }
        assert_eq!(played, 4);
        assert_eq!(dvr.state(), DvrState::Idle);
    }

    #[test]
    fn file_name_is_locked_during_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mut dvr = DvrController::new(Some(source()), &config(dir.path(), "one.vraw"));
        dvr.record();
        dvr.set_filename(dir.path().join("two.vraw"));
        assert_eq!(dvr.filename(), Some(dir.path().join("one.vraw").as_path()));
        dvr.record();
        assert_eq!(dvr.state(), DvrState::Idle);
        dvr.set_filename(dir.path().join("two.vraw"));
        assert_eq!(dvr.playname(), Some(dir.path().join("two.vraw").as_path()));
    }

    #[test]
    fn events_reach_every_observer_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut dvr = DvrController::new(Some(source()), &config(dir.path(), "obs.vraw"));
        let first = dvr.events();
        let second = dvr.events();
        assert_eq!(dvr.observer_count(), 2);

        dvr.record();
        dvr.stop();
        let seen: Vec<_> = first.drain().collect();
        assert_eq!(seen, second.drain().collect::<Vec<_>>());
        assert!(seen.contains(&DvrEvent::Recording(false)));

        drop(first);
        drop(second);
        dvr.record();
        dvr.stop();
        assert_eq!(dvr.observer_count(), 0);
    }

    #[test]
    fn unobserved_events_are_not_retained() {
        let dir = tempfile::tempdir().unwrap();
        let mut dvr = DvrController::new(Some(source()), &config(dir.path(), "quiet.vraw"));
        dvr.set_nframes(20);
        dvr.record();
        while dvr.is_recording() {
            assert!(dvr.wait(Duration::from_secs(2)));
        }
        assert_eq!(dvr.observer_count(), 0);
    }
}
