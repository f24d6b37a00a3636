mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use argus::dvr::{self, DvrController, DvrEvent, DvrState};
use argus::{DvrConfig, FrameSource};
use common::{count_of, CountingCamera};

fn running_source() -> Arc<FrameSource> {
    source_with_period(Duration::from_millis(2))
}

fn source_with_period(period: Duration) -> Arc<FrameSource> {
    let source = Arc::new(FrameSource::new(CountingCamera::new(period)));
    source.start().unwrap();
    source
}

fn controller(source: Arc<FrameSource>, path: &Path, nframes: u64, nskip: u64) -> DvrController {
    let config = DvrConfig {
        filename: Some(path.to_path_buf()),
        nframes,
        nskip,
        ..DvrConfig::default()
    };
    DvrController::new(Some(source), &config)
}

fn run_to_idle(dvr: &mut DvrController) {
    while dvr.state() != DvrState::Idle {
        assert!(dvr.wait(Duration::from_secs(2)), "session stalled");
    }
}

fn recorded_counts(path: &Path) -> Vec<u64> {
    let mut reader = dvr::open_reader(path).unwrap();
    std::iter::from_fn(|| reader.read().unwrap())
        .map(|frame| count_of(&frame))
        .collect()
}

#[test]
fn skip_stride_writes_every_nth_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stride.vraw");
    let mut dvr = controller(running_source(), &path, 7, 3);
    dvr.record();
    run_to_idle(&mut dvr);

    let counts = recorded_counts(&path);
    assert_eq!(counts.len(), 3);
    assert_eq!(counts[1] - counts[0], 3);
    assert_eq!(counts[2] - counts[1], 3);
}

#[test]
fn recording_stops_on_second_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("long.vraw");
    let mut dvr = controller(running_source(), &path, 1_000_000, 1);
    let events = dvr.events();
    dvr.record();
    std::thread::sleep(Duration::from_millis(50));
    dvr.record();
    assert_eq!(dvr.state(), DvrState::Idle);

    let seen: Vec<_> = events.drain().collect();
    assert!(seen.contains(&DvrEvent::Recording(true)));
    assert_eq!(seen.last(), Some(&DvrEvent::FrameNumber(0)));
    assert!(!recorded_counts(&path).is_empty());
}

#[test]
fn sessions_exclude_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("take.vclip");
    let source = running_source();
    let mut dvr = controller(Arc::clone(&source), &path, 6, 1);

    dvr.record();
    dvr.play();
    dvr.pause();
    dvr.rewind();
    assert_eq!(dvr.state(), DvrState::Recording);
    run_to_idle(&mut dvr);

    dvr.play();
    assert_eq!(dvr.state(), DvrState::Playing);
    dvr.record();
    assert_eq!(dvr.state(), DvrState::Playing);
    dvr.stop();
    assert_eq!(dvr.state(), DvrState::Idle);
}

#[test]
fn playback_pauses_resumes_and_rewinds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.vclip");
    let source = source_with_period(Duration::from_millis(15));
    let mut dvr = controller(source, &path, 30, 1);
    dvr.record();
    run_to_idle(&mut dvr);
    let recorded = recorded_counts(&path);
    assert_eq!(recorded.len(), 30);

    let playback = dvr.playback();
    dvr.play();
    let first = playback.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(count_of(&first), recorded[0]);

    dvr.pause();
    assert!(dvr.is_paused());
    std::thread::sleep(Duration::from_millis(50));
    playback.drain().for_each(drop);
    std::thread::sleep(Duration::from_millis(50));
    assert!(playback.is_empty());

    dvr.rewind();
    assert_eq!(dvr.frame_number(), 0);
    dvr.play();
    assert!(!dvr.is_paused());

    let mut played = Vec::new();
    while dvr.state() == DvrState::Playing {
        dvr.wait(Duration::from_secs(2));
        played.extend(playback.drain().map(|frame| count_of(&frame)));
    }
    assert_eq!(played, recorded);
}

#[test]
fn raw_playback_follows_capture_timing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timed.vraw");
    let mut dvr = controller(running_source(), &path, 10, 1);
    dvr.record();
    run_to_idle(&mut dvr);

    let reader = dvr::open_reader(&path).unwrap();
    let span = reader.timestamp(reader.length() - 1).unwrap();
    assert!(span > 0.0);

    let playback = dvr.playback();
    dvr.play();
    let started = std::time::Instant::now();
    let mut played = 0;
    while dvr.state() == DvrState::Playing {
        dvr.wait(Duration::from_secs(2));
        played += playback.drain().count();
    }
    assert_eq!(played, 10);
    assert!(started.elapsed().as_secs_f64() >= span * 0.8);
}
