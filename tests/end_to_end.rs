mod common;

use std::sync::Arc;
use std::time::Duration;

use argus::dvr::{self, DvrController, DvrEvent, DvrState};
use argus::filters::FilterBank;
use argus::{DvrConfig, FilterConfig, FilterKind, FrameSource};
use common::{count_of, CountingCamera};

#[test]
fn record_five_frames_then_finish_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("e2e.vraw");

    let source = Arc::new(FrameSource::new(CountingCamera::new(Duration::from_millis(2))));
    source.start().unwrap();
    let config = DvrConfig {
        filename: Some(path.clone()),
        nframes: 5,
        nskip: 1,
        ..DvrConfig::default()
    };
    let mut dvr = DvrController::new(Some(Arc::clone(&source)), &config);
    let events = dvr.events();

    dvr.record();
    while dvr.state() != DvrState::Idle {
        assert!(dvr.wait(Duration::from_secs(2)));
    }
    source.stop();
    source.join();

    let seen: Vec<_> = events.drain().collect();
    let start = seen
        .iter()
        .position(|e| *e == DvrEvent::Recording(true))
        .unwrap();
    let end = seen
        .iter()
        .position(|e| *e == DvrEvent::Recording(false))
        .unwrap();
    let counters: Vec<u64> = seen[start..end]
        .iter()
        .filter_map(|e| match e {
            DvrEvent::FrameNumber(n) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(counters, vec![1, 2, 3, 4, 5]);
    assert_eq!(
        seen.iter()
            .filter(|e| **e == DvrEvent::Recording(false))
            .count(),
        1
    );

    let mut reader = dvr::open_reader(&path).unwrap();
    let recorded: Vec<u64> = std::iter::from_fn(|| reader.read().unwrap())
        .map(|frame| count_of(&frame))
        .collect();
    assert_eq!(recorded.len(), 5);
    for pair in recorded.windows(2) {
        assert_eq!(pair[1], pair[0] + 1);
    }
}

#[test]
fn filtered_stream_settles_on_flat_background() {
    let source = FrameSource::new(
        argus::capture::NoiseCamera::new(6, 4, 500.0).with_seed(3),
    );
    let rx = source.subscribe();
    let mut bank = FilterBank::from_config(&FilterConfig {
        kind: FilterKind::Normalize,
        order: 2,
        ..FilterConfig::default()
    });
    source.start().unwrap();

    let mut outputs = 0;
    for _ in 0..27 {
        let frame = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let out = bank.apply(&frame);
        assert_eq!(out.shape(), frame.shape());
        outputs += 1;
    }
    source.stop();
    source.join();
    assert_eq!(outputs, 27);
}
