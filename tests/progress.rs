//! Progress and cancellation integration tests.

mod common;

use std::sync::{Arc, Mutex};

use common::{AudioClip, Clip, Fixture, VideoClip};
use framedex::{CancellationToken, FramedexError, MediaSource, OperationType, ProgressCallback, ProgressInfo};

// ── CancellationToken ──────────────────────────────────────────────

#[test]
fn cancellation_token_default_not_cancelled() {
    let token = CancellationToken::new();
    assert!(!token.is_cancelled());
}

#[test]
fn cancellation_token_clone_shares_state() {
    let token = CancellationToken::new();
    let clone = token.clone();
    assert!(!clone.is_cancelled());

    token.cancel();
    assert!(clone.is_cancelled());
}

#[test]
fn cancelled_indexing_returns_error_and_leaves_no_index() {
    let fixture = Fixture::new(Clip::video(VideoClip::progressive(30, 10, 40)));
    let token = CancellationToken::new();
    token.cancel();

    let result = MediaSource::build_or_load_index(&fixture.path, fixture.options().with_cancellation(token));
    match result {
        Err(FramedexError::Cancelled) => {}
        Err(other) => panic!("Expected Cancelled, got: {other}"),
        Ok(_) => panic!("Expected Cancelled, got a source"),
    }
    assert!(!fixture.index_path().exists(), "cancelled build must not write an index");
}

// ── ProgressInfo ───────────────────────────────────────────────────

#[derive(Default)]
struct RecordingProgress {
    infos: Mutex<Vec<ProgressInfo>>,
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.infos.lock().expect("poisoned").push(info.clone());
    }
}

impl RecordingProgress {
    fn of(&self, operation: OperationType) -> Vec<ProgressInfo> {
        self.infos
            .lock()
            .expect("poisoned")
            .iter()
            .filter(|info| info.operation == operation)
            .cloned()
            .collect()
    }
}

#[test]
fn indexing_reports_every_batch() {
    let clip = Clip {
        audio: Some(AudioClip::uniform(12, 160)),
        ..Clip::video(VideoClip::progressive(12, 4, 40))
    };
    let fixture = Fixture::new(clip);
    let recorder = Arc::new(RecordingProgress::default());

    let options = fixture.options().with_progress(recorder.clone()).with_batch_size(6);
    MediaSource::build_or_load_index(&fixture.path, options).expect("Failed to build index");

    let indexing = recorder.of(OperationType::Indexing);
    // 24 packets in batches of 6, plus the final report.
    assert_eq!(indexing.len(), 5);
    let currents: Vec<u64> = indexing.iter().map(|info| info.current).collect();
    assert_eq!(currents, vec![6, 12, 18, 24, 24]);
    assert!(indexing.iter().all(|info| info.total.is_none()));
    assert!(indexing[0].current_position.is_some());
}

#[test]
fn loading_reports_once() {
    let fixture = Fixture::new(Clip::video(VideoClip::progressive(8, 4, 40)));
    MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index");

    let recorder = Arc::new(RecordingProgress::default());
    MediaSource::build_or_load_index(&fixture.path, fixture.options().with_progress(recorder.clone()))
        .expect("Failed to load index");

    assert!(recorder.of(OperationType::Indexing).is_empty(), "a current index must not be rebuilt");
    let loading = recorder.of(OperationType::IndexLoading);
    assert_eq!(loading.len(), 1);
    assert_eq!(loading[0].percentage, Some(100.0));
}
