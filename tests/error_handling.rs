//! Error handling integration tests.
//!
//! These tests verify that meaningful errors are returned for various
//! failure conditions.

mod common;

use std::path::Path;

use common::{AudioClip, Clip, Fixture, VideoClip};
use framedex::{FramedexError, IndexOptions, MediaSource};

#[test]
fn open_nonexistent_file() {
    let fixture = Fixture::new(Clip::video(VideoClip::progressive(4, 4, 40)));
    let missing = fixture.directory.path().join("missing.sim");

    let result = MediaSource::build_or_load_index(&missing, fixture.options());
    let error = match result {
        Err(error) => error,
        Ok(_) => panic!("Expected FileOpen, got a source"),
    };
    assert!(matches!(error, FramedexError::FileOpen { .. }), "Expected FileOpen, got: {error}");
    assert!(
        error.to_string().contains("Failed to open media file"),
        "Error message should mention file open failure: {error}",
    );
}

#[test]
fn open_invalid_file_with_ffmpeg() {
    let temporary_directory = tempfile::tempdir().expect("Failed to create temp dir");
    let invalid_file_path = temporary_directory.path().join("invalid.mp4");
    std::fs::write(&invalid_file_path, b"this is not a media file").expect("Failed to write invalid file");

    let result = MediaSource::build_or_load_index(&invalid_file_path, IndexOptions::new());
    assert!(result.is_err(), "Expected error for invalid media file");
}

#[test]
fn frame_out_of_range() {
    let fixture = Fixture::new(Clip::video(VideoClip::progressive(12, 4, 40)));
    let mut source = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index");

    match source.get_video_frame(12) {
        Err(FramedexError::FrameOutOfRange {
            frame_number,
            total_frames,
        }) => {
            assert_eq!(frame_number, 12);
            assert_eq!(total_frames, 12);
        }
        Err(other) => panic!("Expected FrameOutOfRange, got: {other}"),
        Ok(_) => panic!("Expected FrameOutOfRange, got a frame"),
    }
    match source.is_keyframe(99) {
        Err(FramedexError::FrameOutOfRange { .. }) => {}
        Err(other) => panic!("Expected FrameOutOfRange, got: {other}"),
        Ok(_) => panic!("Expected FrameOutOfRange, got a flag"),
    }
}

#[test]
fn video_only_source_has_no_audio() {
    let fixture = Fixture::new(Clip::video(VideoClip::progressive(8, 4, 40)));
    let mut source = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index");

    let error = match source.get_audio_samples(0, 16) {
        Err(error) => error,
        Ok(_) => panic!("Expected NoAudioStream, got samples"),
    };
    assert!(matches!(error, FramedexError::NoAudioStream), "Expected NoAudioStream, got: {error}");
}

#[test]
fn forced_video_stream_must_exist() {
    let clip = Clip {
        audio: Some(AudioClip::uniform(4, 160)),
        ..Clip::video(VideoClip::progressive(8, 4, 40))
    };
    let fixture = Fixture::new(clip);

    // Stream 1 is audio.
    let result = MediaSource::build_or_load_index(&fixture.path, fixture.options().with_video_stream(1));
    match result {
        Err(FramedexError::VideoTrackOutOfRange {
            track_index,
            track_count,
        }) => {
            assert_eq!(track_index, 1);
            assert_eq!(track_count, 1);
        }
        Err(other) => panic!("Expected VideoTrackOutOfRange, got: {other}"),
        Ok(_) => panic!("Expected VideoTrackOutOfRange, got a source"),
    }
}

#[test]
fn forced_audio_stream_must_exist() {
    let fixture = Fixture::new(Clip::video(VideoClip::progressive(8, 4, 40)));
    MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index");

    // A current index is on disk; the bad request still fails.
    let result = MediaSource::build_or_load_index(&fixture.path, fixture.options().with_audio_stream(7));
    match result {
        Err(FramedexError::AudioTrackOutOfRange { track_index, .. }) => assert_eq!(track_index, 7),
        Err(other) => panic!("Expected AudioTrackOutOfRange, got: {other}"),
        Ok(_) => panic!("Expected AudioTrackOutOfRange, got a source"),
    }
}

#[test]
fn error_display_messages() {
    let error = FramedexError::FrameOutOfRange {
        frame_number: 500,
        total_frames: 100,
    };
    let message = error.to_string();
    assert!(message.contains("500"));
    assert!(message.contains("100"));
    assert!(message.contains("out of range"));

    let error = FramedexError::SeekMismatch {
        frame_number: 42,
        mode: framedex::SeekMode::Unsafe,
        retries: 3,
    };
    let message = error.to_string();
    assert!(message.contains("42"));
    assert!(message.contains("unsafe"));

    let error = FramedexError::IndexNotFound(Path::new("clip.sim.fdx").to_path_buf());
    assert!(error.is_index_invalid());
    assert!(!FramedexError::Cancelled.is_index_invalid());
}
