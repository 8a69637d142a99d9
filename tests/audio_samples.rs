//! Sample-accurate audio read integration tests.
//!
//! Every sample of audio record *r* decodes to `AudioClip::marker(r)` in both
//! bytes, so the origin of any returned sample is visible.

mod common;

use common::{AudioClip, Clip, Fixture, VideoClip};
use framedex::{FramedexError, MediaSource};

fn audio_only(records: usize) -> Fixture {
    Fixture::new(Clip::audio(AudioClip::uniform(records, 160)))
}

fn open(fixture: &Fixture) -> MediaSource {
    MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index")
}

/// Record every sample of an s16 mono block came from.
fn sample_markers(plane: &[u8]) -> Vec<u8> {
    plane.chunks(2).map(|sample| sample[0]).collect()
}

// ── Exact reads ────────────────────────────────────────────────────

#[test]
fn read_spanning_records_is_sample_exact() {
    let fixture = audio_only(20);
    let mut source = open(&fixture);

    let samples = source.get_audio_samples(250, 200).expect("Failed to read samples");
    assert_eq!(samples.start, 250);
    assert_eq!(samples.sample_count, 200);
    assert_eq!(samples.sample_rate, 8000);
    assert_eq!(samples.channels, 1);
    assert_eq!(samples.bytes_per_sample, 2);
    assert!(!samples.planar);
    assert_eq!(samples.planes.len(), 1);
    assert_eq!(samples.planes[0].len(), 400);
    assert_eq!(samples.silent_samples, 0);

    // Samples 250..320 belong to record 1, 320..450 to record 2.
    let markers = sample_markers(&samples.planes[0]);
    assert!(markers[..70].iter().all(|&marker| marker == AudioClip::marker(1)));
    assert!(markers[70..].iter().all(|&marker| marker == AudioClip::marker(2)));
}

#[test]
fn read_deep_into_stream_after_seek() {
    let fixture = audio_only(40);
    let mut source = open(&fixture);

    let samples = source.get_audio_samples(160 * 31 + 5, 10).expect("Failed to read samples");
    let markers = sample_markers(&samples.planes[0]);
    assert!(markers.iter().all(|&marker| marker == AudioClip::marker(31)));
}

#[test]
fn last_sample_is_readable() {
    let fixture = audio_only(10);
    let mut source = open(&fixture);

    let samples = source.get_audio_samples(1599, 1).expect("Failed to read last sample");
    assert_eq!(sample_markers(&samples.planes[0]), vec![AudioClip::marker(9)]);
}

#[test]
fn sequential_reads_do_not_seek() {
    let fixture = audio_only(20);
    let mut source = open(&fixture);

    source.get_audio_samples(0, 480).expect("Failed to read samples");
    let seeks = fixture.counters.seeks();
    let next = source.get_audio_samples(480, 480).expect("Failed to read samples");
    assert_eq!(fixture.counters.seeks(), seeks);

    let markers = sample_markers(&next.planes[0]);
    assert_eq!(markers[0], AudioClip::marker(3));
    assert_eq!(markers[479], AudioClip::marker(5));
}

#[test]
fn repeated_reads_are_identical() {
    let fixture = audio_only(20);
    let mut source = open(&fixture);

    let first = source.get_audio_samples(1000, 300).expect("Failed to read samples");
    source.get_audio_samples(2500, 100).expect("Failed to read samples");
    let again = source.get_audio_samples(1000, 300).expect("Failed to read samples");
    assert_eq!(first, again);
}

// ── Damaged packets ────────────────────────────────────────────────

#[test]
fn undecodable_record_becomes_silence() {
    let mut audio = AudioClip::uniform(12, 160);
    audio.corrupt.insert(5);
    let fixture = Fixture::new(Clip::audio(audio));
    let mut source = open(&fixture);

    let samples = source.get_audio_samples(640, 480).expect("Failed to read samples");
    assert_eq!(samples.silent_samples, 160);
    let markers = sample_markers(&samples.planes[0]);
    assert!(markers[..160].iter().all(|&marker| marker == AudioClip::marker(4)));
    assert!(markers[160..320].iter().all(|&marker| marker == 0));
    assert!(markers[320..].iter().all(|&marker| marker == AudioClip::marker(6)));
}

// ── Ranges ─────────────────────────────────────────────────────────

#[test]
fn empty_range_is_rejected() {
    let fixture = audio_only(4);
    let mut source = open(&fixture);

    match source.get_audio_samples(10, 0) {
        Err(FramedexError::SampleRangeOutOfRange { start, end, .. }) => {
            assert_eq!((start, end), (10, 10));
        }
        Err(other) => panic!("Expected SampleRangeOutOfRange, got: {other}"),
        Ok(_) => panic!("Expected SampleRangeOutOfRange, got samples"),
    }
}

#[test]
fn range_past_end_is_rejected() {
    let fixture = audio_only(4);
    let mut source = open(&fixture);

    match source.get_audio_samples(600, 100) {
        Err(FramedexError::SampleRangeOutOfRange { total_samples, .. }) => {
            assert_eq!(total_samples, 640);
        }
        Err(other) => panic!("Expected SampleRangeOutOfRange, got: {other}"),
        Ok(_) => panic!("Expected SampleRangeOutOfRange, got samples"),
    }
}

// ── Streams ────────────────────────────────────────────────────────

#[test]
fn audio_and_video_are_read_independently() {
    let clip = Clip {
        audio: Some(AudioClip::uniform(20, 160)),
        ..Clip::video(VideoClip::bidirectional(3, 7, 40))
    };
    let fixture = Fixture::new(clip);
    let mut source = open(&fixture);

    let before = source.get_audio_samples(800, 160).expect("Failed to read samples");
    let frame = source.get_video_frame(10).expect("Failed to decode frame");
    assert_eq!(frame.picture.planes[0].data[0], common::frame_marker(10));
    let after = source.get_audio_samples(800, 160).expect("Failed to read samples");
    assert_eq!(before, after);
    assert!(sample_markers(&after.planes[0]).iter().all(|&marker| marker == AudioClip::marker(5)));
}

#[test]
fn audio_only_source_has_no_frames() {
    let fixture = audio_only(8);
    let mut source = open(&fixture);

    assert_eq!(source.frame_count(), 0);
    assert!(source.index().video_stream().is_none());
    match source.get_video_frame(0) {
        Err(FramedexError::NoVideoStream) => {}
        Err(other) => panic!("Expected NoVideoStream, got: {other}"),
        Ok(_) => panic!("Expected NoVideoStream, got a frame"),
    }
}
