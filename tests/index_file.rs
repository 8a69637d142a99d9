//! Persisted index format integration tests.

mod common;

use common::{AudioClip, Clip, Fixture, VideoClip};
use framedex::{
    FramedexError, MediaSource,
    index_file::{INDEX_VERSION, parse, read_index_file, serialize},
};

fn audio_and_video() -> Clip {
    Clip {
        audio: Some(AudioClip::uniform(20, 160)),
        ..Clip::video(VideoClip::bidirectional(3, 7, 40))
    }
}

fn expect_parse_error(bytes: &[u8]) {
    match parse(bytes) {
        Err(FramedexError::IndexParse { .. }) => {}
        Err(other) => panic!("Expected IndexParse, got: {other}"),
        Ok(_) => panic!("Expected IndexParse, got an index"),
    }
}

// ── Round trips ────────────────────────────────────────────────────

#[test]
fn written_index_parses_back_identically() {
    let fixture = Fixture::new(audio_and_video());
    let source = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index");

    let persisted = read_index_file(&fixture.index_path()).expect("Failed to read index");
    assert_eq!(&persisted, source.index());
    assert_eq!(persisted.streams.len(), 2);
    assert_eq!(persisted.active_video_stream, Some(common::VIDEO_STREAM));
    assert_eq!(persisted.active_audio_stream, Some(common::AUDIO_STREAM));
}

#[test]
fn loaded_index_matches_built_index() {
    let fixture = Fixture::new(audio_and_video());
    let built = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index");
    let opened_after_build = fixture.counters.demuxers_opened.load(std::sync::atomic::Ordering::SeqCst);

    let loaded = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to load index");
    assert_eq!(loaded.index(), built.index());
    // Loading opens demuxers for reading only, never for a scan.
    assert_eq!(
        fixture.counters.demuxers_opened.load(std::sync::atomic::Ordering::SeqCst),
        opened_after_build + 2
    );
}

#[test]
fn rebuilding_gives_identical_bytes() {
    let fixture = Fixture::new(audio_and_video());
    let first = MediaSource::build_or_load_index(&fixture.path, fixture.options().with_write_index(false))
        .expect("Failed to build index");
    let second = MediaSource::build_or_load_index(&fixture.path, fixture.options().with_write_index(false))
        .expect("Failed to build index");

    assert!(!fixture.index_path().exists());
    assert_eq!(
        serialize(first.index()).expect("Failed to serialize index"),
        serialize(second.index()).expect("Failed to serialize index")
    );
}

#[test]
fn configuration_epochs_round_trip() {
    let mut video = VideoClip::progressive(24, 4, 40);
    video.configuration_changes = vec![8, 16];
    let fixture = Fixture::new(Clip::video(video));
    let source = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index");

    let stream = source.index().video_stream().expect("video stream");
    assert_eq!(stream.configurations.len(), 3);
    assert_eq!(stream.configurations.get(2).map(|epoch| epoch.extradata.clone()), Some(vec![0xE0, 2]));
    let track = stream.video().expect("video track");
    let epochs: Vec<u32> = track.frames.iter().map(|frame| frame.epoch).collect();
    assert_eq!(&epochs[6..10], &[0, 0, 1, 1]);
    assert_eq!(epochs[23], 2);

    let bytes = serialize(source.index()).expect("Failed to serialize index");
    let parsed = parse(&bytes).expect("Failed to parse index");
    assert_eq!(&parsed, source.index());
}

// ── Rejection ──────────────────────────────────────────────────────

#[test]
fn version_mismatch_is_rejected() {
    let fixture = Fixture::new(Clip::video(VideoClip::progressive(8, 4, 40)));
    let source = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index");

    let bytes = serialize(source.index()).expect("Failed to serialize index");
    let text = String::from_utf8(bytes).expect("index without blobs is text");
    let current = format!("<FramedexIndexVersion={INDEX_VERSION}>");
    let future = format!("<FramedexIndexVersion={}>", INDEX_VERSION + 1);
    expect_parse_error(text.replacen(&current, &future, 1).as_bytes());
}

#[test]
fn negative_seek_table_count_is_rejected() {
    let fixture = Fixture::new(Clip::video(VideoClip::progressive(8, 4, 40)));
    let source = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index");
    let stream = source.index().video_stream().expect("video stream");
    assert!(!stream.seek_table.is_empty());

    let bytes = serialize(source.index()).expect("Failed to serialize index");
    let text = String::from_utf8(bytes).expect("index without blobs is text");
    let header = format!("<StreamIndexToSeekTable=0,Entries={}>", stream.seek_table.len());
    assert!(text.contains(&header));
    expect_parse_error(text.replacen(&header, "<StreamIndexToSeekTable=0,Entries=-1>", 1).as_bytes());
}

#[test]
fn truncated_index_is_rejected() {
    let fixture = Fixture::new(Clip::video(VideoClip::progressive(8, 4, 40)));
    let source = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index");

    let bytes = serialize(source.index()).expect("Failed to serialize index");
    expect_parse_error(&bytes[..bytes.len() / 2]);
    expect_parse_error(b"");
}

// ── Rebuilds ───────────────────────────────────────────────────────

#[test]
fn unreadable_index_is_rebuilt() {
    let fixture = Fixture::new(Clip::video(VideoClip::progressive(8, 4, 40)));
    std::fs::write(fixture.index_path(), b"<FramedexIndexVersion=0>\n").expect("Failed to write index");

    let source = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to rebuild index");
    assert_eq!(source.frame_count(), 8);
    let persisted = read_index_file(&fixture.index_path()).expect("rebuilt index must be written");
    assert_eq!(&persisted, source.index());
}

#[test]
fn changed_source_is_reindexed() {
    let fixture = Fixture::new(Clip::video(VideoClip::progressive(8, 4, 40)));
    let first = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index");
    assert_eq!(first.index().source_size, b"simulated media".len() as u64);

    std::fs::write(&fixture.path, b"simulated media, re-encoded").expect("Failed to rewrite source");
    let second = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to rebuild index");
    assert_eq!(second.index().source_size, b"simulated media, re-encoded".len() as u64);
}

#[test]
fn index_built_for_another_source_is_rebuilt() {
    let shared = tempfile::tempdir().expect("Failed to create temp dir");
    let index_path = shared.path().join("shared.ffindex");
    let first = Fixture::new(Clip::video(VideoClip::progressive(8, 4, 40)));
    let second = Fixture::new(Clip::video(VideoClip::progressive(12, 4, 40)));

    MediaSource::build_or_load_index(&first.path, first.options().with_index_path(&index_path))
        .expect("Failed to build index");
    let source = MediaSource::build_or_load_index(&second.path, second.options().with_index_path(&index_path))
        .expect("Failed to rebuild index");

    assert_eq!(source.frame_count(), 12);
    let persisted = read_index_file(&index_path).expect("Failed to read index");
    assert_eq!(persisted.source_path, second.path);
}

#[test]
fn source_path_with_line_break_is_not_persisted() {
    let fixture = Fixture::named(Clip::video(VideoClip::progressive(8, 4, 40)), "two\nlines.sim");
    let source = MediaSource::build_or_load_index(&fixture.path, fixture.options()).expect("Failed to build index");

    assert_eq!(source.frame_count(), 8);
    assert!(!fixture.index_path().exists());
    match serialize(source.index()) {
        Err(FramedexError::UnrecordablePath(path)) => assert_eq!(path, fixture.path),
        Err(other) => panic!("Expected UnrecordablePath, got: {other}"),
        Ok(_) => panic!("Expected UnrecordablePath, got an index"),
    }
}
