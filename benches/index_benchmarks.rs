//! Benchmarks for indexing, index persistence and frame-accurate seeking.
//!
//! Run with: cargo bench
//!
//! Requires a fixture at `tests/fixtures/sample_video.mp4`; benchmarks are
//! skipped without it.

use std::path::Path;

use criterion::{BatchSize, Criterion};
use framedex::{FfmpegLogLevel, IndexOptions, MediaSource, SeekMode, index_file, set_ffmpeg_log_level};

const SAMPLE_VIDEO: &str = "tests/fixtures/sample_video.mp4";

fn fixture_present() -> bool {
    if Path::new(SAMPLE_VIDEO).exists() {
        return true;
    }
    eprintln!("Skipping benchmark: fixture not found");
    false
}

fn benchmark_indexing(criterion: &mut Criterion) {
    set_ffmpeg_log_level(FfmpegLogLevel::Error);
    if !fixture_present() {
        return;
    }

    criterion.bench_function("build index (no write)", |bencher| {
        bencher.iter(|| {
            let options = IndexOptions::new().with_write_index(false);
            let _source = MediaSource::build_or_load_index(SAMPLE_VIDEO, options).unwrap();
        });
    });

    let directory = tempfile::tempdir().unwrap();
    let index_path = directory.path().join("sample_video.fdx");
    let options = IndexOptions::new().with_index_path(&index_path);
    MediaSource::build_or_load_index(SAMPLE_VIDEO, options.clone()).unwrap();

    criterion.bench_function("load persisted index", |bencher| {
        bencher.iter(|| {
            let _source = MediaSource::build_or_load_index(SAMPLE_VIDEO, options.clone()).unwrap();
        });
    });
}

fn benchmark_index_format(criterion: &mut Criterion) {
    if !fixture_present() {
        return;
    }

    let options = IndexOptions::new().with_write_index(false);
    let source = MediaSource::build_or_load_index(SAMPLE_VIDEO, options).unwrap();
    let bytes = index_file::serialize(source.index()).expect("Failed to serialize index");

    criterion.bench_function("serialize index", |bencher| {
        bencher.iter(|| index_file::serialize(source.index()).expect("Failed to serialize index"));
    });

    criterion.bench_function("parse index", |bencher| {
        bencher.iter(|| index_file::parse(&bytes).unwrap());
    });
}

fn benchmark_seeking(criterion: &mut Criterion) {
    if !fixture_present() {
        return;
    }

    let directory = tempfile::tempdir().unwrap();
    let index_path = directory.path().join("sample_video.fdx");
    let options = IndexOptions::new().with_index_path(&index_path);
    let mut source = MediaSource::build_or_load_index(SAMPLE_VIDEO, options.clone()).unwrap();
    let frame_count = source.frame_count();
    if frame_count == 0 {
        return;
    }

    criterion.bench_function("sequential frames (10)", |bencher| {
        bencher.iter(|| {
            for frame in 0..frame_count.min(10) {
                let _frame = source.get_video_frame(frame).unwrap();
            }
        });
    });

    // A fresh source per iteration so the cache never serves the frame.
    let target = frame_count / 2;
    for mode in [SeekMode::Normal, SeekMode::Aggressive] {
        let options = options.clone().with_seek_mode(mode);
        criterion.bench_function(&format!("random frame seek ({mode})"), |bencher| {
            bencher.iter_batched(
                || MediaSource::build_or_load_index(SAMPLE_VIDEO, options.clone()).unwrap(),
                |mut source| source.get_video_frame(target).unwrap(),
                BatchSize::SmallInput,
            );
        });
    }

    let mut stride_source = MediaSource::build_or_load_index(SAMPLE_VIDEO, options).unwrap();
    criterion.bench_function("scattered frames (stride 37)", |bencher| {
        let mut frame = 0;
        bencher.iter(|| {
            frame = (frame + 37) % frame_count;
            stride_source.get_video_frame(frame).unwrap()
        });
    });
}

criterion::criterion_group!(benches, benchmark_indexing, benchmark_index_format, benchmark_seeking);
criterion::criterion_main!(benches);
