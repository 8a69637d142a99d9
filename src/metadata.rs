//! Media metadata types.
//!
//! This module defines the metadata structures returned by
//! [`MediaSource::metadata`](crate::MediaSource::metadata). Everything is
//! read from the index, so producing metadata never touches the file.

use std::time::Duration;

use crate::{
    backend::MediaType,
    conversion::{Rational, ticks_to_duration},
    index::{MediaIndex, StreamIndex},
};

/// Complete metadata for a media file.
///
/// Contains metadata for the active video and audio streams, plus
/// container-level information such as total duration and format name.
///
/// # Example
///
/// ```no_run
/// use framedex::{FramedexError, IndexOptions, MediaSource};
///
/// let source = MediaSource::build_or_load_index("input.mkv", IndexOptions::new())?;
/// let metadata = source.metadata();
/// println!("Duration: {:?}", metadata.duration);
/// println!("Format: {}", metadata.format);
/// # Ok::<(), FramedexError>(())
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct MediaMetadata {
    /// Active video stream metadata, if a video stream is present.
    pub video: Option<VideoMetadata>,
    /// Active audio stream metadata, if an audio stream is present.
    pub audio: Option<AudioMetadata>,
    /// Longest duration of the active streams.
    pub duration: Duration,
    /// Container format name (e.g. `"mov,mp4,m4a,3gp,3g2,mj2"`, `"matroska,webm"`).
    pub format: String,
    /// Number of indexed video streams.
    pub video_stream_count: usize,
    /// Number of indexed audio streams.
    pub audio_stream_count: usize,
}

/// Metadata for a video stream.
#[derive(Debug, Clone)]
#[must_use]
pub struct VideoMetadata {
    /// Container stream index.
    pub stream_index: usize,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format name.
    pub pixel_format: String,
    /// Average frame rate over the presented span.
    pub frame_rate: Option<Rational>,
    /// Number of presentation frames.
    pub frame_count: u32,
    /// Number of usable keyframes.
    pub keyframe_count: usize,
    /// Whether frame durations vary.
    pub variable_frame_rate: bool,
    /// Codec name (e.g. `"h264"`, `"hevc"`, `"mpeg2video"`).
    pub codec: String,
    /// Number of decoder-configuration epochs.
    pub configuration_count: usize,
    /// Stream duration.
    pub duration: Duration,
}

/// Metadata for an audio stream.
#[derive(Debug, Clone)]
#[must_use]
pub struct AudioMetadata {
    /// Container stream index.
    pub stream_index: usize,
    /// Sample rate in hertz (e.g. `44100`, `48000`).
    pub sample_rate: u32,
    /// Number of audio channels (e.g. `2` for stereo).
    pub channels: u32,
    /// Sample format name.
    pub sample_format: String,
    /// Codec name (e.g. `"aac"`, `"mp3"`, `"flac"`).
    pub codec: String,
    /// Total samples per channel.
    pub total_samples: u64,
    /// Stream duration.
    pub duration: Duration,
}

impl MediaMetadata {
    pub(crate) fn from_index(index: &MediaIndex) -> Self {
        let video = index.video_stream().and_then(video_metadata);
        let audio = index.audio_stream().and_then(audio_metadata);
        let duration = video
            .iter()
            .map(|video| video.duration)
            .chain(audio.iter().map(|audio| audio.duration))
            .max()
            .unwrap_or_default();
        Self {
            video,
            audio,
            duration,
            format: index.format_name.clone(),
            video_stream_count: index.streams_of(MediaType::Video).count(),
            audio_stream_count: index.streams_of(MediaType::Audio).count(),
        }
    }
}

fn video_metadata(stream: &StreamIndex) -> Option<VideoMetadata> {
    let track = stream.video()?;
    let configuration = stream.configurations.get(0)?;
    let timeline = &track.timeline;
    Some(VideoMetadata {
        stream_index: stream.stream_index,
        width: configuration.width,
        height: configuration.height,
        pixel_format: configuration.pixel_format.clone(),
        frame_rate: timeline.average_frame_rate,
        frame_count: timeline.frame_count,
        keyframe_count: timeline.keyframes.count(),
        variable_frame_rate: timeline.variable_frame_rate,
        codec: configuration.codec_name.clone(),
        configuration_count: stream.configurations.len(),
        duration: ticks_to_duration(stream.duration, stream.time_base),
    })
}

fn audio_metadata(stream: &StreamIndex) -> Option<AudioMetadata> {
    let track = stream.audio()?;
    let configuration = stream.configurations.get(0)?;
    Some(AudioMetadata {
        stream_index: stream.stream_index,
        sample_rate: track.timeline.sample_rate,
        channels: configuration.channels,
        sample_format: configuration.sample_format.clone(),
        codec: configuration.codec_name.clone(),
        total_samples: track.timeline.total_samples,
        duration: ticks_to_duration(stream.duration, stream.time_base),
    })
}
