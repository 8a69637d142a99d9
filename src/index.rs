//! The in-memory frame index.
//!
//! A [`MediaIndex`] is what the builder produces from a scan and what the
//! parser reconstructs from a persisted index file. Both go through the same
//! derivation step ([`crate::timeline`]), so a loaded index is equal to a
//! freshly built one.

use std::path::PathBuf;

use crate::{
    backend::{MediaType, SeekTableEntry},
    conversion::Rational,
    extradata::ConfigurationTable,
    frame::{AudioFrameRecord, VideoFrameRecord},
    heuristics::CodecFamily,
    timeline::{AudioTimeline, VideoTimeline, derive_audio, derive_video},
};

/// Index of every video and audio stream of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaIndex {
    /// Source file the index describes.
    pub source_path: PathBuf,
    /// Source file size in bytes when indexed.
    pub source_size: u64,
    /// Source modification time (seconds since the Unix epoch) when
    /// indexed.
    pub source_modified: i64,
    /// Container format name.
    pub format_name: String,
    /// Container capability flags.
    pub format_flags: u32,
    /// Active video stream.
    pub active_video_stream: Option<usize>,
    /// Active audio stream.
    pub active_audio_stream: Option<usize>,
    /// Indexed streams, ordered by container stream index.
    pub streams: Vec<StreamIndex>,
    /// Stream index of every record in demux order.
    pub(crate) packet_order: Vec<usize>,
}

/// Index of one elementary stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamIndex {
    /// Container stream index.
    pub stream_index: usize,
    /// Time base of all timestamps in this stream.
    pub time_base: Rational,
    /// Decoder-configuration epochs.
    pub configurations: ConfigurationTable,
    /// Container seek table, restored into the demuxer on load.
    pub seek_table: Vec<SeekTableEntry>,
    /// Stream duration in ticks.
    pub duration: i64,
    /// Per-frame records and what was derived from them.
    pub track: Track,
}

/// Records of a video or audio stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Track {
    /// Video records.
    Video(VideoTrack),
    /// Audio records.
    Audio(AudioTrack),
}

/// Video records and their derived timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrack {
    /// One record per coded picture, in decoding order.
    pub frames: Vec<VideoFrameRecord>,
    /// Presentation order, keyframes and rate information.
    pub timeline: VideoTimeline,
}

/// Audio records and their derived timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    /// One record per coded packet, in decoding order.
    pub frames: Vec<AudioFrameRecord>,
    /// Resolved lengths and sample offsets.
    pub timeline: AudioTimeline,
}

/// Records as observed by a scan or read back from an index file, before
/// derivation.
pub(crate) enum ObservedRecords {
    Video(Vec<VideoFrameRecord>),
    Audio(Vec<AudioFrameRecord>),
}

impl StreamIndex {
    /// Run derivation over observed records.
    pub(crate) fn derive(
        stream_index: usize,
        time_base: Rational,
        configurations: ConfigurationTable,
        seek_table: Vec<SeekTableEntry>,
        records: ObservedRecords,
        byte_seekable: bool,
        duration_hint: Option<i64>,
    ) -> Self {
        let family = family_of(&configurations);
        let (track, duration) = match records {
            ObservedRecords::Video(mut frames) => {
                let timeline = derive_video(&mut frames, time_base, family, byte_seekable, duration_hint);
                let duration = timeline.duration;
                (Track::Video(VideoTrack { frames, timeline }), duration)
            }
            ObservedRecords::Audio(frames) => {
                let timeline = derive_audio(&frames, time_base, byte_seekable, duration_hint);
                let duration = timeline.duration;
                (Track::Audio(AudioTrack { frames, timeline }), duration)
            }
        };
        Self {
            stream_index,
            time_base,
            configurations,
            seek_table,
            duration,
            track,
        }
    }

    /// Kind of stream.
    pub fn media_type(&self) -> MediaType {
        match self.track {
            Track::Video(_) => MediaType::Video,
            Track::Audio(_) => MediaType::Audio,
        }
    }

    /// Number of records.
    pub fn record_count(&self) -> usize {
        match &self.track {
            Track::Video(track) => track.frames.len(),
            Track::Audio(track) => track.frames.len(),
        }
    }

    /// Codec family of the first epoch.
    pub fn codec_family(&self) -> CodecFamily {
        family_of(&self.configurations)
    }

    /// Video records, if this is a video stream.
    pub fn video(&self) -> Option<&VideoTrack> {
        match &self.track {
            Track::Video(track) => Some(track),
            Track::Audio(_) => None,
        }
    }

    /// Audio records, if this is an audio stream.
    pub fn audio(&self) -> Option<&AudioTrack> {
        match &self.track {
            Track::Audio(track) => Some(track),
            Track::Video(_) => None,
        }
    }
}

fn family_of(configurations: &ConfigurationTable) -> CodecFamily {
    configurations
        .get(0)
        .map(|configuration| CodecFamily::from_codec_name(&configuration.codec_name))
        .unwrap_or(CodecFamily::Other)
}

impl MediaIndex {
    /// Look up a stream by container index.
    pub fn stream(&self, stream_index: usize) -> Option<&StreamIndex> {
        self.streams
            .iter()
            .find(|stream| stream.stream_index == stream_index)
    }

    /// The active video stream.
    pub fn video_stream(&self) -> Option<&StreamIndex> {
        self.active_video_stream.and_then(|index| self.stream(index))
    }

    /// The active audio stream.
    pub fn audio_stream(&self) -> Option<&StreamIndex> {
        self.active_audio_stream.and_then(|index| self.stream(index))
    }

    /// Indexed streams of one kind.
    pub fn streams_of(&self, media_type: MediaType) -> impl Iterator<Item = &StreamIndex> {
        self.streams
            .iter()
            .filter(move |stream| stream.media_type() == media_type)
    }

    /// The stream of `media_type` with the most records, lowest index on
    /// ties.
    pub(crate) fn default_stream(&self, media_type: MediaType) -> Option<usize> {
        let mut best: Option<&StreamIndex> = None;
        for stream in self.streams_of(media_type) {
            if stream.record_count() == 0 {
                continue;
            }
            if best.is_none_or(|current| stream.record_count() > current.record_count()) {
                best = Some(stream);
            }
        }
        best.map(|stream| stream.stream_index)
    }
}
