//! # framedex
//!
//! Frame-accurate random access into compressed audio and video.
//!
//! `framedex` scans a media file once, records what every coded packet
//! contributes (timestamps, picture type, field structure, keyframe status,
//! decoder configuration), and persists that as an index next to the file.
//! With the index loaded, any presentation frame or audio sample can be
//! decoded exactly, whatever the codec's reordering, the decoder's latency or
//! the container's seeking accuracy. Demuxing and decoding go through FFmpeg
//! via the [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate by
//! default.
//!
//! ## Quick Start
//!
//! ### Decode a Video Frame
//!
//! ```no_run
//! use framedex::{FramedexError, IndexOptions, MediaSource};
//!
//! let mut source = MediaSource::build_or_load_index("input.mkv", IndexOptions::new())?;
//! let frame = source.get_video_frame(1234)?;
//! frame.save("frame_1234.png")?;
//! # Ok::<(), FramedexError>(())
//! ```
//!
//! ### Read Audio Samples
//!
//! ```no_run
//! use framedex::{FramedexError, IndexOptions, MediaSource};
//!
//! let mut source = MediaSource::build_or_load_index("input.mkv", IndexOptions::new())?;
//! let samples = source.get_audio_samples(48_000, 1024)?;
//! println!("{} channels of {}", samples.channels, samples.sample_format);
//! # Ok::<(), FramedexError>(())
//! ```
//!
//! ### Constant Frame Rate Output
//!
//! ```no_run
//! use framedex::{FramedexError, IndexOptions, MediaSource, Rational};
//!
//! let options = IndexOptions::new().with_constant_frame_rate(Some(Rational::new(24000, 1001)));
//! let mut source = MediaSource::build_or_load_index("vfr.mp4", options)?;
//! println!("{} frames at {:?}", source.frame_count(), source.average_framerate());
//! # Ok::<(), FramedexError>(())
//! ```
//!
//! ## Features
//!
//! - **Persistent index**: a versioned text index with length-prefixed
//!   decoder configuration blobs, rebuilt automatically when stale
//! - **Exact seeking**: decoding restarts at the right random-access point,
//!   packets are re-identified through the index, and decoder latency is
//!   measured and corrected on the fly
//! - **Seek modes**: normal, unsafe and aggressive robustness levels, with
//!   the level that was needed reported per frame
//! - **Timestamp repair**: presentation timestamps rebuilt from picture
//!   types or picture order counts when the container's are missing
//! - **Field handling**: repeat-flag aware output with field weaving
//! - **VFR to CFR**: constant-rate output at any rational rate
//! - **Sample-accurate audio**: with pre-roll and silence fill
//! - **Progress & cancellation**: cooperative callbacks and
//!   `CancellationToken` while indexing
//! - **Validation**: structural checks over a built index
//! - **Pluggable backend**: anything implementing [`MediaBackend`]
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system to use the
//! default backend.

mod arena;
pub mod audio;
pub mod backend;
mod bitstream;
mod builder;
pub mod configuration;
mod conversion;
pub mod error;
pub mod extradata;
pub mod ffmpeg;
pub mod frame;
pub mod heuristics;
pub mod index;
pub mod index_file;
pub mod keyframe;
pub mod metadata;
pub mod order;
pub mod packet_iterator;
pub mod progress;
pub mod repeat;
pub mod seek;
pub mod source;
pub mod timeline;
pub mod validation;
pub mod variable_framerate;
pub mod video;

pub use audio::AudioSamples;
pub use backend::{
    Backend, ContainerInfo, DecodedAudio, DecodedPicture, DecodedUnit, Decoder, Demuxer, MediaBackend, MediaType,
    Packet, Plane, SeekBasis, SeekFlags, SeekTableEntry, StreamInfo,
};
pub use configuration::{INDEX_EXTENSION, IndexOptions, SeekMode};
pub use conversion::Rational;
pub use error::FramedexError;
pub use extradata::{ConfigurationTable, DecoderConfiguration};
pub use ffmpeg::{FfmpegBackend, FfmpegLogLevel, set_ffmpeg_log_level};
pub use frame::{AudioFrameRecord, FieldOrder, FrameFlags, PictureStructure, PictureType, VideoFrameRecord};
pub use heuristics::{AudioFrameParser, CodecFamily, PictureInfo, VideoParser};
pub use index::{MediaIndex, StreamIndex, Track};
pub use keyframe::{GroupOfPicturesInfo, KeyFrameMetadata};
pub use metadata::{AudioMetadata, MediaMetadata, VideoMetadata};
pub use packet_iterator::PacketIterator;
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo};
pub use repeat::{FieldSource, RepeatMap};
pub use seek::SeekReport;
pub use source::MediaSource;
pub use timeline::{AudioTimeline, PtsSource, VideoTimeline};
pub use validation::ValidationReport;
pub use variable_framerate::{ConstantRateMapper, VariableFrameRateAnalysis};
pub use video::VideoFrame;
