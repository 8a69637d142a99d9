//! Error types for the `framedex` crate.
//!
//! This module defines [`FramedexError`], the unified error type returned by
//! all fallible operations in the crate. Errors carry enough context to
//! diagnose the problem: file paths, frame or sample numbers, index line
//! numbers and upstream error messages.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

use crate::configuration::SeekMode;

/// The unified error type for all `framedex` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FramedexError {
    /// The media file could not be opened.
    #[error("Failed to open media file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to [`crate::MediaSource::build_or_load_index`].
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The file does not contain a usable video stream.
    #[error("No video stream found in file")]
    NoVideoStream,

    /// The file does not contain a usable audio stream.
    #[error("No audio stream found in file")]
    NoAudioStream,

    /// A decoder could not be opened for a codec configuration.
    #[error("Failed to open decoder for stream {stream_index}: {reason}")]
    DecoderOpen {
        /// Container stream index.
        stream_index: usize,
        /// Underlying reason.
        reason: String,
    },

    /// A video picture could not be decoded.
    #[error("Failed to decode video frame: {0}")]
    VideoDecodeError(String),

    /// Audio data could not be decoded.
    #[error("Failed to decode audio: {0}")]
    AudioDecodeError(String),

    /// The requested frame number exceeds the total frame count.
    #[error("Frame {frame_number} is out of range (video has {total_frames} frames)")]
    FrameOutOfRange {
        /// The frame number that was requested.
        frame_number: u32,
        /// The total number of frames in the video.
        total_frames: u32,
    },

    /// The requested sample range exceeds the total sample count.
    #[error("Samples {start}..{end} are out of range (audio has {total_samples} samples)")]
    SampleRangeOutOfRange {
        /// First requested sample.
        start: u64,
        /// One past the last requested sample.
        end: u64,
        /// Total samples in the audio stream.
        total_samples: u64,
    },

    /// The decoder never produced the requested picture.
    #[error("Frame {frame_number} could not be recovered in {mode} seek mode after {retries} retries")]
    SeekMismatch {
        /// The requested presentation frame.
        frame_number: u32,
        /// The seek mode in effect.
        mode: SeekMode,
        /// How many older random-access points were tried.
        retries: u32,
    },

    /// The demuxer could not be positioned at a random-access point.
    #[error("Failed to seek stream {stream_index} to sample {sample}: {reason}")]
    SeekFailed {
        /// Container stream index.
        stream_index: usize,
        /// Decoding-order sample that was targeted.
        sample: u32,
        /// Underlying reason.
        reason: String,
    },

    /// A persisted index could not be parsed or failed validation.
    #[error("Invalid index file at line {line}: {reason}")]
    IndexParse {
        /// 1-based line of the index file where parsing stopped.
        line: usize,
        /// What was wrong.
        reason: String,
    },

    /// A persisted index is structurally sound but does not describe the
    /// current source or request.
    #[error("Stale index file: {0}")]
    StaleIndex(String),

    /// An index was requested to be loaded, but no index file exists.
    #[error("Index file not found at {0}")]
    IndexNotFound(PathBuf),

    /// The source path is not UTF-8 or spans several lines, so an index
    /// file cannot record it.
    #[error("Source path {0:?} cannot be recorded in an index file")]
    UnrecordablePath(PathBuf),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while writing a frame preview.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// The requested video track index is out of range.
    #[error("Video track {track_index} is out of range (file has {track_count} video tracks)")]
    VideoTrackOutOfRange {
        /// Requested track index.
        track_index: usize,
        /// Number of available video tracks.
        track_count: usize,
    },

    /// The requested audio track index is out of range.
    #[error("Audio track {track_index} is out of range (file has {track_count} audio tracks)")]
    AudioTrackOutOfRange {
        /// Requested track index.
        track_index: usize,
        /// Number of available audio tracks.
        track_count: usize,
    },
}

impl From<FfmpegError> for FramedexError {
    fn from(error: FfmpegError) -> Self {
        FramedexError::FfmpegError(error.to_string())
    }
}

impl FramedexError {
    /// Shorthand for an [`IndexParse`](FramedexError::IndexParse) error.
    pub(crate) fn parse(line: usize, reason: impl Into<String>) -> Self {
        FramedexError::IndexParse {
            line,
            reason: reason.into(),
        }
    }

    /// Whether this error means a persisted index must be rebuilt rather
    /// than trusted.
    pub fn is_index_invalid(&self) -> bool {
        matches!(
            self,
            FramedexError::IndexParse { .. }
                | FramedexError::StaleIndex(_)
                | FramedexError::IndexNotFound(_)
        )
    }
}
