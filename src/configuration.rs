//! Index and seek configuration.
//!
//! [`IndexOptions`] is a builder that threads progress callbacks,
//! cancellation tokens, seek tuning and track selection through
//! [`MediaSource::build_or_load_index`](crate::MediaSource::build_or_load_index).
//! It is captured once when a source is opened; nothing is read from
//! process-wide state afterwards.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framedex::{CancellationToken, IndexOptions, ProgressCallback, ProgressInfo, SeekMode};
//!
//! struct LogProgress;
//! impl ProgressCallback for LogProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("{:?}: {} packets", info.operation, info.current);
//!     }
//! }
//!
//! let token = CancellationToken::new();
//! let options = IndexOptions::new()
//!     .with_progress(Arc::new(LogProgress))
//!     .with_cancellation(token.clone())
//!     .with_batch_size(500)
//!     .with_seek_mode(SeekMode::Unsafe);
//! ```

use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use crate::{
    backend::Backend,
    conversion::Rational,
    progress::{CancellationToken, NoOpProgress, ProgressCallback},
};

/// Extension appended to the source path for the default index location.
pub const INDEX_EXTENSION: &str = "fdx";

/// How hard the seek engine tries before giving up on a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum SeekMode {
    /// Trust the index strictly and fail on the first unresolved mismatch or
    /// decoder error. This is the default.
    #[default]
    Normal,
    /// On mismatch, retry from progressively older random-access points.
    Unsafe,
    /// Like [`Unsafe`](SeekMode::Unsafe), but also tolerate decoder errors
    /// and return the closest frame obtained when retries run out.
    Aggressive,
}

impl Display for SeekMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            SeekMode::Normal => "normal",
            SeekMode::Unsafe => "unsafe",
            SeekMode::Aggressive => "aggressive",
        };
        f.write_str(name)
    }
}

impl FromStr for SeekMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "normal" => Ok(SeekMode::Normal),
            "unsafe" => Ok(SeekMode::Unsafe),
            "aggressive" => Ok(SeekMode::Aggressive),
            other => Err(format!("unknown seek mode {other:?}")),
        }
    }
}

/// Configuration for building, loading and reading an index.
///
/// All fields have sensible defaults: no progress callback, no
/// cancellation, normal seek mode, a forward-seek threshold of 10 frames,
/// one decoder thread, no frame-rate conversion and no repeat-flag
/// handling. The index is stored next to the source as `<source>.fdx`.
#[derive(Clone)]
pub struct IndexOptions {
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) batch_size: u64,
    pub(crate) seek_mode: SeekMode,
    pub(crate) forward_seek_threshold: u32,
    pub(crate) decoder_threads: u32,
    /// `Some(None)` converts to the stream's average rate.
    pub(crate) constant_frame_rate: Option<Option<Rational>>,
    pub(crate) apply_repeat_flag: bool,
    pub(crate) video_stream: Option<usize>,
    pub(crate) audio_stream: Option<usize>,
    pub(crate) index_path: Option<PathBuf>,
    pub(crate) write_index: bool,
    pub(crate) backend: Backend,
}

impl Debug for IndexOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("IndexOptions")
            .field("has_progress", &true)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("batch_size", &self.batch_size)
            .field("seek_mode", &self.seek_mode)
            .field("forward_seek_threshold", &self.forward_seek_threshold)
            .field("decoder_threads", &self.decoder_threads)
            .field("constant_frame_rate", &self.constant_frame_rate)
            .field("apply_repeat_flag", &self.apply_repeat_flag)
            .field("video_stream", &self.video_stream)
            .field("audio_stream", &self.audio_stream)
            .field("index_path", &self.index_path)
            .field("write_index", &self.write_index)
            .field("backend", &self.backend)
            .finish()
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexOptions {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            batch_size: 1,
            seek_mode: SeekMode::Normal,
            forward_seek_threshold: 10,
            decoder_threads: 1,
            constant_frame_rate: None,
            apply_repeat_flag: false,
            video_stream: None,
            audio_stream: None,
            index_path: None,
            write_index: true,
            backend: Backend::Ffmpeg,
        }
    }

    /// Attach a progress callback, fired every
    /// [`batch_size`](IndexOptions::with_batch_size) packets while indexing.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// The token is checked once per demuxed packet. When it is cancelled,
    /// indexing stops with [`FramedexError::Cancelled`](crate::FramedexError::Cancelled)
    /// and no index file is left behind.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set how often the progress callback fires. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the seek robustness level.
    #[must_use]
    pub fn with_seek_mode(mut self, mode: SeekMode) -> Self {
        self.seek_mode = mode;
        self
    }

    /// Set how many frames ahead of the last request are reached by
    /// decoding forward instead of seeking.
    #[must_use]
    pub fn with_forward_seek_threshold(mut self, frames: u32) -> Self {
        self.forward_seek_threshold = frames;
        self
    }

    /// Set the decoder thread count. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_decoder_threads(mut self, threads: u32) -> Self {
        self.decoder_threads = threads.max(1);
        self
    }

    /// Present the video at a constant frame rate.
    ///
    /// `None` uses the stream's average rate. Takes precedence over
    /// [`with_repeat_flag`](IndexOptions::with_repeat_flag).
    #[must_use]
    pub fn with_constant_frame_rate(mut self, rate: Option<Rational>) -> Self {
        self.constant_frame_rate = Some(rate.filter(Rational::is_valid));
        self
    }

    /// Honour repeat-field flags and reconstruct field pairs.
    #[must_use]
    pub fn with_repeat_flag(mut self, apply: bool) -> Self {
        self.apply_repeat_flag = apply;
        self
    }

    /// Force the active video stream by container index.
    #[must_use]
    pub fn with_video_stream(mut self, stream_index: usize) -> Self {
        self.video_stream = Some(stream_index);
        self
    }

    /// Force the active audio stream by container index.
    #[must_use]
    pub fn with_audio_stream(mut self, stream_index: usize) -> Self {
        self.audio_stream = Some(stream_index);
        self
    }

    /// Store the index at a custom path instead of `<source>.fdx`.
    #[must_use]
    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    /// Control whether a freshly built index is written to disk. Defaults
    /// to `true`.
    #[must_use]
    pub fn with_write_index(mut self, write: bool) -> Self {
        self.write_index = write;
        self
    }

    /// Select the demux/decode backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// The seek robustness level.
    pub fn seek_mode(&self) -> SeekMode {
        self.seek_mode
    }

    /// Where the index for `source` is stored.
    pub fn index_path_for(&self, source: &Path) -> PathBuf {
        match &self.index_path {
            Some(path) => path.clone(),
            None => {
                let mut name = source.as_os_str().to_owned();
                name.push(".");
                name.push(INDEX_EXTENSION);
                PathBuf::from(name)
            }
        }
    }

    /// Returns `true` if cancellation has been requested.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}
