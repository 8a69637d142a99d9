//! Progress reporting and cancellation support.
//!
//! Index builds can take a while on long files. A [`ProgressCallback`] sees
//! packet counts and byte positions as the scan proceeds, and a
//! [`CancellationToken`] stops it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framedex::{FramedexError, IndexOptions, MediaSource, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let Some(position) = info.current_position {
//!             println!("[{:?}] {} packets, at byte {position}", info.operation, info.current);
//!         }
//!     }
//! }
//!
//! let options = IndexOptions::new().with_progress(Arc::new(PrintProgress));
//! let source = MediaSource::build_or_load_index("input.mkv", options)?;
//! # Ok::<(), FramedexError>(())
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// What a progress report is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Scanning packets to build an index.
    Indexing,
    /// Reading a persisted index.
    IndexLoading,
}

/// A snapshot of indexing progress.
///
/// Packets of every stream count, including streams that are not indexed.
/// Reports arrive every
/// [`batch_size`](crate::IndexOptions::with_batch_size) packets, plus once
/// when the scan ends.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub operation: OperationType,
    /// Packets demuxed so far.
    pub current: u64,
    /// Packets expected, when known up front. Containers rarely say, so
    /// this is `None` while indexing.
    pub total: Option<u64>,
    /// `current / total` as a percentage, when `total` is known.
    pub percentage: Option<f32>,
    pub elapsed: Duration,
    /// Extrapolated from the rate so far, when `total` is known.
    pub estimated_remaining: Option<Duration>,
    /// Byte offset of the latest packet. Compare against the file size for
    /// a progress bar when `total` is unknown.
    pub current_position: Option<u64>,
    /// Presentation time of the latest packet.
    pub current_timestamp: Option<Duration>,
}

/// Receives [`ProgressInfo`] snapshots while an index is built or loaded.
///
/// Callbacks only observe; stopping early goes through a
/// [`CancellationToken`].
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, info: &ProgressInfo);
}

/// Default callback.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Shared flag that stops an index build.
///
/// Clones share state. The builder checks it before every demuxed packet
/// and returns [`FramedexError::Cancelled`](crate::FramedexError::Cancelled)
/// without writing an index.
///
/// # Example
///
/// ```
/// use framedex::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// let shared = token.clone();
/// shared.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts packets and hands batched snapshots to a callback.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    operation: OperationType,
    total: Option<u64>,
    current: u64,
    batch_size: u64,
    started: Instant,
    /// Packets since the last report.
    pending: u64,
    last_position: Option<u64>,
    last_timestamp: Option<Duration>,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        operation: OperationType,
        total: Option<u64>,
        batch_size: u64,
    ) -> Self {
        Self {
            callback,
            operation,
            total,
            current: 0,
            batch_size: batch_size.max(1),
            started: Instant::now(),
            pending: 0,
            last_position: None,
            last_timestamp: None,
        }
    }

    /// Count one packet at `position` / `timestamp`, reporting when a batch
    /// is full.
    pub(crate) fn advance(&mut self, position: Option<u64>, timestamp: Option<Duration>) {
        self.current += 1;
        self.pending += 1;
        self.last_position = position.or(self.last_position);
        self.last_timestamp = timestamp.or(self.last_timestamp);
        if self.pending >= self.batch_size {
            self.pending = 0;
            self.report();
        }
    }

    /// Final report, whether or not the last batch was full.
    pub(crate) fn finish(&mut self) {
        self.pending = 0;
        self.report();
    }

    fn report(&self) {
        let elapsed = self.started.elapsed();
        let total = self.total.filter(|&total| total > 0);
        let percentage = total.map(|total| self.current.min(total) as f32 * 100.0 / total as f32);
        let estimated_remaining = total.filter(|_| self.current > 0).map(|total| {
            let left = total.saturating_sub(self.current) as f64;
            elapsed.mul_f64(left / self.current as f64)
        });

        self.callback.on_progress(&ProgressInfo {
            operation: self.operation,
            current: self.current,
            total: self.total,
            percentage,
            elapsed,
            estimated_remaining,
            current_position: self.last_position,
            current_timestamp: self.last_timestamp,
        });
    }
}
