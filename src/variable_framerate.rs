//! Variable frame rate (VFR) analysis and constant-rate presentation.
//!
//! [`VariableFrameRateAnalysis`] summarises the per-frame timing of an
//! indexed video stream. [`ConstantRateMapper`] presents a VFR stream at a
//! fixed rate: constant-rate frame *n* shows the latest presented picture
//! whose timestamp does not exceed `first_pts + n / rate`.
//!
//! # Example
//!
//! ```no_run
//! use framedex::{FramedexError, IndexOptions, MediaSource};
//!
//! let source = MediaSource::build_or_load_index("input.mkv", IndexOptions::new())?;
//! let analysis = source.analyze_variable_framerate()?;
//! if analysis.is_vfr {
//!     println!("VFR detected! FPS range: {:.2}-{:.2}",
//!         analysis.min_fps, analysis.max_fps);
//! }
//! # Ok::<(), FramedexError>(())
//! ```

use std::time::Duration;

use crate::{
    conversion::{Rational, cfr_frame_to_ticks, ticks_to_duration},
    timeline::VideoTimeline,
};

/// Results of VFR analysis on a video stream.
#[derive(Debug, Clone)]
pub struct VariableFrameRateAnalysis {
    /// Whether any two consecutive frame durations differ.
    pub is_vfr: bool,
    /// Mean frame duration in seconds.
    pub mean_frame_duration: f64,
    /// Standard deviation of frame durations in seconds.
    pub frame_duration_stddev: f64,
    /// Minimum instantaneous FPS observed.
    pub min_fps: f64,
    /// Maximum instantaneous FPS observed.
    pub max_fps: f64,
    /// Mean FPS (1 / mean_frame_duration).
    pub mean_fps: f64,
    /// Number of frames analyzed.
    pub frames_analyzed: u64,
    /// Presentation timestamps converted to [`Duration`], in presentation
    /// order.
    pub pts_list: Vec<Duration>,
}

/// Presentation timestamps of every presented frame, in presentation order.
fn ordered_pts(timeline: &VideoTimeline) -> Vec<i64> {
    (0..timeline.frame_count)
        .filter_map(|frame| timeline.pts_of_frame(frame))
        .collect()
}

/// Analyze the frame timing of an indexed video stream.
pub(crate) fn analyze_variable_framerate(timeline: &VideoTimeline, time_base: Rational) -> VariableFrameRateAnalysis {
    let pts_values = ordered_pts(timeline);
    let tb_num = time_base.numerator as f64;
    let tb_den = time_base.denominator.max(1) as f64;
    let pts_list: Vec<Duration> = pts_values
        .iter()
        .map(|&pts| ticks_to_duration(pts, time_base))
        .collect();

    let durations: Vec<f64> = pts_values
        .windows(2)
        .map(|pair| ((pair[1] - pair[0]) as f64) * tb_num / tb_den)
        .filter(|&duration| duration > 0.0)
        .collect();
    if durations.is_empty() {
        return VariableFrameRateAnalysis {
            is_vfr: false,
            mean_frame_duration: 0.0,
            frame_duration_stddev: 0.0,
            min_fps: 0.0,
            max_fps: 0.0,
            mean_fps: 0.0,
            frames_analyzed: pts_values.len() as u64,
            pts_list,
        };
    }

    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / durations.len() as f64;
    let stddev = variance.sqrt();

    let min_duration = durations.iter().copied().fold(f64::INFINITY, f64::min);
    let max_duration = durations.iter().copied().fold(0.0_f64, f64::max);
    let max_fps = if min_duration > 0.0 { 1.0 / min_duration } else { 0.0 };
    let min_fps = if max_duration > 0.0 { 1.0 / max_duration } else { 0.0 };
    // 1/mean can land just outside the observed range through rounding.
    let mean_fps = (1.0 / mean).clamp(min_fps, max_fps);

    VariableFrameRateAnalysis {
        is_vfr: timeline.variable_frame_rate,
        mean_frame_duration: mean,
        frame_duration_stddev: stddev,
        min_fps,
        max_fps,
        mean_fps,
        frames_analyzed: pts_values.len() as u64,
        pts_list,
    }
}

/// Maps constant-rate frame numbers to presented source frames.
///
/// Lookups step forward or backward from the last resolved frame, so
/// sequential access costs O(1) per frame. All arithmetic is exact.
#[derive(Debug, Clone)]
pub struct ConstantRateMapper {
    rate: Rational,
    time_base: Rational,
    ordered_pts: Vec<i64>,
    frame_count: u32,
    cursor: usize,
}

impl ConstantRateMapper {
    /// Build a mapper for `timeline` at `rate`.
    ///
    /// Returns `None` when the rate is not positive or the stream has no
    /// presented frames.
    pub fn new(timeline: &VideoTimeline, time_base: Rational, rate: Rational) -> Option<Self> {
        if !rate.is_valid() || !time_base.is_valid() {
            return None;
        }
        let ordered_pts = ordered_pts(timeline);
        let first = *ordered_pts.first()?;
        let last = *ordered_pts.last()?;
        let last_duration = ordered_pts
            .windows(2)
            .last()
            .map(|pair| pair[1] - pair[0])
            .unwrap_or(1)
            .max(1);
        let span = last - first + last_duration;

        // Smallest n with cfr_frame_to_ticks(n) >= span.
        let numerator = span as i128 * time_base.numerator as i128 * rate.numerator as i128;
        let denominator = time_base.denominator as i128 * rate.denominator as i128;
        let frame_count = ((numerator + denominator - 1) / denominator).clamp(1, u32::MAX as i128) as u32;

        Some(Self {
            rate,
            time_base,
            ordered_pts,
            frame_count,
            cursor: 0,
        })
    }

    /// The constant output rate.
    pub fn rate(&self) -> Rational {
        self.rate
    }

    /// Number of constant-rate frames.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Timestamp constant-rate frame `frame` is shown at, in stream ticks.
    pub fn pts_of(&self, frame: u32) -> i64 {
        self.ordered_pts[0] + cfr_frame_to_ticks(frame, self.rate, self.time_base)
    }

    /// Presentation frame shown at constant-rate frame `frame`, without
    /// moving the cursor.
    pub fn locate(&self, frame: u32) -> u32 {
        let target = self.pts_of(frame);
        self.ordered_pts
            .partition_point(|&pts| pts <= target)
            .saturating_sub(1) as u32
    }

    /// Presentation frame shown at constant-rate frame `frame`.
    pub fn source_frame(&mut self, frame: u32) -> u32 {
        let target = self.pts_of(frame);
        while self.cursor + 1 < self.ordered_pts.len() && self.ordered_pts[self.cursor + 1] <= target {
            self.cursor += 1;
        }
        while self.cursor > 0 && self.ordered_pts[self.cursor] > target {
            self.cursor -= 1;
        }
        self.cursor as u32
    }
}
