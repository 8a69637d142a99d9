//! Index validation.
//!
//! Provides [`MediaSource::validate`](crate::MediaSource::validate), which
//! cross-checks a built or loaded index and returns a [`ValidationReport`]
//! describing its structure and anything that will degrade random access.
//!
//! # Example
//!
//! ```no_run
//! use framedex::{IndexOptions, MediaSource};
//!
//! let source = MediaSource::build_or_load_index("input.mkv", IndexOptions::new())?;
//! let report = source.validate();
//! if report.is_valid() {
//!     println!("Index is usable");
//! } else {
//!     for error in &report.errors {
//!         println!("Error: {error}");
//!     }
//! }
//! # Ok::<(), framedex::FramedexError>(())
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::{
    backend::MediaType,
    frame::FrameFlags,
    index::{MediaIndex, StreamIndex, Track},
    timeline::{PtsSource, basis_value},
};

/// Summary of index validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Informational notices (not problems).
    pub info: Vec<String>,
    /// Issues that make some frames slower or impossible to reach.
    pub warnings: Vec<String>,
    /// Issues that make the index unusable.
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Returns `true` if no errors were found.
    ///
    /// Warnings do not affect this result.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total number of issues (info + warnings + errors).
    pub fn issue_count(&self) -> usize {
        self.info.len() + self.warnings.len() + self.errors.len()
    }
}

impl Display for ValidationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for item in &self.info {
            writeln!(f, "[INFO] {item}")?;
        }
        for item in &self.warnings {
            writeln!(f, "[WARN] {item}")?;
        }
        for item in &self.errors {
            writeln!(f, "[ERROR] {item}")?;
        }
        if self.issue_count() == 0 {
            writeln!(f, "No issues found.")?;
        }
        Ok(())
    }
}

/// Run validation checks over an index.
pub(crate) fn validate_index(index: &MediaIndex) -> ValidationReport {
    let mut report = ValidationReport::default();

    // ── Stream presence ──
    if index.video_stream().is_none() && index.audio_stream().is_none() {
        report
            .errors
            .push("Index has neither an active video nor an active audio stream".to_string());
    }
    if index.streams_of(MediaType::Video).count() > 1 {
        report.info.push(format!(
            "{} video streams indexed",
            index.streams_of(MediaType::Video).count()
        ));
    }
    if index.streams_of(MediaType::Audio).count() > 1 {
        report.info.push(format!(
            "{} audio streams indexed",
            index.streams_of(MediaType::Audio).count()
        ));
    }

    for stream in &index.streams {
        check_stream(stream, &mut report);
    }
    report
}

fn check_stream(stream: &StreamIndex, report: &mut ValidationReport) {
    let label = format!("Stream {}", stream.stream_index);

    // ── Epochs ──
    if stream.configurations.is_empty() {
        report.errors.push(format!("{label}: no decoder configuration"));
    }
    if stream.configurations.len() > 1 {
        report.info.push(format!(
            "{label}: {} decoder configurations",
            stream.configurations.len()
        ));
    }

    match &stream.track {
        Track::Video(track) => {
            let timeline = &track.timeline;
            let epochs = stream.configurations.len() as u32;
            if let Some(frame) = track.frames.iter().find(|frame| frame.epoch >= epochs) {
                report.errors.push(format!(
                    "{label}: sample {} refers to missing configuration {}",
                    frame.sample_number, frame.epoch
                ));
            }
            if timeline.keyframes.count() == 0 {
                report
                    .errors
                    .push(format!("{label}: no usable random-access point"));
            }

            // ── Seek basis ──
            match timeline.basis {
                Some(basis) => {
                    let monotonic = track
                        .frames
                        .windows(2)
                        .all(|pair| {
                            basis_value(basis, pair[0].pts, pair[0].dts, pair[0].position)
                                < basis_value(basis, pair[1].pts, pair[1].dts, pair[1].position)
                        });
                    if !monotonic {
                        report
                            .errors
                            .push(format!("{label}: {basis:?} values are not strictly increasing"));
                    }
                }
                None => report.warnings.push(format!(
                    "{label}: no reliable timestamps, positioning is verified by counting packets"
                )),
            }
            if !matches!(timeline.pts_source, PtsSource::Container) {
                report.warnings.push(format!(
                    "{label}: presentation timestamps generated from {:?}",
                    timeline.pts_source
                ));
            }

            // ── Degraded records ──
            let corrupt = track
                .frames
                .iter()
                .filter(|frame| frame.flags.contains(FrameFlags::CORRUPT))
                .count();
            if corrupt > 0 {
                report
                    .warnings
                    .push(format!("{label}: {corrupt} pictures failed to decode during indexing"));
            }
            let lone_fields = track
                .frames
                .iter()
                .filter(|frame| frame.flags.contains(FrameFlags::COUNTERPART_MISSING))
                .count();
            if lone_fields > 0 {
                report
                    .warnings
                    .push(format!("{label}: {lone_fields} fields without a counterpart"));
            }
            if timeline.first_valid_frame > 0 {
                report.warnings.push(format!(
                    "{label}: the first {} frames precede the first keyframe and decode as placeholders",
                    timeline.first_valid_frame
                ));
            }
            if timeline.variable_frame_rate {
                report.info.push(format!("{label}: variable frame rate"));
            }
            report.info.push(format!(
                "{label}: video, {} frames, {} keyframes, reorder delay {}",
                timeline.frame_count,
                timeline.keyframes.count(),
                timeline.reorder_delay
            ));
        }
        Track::Audio(track) => {
            let timeline = &track.timeline;
            let unknown = track.frames.iter().filter(|frame| frame.length < 0).count();
            if unknown > 0 {
                report.warnings.push(format!(
                    "{label}: {unknown} packets of unknown length, assumed {} samples",
                    timeline
                        .lengths
                        .iter()
                        .zip(&track.frames)
                        .find(|(_, frame)| frame.length < 0)
                        .map(|(length, _)| *length)
                        .unwrap_or(0)
                ));
            }
            if timeline.sample_rate == 0 {
                report.errors.push(format!("{label}: audio sample rate is zero"));
            }
            if timeline.basis.is_none() {
                report.warnings.push(format!(
                    "{label}: no reliable timestamps, positioning is verified by counting packets"
                ));
            }
            report.info.push(format!(
                "{label}: audio, {} packets, {} samples at {} Hz",
                track.frames.len(),
                timeline.total_samples,
                timeline.sample_rate
            ));
        }
    }
}
