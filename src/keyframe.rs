//! Keyframe and Group of Pictures analysis.
//!
//! This module provides [`KeyFrameMetadata`] and [`GroupOfPicturesInfo`] for
//! inspecting the random-access structure of an indexed video stream. All
//! figures come from the index; nothing is decoded or demuxed.
//!
//! # Example
//!
//! ```no_run
//! use framedex::{FramedexError, IndexOptions, MediaSource};
//!
//! let source = MediaSource::build_or_load_index("input.mkv", IndexOptions::new())?;
//! let group_of_pictures = source.analyze_group_of_pictures()?;
//! println!("Total keyframes: {}", group_of_pictures.keyframes.len());
//! println!("Average Group of Pictures size: {:.1}", group_of_pictures.average_group_of_pictures_size);
//! println!("Max Group of Pictures size: {}", group_of_pictures.max_group_of_pictures_size);
//! # Ok::<(), FramedexError>(())
//! ```

use std::time::Duration;

use crate::{
    conversion::{Rational, ticks_to_duration},
    frame::{FrameFlags, PictureType},
    index::VideoTrack,
};

/// Information about a single random-access point.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFrameMetadata {
    /// Decoding-order sample number.
    pub sample_number: u32,
    /// Presentation frame number.
    pub frame_number: Option<u32>,
    /// Final presentation timestamp in stream ticks.
    pub pts: i64,
    /// Presentation timestamp as a [`Duration`].
    pub timestamp: Duration,
    /// Coded picture type.
    pub picture_type: PictureType,
    /// Number of leading pictures that follow this keyframe in decoding
    /// order but are shown before it.
    pub leading_pictures: u32,
}

/// Summary of the Group of Pictures structure.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupOfPicturesInfo {
    /// All usable keyframes in decoding order.
    pub keyframes: Vec<KeyFrameMetadata>,
    /// The sizes (in coded pictures) of each Group of Pictures. The i-th
    /// entry counts the records between keyframe i and keyframe i+1 (or the
    /// end of the stream for the last one).
    pub group_of_pictures_sizes: Vec<u64>,
    /// Average Group of Pictures size.
    pub average_group_of_pictures_size: f64,
    /// Minimum Group of Pictures size observed.
    pub min_group_of_pictures_size: u64,
    /// Maximum Group of Pictures size observed.
    pub max_group_of_pictures_size: u64,
    /// Total number of coded pictures.
    pub total_video_packets: u64,
    /// Whether any Group of Pictures is open (has leading pictures).
    pub has_open_group_of_pictures: bool,
}

/// Compute Group of Pictures statistics from an indexed video track.
pub(crate) fn analyze_group_of_pictures(track: &VideoTrack, time_base: Rational) -> GroupOfPicturesInfo {
    let timeline = &track.timeline;
    let samples: Vec<u32> = timeline.keyframes.samples().collect();
    let total_video_packets = track.frames.len() as u64;
    log::debug!(
        "Analyzing Group of Pictures structure ({} keyframes over {total_video_packets} records)",
        samples.len()
    );

    let mut keyframes = Vec::with_capacity(samples.len());
    let mut group_of_pictures_sizes = Vec::with_capacity(samples.len());
    for (position, &sample) in samples.iter().enumerate() {
        let end = samples
            .get(position + 1)
            .map(|&next| next as u64)
            .unwrap_or(total_video_packets);
        group_of_pictures_sizes.push(end - sample as u64);

        let leading_pictures = track.frames[sample as usize..end as usize]
            .iter()
            .filter(|frame| frame.flags.contains(FrameFlags::LEADING))
            .count() as u32;
        let record = &track.frames[sample as usize];
        let pts = timeline.presentation_pts[sample as usize];
        keyframes.push(KeyFrameMetadata {
            sample_number: sample,
            frame_number: timeline.frame_of(sample),
            pts,
            timestamp: ticks_to_duration(pts, time_base),
            picture_type: record.picture_type,
            leading_pictures,
        });
    }

    let average_group_of_pictures_size = if group_of_pictures_sizes.is_empty() {
        0.0
    } else {
        group_of_pictures_sizes.iter().sum::<u64>() as f64 / group_of_pictures_sizes.len() as f64
    };
    let min_group_of_pictures_size = group_of_pictures_sizes.iter().copied().min().unwrap_or(0);
    let max_group_of_pictures_size = group_of_pictures_sizes.iter().copied().max().unwrap_or(0);
    let has_open_group_of_pictures = keyframes.iter().any(|keyframe| keyframe.leading_pictures > 0);

    GroupOfPicturesInfo {
        keyframes,
        group_of_pictures_sizes,
        average_group_of_pictures_size,
        min_group_of_pictures_size,
        max_group_of_pictures_size,
        total_video_packets,
        has_open_group_of_pictures,
    }
}
