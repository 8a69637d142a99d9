//! Repeat-field and field-pair reconstruction.
//!
//! With repeat handling enabled, every presented picture contributes
//! `2 + repeat_pict` fields to a field sequence and output frame *k* is made
//! of fields `2k` and `2k + 1`. When those two fields come from different
//! pictures, the output is woven line by line from both.

use crate::{
    backend::{DecodedPicture, Plane},
    frame::FieldOrder,
    index::VideoTrack,
};

/// One field of the output sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSource {
    /// Presentation frame the field comes from.
    pub frame: u32,
    /// Whether it is the top field.
    pub top: bool,
}

/// Field sequence of a video track.
#[derive(Debug, Clone)]
pub struct RepeatMap {
    /// First field of every presentation frame; one extra trailing entry
    /// holds the total.
    field_starts: Vec<u64>,
    /// Whether each presentation frame shows its top field first.
    top_first: Vec<bool>,
}

impl RepeatMap {
    /// Build the field sequence of `track`.
    pub fn new(track: &VideoTrack) -> Self {
        let timeline = &track.timeline;
        let mut field_starts = Vec::with_capacity(timeline.frame_count as usize + 1);
        let mut top_first = Vec::with_capacity(timeline.frame_count as usize);
        let mut total = 0u64;
        for frame in 0..timeline.frame_count {
            let record = &track.frames[timeline.sample_of(frame) as usize];
            field_starts.push(total);
            top_first.push(record.field_order != FieldOrder::BottomFirst);
            total += record.field_count() as u64;
        }
        field_starts.push(total);
        Self {
            field_starts,
            top_first,
        }
    }

    /// Total number of fields.
    pub fn field_count(&self) -> u64 {
        self.field_starts.last().copied().unwrap_or(0)
    }

    /// Number of output frames.
    pub fn frame_count(&self) -> u32 {
        (self.field_count() / 2).min(u32::MAX as u64) as u32
    }

    /// Source of field `field`.
    pub fn field(&self, field: u64) -> Option<FieldSource> {
        if field >= self.field_count() {
            return None;
        }
        // Frames with no fields share a start with their successor; the
        // last frame whose start is <= field owns it.
        let frame = self.field_starts.partition_point(|&start| start <= field) - 1;
        let parity = (field - self.field_starts[frame]) % 2 == 0;
        Some(FieldSource {
            frame: frame as u32,
            top: parity == self.top_first[frame],
        })
    }

    /// The two fields of output frame `frame`, in display order.
    pub fn fields_of(&self, frame: u32) -> Option<(FieldSource, FieldSource)> {
        let first = frame as u64 * 2;
        Some((self.field(first)?, self.field(first + 1)?))
    }
}

/// Weave two pictures: even lines from `top`, odd lines from `bottom`.
///
/// Planes are woven pairwise; when the two pictures disagree on plane
/// geometry the top picture is returned unchanged.
pub fn weave(top: &DecodedPicture, bottom: &DecodedPicture) -> DecodedPicture {
    let compatible = top.planes.len() == bottom.planes.len()
        && top
            .planes
            .iter()
            .zip(&bottom.planes)
            .all(|(a, b)| a.stride == b.stride && a.lines == b.lines);
    if !compatible {
        return top.clone();
    }
    let planes = top
        .planes
        .iter()
        .zip(&bottom.planes)
        .map(|(top_plane, bottom_plane)| {
            let mut data = Vec::with_capacity(top_plane.data.len());
            for row in 0..top_plane.lines {
                let source = if row % 2 == 0 { top_plane } else { bottom_plane };
                data.extend_from_slice(source.line(row));
            }
            Plane {
                data,
                stride: top_plane.stride,
                lines: top_plane.lines,
            }
        })
        .collect();
    DecodedPicture {
        identity: top.identity,
        planes,
        interlaced: true,
        top_field_first: true,
        ..top.clone()
    }
}
