//! Presentation-order derivation.
//!
//! Runs once after a scan (and again after loading a persisted index) over
//! the observed per-frame records:
//!
//! 1. pairs single-field pictures,
//! 2. chooses the seek basis,
//! 3. settles presentation timestamps, generating them when the container's
//!    are missing or duplicated,
//! 4. builds the presentation order, deduplicates keyframes and marks
//!    leading pictures,
//! 5. detects variable frame rate and computes the duration.
//!
//! Derivation only reads observed fields and rewrites derived ones, so it
//! is idempotent.

use std::collections::{HashMap, HashSet};

use crate::{
    backend::SeekBasis,
    conversion::{Rational, frame_rate_from_span, rescale_floor},
    frame::{AudioFrameRecord, FieldOrder, FrameFlags, PictureStructure, PictureType, VideoFrameRecord},
    heuristics::{CodecFamily, PtsStrategy},
    order::{KeyframeList, OrderConverter, to_decoding, to_presentation},
};

/// Where the final presentation timestamps came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtsSource {
    /// The container's own timestamps.
    Container,
    /// Generated from the picture-type pattern.
    PictureTypePattern,
    /// Generated from picture order counts.
    PictureOrderCount,
    /// Copied from decoding timestamps.
    DecodingTimestamps,
    /// Decoding order, no reliable information available.
    DecodingOrder,
}

/// Derived presentation information for a video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTimeline {
    /// Domain used to verify demuxer positioning, `None` for
    /// sample-number-only identification.
    pub basis: Option<SeekBasis>,
    /// Origin of [`presentation_pts`](VideoTimeline::presentation_pts).
    pub pts_source: PtsSource,
    /// Final presentation timestamp of every record, in decoding order.
    pub presentation_pts: Vec<i64>,
    /// Presentation/decoding map, `None` when the orders are identical.
    pub order: Option<OrderConverter>,
    /// Deduplicated random-access points.
    pub keyframes: KeyframeList,
    /// Number of presented frames.
    pub frame_count: u32,
    /// Largest number of frames any picture is decoded ahead of its
    /// presentation.
    pub reorder_delay: u32,
    /// Presentation number of the first decodable frame.
    pub first_valid_frame: u32,
    /// Whether frame durations vary.
    pub variable_frame_rate: bool,
    /// Average frame rate over the presented span.
    pub average_frame_rate: Option<Rational>,
    /// Duration in ticks.
    pub duration: i64,
}

impl VideoTimeline {
    /// Decoding-order sample of presentation frame `frame`.
    pub fn sample_of(&self, frame: u32) -> u32 {
        to_decoding(self.order.as_ref(), frame)
    }

    /// Presentation frame of decoding-order sample `sample`.
    pub fn frame_of(&self, sample: u32) -> Option<u32> {
        to_presentation(self.order.as_ref(), sample)
    }

    /// Final presentation timestamp of presentation frame `frame`.
    pub fn pts_of_frame(&self, frame: u32) -> Option<i64> {
        self.presentation_pts
            .get(self.sample_of(frame) as usize)
            .copied()
    }
}

/// Derived sample positions for an audio stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTimeline {
    /// Domain used to verify demuxer positioning.
    pub basis: Option<SeekBasis>,
    /// Samples per channel of every record, unknown lengths resolved.
    pub lengths: Vec<u32>,
    /// First sample of every record; one extra trailing entry holds the
    /// total.
    pub offsets: Vec<u64>,
    /// Total samples per channel.
    pub total_samples: u64,
    /// Sample rate of the first record.
    pub sample_rate: u32,
    /// Duration in ticks.
    pub duration: i64,
}

impl AudioTimeline {
    /// The record containing sample `sample`.
    pub fn record_of(&self, sample: u64) -> Option<u32> {
        if sample >= self.total_samples {
            return None;
        }
        let position = self.offsets.partition_point(|&offset| offset <= sample);
        Some(position.saturating_sub(1) as u32)
    }
}

/// Decide which seek basis can verify positioning.
///
/// A basis is viable when every record has a value and the values strictly
/// increase in decoding order. Byte offsets additionally need a container
/// that can seek by byte.
pub(crate) fn choose_seek_basis<R>(
    records: &[R],
    fields: impl Fn(&R) -> (Option<i64>, Option<i64>, Option<i64>),
    byte_seekable: bool,
) -> Option<SeekBasis> {
    let viable = |pick: &dyn Fn(&R) -> Option<i64>| {
        let mut previous: Option<i64> = None;
        for record in records {
            let Some(value) = pick(record) else {
                return false;
            };
            if previous.is_some_and(|previous| value <= previous) {
                return false;
            }
            previous = Some(value);
        }
        !records.is_empty()
    };
    if viable(&|record: &R| fields(record).1) {
        Some(SeekBasis::DecodingTimestamp)
    } else if viable(&|record: &R| fields(record).0) {
        Some(SeekBasis::PresentationTimestamp)
    } else if byte_seekable && viable(&|record: &R| fields(record).2) {
        Some(SeekBasis::ByteOffset)
    } else {
        None
    }
}

/// Value of a record in the given basis.
pub(crate) fn basis_value(
    basis: SeekBasis,
    pts: Option<i64>,
    dts: Option<i64>,
    position: Option<i64>,
) -> Option<i64> {
    match basis {
        SeekBasis::DecodingTimestamp => dts,
        SeekBasis::PresentationTimestamp => pts,
        SeekBasis::ByteOffset => position,
    }
}

fn video_fields(record: &VideoFrameRecord) -> (Option<i64>, Option<i64>, Option<i64>) {
    (record.pts, record.dts, record.position)
}

/// Derive the timeline of a video stream and rewrite the derived flags of
/// its records.
///
/// `duration_hint` is the container's (or the persisted) duration; it also
/// scales generated timestamps when no decoding timestamps exist.
pub(crate) fn derive_video(
    frames: &mut [VideoFrameRecord],
    time_base: Rational,
    family: CodecFamily,
    byte_seekable: bool,
    duration_hint: Option<i64>,
) -> VideoTimeline {
    for frame in frames.iter_mut() {
        frame.flags.remove(FrameFlags::KEY);
        frame.flags.remove(FrameFlags::LEADING);
        frame.flags.remove(FrameFlags::SECOND_FIELD);
        frame.flags.remove(FrameFlags::COUNTERPART_MISSING);
    }
    pair_fields(frames);

    let basis = choose_seek_basis(frames, video_fields, byte_seekable);
    let presented: Vec<u32> = frames
        .iter()
        .filter(|frame| frame.is_presented())
        .map(|frame| frame.sample_number)
        .collect();
    let duration_hint = duration_hint.filter(|&duration| duration > 0);

    let (presentation_pts, pts_source) = settle_pts(frames, &presented, family, duration_hint);

    // Presentation order: by final timestamp, decoding order on ties.
    let mut order = presented.clone();
    order.sort_by_key(|&sample| (presentation_pts[sample as usize], sample));
    let reordered = order != presented;
    let converter = (reordered || presented.len() != frames.len())
        .then(|| OrderConverter::new(order.clone(), frames.len()));

    let reorder_delay = presented
        .iter()
        .enumerate()
        .filter_map(|(rank, &sample)| {
            let frame = to_presentation(converter.as_ref(), sample)? as usize;
            Some(rank.saturating_sub(frame) as u32)
        })
        .max()
        .unwrap_or(0);

    let keyframes = deduplicate_keyframes(frames, &presentation_pts, basis);
    mark_leading(frames, &presentation_pts, &keyframes);

    let first_valid_frame = keyframes
        .samples()
        .next()
        .and_then(|sample| to_presentation(converter.as_ref(), sample))
        .or_else(|| {
            keyframes
                .samples()
                .next()
                .and_then(|sample| next_presented(frames, converter.as_ref(), sample))
        })
        .unwrap_or(0);

    let ordered_pts: Vec<i64> = order
        .iter()
        .map(|&sample| presentation_pts[sample as usize])
        .collect();
    let deltas: Vec<i64> = ordered_pts.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let variable_frame_rate = deltas.windows(2).any(|pair| pair[0] != pair[1]);
    let span = match (ordered_pts.first(), ordered_pts.last()) {
        (Some(first), Some(last)) => last - first,
        _ => 0,
    };
    let average_frame_rate =
        frame_rate_from_span(ordered_pts.len().saturating_sub(1) as u64, span, time_base);
    let last_duration = deltas.last().copied().unwrap_or(1).max(1);
    let duration = duration_hint.unwrap_or(if ordered_pts.is_empty() {
        0
    } else {
        span + last_duration
    });

    VideoTimeline {
        basis,
        pts_source,
        presentation_pts,
        order: converter,
        keyframes,
        frame_count: order.len() as u32,
        reorder_delay,
        first_valid_frame,
        variable_frame_rate,
        average_frame_rate,
        duration,
    }
}

/// Mark second fields of complementary pairs and lone fields.
fn pair_fields(frames: &mut [VideoFrameRecord]) {
    let mut pending: Option<usize> = None;
    for position in 0..frames.len() {
        let frame = &frames[position];
        if frame.flags.contains(FrameFlags::INVISIBLE) {
            continue;
        }
        if !frame.structure.is_field() {
            if let Some(lone) = pending.take() {
                frames[lone].flags.insert(FrameFlags::COUNTERPART_MISSING);
            }
            continue;
        }
        match pending {
            Some(first) if frames[first].structure.complements(frame.structure) => {
                let order = if frames[first].structure == PictureStructure::TopField {
                    FieldOrder::TopFirst
                } else {
                    FieldOrder::BottomFirst
                };
                frames[first].field_order = order;
                frames[position].field_order = order;
                frames[position].flags.insert(FrameFlags::SECOND_FIELD);
                pending = None;
            }
            Some(lone) => {
                frames[lone].flags.insert(FrameFlags::COUNTERPART_MISSING);
                pending = Some(position);
            }
            None => pending = Some(position),
        }
    }
    if let Some(lone) = pending {
        frames[lone].flags.insert(FrameFlags::COUNTERPART_MISSING);
    }
}

/// Final presentation timestamp of every record.
fn settle_pts(
    frames: &[VideoFrameRecord],
    presented: &[u32],
    family: CodecFamily,
    duration_hint: Option<i64>,
) -> (Vec<i64>, PtsSource) {
    let mut seen = HashSet::with_capacity(presented.len());
    let container_usable = presented.iter().all(|&sample| {
        frames[sample as usize]
            .pts
            .is_some_and(|pts| seen.insert(pts))
    });
    if container_usable {
        let pts: Vec<Option<i64>> = frames.iter().map(|frame| frame.pts).collect();
        return (fill_unpresented(frames, pts), PtsSource::Container);
    }

    let generated = match family.pts_strategy() {
        Some(PtsStrategy::PictureOrderCount) => poc_order(frames, presented)
            .map(|order| (order, PtsSource::PictureOrderCount))
            .or_else(|| Some((pattern_order(frames, presented), PtsSource::PictureTypePattern))),
        Some(PtsStrategy::PictureTypePattern) => {
            Some((pattern_order(frames, presented), PtsSource::PictureTypePattern))
        }
        None => None,
    };

    let all_dts = frames.iter().all(|frame| frame.dts.is_some());
    let dts_increasing = all_dts
        && frames
            .windows(2)
            .all(|pair| pair[0].dts < pair[1].dts);
    let slots = timestamp_slots(frames, presented, dts_increasing, duration_hint);

    let (order, source) = match generated {
        Some(generated) => generated,
        None if dts_increasing => {
            let pts: Vec<Option<i64>> = frames.iter().map(|frame| frame.dts).collect();
            return (fill_unpresented(frames, pts), PtsSource::DecodingTimestamps);
        }
        None => (presented.to_vec(), PtsSource::DecodingOrder),
    };

    let mut pts = vec![None; frames.len()];
    for (rank, &sample) in order.iter().enumerate() {
        pts[sample as usize] = Some(slots[rank]);
    }
    (fill_unpresented(frames, pts), source)
}

/// Timestamp values handed out, in presentation order, to generated
/// timestamps.
fn timestamp_slots(
    frames: &[VideoFrameRecord],
    presented: &[u32],
    dts_increasing: bool,
    duration_hint: Option<i64>,
) -> Vec<i64> {
    if dts_increasing {
        return presented
            .iter()
            .filter_map(|&sample| frames[sample as usize].dts)
            .collect();
    }
    let step = match duration_hint {
        Some(duration) if !presented.is_empty() => (duration / presented.len() as i64).max(1),
        _ => 1,
    };
    (0..presented.len() as i64).map(|slot| slot * step).collect()
}

/// Give records that are not presented the timestamp of the closest
/// preceding record that has one.
fn fill_unpresented(frames: &[VideoFrameRecord], pts: Vec<Option<i64>>) -> Vec<i64> {
    let fallback = pts.iter().flatten().copied().next().unwrap_or(0);
    let mut last = fallback;
    let mut filled = Vec::with_capacity(frames.len());
    for value in pts {
        let value = value.unwrap_or(last);
        last = value;
        filled.push(value);
    }
    filled
}

/// Presentation order from the picture-type pattern: every anchor picture
/// is shown after the non-anchor pictures that follow it in decoding order.
fn pattern_order(frames: &[VideoFrameRecord], presented: &[u32]) -> Vec<u32> {
    let mut order = Vec::with_capacity(presented.len());
    let mut held_anchor: Option<u32> = None;
    for &sample in presented {
        let frame = &frames[sample as usize];
        if frame.picture_type == PictureType::B {
            order.push(sample);
        } else if let Some(anchor) = held_anchor.replace(sample) {
            order.push(anchor);
        }
    }
    if let Some(anchor) = held_anchor {
        order.push(anchor);
    }
    order
}

/// Presentation order from picture order counts. POC restarts at a
/// keyframe whose POC is zero and at a configuration change; each restart
/// opens a new domain.
fn poc_order(frames: &[VideoFrameRecord], presented: &[u32]) -> Option<Vec<u32>> {
    let mut keyed = Vec::with_capacity(presented.len());
    let mut domain = 0u32;
    let mut epoch = None;
    for (position, &sample) in presented.iter().enumerate() {
        let frame = &frames[sample as usize];
        let poc = frame.poc?;
        let restart = (frame.coded_key && poc == 0) || epoch.is_some_and(|epoch| epoch != frame.epoch);
        if position > 0 && restart {
            domain += 1;
        }
        epoch = Some(frame.epoch);
        keyed.push((domain, poc, sample));
    }
    keyed.sort();
    Some(keyed.into_iter().map(|(_, _, sample)| sample).collect())
}

/// Keep KEY only on keyframes whose presentation timestamp and basis value
/// identify them uniquely. The first of a duplicate group keeps it.
fn deduplicate_keyframes(
    frames: &mut [VideoFrameRecord],
    presentation_pts: &[i64],
    basis: Option<SeekBasis>,
) -> KeyframeList {
    let mut pts_groups: HashMap<i64, u32> = HashMap::new();
    let mut basis_groups: HashMap<i64, u32> = HashMap::new();
    for frame in frames.iter() {
        if frame.flags.contains(FrameFlags::SECOND_FIELD) {
            continue;
        }
        // Unpresented records borrow a neighbour's timestamp.
        if frame.is_presented() {
            pts_groups
                .entry(presentation_pts[frame.sample_number as usize])
                .or_insert(frame.sample_number);
        }
        if let Some(value) = basis.and_then(|basis| basis_value(basis, frame.pts, frame.dts, frame.position)) {
            basis_groups.entry(value).or_insert(frame.sample_number);
        }
    }

    let mut flags = vec![false; frames.len()];
    for frame in frames.iter_mut() {
        if !frame.coded_key || !frame.is_presented() || frame.flags.contains(FrameFlags::CORRUPT) {
            continue;
        }
        let sample = frame.sample_number;
        let pts_unique = pts_groups.get(&presentation_pts[sample as usize]) == Some(&sample);
        let basis_unique = match basis {
            Some(basis) => basis_value(basis, frame.pts, frame.dts, frame.position)
                .is_some_and(|value| basis_groups.get(&value) == Some(&sample)),
            None => true,
        };
        if pts_unique && basis_unique {
            frame.flags.insert(FrameFlags::KEY);
            flags[sample as usize] = true;
        }
    }
    KeyframeList::new(flags)
}

/// Flag presented pictures shown before the keyframe they follow.
fn mark_leading(frames: &mut [VideoFrameRecord], presentation_pts: &[i64], keyframes: &KeyframeList) {
    let mut latest_key_pts: Option<i64> = None;
    for frame in frames.iter_mut() {
        let sample = frame.sample_number;
        if keyframes.is_key(sample) {
            latest_key_pts = Some(presentation_pts[sample as usize]);
            continue;
        }
        if !frame.is_presented() {
            continue;
        }
        if latest_key_pts.is_some_and(|key_pts| presentation_pts[sample as usize] < key_pts) {
            frame.flags.insert(FrameFlags::LEADING);
        }
    }
}

/// Presentation number of the first presented record at or after `sample`.
fn next_presented(frames: &[VideoFrameRecord], converter: Option<&OrderConverter>, sample: u32) -> Option<u32> {
    frames[sample as usize..]
        .iter()
        .find_map(|frame| to_presentation(converter, frame.sample_number))
}

/// Derive the timeline of an audio stream.
///
/// Lengths still unknown after the scan take the most common known length.
pub(crate) fn derive_audio(
    frames: &[AudioFrameRecord],
    time_base: Rational,
    byte_seekable: bool,
    duration_hint: Option<i64>,
) -> AudioTimeline {
    let basis = choose_seek_basis(
        frames,
        |frame: &AudioFrameRecord| (frame.pts, frame.dts, frame.position),
        byte_seekable,
    );

    let mut histogram: HashMap<u32, usize> = HashMap::new();
    for frame in frames {
        if frame.length >= 0 {
            *histogram.entry(frame.length as u32).or_default() += 1;
        }
    }
    let fallback = histogram
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(&length, _)| length)
        .unwrap_or(0);

    let lengths: Vec<u32> = frames
        .iter()
        .map(|frame| {
            if frame.length >= 0 {
                frame.length as u32
            } else {
                fallback
            }
        })
        .collect();
    let mut offsets = Vec::with_capacity(lengths.len() + 1);
    let mut total = 0u64;
    for &length in &lengths {
        offsets.push(total);
        total += length as u64;
    }
    offsets.push(total);

    let sample_rate = frames.first().map(|frame| frame.sample_rate).unwrap_or(0);
    let duration = duration_hint.filter(|&duration| duration > 0).unwrap_or_else(|| {
        if sample_rate == 0 || !time_base.is_valid() {
            return 0;
        }
        rescale_floor(
            total as i64,
            time_base.denominator as i64,
            sample_rate as i64 * time_base.numerator as i64,
        )
    });

    AudioTimeline {
        basis,
        lengths,
        offsets,
        total_samples: total,
        sample_rate,
        duration,
    }
}
