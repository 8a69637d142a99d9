//! Frame-accurate video seeking.
//!
//! [`VideoSeeker`] owns a demuxer and a decoder for one video stream and
//! turns "presentation frame *n*" into exactly that decoded picture:
//!
//! 1. A repeated request is served from a two-slot cache.
//! 2. A request a few frames ahead of the previous one keeps feeding the
//!    decoder sequentially.
//! 3. Otherwise decoding restarts at the latest random-access point at or
//!    before the target in decoding order (one further back for leading
//!    pictures). The decoder is reopened when that point belongs to another
//!    configuration epoch and flushed otherwise.
//! 4. The demuxer is positioned on a best-effort basis and packets are
//!    re-identified through the index, either by their seek-basis value or,
//!    without one, by counting from the start of the file.
//! 5. Every packet carries its sample number through the decoder, so output
//!    pictures are matched to records whatever the decoder's latency and
//!    reordering.
//!
//! A request runs as an explicit state machine over [`SeekState`]. How hard
//! it tries before giving up depends on the [`SeekMode`]; the level that was
//! actually needed comes back in a [`SeekReport`].

use std::collections::HashSet;

use crate::{
    arena::{FrameArena, FrameHandle},
    backend::{DecodedPicture, DecodedUnit, Decoder, Demuxer, Packet, Plane},
    configuration::{IndexOptions, SeekMode},
    error::FramedexError,
    frame::FrameFlags,
    index::{StreamIndex, VideoTrack},
    packet_iterator::PacketCursor,
    timeline::basis_value,
};

/// Packets fed past the expected decoder delay before a random-access
/// point is given up on.
pub(crate) const EXTRA_PACKET_BUDGET: u32 = 16;

/// Older random-access points tried before a request fails.
const MAX_RETRIES: u32 = 10;

/// How a frame request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekReport {
    /// Robustness level the request needed. `Normal` when the first
    /// random-access point worked, `Unsafe` when older ones had to be
    /// tried, `Aggressive` when decoder errors were skipped or the closest
    /// frame was returned instead of the requested one.
    pub mode: SeekMode,
    /// Decoding-order sample decoding restarted from, `None` when the
    /// request was served without seeking.
    pub random_access_sample: Option<u32>,
    /// Number of older random-access points tried.
    pub retries: u32,
    /// `false` when a different frame than the requested one is returned.
    pub exact: bool,
    /// Whether the frame is a black placeholder.
    pub placeholder: bool,
}

impl SeekReport {
    fn direct() -> Self {
        Self {
            mode: SeekMode::Normal,
            random_access_sample: None,
            retries: 0,
            exact: true,
            placeholder: false,
        }
    }
}

/// States of one seek request.
#[derive(Debug)]
enum SeekState {
    /// Positioning the demuxer and decoder at a random-access point.
    Seeking { rap: u32 },
    /// Feeding packets from a random-access point until the target appears.
    Decoding { rap: u32 },
    /// The random-access point did not produce the target.
    Retrying { from_rap: u32 },
    Done(FrameHandle),
    Failed(FramedexError),
}

enum FeedOutcome {
    Found(FrameHandle),
    Mismatch,
    DecodeError(FramedexError),
}

/// Random-access state of one video stream.
pub(crate) struct VideoSeeker {
    packets: PacketCursor,
    decoder: Option<Box<dyn Decoder>>,
    decoder_epoch: u32,
    stream_index: usize,
    mode: SeekMode,
    forward_seek_threshold: u32,
    threads: u32,
    last_requested_frame: Option<u32>,
    last_fed_sample: Option<u32>,
    last_random_access_sample: Option<u32>,
    delay_estimate: u32,
    fed_since_rap: u32,
    outputs_since_rap: u32,
    /// Presentation frame the next unidentified output is assumed to be.
    expected_output_frame: u32,
    /// Samples emitted since the decoder was last restarted.
    emitted: HashSet<u32>,
    arena: FrameArena<DecodedPicture>,
    placeholder: Option<DecodedPicture>,
    /// Decoder errors skipped during the current request.
    skipped_errors: u32,
    /// Frame the current request is after, and the nearest picture to it
    /// decoded so far.
    closest_target: Option<u32>,
    closest: Option<(u32, DecodedPicture)>,
}

impl VideoSeeker {
    pub(crate) fn new(
        stream: &StreamIndex,
        demuxer: Box<dyn Demuxer>,
        options: &IndexOptions,
    ) -> Result<Self, FramedexError> {
        let track = video_track(stream)?;
        let basis = track.timeline.basis;
        let values = track.frames.iter().map(|frame| {
            let value = basis.and_then(|basis| basis_value(basis, frame.pts, frame.dts, frame.position));
            (value, frame.sample_number)
        });
        let packets = PacketCursor::new(demuxer, stream.stream_index, basis, values, &stream.seek_table);
        Ok(Self {
            packets,
            decoder: None,
            decoder_epoch: 0,
            stream_index: stream.stream_index,
            mode: options.seek_mode,
            forward_seek_threshold: options.forward_seek_threshold,
            threads: options.decoder_threads,
            last_requested_frame: None,
            last_fed_sample: None,
            last_random_access_sample: None,
            delay_estimate: 0,
            fed_since_rap: 0,
            outputs_since_rap: 0,
            expected_output_frame: 0,
            emitted: HashSet::new(),
            arena: FrameArena::new(),
            placeholder: None,
            skipped_errors: 0,
            closest_target: None,
            closest: None,
        })
    }

    /// Decode presentation frame `frame`.
    pub(crate) fn get_frame(
        &mut self,
        stream: &StreamIndex,
        frame: u32,
    ) -> Result<(DecodedPicture, SeekReport), FramedexError> {
        let track = video_track(stream)?;
        let timeline = &track.timeline;
        if frame >= timeline.frame_count {
            return Err(FramedexError::FrameOutOfRange {
                frame_number: frame,
                total_frames: timeline.frame_count,
            });
        }

        if frame < timeline.first_valid_frame {
            let placeholder = self.placeholder(stream)?;
            self.last_requested_frame = Some(frame);
            return Ok((
                placeholder,
                SeekReport {
                    placeholder: true,
                    ..SeekReport::direct()
                },
            ));
        }

        let sample = timeline.sample_of(frame);
        self.skipped_errors = 0;
        self.closest_target = None;
        self.closest = None;
        if let Some(picture) = self.arena.find(sample).and_then(|handle| self.arena.get(handle)) {
            log::debug!("Frame {frame} served from cache");
            self.last_requested_frame = Some(frame);
            return Ok((picture.clone(), SeekReport::direct()));
        }

        if self.can_continue(track, frame, sample) {
            let budget =
                sample.saturating_sub(self.last_fed_sample.unwrap_or(0)) + self.delay_estimate + EXTRA_PACKET_BUDGET;
            if let FeedOutcome::Found(handle) = self.decode_until(track, sample, budget)? {
                self.last_requested_frame = Some(frame);
                let report = SeekReport {
                    mode: if self.skipped_errors > 0 { SeekMode::Aggressive } else { SeekMode::Normal },
                    ..SeekReport::direct()
                };
                return Ok((self.resolve(handle)?, report));
            }
            log::debug!("Sequential decoding missed frame {frame}, seeking");
        }

        let (handle, report) = self.seek_and_decode(stream, frame, sample)?;
        self.last_requested_frame = Some(frame);
        Ok((self.resolve(handle)?, report))
    }

    fn resolve(&self, handle: FrameHandle) -> Result<DecodedPicture, FramedexError> {
        self.arena
            .get(handle)
            .cloned()
            .ok_or_else(|| FramedexError::VideoDecodeError("decoded picture was evicted".to_string()))
    }

    /// Whether `sample` can be reached by decoding forward from where the
    /// decoder is.
    fn can_continue(&self, track: &VideoTrack, frame: u32, sample: u32) -> bool {
        let (Some(last_requested), Some(last_fed), Some(_)) =
            (self.last_requested_frame, self.last_fed_sample, self.decoder.as_ref())
        else {
            return false;
        };
        if self.emitted.contains(&sample) {
            return false;
        }
        let near = frame > last_requested && frame - last_requested <= self.forward_seek_threshold;
        let same_group = sample > last_fed
            && track.timeline.keyframes.at_or_before(sample) == self.last_random_access_sample;
        near || same_group
    }

    /// First random-access point to try for `sample`.
    fn random_access_point(track: &VideoTrack, sample: u32) -> u32 {
        let keyframes = &track.timeline.keyframes;
        let rap = keyframes.at_or_before(sample).unwrap_or(0);
        if track.frames[sample as usize].flags.contains(FrameFlags::LEADING) {
            keyframes.before(rap).unwrap_or(rap)
        } else {
            rap
        }
    }

    fn seek_and_decode(
        &mut self,
        stream: &StreamIndex,
        frame: u32,
        sample: u32,
    ) -> Result<(FrameHandle, SeekReport), FramedexError> {
        let track = video_track(stream)?;
        let mut retries = 0;
        let mut last_rap = None;
        self.closest_target = Some(frame);
        let mut state = SeekState::Seeking {
            rap: Self::random_access_point(track, sample),
        };

        loop {
            state = match state {
                SeekState::Seeking { rap } => {
                    log::debug!("Seeking to random-access sample {rap} for frame {frame}");
                    last_rap = Some(rap);
                    match self.restart_at(stream, rap) {
                        Ok(()) => SeekState::Decoding { rap },
                        Err(error) if self.mode == SeekMode::Normal => SeekState::Failed(error),
                        Err(error) => {
                            log::debug!("Positioning at sample {rap} failed: {error}");
                            SeekState::Retrying { from_rap: rap }
                        }
                    }
                }
                SeekState::Decoding { rap } => {
                    let budget = (sample - rap + 1) + self.delay_estimate + EXTRA_PACKET_BUDGET;
                    match self.decode_until(track, sample, budget)? {
                        FeedOutcome::Found(handle) => SeekState::Done(handle),
                        FeedOutcome::Mismatch => SeekState::Retrying { from_rap: rap },
                        FeedOutcome::DecodeError(error) => match self.mode {
                            SeekMode::Normal => SeekState::Failed(error),
                            _ => SeekState::Retrying { from_rap: rap },
                        },
                    }
                }
                SeekState::Retrying { from_rap } => {
                    let older = track.timeline.keyframes.before(from_rap);
                    match (self.mode, older) {
                        (SeekMode::Normal, _) | (_, None) => SeekState::Failed(FramedexError::SeekMismatch {
                            frame_number: frame,
                            mode: self.mode,
                            retries,
                        }),
                        _ if retries >= MAX_RETRIES => SeekState::Failed(FramedexError::SeekMismatch {
                            frame_number: frame,
                            mode: self.mode,
                            retries,
                        }),
                        (_, Some(older)) => {
                            retries += 1;
                            log::debug!("Frame {frame}: retry {retries} from older random-access sample {older}");
                            SeekState::Seeking { rap: older }
                        }
                    }
                }
                SeekState::Done(handle) => {
                    let mode = if self.skipped_errors > 0 {
                        SeekMode::Aggressive
                    } else if retries > 0 {
                        SeekMode::Unsafe
                    } else {
                        SeekMode::Normal
                    };
                    return Ok((
                        handle,
                        SeekReport {
                            mode,
                            random_access_sample: last_rap,
                            retries,
                            exact: true,
                            placeholder: false,
                        },
                    ));
                }
                SeekState::Failed(error) => {
                    if self.mode == SeekMode::Aggressive
                        && let Some((_, picture)) = self.closest.take()
                    {
                        let key = picture.identity.unwrap_or(sample);
                        log::warn!("Frame {frame} could not be decoded exactly, returning closest frame");
                        let handle = self.arena.insert(key, picture);
                        return Ok((
                            handle,
                            SeekReport {
                                mode: SeekMode::Aggressive,
                                random_access_sample: last_rap,
                                retries,
                                exact: false,
                                placeholder: false,
                            },
                        ));
                    }
                    log::debug!("Frame {frame} failed: {error}");
                    return Err(error);
                }
            };
        }
    }

    /// Prepare the decoder and position the demuxer at random-access sample
    /// `rap`.
    fn restart_at(&mut self, stream: &StreamIndex, rap: u32) -> Result<(), FramedexError> {
        let track = video_track(stream)?;
        let epoch = track.frames[rap as usize].epoch;
        let reusable = self.decoder.is_some() && self.decoder_epoch == epoch;
        if let Some(decoder) = self.decoder.as_mut().filter(|_| reusable) {
            decoder.flush();
        } else {
            let configuration = stream.configurations.get(epoch).ok_or_else(|| FramedexError::DecoderOpen {
                stream_index: self.stream_index,
                reason: format!("configuration epoch {epoch} is missing"),
            })?;
            log::debug!("Opening decoder for stream {} epoch {epoch}", self.stream_index);
            self.decoder = None;
            let decoder = self.packets.open_decoder(configuration, self.threads)?;
            self.delay_estimate = decoder.delay();
            self.decoder = Some(decoder);
            self.decoder_epoch = epoch;
        }
        self.emitted.clear();
        self.fed_since_rap = 0;
        self.outputs_since_rap = 0;
        self.last_fed_sample = None;
        self.last_random_access_sample = Some(rap);
        self.expected_output_frame = first_presented_from(track, rap);

        let record = &track.frames[rap as usize];
        let target = track
            .timeline
            .basis
            .and_then(|basis| basis_value(basis, record.pts, record.dts, record.position));
        self.packets.position_at(rap, target)
    }

    /// Feed packets until `sample` is emitted or `budget` packets have gone
    /// in without it.
    fn decode_until(
        &mut self,
        track: &VideoTrack,
        sample: u32,
        budget: u32,
    ) -> Result<FeedOutcome, FramedexError> {
        let mut fed = 0;
        loop {
            if let Some(handle) = self.arena.find(sample) {
                return Ok(FeedOutcome::Found(handle));
            }
            if fed >= budget {
                return Ok(FeedOutcome::Mismatch);
            }
            let Some((packet, fed_sample)) = self.packets.next_packet()? else {
                // End of stream: drain what the decoder still holds.
                let outputs = self.outputs_since_rap;
                match self.decode_one(track, None, 0)? {
                    Ok(Some(handle)) => {
                        self.note_closest(track, handle);
                        continue;
                    }
                    Ok(None) if self.outputs_since_rap > outputs => continue,
                    Ok(None) => return Ok(FeedOutcome::Mismatch),
                    Err(error) => return Ok(FeedOutcome::DecodeError(error)),
                }
            };
            fed += 1;
            self.fed_since_rap += 1;
            self.last_fed_sample = Some(fed_sample);
            match self.decode_one(track, Some(&packet), fed_sample)? {
                Ok(Some(handle)) => self.note_closest(track, handle),
                Ok(None) => self.note_missing_output(),
                Err(error) if self.mode == SeekMode::Aggressive => {
                    self.skipped_errors += 1;
                    log::warn!("Skipping decoder error at sample {fed_sample}: {error}");
                }
                Err(error) => return Ok(FeedOutcome::DecodeError(error)),
            }
        }
    }

    fn note_closest(&mut self, track: &VideoTrack, handle: FrameHandle) {
        if self.mode != SeekMode::Aggressive {
            return;
        }
        let (Some(target), Some(picture)) = (self.closest_target, self.arena.get(handle)) else {
            return;
        };
        let Some(frame) = picture.identity.and_then(|sample| track.timeline.frame_of(sample)) else {
            return;
        };
        let distance = frame.abs_diff(target);
        if self.closest.as_ref().is_none_or(|(current, _)| distance < *current) {
            self.closest = Some((distance, picture.clone()));
        }
    }

    /// Over-shoot: no output yet although the estimated delay has passed.
    fn note_missing_output(&mut self) {
        if self.outputs_since_rap == 0 && self.fed_since_rap > self.delay_estimate + 1 {
            self.delay_estimate = self.fed_since_rap - 1;
            log::debug!("Decoder delay estimate grown to {}", self.delay_estimate);
        }
    }

    /// Feed one packet (or drain) and cache what comes out.
    ///
    /// Leading pictures decoded straight from their own random-access point
    /// lack their references and are dropped.
    ///
    /// The outer `Result` is for failures that end the request; the inner
    /// one carries decoder errors the seek mode decides about.
    fn decode_one(
        &mut self,
        track: &VideoTrack,
        packet: Option<&Packet>,
        identity: u32,
    ) -> Result<Result<Option<FrameHandle>, FramedexError>, FramedexError> {
        let decoder = self.decoder.as_mut().ok_or_else(|| FramedexError::DecoderOpen {
            stream_index: self.stream_index,
            reason: "decoder is not open".to_string(),
        })?;
        let unit = match decoder.decode(packet, identity) {
            Ok(unit) => unit,
            Err(error) => return Ok(Err(error)),
        };
        let Some(DecodedUnit::Video(mut picture)) = unit else {
            return Ok(Ok(None));
        };

        if self.outputs_since_rap == 0 && packet.is_some() {
            // Under-shoot: output arrived before the estimated delay.
            let observed = self.fed_since_rap.saturating_sub(1);
            if observed < self.delay_estimate {
                self.delay_estimate = observed;
                log::debug!("Decoder delay estimate shrunk to {observed}");
            }
        }
        self.outputs_since_rap += 1;

        let timeline = &track.timeline;
        let expected = self.expected_output_frame.min(timeline.frame_count.saturating_sub(1));
        let sample = picture
            .identity
            .filter(|&sample| (sample as usize) < track.frames.len())
            .unwrap_or_else(|| timeline.sample_of(expected));
        picture.identity = Some(sample);
        self.expected_output_frame = timeline
            .frame_of(sample)
            .map(|frame| frame + 1)
            .unwrap_or(self.expected_output_frame + 1);
        self.emitted.insert(sample);

        let broken = track.frames[sample as usize].flags.contains(FrameFlags::LEADING)
            && timeline.keyframes.at_or_before(sample) == self.last_random_access_sample;
        if broken {
            log::debug!("Dropping leading picture {sample} decoded without its references");
            return Ok(Ok(None));
        }
        Ok(Ok(Some(self.arena.insert(sample, picture))))
    }

    /// A black picture shaped like the first decodable frame. Decoding that
    /// frame also leaves the decoder ready to continue from it.
    fn placeholder(&mut self, stream: &StreamIndex) -> Result<DecodedPicture, FramedexError> {
        if let Some(placeholder) = &self.placeholder {
            return Ok(placeholder.clone());
        }
        let first_valid_frame = video_track(stream)?.timeline.first_valid_frame;
        log::debug!("Warming decoder at first valid frame {first_valid_frame} for a placeholder");
        let (picture, _) = self.get_frame(stream, first_valid_frame)?;
        let placeholder = black_picture(&picture);
        self.placeholder = Some(placeholder.clone());
        Ok(placeholder)
    }
}

fn video_track(stream: &StreamIndex) -> Result<&VideoTrack, FramedexError> {
    stream.video().ok_or(FramedexError::NoVideoStream)
}

/// Presentation number of the first presented record at or after `sample`.
fn first_presented_from(track: &VideoTrack, sample: u32) -> u32 {
    track.frames[sample as usize..]
        .iter()
        .find_map(|frame| track.timeline.frame_of(frame.sample_number))
        .unwrap_or(0)
}

/// Black picture with the geometry of `reference`.
fn black_picture(reference: &DecodedPicture) -> DecodedPicture {
    let yuv = reference.pixel_format.starts_with("yuv") || reference.pixel_format.starts_with("nv");
    let planes = reference
        .planes
        .iter()
        .enumerate()
        .map(|(index, plane)| {
            let value = match (yuv, index) {
                (true, 0) => 16,
                (true, _) => 128,
                (false, _) => 0,
            };
            Plane::filled(plane.stride, plane.lines, value)
        })
        .collect();
    DecodedPicture {
        identity: None,
        planes,
        key: false,
        ..reference.clone()
    }
}
