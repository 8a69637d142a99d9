//! Sample-accurate audio reads.
//!
//! This module provides [`AudioSamples`], the result of
//! [`MediaSource::get_audio_samples`](crate::MediaSource::get_audio_samples).
//! Sample positions come from the index: every record's resolved length is
//! summed into offsets, so the record holding any sample is a binary search
//! away. Decoding starts a few packets before that record so the decoder has
//! settled by the time the requested samples come out.

use std::collections::BTreeMap;

use crate::{
    backend::{DecodedAudio, DecodedUnit, Decoder, Demuxer},
    configuration::IndexOptions,
    error::FramedexError,
    extradata::DecoderConfiguration,
    index::{AudioTrack, StreamIndex},
    packet_iterator::PacketCursor,
    seek::EXTRA_PACKET_BUDGET,
    timeline::basis_value,
};

/// Packets decoded and discarded ahead of the first requested record.
const PRE_ROLL_PACKETS: u32 = 4;

/// How many records ahead of the decoder position a read may start and
/// still continue without seeking.
const SEQUENTIAL_WINDOW: u32 = 16;

/// A block of decoded audio samples.
///
/// Sample data is raw bytes in the stream's native sample format. Planar
/// formats hold one plane per channel, interleaved formats a single plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSamples {
    /// First sample of the block, per channel.
    pub start: u64,
    /// Samples per channel.
    pub sample_count: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Channel layout mask.
    pub channel_layout: u64,
    /// Sample format name.
    pub sample_format: String,
    /// Bytes per sample.
    pub bytes_per_sample: u32,
    /// Whether each channel has its own plane.
    pub planar: bool,
    /// Sample planes.
    pub planes: Vec<Vec<u8>>,
    /// Samples per channel filled with silence in the records this block
    /// was cut from.
    pub silent_samples: u64,
}

/// Layout of the samples being assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SampleLayout {
    sample_rate: u32,
    channels: u32,
    channel_layout: u64,
    sample_format: String,
    bytes_per_sample: u32,
    planar: bool,
}

impl SampleLayout {
    fn of_block(block: &DecodedAudio) -> Self {
        Self {
            sample_rate: block.sample_rate,
            channels: block.channels.max(1),
            channel_layout: block.channel_layout,
            sample_format: block.sample_format.clone(),
            bytes_per_sample: block.bytes_per_sample.max(1),
            planar: block.planar,
        }
    }

    fn of_configuration(configuration: &DecoderConfiguration) -> Self {
        let format = configuration.sample_format.as_str();
        Self {
            sample_rate: configuration.sample_rate,
            channels: configuration.channels.max(1),
            channel_layout: configuration.channel_layout,
            sample_format: format.to_string(),
            bytes_per_sample: bytes_per_sample(format).unwrap_or_else(|| (configuration.bits_per_sample / 8).max(1)),
            planar: format.ends_with('p'),
        }
    }

    fn plane_count(&self) -> usize {
        if self.planar { self.channels as usize } else { 1 }
    }

    /// Bytes one sample per channel takes in a plane.
    fn stride(&self) -> usize {
        let per_sample = self.bytes_per_sample as usize;
        if self.planar { per_sample } else { per_sample * self.channels as usize }
    }

    fn silence(&self) -> u8 {
        if self.sample_format.starts_with("u8") { 0x80 } else { 0 }
    }
}

/// Bytes per sample of a named sample format.
fn bytes_per_sample(format: &str) -> Option<u32> {
    match format.trim_end_matches('p') {
        "u8" => Some(1),
        "s16" => Some(2),
        "s32" | "flt" => Some(4),
        "s64" | "dbl" => Some(8),
        _ => None,
    }
}

/// Random-access state of one audio stream.
pub(crate) struct AudioReader {
    packets: PacketCursor,
    decoder: Option<Box<dyn Decoder>>,
    decoder_epoch: u32,
    stream_index: usize,
    threads: u32,
    /// Record the decoder will emit next when reading on sequentially.
    next_record: Option<u32>,
    last_fed_record: Option<u32>,
    /// Blocks decoded past the end of the previous read.
    carried: BTreeMap<u32, DecodedAudio>,
    exhausted: bool,
}

impl AudioReader {
    pub(crate) fn new(
        stream: &StreamIndex,
        demuxer: Box<dyn Demuxer>,
        options: &IndexOptions,
    ) -> Result<Self, FramedexError> {
        let track = audio_track(stream)?;
        let basis = track.timeline.basis;
        let values = track.frames.iter().map(|frame| {
            let value = basis.and_then(|basis| basis_value(basis, frame.pts, frame.dts, frame.position));
            (value, frame.sample_number)
        });
        Ok(Self {
            packets: PacketCursor::new(demuxer, stream.stream_index, basis, values, &stream.seek_table),
            decoder: None,
            decoder_epoch: 0,
            stream_index: stream.stream_index,
            threads: options.decoder_threads,
            next_record: None,
            last_fed_record: None,
            carried: BTreeMap::new(),
            exhausted: false,
        })
    }

    /// Decode `count` samples per channel starting at sample `start`.
    pub(crate) fn get_samples(
        &mut self,
        stream: &StreamIndex,
        start: u64,
        count: u32,
    ) -> Result<AudioSamples, FramedexError> {
        let track = audio_track(stream)?;
        let timeline = &track.timeline;
        let end = start + count as u64;
        let out_of_range = FramedexError::SampleRangeOutOfRange {
            start,
            end,
            total_samples: timeline.total_samples,
        };
        if count == 0 || end > timeline.total_samples {
            return Err(out_of_range);
        }
        let (Some(first), Some(last)) = (timeline.record_of(start), timeline.record_of(end - 1)) else {
            return Err(out_of_range);
        };

        let sequential = self
            .next_record
            .is_some_and(|next| first >= next && first - next <= SEQUENTIAL_WINDOW)
            && !self.exhausted;
        if sequential {
            log::debug!("Continuing audio stream {} at record {first}", self.stream_index);
        } else {
            let rap = first.saturating_sub(PRE_ROLL_PACKETS);
            log::debug!(
                "Seeking audio stream {} to record {rap} for samples {start}..{end}",
                self.stream_index
            );
            self.restart_at(stream, rap)?;
        }

        let mut blocks = std::mem::take(&mut self.carried);
        blocks.retain(|&record, _| record >= first);
        self.decode_through(stream, first, last, &mut blocks)?;
        self.next_record = Some(last + 1);
        self.carried = blocks.split_off(&(last + 1));

        let layout = blocks
            .values()
            .next()
            .map(SampleLayout::of_block)
            .or_else(|| {
                stream
                    .configurations
                    .get(track.frames[first as usize].epoch)
                    .map(SampleLayout::of_configuration)
            })
            .ok_or_else(|| FramedexError::AudioDecodeError("no decoder configuration".to_string()))?;
        Ok(assemble(track, &layout, &blocks, first, last, start, count))
    }

    /// Reopen or flush the decoder and position the demuxer at `record`.
    fn restart_at(&mut self, stream: &StreamIndex, record: u32) -> Result<(), FramedexError> {
        let track = audio_track(stream)?;
        let frame = &track.frames[record as usize];
        self.prepare_decoder(stream, frame.epoch)?;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.flush();
        }
        self.carried.clear();
        self.exhausted = false;
        self.last_fed_record = None;
        let target = track
            .timeline
            .basis
            .and_then(|basis| basis_value(basis, frame.pts, frame.dts, frame.position));
        self.packets.position_at(record, target)
    }

    /// Make sure the open decoder is configured for `epoch`.
    fn prepare_decoder(&mut self, stream: &StreamIndex, epoch: u32) -> Result<(), FramedexError> {
        if self.decoder.is_some() && self.decoder_epoch == epoch {
            return Ok(());
        }
        let configuration = stream
            .configurations
            .get(epoch)
            .ok_or_else(|| FramedexError::DecoderOpen {
                stream_index: self.stream_index,
                reason: format!("configuration epoch {epoch} is missing"),
            })?;
        log::debug!("Opening audio decoder for stream {} epoch {epoch}", self.stream_index);
        self.decoder = None;
        self.decoder = Some(self.packets.open_decoder(configuration, self.threads)?);
        self.decoder_epoch = epoch;
        Ok(())
    }

    /// Feed packets until every record up to `last` has come out or is given
    /// up on. Blocks at or after `first` are collected into `blocks`.
    fn decode_through(
        &mut self,
        stream: &StreamIndex,
        first: u32,
        last: u32,
        blocks: &mut BTreeMap<u32, DecodedAudio>,
    ) -> Result<(), FramedexError> {
        let track = audio_track(stream)?;
        let budget_end = last + self.decoder.as_ref().map_or(0, |decoder| decoder.delay()) + EXTRA_PACKET_BUDGET;
        loop {
            let done = blocks.contains_key(&last)
                || self.last_fed_record.is_some_and(|fed| fed >= budget_end)
                || self.exhausted;
            if done {
                return Ok(());
            }
            let Some((packet, record)) = self.packets.next_packet()? else {
                self.drain(first, blocks)?;
                self.exhausted = true;
                continue;
            };
            let epoch = track.frames.get(record as usize).map_or(self.decoder_epoch, |frame| frame.epoch);
            if epoch != self.decoder_epoch {
                self.drain(first, blocks)?;
                self.prepare_decoder(stream, epoch)?;
            }
            self.last_fed_record = Some(record);
            let decoder = self.decoder.as_mut().ok_or_else(|| FramedexError::DecoderOpen {
                stream_index: self.stream_index,
                reason: "decoder is not open".to_string(),
            })?;
            match decoder.decode(Some(&packet), record) {
                Ok(Some(DecodedUnit::Audio(block))) => collect(block, record, first, blocks),
                Ok(_) => {}
                Err(error) => log::warn!("Audio record {record} failed to decode, filling with silence: {error}"),
            }
        }
    }

    /// Pull every buffered block out of the decoder.
    fn drain(&mut self, first: u32, blocks: &mut BTreeMap<u32, DecodedAudio>) -> Result<(), FramedexError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(());
        };
        let fallback = self.last_fed_record.unwrap_or(0);
        loop {
            match decoder.decode(None, fallback) {
                Ok(Some(DecodedUnit::Audio(block))) => collect(block, fallback, first, blocks),
                Ok(_) => break,
                Err(error) => {
                    log::warn!("Draining audio decoder failed: {error}");
                    break;
                }
            }
        }
        // A drained decoder has to be reset before it accepts input again.
        decoder.flush();
        Ok(())
    }
}

fn collect(block: DecodedAudio, fallback: u32, first: u32, blocks: &mut BTreeMap<u32, DecodedAudio>) {
    let record = block.identity.unwrap_or(fallback);
    if record >= first {
        blocks.insert(record, block);
    }
}

fn audio_track(stream: &StreamIndex) -> Result<&AudioTrack, FramedexError> {
    stream.audio().ok_or(FramedexError::NoAudioStream)
}

/// Lay decoded blocks out at their index offsets and cut the requested
/// range. Records without a block become silence.
fn assemble(
    track: &AudioTrack,
    layout: &SampleLayout,
    blocks: &BTreeMap<u32, DecodedAudio>,
    first: u32,
    last: u32,
    start: u64,
    count: u32,
) -> AudioSamples {
    let timeline = &track.timeline;
    let base = timeline.offsets[first as usize];
    let span = (timeline.offsets[last as usize + 1] - base) as usize;
    let stride = layout.stride();
    let mut planes = vec![vec![layout.silence(); span * stride]; layout.plane_count()];
    let mut silent_samples = 0u64;

    for record in first..=last {
        let offset = (timeline.offsets[record as usize] - base) as usize;
        let length = timeline.lengths[record as usize] as usize;
        let block = blocks
            .get(&record)
            .filter(|block| block.planes.len() == planes.len() && SampleLayout::of_block(block).stride() == stride);
        let Some(block) = block else {
            silent_samples += length as u64;
            continue;
        };
        let copied = length.min(block.sample_count as usize);
        silent_samples += (length - copied) as u64;
        for (plane, source) in planes.iter_mut().zip(&block.planes) {
            let bytes = (copied * stride).min(source.len());
            plane[offset * stride..offset * stride + bytes].copy_from_slice(&source[..bytes]);
        }
    }

    let skip = (start - base) as usize * stride;
    let keep = count as usize * stride;
    let planes = planes
        .into_iter()
        .map(|plane| plane[skip..skip + keep].to_vec())
        .collect();
    if silent_samples > 0 {
        log::debug!("Filled {silent_samples} samples with silence around records {first}..={last}");
    }

    AudioSamples {
        start,
        sample_count: count,
        sample_rate: layout.sample_rate,
        channels: layout.channels,
        channel_layout: layout.channel_layout,
        sample_format: layout.sample_format.clone(),
        bytes_per_sample: layout.bytes_per_sample,
        planar: layout.planar,
        planes,
        silent_samples,
    }
}
