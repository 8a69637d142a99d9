//! Scripted in-memory backend shared by the integration tests.
//!
//! A [`Clip`] describes the packets of a container with one video and/or one
//! audio stream. The simulated decoders behave like real ones where it
//! matters to seeking: pictures come out in presentation order after a
//! reorder delay, nothing decodes until a keyframe has been fed since the
//! last flush, pictures shown before that keyframe come out broken, and
//! chosen packets fail.

#![allow(dead_code)]

pub mod bitstream;

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use framedex::{
    Backend, ContainerInfo, DecodedAudio, DecodedPicture, DecodedUnit, Decoder, DecoderConfiguration, Demuxer,
    FramedexError, IndexOptions, MediaBackend, MediaType, Packet, PictureType, Plane, Rational, SeekBasis, SeekFlags,
    SeekTableEntry, StreamInfo,
};

pub const VIDEO_STREAM: usize = 0;
pub const AUDIO_STREAM: usize = 1;
pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 2;
/// Marker of a picture decoded without its references.
pub const BROKEN_MARKER: u8 = 0xEE;

/// Which timestamps the container carries for video packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamps {
    Full,
    PresentationOnly,
    Missing,
}

#[derive(Debug, Clone)]
pub struct VideoClip {
    /// Presentation timestamps in decoding order.
    pub pts: Vec<i64>,
    /// Container keyframe flags in decoding order.
    pub keys: Vec<bool>,
    pub time_base: Rational,
    pub timestamps: Timestamps,
    /// Pictures the decoder holds back to restore presentation order.
    pub reorder_depth: usize,
    /// What the decoder claims its delay is, when it under-reports.
    pub reported_delay: Option<u32>,
    /// Presentation timestamps whose packets fail to decode.
    pub corrupt: HashSet<i64>,
    /// Presentation timestamps flagged key by the container that the
    /// decoder cannot start from.
    pub false_keys: HashSet<i64>,
    /// Decoding-order samples that carry new out-of-band configuration.
    pub configuration_changes: Vec<usize>,
    /// Codec the stream claims to be.
    pub codec_name: String,
    pub extradata: Vec<u8>,
    /// Coded bitstream of every packet, in decoding order. The simulated
    /// decoder's marker byte is appended to each.
    pub payloads: Vec<Vec<u8>>,
    /// Presentation timestamps of second fields, which the decoder merges
    /// into the preceding field's picture.
    pub second_fields: HashSet<i64>,
}

impl VideoClip {
    /// `count` pictures, `step` ticks apart, keyframe every `gop` pictures,
    /// no reordering.
    pub fn progressive(count: usize, gop: usize, step: i64) -> Self {
        Self {
            pts: (0..count as i64).map(|sample| sample * step).collect(),
            keys: (0..count).map(|sample| sample % gop == 0).collect(),
            time_base: Rational::new(1, 1000),
            timestamps: Timestamps::Full,
            reorder_depth: 0,
            reported_delay: None,
            corrupt: HashSet::new(),
            false_keys: HashSet::new(),
            configuration_changes: Vec::new(),
            codec_name: "simulated".to_string(),
            extradata: Vec::new(),
            payloads: Vec::new(),
            second_fields: HashSet::new(),
        }
    }

    /// Pictures with the given presentation timestamps and keyframe flags,
    /// in decoding order.
    pub fn coded(pts: Vec<i64>, keys: Vec<bool>, reorder_depth: usize) -> Self {
        Self {
            pts,
            keys,
            reorder_depth,
            ..Self::progressive(0, 1, 1)
        }
    }

    /// Closed groups coded `I P B B P B B ...`, `gop` pictures each.
    pub fn bidirectional(groups: usize, gop: usize, step: i64) -> Self {
        let mut pts = Vec::new();
        let mut keys = Vec::new();
        for group in 0..groups {
            let base = (group * gop) as i64;
            // Presentation slots: anchor at 0, then P at 3 shown after B1 B2.
            let mut coded: Vec<i64> = vec![0];
            let mut next = 1;
            while next < gop as i64 {
                let anchor = (next + 2).min(gop as i64 - 1);
                coded.push(anchor);
                coded.extend(next..anchor);
                next = anchor + 1;
            }
            for (position, slot) in coded.into_iter().enumerate() {
                pts.push((base + slot) * step);
                keys.push(position == 0);
            }
        }
        Self {
            pts,
            keys,
            reorder_depth: 1,
            ..Self::progressive(0, 1, step)
        }
    }

    pub fn len(&self) -> usize {
        self.pts.len()
    }

    /// Presentation rank of every decoding-order sample.
    pub fn ranks(&self) -> Vec<usize> {
        let mut sorted: Vec<i64> = self.pts.clone();
        sorted.sort_unstable();
        self.pts
            .iter()
            .map(|pts| sorted.binary_search(pts).unwrap_or(0))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Samples per channel of every packet.
    pub lengths: Vec<u32>,
    pub sample_rate: u32,
    /// Record numbers whose packets fail to decode.
    pub corrupt: HashSet<usize>,
}

impl AudioClip {
    pub fn uniform(count: usize, length: u32) -> Self {
        Self {
            lengths: vec![length; count],
            sample_rate: 8000,
            corrupt: HashSet::new(),
        }
    }

    pub fn total_samples(&self) -> u64 {
        self.lengths.iter().map(|&length| length as u64).sum()
    }

    /// Sample value every sample of `record` decodes to.
    pub fn marker(record: usize) -> u8 {
        (record % 250) as u8 + 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct Clip {
    pub video: Option<VideoClip>,
    pub audio: Option<AudioClip>,
    /// Stream packets a seek lands past where it should.
    pub seek_overshoot: usize,
    /// Every seek reports failure.
    pub seek_fails: bool,
    /// Every decoder open fails.
    pub decoders_unavailable: bool,
}

impl Clip {
    pub fn video(video: VideoClip) -> Self {
        Self {
            video: Some(video),
            ..Self::default()
        }
    }

    pub fn audio(audio: AudioClip) -> Self {
        Self {
            audio: Some(audio),
            ..Self::default()
        }
    }

    fn container(&self) -> ContainerInfo {
        let mut streams = Vec::new();
        if let Some(video) = &self.video {
            streams.push(StreamInfo {
                index: VIDEO_STREAM,
                media_type: MediaType::Video,
                time_base: video.time_base,
                frame_rate: None,
                duration: None,
                configuration: DecoderConfiguration {
                    codec_name: video.codec_name.clone(),
                    ..video_configuration(&video.extradata)
                },
            });
        }
        if let Some(audio) = &self.audio {
            streams.push(StreamInfo {
                index: if self.video.is_some() { AUDIO_STREAM } else { 0 },
                media_type: MediaType::Audio,
                time_base: Rational::new(1, audio.sample_rate as i32),
                frame_rate: None,
                duration: None,
                configuration: audio_configuration(audio.sample_rate),
            });
        }
        ContainerInfo {
            format_name: "simulated".to_string(),
            flags: 0,
            streams,
        }
    }

    pub fn audio_stream_index(&self) -> usize {
        if self.video.is_some() { AUDIO_STREAM } else { 0 }
    }

    /// Video packets and audio packets, interleaved one to one.
    fn packets(&self) -> Vec<Packet> {
        let video = self.video.as_ref().map(video_packets).unwrap_or_default();
        let audio = self
            .audio
            .as_ref()
            .map(|audio| audio_packets(audio, self.audio_stream_index()))
            .unwrap_or_default();
        let mut packets = Vec::with_capacity(video.len() + audio.len());
        let mut video = video.into_iter();
        let mut audio = audio.into_iter();
        loop {
            let (next_video, next_audio) = (video.next(), audio.next());
            if next_video.is_none() && next_audio.is_none() {
                break;
            }
            packets.extend(next_video);
            packets.extend(next_audio);
        }
        let mut position = 0i64;
        for packet in &mut packets {
            packet.position = Some(position);
            position += packet.data.len() as i64 + 16;
        }
        packets
    }
}

pub fn video_configuration(extradata: &[u8]) -> DecoderConfiguration {
    DecoderConfiguration {
        codec_id: 1,
        codec_name: "simulated".to_string(),
        extradata: extradata.to_vec(),
        width: WIDTH,
        height: HEIGHT,
        pixel_format: "gray".to_string(),
        ..DecoderConfiguration::default()
    }
}

pub fn audio_configuration(sample_rate: u32) -> DecoderConfiguration {
    DecoderConfiguration {
        codec_id: 2,
        codec_name: "pcm_s16le".to_string(),
        channels: 1,
        channel_layout: 4,
        sample_rate,
        sample_format: "s16".to_string(),
        bits_per_sample: 16,
        block_align: 2,
        ..DecoderConfiguration::default()
    }
}

fn video_packets(video: &VideoClip) -> Vec<Packet> {
    let ranks = video.ranks();
    let step = video
        .pts
        .iter()
        .zip(video.pts.iter().skip(1))
        .map(|(a, b)| (b - a).abs())
        .filter(|&delta| delta > 0)
        .min()
        .unwrap_or(1);
    let mut epoch = 0u8;
    (0..video.len())
        .map(|sample| {
            let pts = video.pts[sample];
            let dts = sample as i64 * step - video.reorder_depth as i64 * step;
            let new_extradata = video.configuration_changes.contains(&sample).then(|| {
                epoch += 1;
                vec![0xE0, epoch]
            });
            let (pts, dts) = match video.timestamps {
                Timestamps::Full => (Some(pts), Some(dts)),
                Timestamps::PresentationOnly => (Some(pts), None),
                Timestamps::Missing => (None, None),
            };
            let marker = (ranks[sample] % 256) as u8;
            let data = match video.payloads.get(sample) {
                Some(payload) => {
                    let mut data = payload.clone();
                    data.push(marker);
                    data
                }
                None => vec![marker; (WIDTH * HEIGHT) as usize],
            };
            Packet {
                stream_index: VIDEO_STREAM,
                pts,
                dts,
                position: None,
                is_key: video.keys[sample],
                duration: step,
                data,
                new_extradata,
            }
        })
        .collect()
}

fn audio_packets(audio: &AudioClip, stream_index: usize) -> Vec<Packet> {
    let mut offset = 0i64;
    audio
        .lengths
        .iter()
        .enumerate()
        .map(|(record, &length)| {
            let packet = Packet {
                stream_index,
                pts: Some(offset),
                dts: Some(offset),
                position: None,
                is_key: true,
                duration: length as i64,
                data: vec![AudioClip::marker(record); length as usize * 2],
                new_extradata: None,
            };
            offset += length as i64;
            packet
        })
        .collect()
}

/// Counters shared by every demuxer and decoder a backend hands out.
#[derive(Debug, Default)]
pub struct Counters {
    pub demuxers_opened: AtomicUsize,
    pub decoders_opened: AtomicUsize,
    pub seeks: AtomicUsize,
    pub rewinds: AtomicUsize,
}

impl Counters {
    pub fn seeks(&self) -> usize {
        self.seeks.load(Ordering::SeqCst)
    }

    pub fn decoders_opened(&self) -> usize {
        self.decoders_opened.load(Ordering::SeqCst)
    }
}

pub struct SimulatedBackend {
    clip: Clip,
    pub counters: Arc<Counters>,
}

impl SimulatedBackend {
    pub fn new(clip: Clip) -> Self {
        Self {
            clip,
            counters: Arc::new(Counters::default()),
        }
    }
}

impl MediaBackend for SimulatedBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn Demuxer>, FramedexError> {
        if !path.exists() {
            return Err(FramedexError::FileOpen {
                path: path.to_path_buf(),
                reason: "no such file".to_string(),
            });
        }
        self.counters.demuxers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedDemuxer {
            container: self.clip.container(),
            packets: self.clip.packets(),
            cursor: 0,
            clip: self.clip.clone(),
            counters: Arc::clone(&self.counters),
            restored: Vec::new(),
        }))
    }
}

struct SimulatedDemuxer {
    container: ContainerInfo,
    packets: Vec<Packet>,
    cursor: usize,
    clip: Clip,
    counters: Arc<Counters>,
    restored: Vec<SeekTableEntry>,
}

impl Demuxer for SimulatedDemuxer {
    fn container(&self) -> &ContainerInfo {
        &self.container
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, FramedexError> {
        let packet = self.packets.get(self.cursor).cloned();
        if packet.is_some() {
            self.cursor += 1;
        }
        Ok(packet)
    }

    fn seek(&mut self, stream_index: usize, target: i64, basis: SeekBasis, flags: SeekFlags) -> Result<(), FramedexError> {
        self.counters.seeks.fetch_add(1, Ordering::SeqCst);
        if self.clip.seek_fails {
            return Err(FramedexError::FfmpegError("seek refused".to_string()));
        }
        let stream_packets: Vec<usize> = self
            .packets
            .iter()
            .enumerate()
            .filter(|(_, packet)| packet.stream_index == stream_index)
            .map(|(position, _)| position)
            .collect();
        let landing = stream_packets
            .iter()
            .rposition(|&position| {
                let packet = &self.packets[position];
                let value = match basis {
                    SeekBasis::DecodingTimestamp => packet.dts,
                    SeekBasis::PresentationTimestamp => packet.pts,
                    SeekBasis::ByteOffset => packet.position,
                };
                (packet.is_key || flags.any) && value.is_some_and(|value| value <= target)
            })
            .unwrap_or(0);
        let landing = (landing + self.clip.seek_overshoot).min(stream_packets.len().saturating_sub(1));
        self.cursor = stream_packets.get(landing).copied().unwrap_or(0);
        Ok(())
    }

    fn rewind(&mut self) -> Result<(), FramedexError> {
        self.counters.rewinds.fetch_add(1, Ordering::SeqCst);
        self.cursor = 0;
        Ok(())
    }

    fn seek_table(&self, stream_index: usize) -> Vec<SeekTableEntry> {
        self.packets
            .iter()
            .filter(|packet| packet.stream_index == stream_index && packet.is_key)
            .filter_map(|packet| {
                Some(SeekTableEntry {
                    position: packet.position?,
                    timestamp: packet.dts.or(packet.pts)?,
                    flags: 1,
                })
            })
            .take(4)
            .collect()
    }

    fn restore_seek_table(&mut self, _stream_index: usize, entries: &[SeekTableEntry]) {
        self.restored = entries.to_vec();
    }

    fn open_decoder(
        &mut self,
        stream_index: usize,
        configuration: &DecoderConfiguration,
        threads: u32,
    ) -> Result<Box<dyn Decoder>, FramedexError> {
        self.counters.decoders_opened.fetch_add(1, Ordering::SeqCst);
        if self.clip.decoders_unavailable {
            return Err(FramedexError::DecoderOpen {
                stream_index,
                reason: "decoder unavailable".to_string(),
            });
        }
        let media_type = self
            .container
            .stream(stream_index)
            .map(|stream| stream.media_type)
            .ok_or_else(|| FramedexError::DecoderOpen {
                stream_index,
                reason: "no such stream".to_string(),
            })?;
        match media_type {
            MediaType::Video => {
                let video = self.clip.video.clone().ok_or_else(|| FramedexError::DecoderOpen {
                    stream_index,
                    reason: "no video".to_string(),
                })?;
                // Frame threading adds one picture of latency per extra thread.
                Ok(Box::new(SimulatedVideoDecoder {
                    depth: video.reorder_depth + threads.saturating_sub(1) as usize,
                    reported_delay: video.reported_delay,
                    corrupt: video.corrupt,
                    false_keys: video.false_keys,
                    second_fields: video.second_fields,
                    primed_at: None,
                    buffer: Vec::new(),
                }))
            }
            MediaType::Audio => Ok(Box::new(SimulatedAudioDecoder {
                sample_rate: configuration.sample_rate,
                corrupt_markers: self
                    .clip
                    .audio
                    .as_ref()
                    .map(|audio| audio.corrupt.iter().map(|&record| AudioClip::marker(record)).collect())
                    .unwrap_or_default(),
            })),
            MediaType::Other => Err(FramedexError::DecoderOpen {
                stream_index,
                reason: "unsupported stream".to_string(),
            }),
        }
    }
}

struct SimulatedVideoDecoder {
    depth: usize,
    reported_delay: Option<u32>,
    corrupt: HashSet<i64>,
    false_keys: HashSet<i64>,
    second_fields: HashSet<i64>,
    /// Order of the first usable keyframe fed since the last flush.
    primed_at: Option<i64>,
    /// (pts, identity, marker, key) awaiting output.
    buffer: Vec<(i64, u32, u8, bool)>,
}

impl SimulatedVideoDecoder {
    fn emit_lowest(&mut self) -> Option<DecodedUnit> {
        let lowest = self
            .buffer
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.0)
            .map(|(position, _)| position)?;
        let (_, identity, marker, key) = self.buffer.remove(lowest);
        Some(DecodedUnit::Video(DecodedPicture {
            identity: Some(identity),
            width: WIDTH,
            height: HEIGHT,
            pixel_format: "gray".to_string(),
            planes: vec![Plane::filled(WIDTH as usize, HEIGHT as usize, marker)],
            key,
            interlaced: false,
            top_field_first: false,
            repeat_pict: 0,
            picture_type: if key { PictureType::I } else { PictureType::P },
        }))
    }
}

impl Decoder for SimulatedVideoDecoder {
    fn decode(&mut self, packet: Option<&Packet>, identity: u32) -> Result<Option<DecodedUnit>, FramedexError> {
        let Some(packet) = packet else {
            return Ok(self.emit_lowest());
        };
        let marker = packet.data.last().copied().unwrap_or(0);
        // Packets without timestamps are ordered by their marker, which is
        // their presentation rank.
        let order = packet.pts.unwrap_or(marker as i64);
        if self.corrupt.contains(&order) {
            return Err(FramedexError::VideoDecodeError(format!("corrupt packet {identity}")));
        }
        let usable_key = packet.is_key && !self.false_keys.contains(&order);
        if usable_key && self.primed_at.is_none() {
            self.primed_at = Some(order);
        }
        let Some(primed_at) = self.primed_at else {
            return Ok(None);
        };
        if self.second_fields.contains(&order) {
            return Ok(None);
        }
        let marker = if order < primed_at { BROKEN_MARKER } else { marker };
        self.buffer.push((order, identity, marker, usable_key));
        if self.buffer.len() > self.depth {
            return Ok(self.emit_lowest());
        }
        Ok(None)
    }

    fn flush(&mut self) {
        self.buffer.clear();
        self.primed_at = None;
    }

    fn delay(&self) -> u32 {
        self.reported_delay.unwrap_or(self.depth as u32)
    }
}

struct SimulatedAudioDecoder {
    sample_rate: u32,
    corrupt_markers: HashSet<u8>,
}

impl Decoder for SimulatedAudioDecoder {
    fn decode(&mut self, packet: Option<&Packet>, identity: u32) -> Result<Option<DecodedUnit>, FramedexError> {
        let Some(packet) = packet else {
            return Ok(None);
        };
        if packet.data.first().is_some_and(|marker| self.corrupt_markers.contains(marker)) {
            return Err(FramedexError::AudioDecodeError(format!("corrupt packet {identity}")));
        }
        Ok(Some(DecodedUnit::Audio(DecodedAudio {
            identity: Some(identity),
            sample_count: packet.data.len() as u32 / 2,
            sample_rate: self.sample_rate,
            channels: 1,
            channel_layout: 4,
            sample_format: "s16".to_string(),
            bytes_per_sample: 2,
            planar: false,
            planes: vec![packet.data.clone()],
        })))
    }

    fn flush(&mut self) {}

    fn delay(&self) -> u32 {
        0
    }
}

/// A placeholder media file plus options wired to a simulated backend.
pub struct Fixture {
    pub directory: tempfile::TempDir,
    pub path: PathBuf,
    pub counters: Arc<Counters>,
    backend: Arc<SimulatedBackend>,
}

impl Fixture {
    pub fn new(clip: Clip) -> Self {
        Self::named(clip, "clip.sim")
    }

    /// A fixture whose source file is called `file_name`.
    pub fn named(clip: Clip, file_name: &str) -> Self {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let path = directory.path().join(file_name);
        std::fs::write(&path, b"simulated media").expect("Failed to write source file");
        let backend = Arc::new(SimulatedBackend::new(clip));
        Self {
            directory,
            path,
            counters: Arc::clone(&backend.counters),
            backend,
        }
    }

    pub fn options(&self) -> IndexOptions {
        IndexOptions::new().with_backend(Backend::Custom(self.backend.clone()))
    }

    pub fn index_path(&self) -> PathBuf {
        self.options().index_path_for(&self.path)
    }
}

/// Marker the simulated decoder paints presentation frame `frame` with.
pub fn frame_marker(frame: u32) -> u8 {
    (frame % 256) as u8
}
