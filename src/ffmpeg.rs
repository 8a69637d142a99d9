//! FFmpeg implementation of the demux/decode collaborator.
//!
//! [`FfmpegBackend`] opens containers with `ffmpeg-next` and hands out
//! [`Demuxer`] and [`Decoder`] trait objects. A few operations have no safe
//! wrapper (seek tables, container flags, raw seeks, extradata overrides);
//! those go through `ffmpeg-sys-next` directly.
//!
//! FFmpeg has its own internal logging system, separate from the Rust
//! [`log`](https://crates.io/crates/log) crate. [`set_ffmpeg_log_level`]
//! tunes it without importing `ffmpeg-next` directly.
//!
//! # Example
//!
//! ```no_run
//! use framedex::{FfmpegLogLevel, IndexOptions, MediaSource};
//!
//! // Silence all FFmpeg output except fatal errors.
//! framedex::set_ffmpeg_log_level(FfmpegLogLevel::Fatal);
//!
//! let source = MediaSource::build_or_load_index("input.mkv", IndexOptions::new()).unwrap();
//! ```

use std::{collections::VecDeque, path::Path, ptr, slice};

use ffmpeg_next::{
    Error as FfmpegError, Packet as FfmpegPacket,
    codec::{
        self, context::Context as CodecContext, decoder, packet::side_data::Type as SideDataType,
        threading,
    },
    format::context::Input,
    frame,
    media::Type,
    picture,
    util::log::Level,
};
use ffmpeg_sys_next::{
    AV_INPUT_BUFFER_PADDING_SIZE, AVChannelOrder, AVCodecID, AVStream, av_add_index_entry, av_freep,
    av_mallocz, av_seek_frame, avformat_index_get_entries_count, avformat_index_get_entry,
    avformat_seek_file,
};

use crate::{
    backend::{
        ContainerInfo, DecodedAudio, DecodedPicture, DecodedUnit, Decoder, Demuxer, MediaBackend, MediaType,
        Packet, Plane, SeekBasis, SeekFlags, SeekTableEntry, StreamInfo,
    },
    conversion::Rational,
    error::FramedexError,
    extradata::DecoderConfiguration,
    frame::PictureType,
};

// AVSEEK_FLAG_*
const SEEK_FLAG_BACKWARD: i32 = 1;
const SEEK_FLAG_BYTE: i32 = 2;
const SEEK_FLAG_ANY: i32 = 4;

/// The default backend, built on `ffmpeg-next`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegBackend;

impl MediaBackend for FfmpegBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn Demuxer>, FramedexError> {
        Ok(Box::new(FfmpegDemuxer::open(path)?))
    }
}

/// An opened FFmpeg input context.
pub(crate) struct FfmpegDemuxer {
    input: Input,
    container: ContainerInfo,
}

// The input context is only ever touched from the thread that owns the
// demuxer.
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    pub(crate) fn open(path: &Path) -> Result<Self, FramedexError> {
        log::debug!("Opening media file: {}", path.display());

        ffmpeg_next::init().map_err(|error| FramedexError::FileOpen {
            path: path.to_path_buf(),
            reason: format!("FFmpeg initialisation failed: {error}"),
        })?;
        let input = ffmpeg_next::format::input(&path).map_err(|error| FramedexError::FileOpen {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;

        let format_name = input.format().name().to_string();
        let flags = unsafe { (*(*input.as_ptr()).iformat).flags } as u32;
        let streams = input.streams().map(|stream| describe_stream(&stream)).collect();

        Ok(Self {
            input,
            container: ContainerInfo {
                format_name,
                flags,
                streams,
            },
        })
    }

    fn stream_pointer(&self, stream_index: usize) -> Option<*mut AVStream> {
        self.input
            .stream(stream_index)
            .map(|stream| unsafe { stream.as_ptr() as *mut AVStream })
    }
}

fn describe_stream(stream: &ffmpeg_next::Stream<'_>) -> StreamInfo {
    let parameters = stream.parameters();
    let media_type = match parameters.medium() {
        Type::Video => MediaType::Video,
        Type::Audio => MediaType::Audio,
        _ => MediaType::Other,
    };
    let time_base = rational(stream.time_base());
    let frame_rate = [stream.avg_frame_rate(), stream.rate()]
        .into_iter()
        .map(rational)
        .find(Rational::is_valid);
    let duration = Some(stream.duration()).filter(|&duration| duration > 0);

    let codec_id = parameters.id();
    let raw_id: AVCodecID = codec_id.into();
    let mut configuration = DecoderConfiguration {
        codec_id: raw_id as u32,
        codec_name: codec_id.name().to_string(),
        ..DecoderConfiguration::default()
    };
    unsafe {
        let raw = parameters.as_ptr();
        if !(*raw).extradata.is_null() && (*raw).extradata_size > 0 {
            configuration.extradata =
                slice::from_raw_parts((*raw).extradata, (*raw).extradata_size as usize).to_vec();
        }
        configuration.width = (*raw).width.max(0) as u32;
        configuration.height = (*raw).height.max(0) as u32;
        configuration.channels = (*raw).ch_layout.nb_channels.max(0) as u32;
        if (*raw).ch_layout.order == AVChannelOrder::AV_CHANNEL_ORDER_NATIVE {
            configuration.channel_layout = (*raw).ch_layout.u.mask;
        }
        configuration.sample_rate = (*raw).sample_rate.max(0) as u32;
        configuration.bits_per_sample = (*raw).bits_per_coded_sample.max(0) as u32;
        configuration.block_align = (*raw).block_align.max(0) as u32;
    }

    // Format names come from a short-lived decoder context, the same way
    // stream metadata is read when a file is opened.
    if let Ok(context) = CodecContext::from_parameters(parameters) {
        match media_type {
            MediaType::Video => {
                if let Ok(video) = context.decoder().video() {
                    configuration.pixel_format = pixel_format_name(video.format());
                }
            }
            MediaType::Audio => {
                if let Ok(audio) = context.decoder().audio() {
                    configuration.sample_format = audio.format().name().to_string();
                }
            }
            MediaType::Other => {}
        }
    }

    StreamInfo {
        index: stream.index(),
        media_type,
        time_base,
        frame_rate,
        duration,
        configuration,
    }
}

fn rational(value: ffmpeg_next::Rational) -> Rational {
    Rational::new(value.numerator(), value.denominator())
}

fn pixel_format_name(format: ffmpeg_next::format::Pixel) -> String {
    format
        .descriptor()
        .map(|descriptor| descriptor.name().to_string())
        .unwrap_or_default()
}

impl Demuxer for FfmpegDemuxer {
    fn container(&self) -> &ContainerInfo {
        &self.container
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, FramedexError> {
        let mut packet = FfmpegPacket::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(FfmpegError::Eof) => return Ok(None),
            Err(error) => return Err(FramedexError::from(error)),
        }
        let new_extradata = packet
            .side_data()
            .find(|side_data| side_data.kind() == SideDataType::NewExtraData)
            .map(|side_data| side_data.data().to_vec());
        Ok(Some(Packet {
            stream_index: packet.stream(),
            pts: packet.pts(),
            dts: packet.dts(),
            position: Some(packet.position() as i64).filter(|&position| position >= 0),
            is_key: packet.is_key(),
            duration: packet.duration().max(0),
            data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
            new_extradata,
        }))
    }

    fn seek(
        &mut self,
        stream_index: usize,
        target: i64,
        basis: SeekBasis,
        flags: SeekFlags,
    ) -> Result<(), FramedexError> {
        let mut raw_flags = 0;
        if flags.backward {
            raw_flags |= SEEK_FLAG_BACKWARD;
        }
        if flags.any {
            raw_flags |= SEEK_FLAG_ANY;
        }
        if basis == SeekBasis::ByteOffset {
            raw_flags |= SEEK_FLAG_BYTE;
        }
        let result =
            unsafe { av_seek_frame(self.input.as_mut_ptr(), stream_index as i32, target, raw_flags) };
        if result < 0 {
            return Err(FramedexError::from(FfmpegError::from(result)));
        }
        Ok(())
    }

    fn rewind(&mut self) -> Result<(), FramedexError> {
        let result = if self.container.is_byte_seekable() {
            unsafe { av_seek_frame(self.input.as_mut_ptr(), -1, 0, SEEK_FLAG_BYTE | SEEK_FLAG_BACKWARD) }
        } else {
            unsafe { avformat_seek_file(self.input.as_mut_ptr(), -1, i64::MIN, i64::MIN, 0, 0) }
        };
        if result < 0 {
            return Err(FramedexError::from(FfmpegError::from(result)));
        }
        Ok(())
    }

    fn seek_table(&self, stream_index: usize) -> Vec<SeekTableEntry> {
        let Some(stream) = self.stream_pointer(stream_index) else {
            return Vec::new();
        };
        unsafe {
            let count = avformat_index_get_entries_count(stream);
            let mut entries = Vec::with_capacity(count.max(0) as usize);
            for position in 0..count {
                let entry = avformat_index_get_entry(stream, position);
                if entry.is_null() {
                    continue;
                }
                entries.push(SeekTableEntry {
                    position: (*entry).pos,
                    timestamp: (*entry).timestamp,
                    flags: (*entry).flags() as i32,
                });
            }
            entries
        }
    }

    fn restore_seek_table(&mut self, stream_index: usize, entries: &[SeekTableEntry]) {
        let Some(stream) = self.stream_pointer(stream_index) else {
            return;
        };
        for entry in entries {
            let result = unsafe { av_add_index_entry(stream, entry.position, entry.timestamp, 0, 0, entry.flags) };
            if result < 0 {
                log::warn!(
                    "Stream {stream_index}: seek table entry at {} was rejected",
                    entry.timestamp
                );
            }
        }
    }

    fn open_decoder(
        &mut self,
        stream_index: usize,
        configuration: &DecoderConfiguration,
        threads: u32,
    ) -> Result<Box<dyn Decoder>, FramedexError> {
        let open_error = |reason: String| FramedexError::DecoderOpen {
            stream_index,
            reason,
        };
        let stream = self
            .input
            .stream(stream_index)
            .ok_or_else(|| open_error("no such stream".to_string()))?;
        let mut context =
            CodecContext::from_parameters(stream.parameters()).map_err(|error| open_error(error.to_string()))?;
        replace_extradata(&mut context, &configuration.extradata).map_err(open_error)?;
        let threads = threads.max(1);
        context.set_threading(threading::Config {
            kind: threading::Type::Frame,
            count: threads as usize,
        });

        let kind = match context.medium() {
            Type::Video => DecoderKind::Video(
                context
                    .decoder()
                    .video()
                    .map_err(|error| open_error(error.to_string()))?,
            ),
            Type::Audio => DecoderKind::Audio(
                context
                    .decoder()
                    .audio()
                    .map_err(|error| open_error(error.to_string()))?,
            ),
            other => return Err(open_error(format!("unsupported media type {other:?}"))),
        };
        log::debug!(
            "Opened {} decoder for stream {stream_index} with {threads} threads",
            configuration.codec_name
        );
        Ok(Box::new(FfmpegDecoder {
            kind,
            threads,
            pending: VecDeque::new(),
            draining: false,
        }))
    }
}

/// Install `extradata` on an unopened codec context.
fn replace_extradata(context: &mut CodecContext, extradata: &[u8]) -> Result<(), String> {
    unsafe {
        let raw = context.as_mut_ptr();
        av_freep(ptr::addr_of_mut!((*raw).extradata).cast());
        (*raw).extradata_size = 0;
        if extradata.is_empty() {
            return Ok(());
        }
        let buffer = av_mallocz(extradata.len() + AV_INPUT_BUFFER_PADDING_SIZE as usize) as *mut u8;
        if buffer.is_null() {
            return Err("out of memory for configuration blob".to_string());
        }
        ptr::copy_nonoverlapping(extradata.as_ptr(), buffer, extradata.len());
        (*raw).extradata = buffer;
        (*raw).extradata_size = extradata.len() as i32;
    }
    Ok(())
}

enum DecoderKind {
    Video(decoder::Video),
    Audio(decoder::Audio),
}

/// An opened FFmpeg decoder.
///
/// The identity travels through the decoder as the packet's presentation
/// timestamp and is read back from the frame.
struct FfmpegDecoder {
    kind: DecoderKind,
    threads: u32,
    pending: VecDeque<DecodedUnit>,
    draining: bool,
}

unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    fn opened(&mut self) -> &mut decoder::Opened {
        match &mut self.kind {
            DecoderKind::Video(video) => &mut **video,
            DecoderKind::Audio(audio) => &mut **audio,
        }
    }

    fn receive_all(&mut self) -> Result<(), FramedexError> {
        loop {
            let unit = match &mut self.kind {
                DecoderKind::Video(video) => {
                    let mut decoded = frame::Video::empty();
                    match video.receive_frame(&mut decoded) {
                        Ok(()) => DecodedUnit::Video(copy_picture(&decoded)),
                        Err(_) => return Ok(()),
                    }
                }
                DecoderKind::Audio(audio) => {
                    let mut decoded = frame::Audio::empty();
                    match audio.receive_frame(&mut decoded) {
                        Ok(()) => DecodedUnit::Audio(copy_audio(&decoded)),
                        Err(_) => return Ok(()),
                    }
                }
            };
            self.pending.push_back(unit);
        }
    }

    fn decode_error(&self, error: FfmpegError) -> FramedexError {
        match self.kind {
            DecoderKind::Video(_) => FramedexError::VideoDecodeError(error.to_string()),
            DecoderKind::Audio(_) => FramedexError::AudioDecodeError(error.to_string()),
        }
    }
}

impl Decoder for FfmpegDecoder {
    fn decode(&mut self, packet: Option<&Packet>, identity: u32) -> Result<Option<DecodedUnit>, FramedexError> {
        match packet {
            Some(packet) => {
                if self.draining {
                    self.flush();
                }
                let mut input = FfmpegPacket::copy(&packet.data);
                input.set_pts(Some(identity as i64));
                input.set_dts(None);
                input.set_duration(packet.duration);
                if packet.is_key {
                    input.set_flags(codec::packet::Flags::KEY);
                }
                if let Err(error) = self.opened().send_packet(&input) {
                    self.receive_all()?;
                    return Err(self.decode_error(error));
                }
            }
            None => {
                if !self.draining {
                    self.draining = true;
                    let _ = self.opened().send_eof();
                }
            }
        }
        self.receive_all()?;
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
        self.opened().flush();
    }

    fn delay(&self) -> u32 {
        match &self.kind {
            DecoderKind::Video(video) => {
                let has_b_frames = unsafe { (*video.as_ptr()).has_b_frames }.max(0) as u32;
                has_b_frames + self.threads - 1
            }
            DecoderKind::Audio(_) => 0,
        }
    }
}

fn copy_picture(decoded: &frame::Video) -> DecodedPicture {
    let planes = (0..decoded.planes())
        .map(|index| Plane {
            data: decoded.data(index).to_vec(),
            stride: decoded.stride(index),
            lines: decoded.plane_height(index) as usize,
        })
        .collect();
    let picture_type = match decoded.kind() {
        picture::Type::I => PictureType::I,
        picture::Type::P => PictureType::P,
        picture::Type::B | picture::Type::BI => PictureType::B,
        picture::Type::S => PictureType::S,
        picture::Type::SI => PictureType::Si,
        _ => PictureType::Unknown,
    };
    DecodedPicture {
        identity: decoded.pts().and_then(|pts| u32::try_from(pts).ok()),
        width: decoded.width(),
        height: decoded.height(),
        pixel_format: pixel_format_name(decoded.format()),
        planes,
        key: decoded.is_key(),
        interlaced: decoded.is_interlaced(),
        top_field_first: decoded.is_top_first(),
        repeat_pict: unsafe { (*decoded.as_ptr()).repeat_pict }.clamp(0, u8::MAX as i32) as u8,
        picture_type,
    }
}

fn copy_audio(decoded: &frame::Audio) -> DecodedAudio {
    let format = decoded.format();
    let planar = decoded.is_planar();
    let sample_count = decoded.samples();
    let (channels, channel_layout) = unsafe {
        let raw = decoded.as_ptr();
        let layout = &(*raw).ch_layout;
        let mask = if layout.order == AVChannelOrder::AV_CHANNEL_ORDER_NATIVE {
            layout.u.mask
        } else {
            0
        };
        (layout.nb_channels.max(0) as u32, mask)
    };
    let bytes_per_sample = format.bytes();
    let plane_bytes = sample_count * bytes_per_sample * if planar { 1 } else { channels as usize };
    let plane_count = if planar { channels as usize } else { 1 };
    let planes = (0..plane_count)
        .map(|index| unsafe {
            let data = *(*decoded.as_ptr()).extended_data.add(index);
            if data.is_null() {
                vec![0; plane_bytes]
            } else {
                slice::from_raw_parts(data, plane_bytes).to_vec()
            }
        })
        .collect();
    DecodedAudio {
        identity: decoded.pts().and_then(|pts| u32::try_from(pts).ok()),
        sample_count: sample_count as u32,
        sample_rate: decoded.rate(),
        channels,
        channel_layout,
        sample_format: format.name().to_string(),
        bytes_per_sample: bytes_per_sample as u32,
        planar,
        planes,
    }
}

// ── Log level ──

/// FFmpeg internal log verbosity level.
///
/// Maps directly to FFmpeg's `AV_LOG_*` constants. Setting a level causes
/// FFmpeg to suppress all messages below that severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print no output at all.
    Quiet,
    /// Only conditions that abort the process.
    Panic,
    /// Only unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Verbose informational messages.
    Verbose,
    /// Debugging messages.
    Debug,
    /// Extremely verbose tracing output.
    Trace,
}

impl From<FfmpegLogLevel> for Level {
    fn from(level: FfmpegLogLevel) -> Self {
        match level {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }
}

/// Set the FFmpeg internal log verbosity level.
///
/// This controls what FFmpeg itself prints to stderr. Diagnostics emitted by
/// this crate go through the `log` facade and are configured by whatever
/// logger the application installs.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.into());
}
