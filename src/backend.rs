//! The demux/decode collaborator.
//!
//! Indexing and seeking never talk to a codec library directly. They go
//! through the narrow [`Demuxer`] and [`Decoder`] traits defined here, and a
//! [`Backend`] picks the implementation when a source is opened. The default
//! backend is FFmpeg ([`crate::ffmpeg::FfmpegBackend`]); anything else can be
//! plugged in with [`Backend::Custom`].
//!
//! Seeking through a [`Demuxer`] is best effort. Callers re-validate where
//! the demuxer actually landed by matching packets against the index.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::Path,
    sync::Arc,
};

use crate::{
    conversion::Rational, error::FramedexError, extradata::DecoderConfiguration, ffmpeg::FfmpegBackend,
    frame::PictureType,
};

/// Container flag: byte-offset seeking is not supported.
pub const FORMAT_FLAG_NO_BYTE_SEEK: u32 = 0x8000;
/// Container flag: timestamps may jump (MPEG-TS style).
pub const FORMAT_FLAG_TS_DISCONTINUOUS: u32 = 0x200;

/// Whether container `flags` allow seeking by byte offset.
pub(crate) fn byte_seekable(flags: u32) -> bool {
    flags & FORMAT_FLAG_NO_BYTE_SEEK == 0
}

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// A video stream.
    Video,
    /// An audio stream.
    Audio,
    /// Anything else (subtitles, data, attachments).
    Other,
}

impl MediaType {
    /// Single-letter code used in the persisted index.
    pub fn code(&self) -> char {
        match self {
            MediaType::Video => 'V',
            MediaType::Audio => 'A',
            MediaType::Other => 'O',
        }
    }

    /// Inverse of [`code`](MediaType::code).
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "V" => Some(MediaType::Video),
            "A" => Some(MediaType::Audio),
            "O" => Some(MediaType::Other),
            _ => None,
        }
    }
}

/// Static description of one elementary stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Container stream index.
    pub index: usize,
    /// Stream kind.
    pub media_type: MediaType,
    /// Time base of the stream's timestamps.
    pub time_base: Rational,
    /// Frame rate advertised by the container.
    pub frame_rate: Option<Rational>,
    /// Duration advertised by the container, in stream ticks.
    pub duration: Option<i64>,
    /// Initial decoder configuration.
    pub configuration: DecoderConfiguration,
}

/// Static description of an opened container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    /// Short container format name.
    pub format_name: String,
    /// Container capability flags (`FORMAT_FLAG_*`).
    pub flags: u32,
    /// All streams, indexed by container stream index.
    pub streams: Vec<StreamInfo>,
}

impl ContainerInfo {
    /// Whether seeking by byte offset is possible.
    pub fn is_byte_seekable(&self) -> bool {
        byte_seekable(self.flags)
    }

    /// Look up a stream by container index.
    pub fn stream(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.get(index)
    }
}

/// One demuxed compressed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Container stream index.
    pub stream_index: usize,
    /// Presentation timestamp.
    pub pts: Option<i64>,
    /// Decoding timestamp.
    pub dts: Option<i64>,
    /// Byte offset in the file.
    pub position: Option<i64>,
    /// Container keyframe flag.
    pub is_key: bool,
    /// Duration in stream ticks (0 when unknown).
    pub duration: i64,
    /// Compressed payload.
    pub data: Vec<u8>,
    /// New out-of-band configuration carried as side data.
    pub new_extradata: Option<Vec<u8>>,
}

/// Which domain a seek target is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeekBasis {
    /// Decoding timestamps in stream ticks.
    DecodingTimestamp,
    /// Presentation timestamps in stream ticks.
    PresentationTimestamp,
    /// Byte offsets in the file.
    ByteOffset,
}

/// Flags for [`Demuxer::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeekFlags {
    /// Land at or before the target.
    pub backward: bool,
    /// Allow landing on a non-key packet.
    pub any: bool,
}

impl SeekFlags {
    /// Land at or before the target, on a key packet.
    pub const BACKWARD: SeekFlags = SeekFlags {
        backward: true,
        any: false,
    };
}

/// One entry of a container's internal seek table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeekTableEntry {
    /// Byte offset.
    pub position: i64,
    /// Timestamp in stream ticks.
    pub timestamp: i64,
    /// Backend-specific flags (bit 0: keyframe).
    pub flags: i32,
}

/// One plane of decoded picture or audio data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    /// Raw bytes, `stride * lines` long.
    pub data: Vec<u8>,
    /// Bytes per line.
    pub stride: usize,
    /// Number of lines.
    pub lines: usize,
}

impl Plane {
    /// A plane of `lines` rows of `stride` bytes all set to `value`.
    pub fn filled(stride: usize, lines: usize, value: u8) -> Self {
        Self {
            data: vec![value; stride * lines],
            stride,
            lines,
        }
    }

    /// Borrow one line.
    pub fn line(&self, row: usize) -> &[u8] {
        let start = row * self.stride;
        &self.data[start..start + self.stride]
    }
}

/// A decoded picture as handed back by a [`Decoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPicture {
    /// Identity of the packet this picture was decoded from.
    pub identity: Option<u32>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format name.
    pub pixel_format: String,
    /// Image planes.
    pub planes: Vec<Plane>,
    /// Whether the decoder flagged this picture as a keyframe.
    pub key: bool,
    /// Whether the picture is interlaced.
    pub interlaced: bool,
    /// Whether the top field is displayed first.
    pub top_field_first: bool,
    /// Extra field count signalled by the decoder.
    pub repeat_pict: u8,
    /// Picture type reported by the decoder.
    pub picture_type: PictureType,
}

/// A decoded block of audio as handed back by a [`Decoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAudio {
    /// Identity of the packet this block was decoded from.
    pub identity: Option<u32>,
    /// Samples per channel.
    pub sample_count: u32,
    /// Sample rate.
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
    /// Sample planes. One interleaved plane when not planar.
    pub planes: Vec<Vec<u8>>,
}

/// Output of one [`Decoder::decode`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedUnit {
    /// A decoded picture.
    Video(DecodedPicture),
    /// A decoded audio block.
    Audio(DecodedAudio),
}

impl DecodedUnit {
    /// Identity carried through the decoder.
    pub fn identity(&self) -> Option<u32> {
        match self {
            DecodedUnit::Video(picture) => picture.identity,
            DecodedUnit::Audio(audio) => audio.identity,
        }
    }
}

/// A stateful decoder instance.
pub trait Decoder: Send {
    /// Feed one packet (or `None` to drain) and return at most one output
    /// unit. `identity` must come back unchanged on the unit decoded from
    /// this packet. Implementations buffer extra outputs internally.
    fn decode(
        &mut self,
        packet: Option<&Packet>,
        identity: u32,
    ) -> Result<Option<DecodedUnit>, FramedexError>;

    /// Drop all buffered state so decoding can restart at a random-access
    /// point.
    fn flush(&mut self);

    /// Number of packets the decoder is expected to hold back before it
    /// emits its first output. This is a lower bound.
    fn delay(&self) -> u32;
}

/// An opened container.
pub trait Demuxer: Send {
    /// Static container description.
    fn container(&self) -> &ContainerInfo;

    /// Read the next packet of any stream. `Ok(None)` at end of file.
    fn read_packet(&mut self) -> Result<Option<Packet>, FramedexError>;

    /// Best-effort reposition near `target` on `stream_index`.
    fn seek(
        &mut self,
        stream_index: usize,
        target: i64,
        basis: SeekBasis,
        flags: SeekFlags,
    ) -> Result<(), FramedexError>;

    /// Return to the start of the file.
    fn rewind(&mut self) -> Result<(), FramedexError>;

    /// The container's own seek table for a stream.
    fn seek_table(&self, stream_index: usize) -> Vec<SeekTableEntry>;

    /// Replace a stream's seek table with persisted entries.
    fn restore_seek_table(&mut self, stream_index: usize, entries: &[SeekTableEntry]);

    /// Open a decoder for `stream_index` configured by `configuration`.
    fn open_decoder(
        &mut self,
        stream_index: usize,
        configuration: &DecoderConfiguration,
        threads: u32,
    ) -> Result<Box<dyn Decoder>, FramedexError>;
}

/// Factory for [`Demuxer`]s.
pub trait MediaBackend: Send + Sync {
    /// Open the media file at `path`.
    fn open(&self, path: &Path) -> Result<Box<dyn Demuxer>, FramedexError>;
}

/// Demux/decode backend selection.
#[derive(Clone, Default)]
pub enum Backend {
    /// FFmpeg through `ffmpeg-next`.
    #[default]
    Ffmpeg,
    /// A caller-supplied implementation.
    Custom(Arc<dyn MediaBackend>),
}

impl Debug for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Backend::Ffmpeg => f.write_str("Ffmpeg"),
            Backend::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl Backend {
    /// Open `path` with the selected implementation.
    pub fn open(&self, path: &Path) -> Result<Box<dyn Demuxer>, FramedexError> {
        match self {
            Backend::Ffmpeg => FfmpegBackend.open(path),
            Backend::Custom(backend) => backend.open(path),
        }
    }
}
