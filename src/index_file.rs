//! Persisted index file format.
//!
//! The index is a line-oriented text file with binary configuration blobs
//! embedded after a length-prefixed header line:
//!
//! ```text
//! <FramedexIndexVersion=1>
//! <InputFilePath>/media/input.mkv</InputFilePath>
//! <InputFileStat=1048576,1700000000>
//! <FormatName>matroska,webm</FormatName>
//! <FormatFlags=0x0>
//! <ActiveVideoStreamIndex>+0000000000</ActiveVideoStreamIndex>
//! <ActiveAudioStreamIndex>+0000000001</ActiveAudioStreamIndex>
//! <StreamIndexEntries>
//! Index=0,Type=V,Codec=27,TimeBase=1/1000,POS=4120,PTS=0,DTS=none,EDI=0
//! Key=1,Pic=1,POC=0,Repeat=0,Field=0,Structure=0,Width=1920,Height=1080,Format=yuv420p,Flags=0x0
//! Index=1,Type=A,Codec=86018,TimeBase=1/1000,POS=9800,PTS=0,DTS=0,EDI=0
//! Channels=2:0x3,Rate=48000,Format=fltp,BPS=0,Length=1024
//! </StreamIndexEntries>
//! <StreamDuration=0,V>60000</StreamDuration>
//! <StreamIndexToSeekTable=0,Entries=1>
//! POS=4120,TS=0,Flags=1
//! </StreamIndexToSeekTable>
//! <ExtraDataList=0,Entries=1>
//! Size=42,Codec=27,Name=h264,Width=1920,Height=1080,Format=yuv420p,Channels=0,Layout=0x0,Rate=0,SampleFormat=none,Bits=0,Align=0
//! <42 raw bytes>
//! </ExtraDataList>
//! </FramedexIndex>
//! ```
//!
//! Parsing is all-or-nothing: any deviation is an
//! [`IndexParse`](crate::FramedexError::IndexParse) error and the caller
//! rebuilds. The only in-place mutation ever performed is
//! [`patch_active_streams`], which rewrites the two fixed-width active
//! stream fields.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs::{self, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::{
    backend::{MediaType, SeekTableEntry, byte_seekable},
    conversion::Rational,
    error::FramedexError,
    extradata::{ConfigurationTable, DecoderConfiguration},
    frame::{AudioFrameRecord, FieldOrder, FrameFlags, PictureStructure, PictureType, VideoFrameRecord},
    index::{MediaIndex, ObservedRecords, StreamIndex, Track},
};

/// Current schema version.
pub const INDEX_VERSION: u32 = 1;

const ACTIVE_VIDEO_TAG: &str = "<ActiveVideoStreamIndex>";
const ACTIVE_AUDIO_TAG: &str = "<ActiveAudioStreamIndex>";
const NONE: &str = "none";

/// Serialize an index to bytes.
///
/// Output depends only on the index contents, so serializing equal indexes
/// gives identical bytes.
///
/// # Errors
///
/// [`FramedexError::UnrecordablePath`] if the source path is not UTF-8 or
/// contains a line break.
pub fn serialize(index: &MediaIndex) -> Result<Vec<u8>, FramedexError> {
    let source_path = index
        .source_path
        .to_str()
        .filter(|path| !path.contains(['\n', '\r']))
        .ok_or_else(|| FramedexError::UnrecordablePath(index.source_path.clone()))?;
    let mut text = String::new();
    let _ = writeln!(text, "<FramedexIndexVersion={INDEX_VERSION}>");
    let _ = writeln!(text, "<InputFilePath>{source_path}</InputFilePath>");
    let _ = writeln!(text, "<InputFileStat={},{}>", index.source_size, index.source_modified);
    let _ = writeln!(text, "<FormatName>{}</FormatName>", index.format_name);
    let _ = writeln!(text, "<FormatFlags=0x{:x}>", index.format_flags);
    let _ = writeln!(
        text,
        "{ACTIVE_VIDEO_TAG}{}</ActiveVideoStreamIndex>",
        fixed_width(index.active_video_stream)
    );
    let _ = writeln!(
        text,
        "{ACTIVE_AUDIO_TAG}{}</ActiveAudioStreamIndex>",
        fixed_width(index.active_audio_stream)
    );

    text.push_str("<StreamIndexEntries>\n");
    let mut cursors: BTreeMap<usize, usize> = BTreeMap::new();
    for &stream_index in &index.packet_order {
        let Some(stream) = index.stream(stream_index) else {
            continue;
        };
        let cursor = cursors.entry(stream_index).or_insert(0);
        let sample = *cursor;
        *cursor += 1;
        write_record(&mut text, stream, sample);
    }
    text.push_str("</StreamIndexEntries>\n");

    let mut bytes = text.into_bytes();
    for stream in &index.streams {
        let mut text = String::new();
        let _ = writeln!(
            text,
            "<StreamDuration={},{}>{}</StreamDuration>",
            stream.stream_index,
            stream.media_type().code(),
            stream.duration
        );
        let _ = writeln!(
            text,
            "<StreamIndexToSeekTable={},Entries={}>",
            stream.stream_index,
            stream.seek_table.len()
        );
        for entry in &stream.seek_table {
            let _ = writeln!(
                text,
                "POS={},TS={},Flags={}",
                entry.position, entry.timestamp, entry.flags
            );
        }
        text.push_str("</StreamIndexToSeekTable>\n");
        let _ = writeln!(
            text,
            "<ExtraDataList={},Entries={}>",
            stream.stream_index,
            stream.configurations.len()
        );
        bytes.extend_from_slice(text.as_bytes());
        for configuration in stream.configurations.entries() {
            let header = format!(
                "Size={},Codec={},Name={},Width={},Height={},Format={},Channels={},Layout=0x{:x},Rate={},SampleFormat={},Bits={},Align={}\n",
                configuration.extradata.len(),
                configuration.codec_id,
                name_or_none(&configuration.codec_name),
                configuration.width,
                configuration.height,
                name_or_none(&configuration.pixel_format),
                configuration.channels,
                configuration.channel_layout,
                configuration.sample_rate,
                name_or_none(&configuration.sample_format),
                configuration.bits_per_sample,
                configuration.block_align,
            );
            bytes.extend_from_slice(header.as_bytes());
            bytes.extend_from_slice(&configuration.extradata);
            bytes.push(b'\n');
        }
        bytes.extend_from_slice(b"</ExtraDataList>\n");
    }
    bytes.extend_from_slice(b"</FramedexIndex>\n");
    Ok(bytes)
}

fn write_record(text: &mut String, stream: &StreamIndex, sample: usize) {
    let (pts, dts, position, epoch) = match &stream.track {
        Track::Video(track) => {
            let frame = &track.frames[sample];
            (frame.pts, frame.dts, frame.position, frame.epoch)
        }
        Track::Audio(track) => {
            let frame = &track.frames[sample];
            (frame.pts, frame.dts, frame.position, frame.epoch)
        }
    };
    let configuration = stream.configurations.get(epoch);
    let _ = writeln!(
        text,
        "Index={},Type={},Codec={},TimeBase={},POS={},PTS={},DTS={},EDI={}",
        stream.stream_index,
        stream.media_type().code(),
        configuration.map(|configuration| configuration.codec_id).unwrap_or(0),
        stream.time_base,
        optional(position),
        optional(pts),
        optional(dts),
        epoch
    );
    match &stream.track {
        Track::Video(track) => {
            let frame = &track.frames[sample];
            let _ = writeln!(
                text,
                "Key={},Pic={},POC={},Repeat={},Field={},Structure={},Width={},Height={},Format={},Flags=0x{:x}",
                frame.coded_key as u8,
                frame.picture_type.code(),
                optional(frame.poc),
                frame.repeat_pict,
                frame.field_order.code(),
                frame.structure.code(),
                frame.width,
                frame.height,
                name_or_none(&frame.pixel_format),
                frame.flags.intersection(FrameFlags::PERSISTED).bits()
            );
        }
        Track::Audio(track) => {
            let frame = &track.frames[sample];
            let default = DecoderConfiguration::default();
            let configuration = configuration.unwrap_or(&default);
            let _ = writeln!(
                text,
                "Channels={}:0x{:x},Rate={},Format={},BPS={},Length={}",
                configuration.channels,
                configuration.channel_layout,
                frame.sample_rate,
                name_or_none(&configuration.sample_format),
                configuration.bits_per_sample,
                frame.length
            );
        }
    }
}

/// Write `index` to `path`.
///
/// The file is written under a temporary name and renamed into place, so an
/// interrupted write never leaves a truncated index behind.
pub fn write_index_file(index: &MediaIndex, path: &Path) -> Result<(), FramedexError> {
    let temporary = partial_path(path);
    let bytes = serialize(index)?;
    fs::write(&temporary, bytes).inspect_err(|_| {
        let _ = fs::remove_file(&temporary);
    })?;
    fs::rename(&temporary, path).inspect_err(|_| {
        let _ = fs::remove_file(&temporary);
    })?;
    log::debug!("Wrote index to {}", path.display());
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Read and parse the index file at `path`.
pub fn read_index_file(path: &Path) -> Result<MediaIndex, FramedexError> {
    if !path.exists() {
        return Err(FramedexError::IndexNotFound(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    parse(&bytes)
}

/// Rewrite the two active-stream header fields in place.
pub fn patch_active_streams(
    path: &Path,
    video: Option<usize>,
    audio: Option<usize>,
) -> Result<(), FramedexError> {
    let bytes = fs::read(path)?;
    let video_offset = field_offset(&bytes, ACTIVE_VIDEO_TAG)?;
    let audio_offset = field_offset(&bytes, ACTIVE_AUDIO_TAG)?;
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(video_offset as u64))?;
    file.write_all(fixed_width(video).as_bytes())?;
    file.seek(SeekFrom::Start(audio_offset as u64))?;
    file.write_all(fixed_width(audio).as_bytes())?;
    file.flush()?;
    log::debug!(
        "Patched active streams in {} to video {:?}, audio {:?}",
        path.display(),
        video,
        audio
    );
    Ok(())
}

fn field_offset(bytes: &[u8], tag: &str) -> Result<usize, FramedexError> {
    let needle = tag.as_bytes();
    bytes
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| position + needle.len())
        .ok_or_else(|| FramedexError::parse(0, format!("missing {tag}")))
}

/// Sign and ten digits, `-0000000001` for none.
fn fixed_width(stream: Option<usize>) -> String {
    match stream {
        Some(index) => format!("+{index:010}"),
        None => "-0000000001".to_string(),
    }
}

fn optional<T: std::fmt::Display>(value: Option<T>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => NONE.to_string(),
    }
}

fn name_or_none(name: &str) -> &str {
    if name.is_empty() { NONE } else { name }
}

// ── Parsing ──

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
    line: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: 0,
            line: 0,
        }
    }

    fn next_line(&mut self) -> Result<&'a str, FramedexError> {
        self.line += 1;
        let rest = &self.bytes[self.offset..];
        let end = rest
            .iter()
            .position(|&byte| byte == b'\n')
            .ok_or_else(|| self.error("unexpected end of file"))?;
        self.offset += end + 1;
        std::str::from_utf8(&rest[..end]).map_err(|_| self.error("line is not valid UTF-8"))
    }

    fn next_blob(&mut self, size: usize) -> Result<&'a [u8], FramedexError> {
        self.line += 1;
        let rest = &self.bytes[self.offset..];
        if rest.len() < size + 1 || rest[size] != b'\n' {
            return Err(self.error("truncated configuration blob"));
        }
        self.offset += size + 1;
        Ok(&rest[..size])
    }

    fn error(&self, reason: impl Into<String>) -> FramedexError {
        FramedexError::parse(self.line, reason)
    }

    fn is_at_end(&self) -> bool {
        self.offset >= self.bytes.len()
    }
}

/// Split `line` into `key=value` pairs and check the keys, in order.
fn fields<'a>(reader: &Reader<'_>, line: &'a str, keys: &[&str]) -> Result<Vec<&'a str>, FramedexError> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() != keys.len() {
        return Err(reader.error(format!(
            "expected {} fields, found {}",
            keys.len(),
            parts.len()
        )));
    }
    parts
        .into_iter()
        .zip(keys)
        .map(|(part, key)| {
            part.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
                .ok_or_else(|| reader.error(format!("expected field {key}")))
        })
        .collect()
}

fn number<T: std::str::FromStr>(reader: &Reader<'_>, value: &str, what: &str) -> Result<T, FramedexError> {
    value
        .parse::<T>()
        .map_err(|_| reader.error(format!("invalid {what}: {value:?}")))
}

fn optional_number<T: std::str::FromStr>(
    reader: &Reader<'_>,
    value: &str,
    what: &str,
) -> Result<Option<T>, FramedexError> {
    if value == NONE {
        Ok(None)
    } else {
        number(reader, value, what).map(Some)
    }
}

fn hex<T: TryFrom<u64>>(reader: &Reader<'_>, value: &str, what: &str) -> Result<T, FramedexError> {
    value
        .strip_prefix("0x")
        .and_then(|digits| u64::from_str_radix(digits, 16).ok())
        .and_then(|parsed| T::try_from(parsed).ok())
        .ok_or_else(|| reader.error(format!("invalid {what}: {value:?}")))
}

fn name(value: &str) -> String {
    if value == NONE {
        String::new()
    } else {
        value.to_string()
    }
}

fn tagged<'a>(reader: &Reader<'_>, line: &'a str, open: &str, close: &str) -> Result<&'a str, FramedexError> {
    line.strip_prefix(open)
        .and_then(|rest| rest.strip_suffix(close))
        .ok_or_else(|| reader.error(format!("expected {open}...{close}")))
}

fn parse_fixed_width(reader: &Reader<'_>, value: &str) -> Result<Option<usize>, FramedexError> {
    if value.len() != 11 {
        return Err(reader.error("active stream field must be 11 characters"));
    }
    let parsed: i64 = number(reader, value, "active stream")?;
    match parsed {
        -1 => Ok(None),
        index if index >= 0 => Ok(Some(index as usize)),
        _ => Err(reader.error("negative active stream")),
    }
}

/// Records of one stream while parsing.
struct PendingStream {
    media_type: MediaType,
    time_base: Rational,
    video: Vec<VideoFrameRecord>,
    audio: Vec<AudioFrameRecord>,
    /// `(line, codec, channels, layout, format, bits)` per audio record, or
    /// `(line, codec)` per video record, checked against the epochs.
    checks: Vec<RecordCheck>,
    duration: Option<i64>,
    seek_table: Option<Vec<SeekTableEntry>>,
    configurations: Option<Vec<DecoderConfiguration>>,
}

struct RecordCheck {
    line: usize,
    epoch: u32,
    codec_id: u32,
    audio: Option<(u32, u64, String, u32)>,
}

/// Parse an index from bytes.
pub fn parse(bytes: &[u8]) -> Result<MediaIndex, FramedexError> {
    let mut reader = Reader::new(bytes);

    let line = reader.next_line()?;
    let version = tagged(&reader, line, "<FramedexIndexVersion=", ">")?;
    if version != INDEX_VERSION.to_string() {
        return Err(reader.error(format!(
            "unsupported index version {version}, expected {INDEX_VERSION}"
        )));
    }
    let line = reader.next_line()?;
    let source_path = PathBuf::from(tagged(&reader, line, "<InputFilePath>", "</InputFilePath>")?);
    let line = reader.next_line()?;
    let stat = tagged(&reader, line, "<InputFileStat=", ">")?;
    let (size, modified) = stat
        .split_once(',')
        .ok_or_else(|| reader.error("expected SIZE,MTIME"))?;
    let source_size: u64 = number(&reader, size, "file size")?;
    let source_modified: i64 = number(&reader, modified, "modification time")?;
    let line = reader.next_line()?;
    let format_name = tagged(&reader, line, "<FormatName>", "</FormatName>")?.to_string();
    let line = reader.next_line()?;
    let format_flags: u32 = hex(&reader, tagged(&reader, line, "<FormatFlags=", ">")?, "format flags")?;
    let line = reader.next_line()?;
    let active_video_stream = parse_fixed_width(
        &reader,
        tagged(&reader, line, ACTIVE_VIDEO_TAG, "</ActiveVideoStreamIndex>")?,
    )?;
    let line = reader.next_line()?;
    let active_audio_stream = parse_fixed_width(
        &reader,
        tagged(&reader, line, ACTIVE_AUDIO_TAG, "</ActiveAudioStreamIndex>")?,
    )?;

    if reader.next_line()? != "<StreamIndexEntries>" {
        return Err(reader.error("expected <StreamIndexEntries>"));
    }
    let mut pending: BTreeMap<usize, PendingStream> = BTreeMap::new();
    let mut packet_order = Vec::new();
    loop {
        let line = reader.next_line()?;
        if line == "</StreamIndexEntries>" {
            break;
        }
        parse_record(&mut reader, line, &mut pending, &mut packet_order)?;
    }

    loop {
        let line = reader.next_line()?;
        if line == "</FramedexIndex>" {
            break;
        }
        parse_section(&mut reader, line, &mut pending)?;
    }
    if !reader.is_at_end() {
        return Err(reader.error("trailing data after </FramedexIndex>"));
    }

    let byte_seekable = byte_seekable(format_flags);
    let mut streams = Vec::with_capacity(pending.len());
    for (stream_index, stream) in pending {
        let context = |reason: &str| FramedexError::parse(reader.line, format!("stream {stream_index}: {reason}"));
        let duration = stream.duration.ok_or_else(|| context("missing StreamDuration"))?;
        let seek_table = stream.seek_table.ok_or_else(|| context("missing seek table"))?;
        let configurations = stream
            .configurations
            .ok_or_else(|| context("missing ExtraDataList"))?;
        for check in &stream.checks {
            let configuration = configurations.get(check.epoch as usize).ok_or_else(|| {
                FramedexError::parse(check.line, format!("epoch {} out of range", check.epoch))
            })?;
            if configuration.codec_id != check.codec_id {
                return Err(FramedexError::parse(check.line, "codec does not match its epoch"));
            }
            if let Some((channels, layout, format, bits)) = &check.audio
                && (configuration.channels != *channels
                    || configuration.channel_layout != *layout
                    || configuration.sample_format != *format
                    || configuration.bits_per_sample != *bits)
            {
                return Err(FramedexError::parse(check.line, "audio layout does not match its epoch"));
            }
        }
        let records = match stream.media_type {
            MediaType::Video => ObservedRecords::Video(stream.video),
            _ => ObservedRecords::Audio(stream.audio),
        };
        streams.push(StreamIndex::derive(
            stream_index,
            stream.time_base,
            ConfigurationTable::from_entries(configurations),
            seek_table,
            records,
            byte_seekable,
            Some(duration),
        ));
    }

    let index = MediaIndex {
        source_path,
        source_size,
        source_modified,
        format_name,
        format_flags,
        active_video_stream,
        active_audio_stream,
        streams,
        packet_order,
    };
    for (active, media_type) in [
        (index.active_video_stream, MediaType::Video),
        (index.active_audio_stream, MediaType::Audio),
    ] {
        if let Some(stream_index) = active
            && index.stream(stream_index).map(StreamIndex::media_type) != Some(media_type)
        {
            return Err(FramedexError::parse(
                6,
                format!("active stream {stream_index} is not an indexed {media_type:?} stream"),
            ));
        }
    }
    Ok(index)
}

fn parse_record(
    reader: &mut Reader<'_>,
    line: &str,
    pending: &mut BTreeMap<usize, PendingStream>,
    packet_order: &mut Vec<usize>,
) -> Result<(), FramedexError> {
    let values = fields(
        reader,
        line,
        &["Index", "Type", "Codec", "TimeBase", "POS", "PTS", "DTS", "EDI"],
    )?;
    let stream_index: usize = number(reader, values[0], "stream index")?;
    let media_type = MediaType::from_code(values[1])
        .filter(|media_type| *media_type != MediaType::Other)
        .ok_or_else(|| reader.error(format!("invalid stream type {:?}", values[1])))?;
    let codec_id: u32 = number(reader, values[2], "codec")?;
    let time_base: Rational = values[3]
        .parse()
        .map_err(|error: String| reader.error(error))?;
    if !time_base.is_valid() {
        return Err(reader.error("time base must be positive"));
    }
    let position: Option<i64> = optional_number(reader, values[4], "position")?;
    let pts: Option<i64> = optional_number(reader, values[5], "PTS")?;
    let dts: Option<i64> = optional_number(reader, values[6], "DTS")?;
    let epoch: u32 = number(reader, values[7], "epoch")?;
    let record_line = reader.line;

    let stream = pending.entry(stream_index).or_insert_with(|| PendingStream {
        media_type,
        time_base,
        video: Vec::new(),
        audio: Vec::new(),
        checks: Vec::new(),
        duration: None,
        seek_table: None,
        configurations: None,
    });
    if stream.media_type != media_type {
        return Err(reader.error("stream changes type"));
    }
    if stream.time_base != time_base {
        return Err(reader.error("stream changes time base"));
    }

    let detail = reader.next_line()?;
    match media_type {
        MediaType::Video => {
            let values = fields(
                reader,
                detail,
                &[
                    "Key", "Pic", "POC", "Repeat", "Field", "Structure", "Width", "Height", "Format", "Flags",
                ],
            )?;
            let coded_key = match values[0] {
                "0" => false,
                "1" => true,
                other => return Err(reader.error(format!("invalid key flag {other:?}"))),
            };
            let picture_type = PictureType::from_code(number(reader, values[1], "picture type")?)
                .ok_or_else(|| reader.error("unknown picture type"))?;
            let poc: Option<i32> = optional_number(reader, values[2], "POC")?;
            let repeat_pict: u8 = number(reader, values[3], "repeat count")?;
            if !matches!(repeat_pict, 0 | 1 | 2 | 4) {
                return Err(reader.error(format!("invalid repeat count {repeat_pict}")));
            }
            let field_order = FieldOrder::from_code(number(reader, values[4], "field order")?)
                .ok_or_else(|| reader.error("unknown field order"))?;
            let structure = PictureStructure::from_code(number(reader, values[5], "picture structure")?)
                .ok_or_else(|| reader.error("unknown picture structure"))?;
            let width: u32 = number(reader, values[6], "width")?;
            let height: u32 = number(reader, values[7], "height")?;
            let bits: u32 = hex(reader, values[9], "flags")?;
            if bits & !FrameFlags::PERSISTED.bits() != 0 {
                return Err(reader.error(format!("unexpected flags 0x{bits:x}")));
            }
            let sample_number = stream.video.len() as u32;
            stream.video.push(VideoFrameRecord {
                pts,
                dts,
                position,
                sample_number,
                epoch,
                coded_key,
                flags: FrameFlags::from_bits_truncate(bits),
                picture_type,
                poc,
                repeat_pict,
                field_order,
                structure,
                width,
                height,
                pixel_format: name(values[8]),
            });
            stream.checks.push(RecordCheck {
                line: record_line,
                epoch,
                codec_id,
                audio: None,
            });
        }
        _ => {
            let values = fields(reader, detail, &["Channels", "Rate", "Format", "BPS", "Length"])?;
            let (channels, layout) = values[0]
                .split_once(':')
                .ok_or_else(|| reader.error("expected Channels=C:0xLAYOUT"))?;
            let channels: u32 = number(reader, channels, "channel count")?;
            let layout: u64 = hex(reader, layout, "channel layout")?;
            let sample_rate: u32 = number(reader, values[1], "sample rate")?;
            let bits: u32 = number(reader, values[3], "bits per sample")?;
            let length: i32 = number(reader, values[4], "length")?;
            if length < -1 {
                return Err(reader.error(format!("invalid length {length}")));
            }
            let sample_number = stream.audio.len() as u32;
            stream.audio.push(AudioFrameRecord {
                pts,
                dts,
                position,
                sample_number,
                epoch,
                sample_rate,
                length,
            });
            stream.checks.push(RecordCheck {
                line: record_line,
                epoch,
                codec_id,
                audio: Some((channels, layout, name(values[2]), bits)),
            });
        }
    }
    packet_order.push(stream_index);
    Ok(())
}

fn parse_section(
    reader: &mut Reader<'_>,
    line: &str,
    pending: &mut BTreeMap<usize, PendingStream>,
) -> Result<(), FramedexError> {
    if let Some(rest) = line.strip_prefix("<StreamDuration=") {
        let (header, value) = rest
            .strip_suffix("</StreamDuration>")
            .and_then(|rest| rest.split_once('>'))
            .ok_or_else(|| reader.error("malformed StreamDuration"))?;
        let (stream_index, media_type) = header
            .split_once(',')
            .ok_or_else(|| reader.error("expected StreamDuration=I,T"))?;
        let stream = known_stream(reader, pending, stream_index)?;
        if MediaType::from_code(media_type) != Some(stream.media_type) {
            return Err(reader.error("StreamDuration type does not match the stream"));
        }
        if stream.duration.is_some() {
            return Err(reader.error("duplicate StreamDuration"));
        }
        stream.duration = Some(number(reader, value, "duration")?);
        return Ok(());
    }

    if let Some(rest) = line.strip_prefix("<StreamIndexToSeekTable=") {
        let (stream_index, count) = section_header(reader, rest)?;
        let mut entries = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let line = reader.next_line()?;
            let values = fields(reader, line, &["POS", "TS", "Flags"])?;
            entries.push(SeekTableEntry {
                position: number(reader, values[0], "seek position")?,
                timestamp: number(reader, values[1], "seek timestamp")?,
                flags: number(reader, values[2], "seek flags")?,
            });
        }
        if reader.next_line()? != "</StreamIndexToSeekTable>" {
            return Err(reader.error("seek table entry count does not match"));
        }
        let stream = known_stream(reader, pending, &stream_index.to_string())?;
        if stream.seek_table.replace(entries).is_some() {
            return Err(reader.error("duplicate seek table"));
        }
        return Ok(());
    }

    if let Some(rest) = line.strip_prefix("<ExtraDataList=") {
        let (stream_index, count) = section_header(reader, rest)?;
        if count == 0 {
            return Err(reader.error("a stream needs at least one configuration"));
        }
        let mut configurations = Vec::with_capacity(count.min(1 << 10));
        for _ in 0..count {
            let line = reader.next_line()?;
            let values = fields(
                reader,
                line,
                &[
                    "Size",
                    "Codec",
                    "Name",
                    "Width",
                    "Height",
                    "Format",
                    "Channels",
                    "Layout",
                    "Rate",
                    "SampleFormat",
                    "Bits",
                    "Align",
                ],
            )?;
            let size: usize = number(reader, values[0], "blob size")?;
            let mut configuration = DecoderConfiguration {
                codec_id: number(reader, values[1], "codec")?,
                codec_name: name(values[2]),
                extradata: Vec::new(),
                width: number(reader, values[3], "width")?,
                height: number(reader, values[4], "height")?,
                pixel_format: name(values[5]),
                channels: number(reader, values[6], "channels")?,
                channel_layout: hex(reader, values[7], "channel layout")?,
                sample_rate: number(reader, values[8], "sample rate")?,
                sample_format: name(values[9]),
                bits_per_sample: number(reader, values[10], "bits")?,
                block_align: number(reader, values[11], "block alignment")?,
            };
            configuration.extradata = reader.next_blob(size)?.to_vec();
            if configurations
                .iter()
                .any(|existing: &DecoderConfiguration| existing.same_decoder_setup(&configuration))
            {
                return Err(reader.error("duplicate configuration epoch"));
            }
            configurations.push(configuration);
        }
        if reader.next_line()? != "</ExtraDataList>" {
            return Err(reader.error("configuration entry count does not match"));
        }
        let stream = known_stream(reader, pending, &stream_index.to_string())?;
        if stream.configurations.replace(configurations).is_some() {
            return Err(reader.error("duplicate ExtraDataList"));
        }
        return Ok(());
    }

    Err(reader.error(format!("unexpected line {line:?}")))
}

/// Parse `I,Entries=N>`, rejecting negative counts.
fn section_header(reader: &Reader<'_>, rest: &str) -> Result<(usize, usize), FramedexError> {
    let body = rest
        .strip_suffix('>')
        .ok_or_else(|| reader.error("malformed section header"))?;
    let (stream_index, count) = body
        .split_once(",Entries=")
        .ok_or_else(|| reader.error("expected I,Entries=N"))?;
    let stream_index: usize = number(reader, stream_index, "stream index")?;
    let count: i64 = number(reader, count, "entry count")?;
    if count < 0 {
        return Err(reader.error(format!("negative entry count {count}")));
    }
    Ok((stream_index, count as usize))
}

fn known_stream<'a>(
    reader: &Reader<'_>,
    pending: &'a mut BTreeMap<usize, PendingStream>,
    stream_index: &str,
) -> Result<&'a mut PendingStream, FramedexError> {
    let stream_index: usize = number(reader, stream_index, "stream index")?;
    pending
        .get_mut(&stream_index)
        .ok_or_else(|| reader.error(format!("section for unindexed stream {stream_index}")))
}
