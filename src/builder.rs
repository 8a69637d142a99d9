//! Index building and loading.
//!
//! [`build_index`] makes a single forward pass over every packet of a
//! container. Each video and audio stream gets a [`StreamScan`] that assigns
//! configuration epochs, runs the lightweight bitstream parsers, and falls
//! back to a throwaway helper decoder when the parsers cannot tell what a
//! packet holds. Once the scan is done, each stream's records go through
//! the shared derivation step and the result is written to disk.
//!
//! [`load_index`] reads a persisted index back and checks that it still
//! describes the source and the request.

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    time::UNIX_EPOCH,
};

use crate::{
    backend::{DecodedAudio, DecodedPicture, DecodedUnit, Decoder, Demuxer, MediaType, Packet, StreamInfo},
    configuration::IndexOptions,
    conversion::ticks_to_duration,
    error::FramedexError,
    extradata::ConfigurationTable,
    frame::{AudioFrameRecord, FieldOrder, FrameFlags, PictureType, VideoFrameRecord},
    heuristics::{AudioFrameParser, CodecFamily, VideoParser},
    index::{MediaIndex, ObservedRecords, StreamIndex},
    index_file::{patch_active_streams, read_index_file, write_index_file},
    progress::{OperationType, ProgressTracker},
};

/// Size and modification time (seconds since the Unix epoch) of `path`.
pub(crate) fn source_stat(path: &Path) -> Result<(u64, i64), FramedexError> {
    let metadata = fs::metadata(path)?;
    let modified = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0);
    Ok((metadata.len(), modified))
}

enum ScanParser {
    Video(VideoParser),
    Audio(AudioFrameParser),
}

/// Per-stream state of a scan.
struct StreamScan {
    info: StreamInfo,
    family: CodecFamily,
    configurations: ConfigurationTable,
    epoch: u32,
    parser: ScanParser,
    video: Vec<VideoFrameRecord>,
    audio: Vec<AudioFrameRecord>,
    helper: Option<Box<dyn Decoder>>,
    /// Set once the parsers fall short; from then on every packet is fed
    /// to the helper so its reference pictures stay intact.
    decoding: bool,
    /// First sample the helper was fed.
    decoded_from: Option<u32>,
    /// Packets since the last random-access point, replayed into the helper
    /// when decoding starts.
    pending: Vec<(Packet, u32)>,
    /// Helper output rank of every video sample.
    output_ranks: Vec<Option<u32>>,
    next_output_rank: u32,
    known_samples: u64,
    exhausted: bool,
    disabled: Option<String>,
}

impl StreamScan {
    fn new(info: &StreamInfo) -> Self {
        let family = CodecFamily::from_codec_name(&info.configuration.codec_name);
        let mut configurations = ConfigurationTable::new();
        let epoch = configurations.intern(info.configuration.clone());
        let parser = match info.media_type {
            MediaType::Audio => ScanParser::Audio(AudioFrameParser::new(family, &info.configuration)),
            _ => ScanParser::Video(VideoParser::new(family, &info.configuration.extradata)),
        };
        Self {
            info: info.clone(),
            family,
            configurations,
            epoch,
            parser,
            video: Vec::new(),
            audio: Vec::new(),
            helper: None,
            decoding: false,
            decoded_from: None,
            pending: Vec::new(),
            output_ranks: Vec::new(),
            next_output_rank: 0,
            known_samples: 0,
            exhausted: false,
            disabled: None,
        }
    }

    fn record_count(&self) -> usize {
        match self.info.media_type {
            MediaType::Audio => self.audio.len(),
            _ => self.video.len(),
        }
    }

    /// Switch epochs when a packet carries new out-of-band configuration.
    fn observe_configuration(&mut self, packet: &Packet) {
        let Some(extradata) = &packet.new_extradata else {
            return;
        };
        let Some(current) = self.configurations.get(self.epoch) else {
            return;
        };
        let mut configuration = current.clone();
        configuration.extradata = extradata.clone();
        let epoch = self.configurations.intern(configuration);
        if epoch == self.epoch {
            return;
        }
        log::debug!(
            "Stream {}: configuration epoch {} -> {epoch} at sample {}",
            self.info.index,
            self.epoch,
            self.record_count()
        );
        self.drain_helper();
        self.helper = None;
        self.pending.clear();
        self.epoch = epoch;
        match &mut self.parser {
            ScanParser::Video(parser) => parser.configure(extradata),
            ScanParser::Audio(parser) => {
                if let Some(configuration) = self.configurations.get(epoch) {
                    *parser = AudioFrameParser::new(self.family, configuration);
                }
            }
        }
    }

    /// Open the helper for the current epoch unless it is open already.
    /// Failure disables the stream.
    fn ensure_helper(&mut self, demuxer: &mut dyn Demuxer, threads: u32) -> bool {
        if self.helper.is_some() {
            return true;
        }
        let Some(configuration) = self.configurations.get(self.epoch) else {
            return false;
        };
        match demuxer.open_decoder(self.info.index, configuration, threads) {
            Ok(decoder) => {
                self.helper = Some(decoder);
                true
            }
            Err(error) => {
                log::warn!("Stream {} disabled: {error}", self.info.index);
                self.disabled = Some(error.to_string());
                self.video.clear();
                self.audio.clear();
                self.pending.clear();
                false
            }
        }
    }

    /// Whether the parsers may ever fall short on this stream.
    fn may_need_decode(&self) -> bool {
        match self.info.media_type {
            MediaType::Audio => true,
            _ => self.family.reorders(),
        }
    }

    fn scan_packet(&mut self, packet: &Packet, demuxer: &mut dyn Demuxer, threads: u32) {
        if self.exhausted {
            return;
        }
        let sample_number = self.record_count() as u32;
        let (needs_decode, random_access) = match &mut self.parser {
            ScanParser::Video(parser) => {
                let info = parser.parse(&packet.data);
                let (width, height, pixel_format) = self
                    .configurations
                    .get(self.epoch)
                    .map(|configuration| {
                        (
                            configuration.width,
                            configuration.height,
                            configuration.pixel_format.clone(),
                        )
                    })
                    .unwrap_or_default();
                let mut flags = FrameFlags::NONE;
                if info.invisible {
                    flags.insert(FrameFlags::INVISIBLE);
                }
                self.video.push(VideoFrameRecord {
                    pts: packet.pts,
                    dts: packet.dts,
                    position: packet.position,
                    sample_number,
                    epoch: self.epoch,
                    coded_key: info.key.unwrap_or(packet.is_key),
                    flags,
                    picture_type: info.picture_type,
                    poc: info.poc,
                    repeat_pict: info.repeat_pict.unwrap_or(0),
                    field_order: info.field_order,
                    structure: info.structure,
                    width,
                    height,
                    pixel_format,
                });
                (info.needs_decode(self.family), info.key.unwrap_or(packet.is_key))
            }
            ScanParser::Audio(parser) => {
                let length = parser.frame_length(&packet.data);
                if let Some(length) = length {
                    if self.known_samples + length as u64 > u32::MAX as u64 {
                        log::warn!(
                            "Stream {}: sample count exceeds {}, indexing stops at packet {sample_number}",
                            self.info.index,
                            u32::MAX
                        );
                        self.exhausted = true;
                        return;
                    }
                    self.known_samples += length as u64;
                }
                let sample_rate = self
                    .configurations
                    .get(self.epoch)
                    .map(|configuration| configuration.sample_rate)
                    .unwrap_or(0);
                self.audio.push(AudioFrameRecord {
                    pts: packet.pts,
                    dts: packet.dts,
                    position: packet.position,
                    sample_number,
                    epoch: self.epoch,
                    sample_rate,
                    length: length.map(|length| length as i32).unwrap_or(-1),
                });
                (length.is_none(), packet.is_key)
            }
        };
        if self.decoding {
            self.feed_helper(packet, sample_number, demuxer, threads);
            return;
        }
        if !self.may_need_decode() {
            return;
        }
        if random_access {
            self.pending.clear();
        }
        self.pending.push((packet.clone(), sample_number));
        if needs_decode {
            self.start_decoding(demuxer, threads);
        }
    }

    /// Switch the helper on, replaying the packets since the last
    /// random-access point so it starts with intact references.
    fn start_decoding(&mut self, demuxer: &mut dyn Demuxer, threads: u32) {
        self.decoding = true;
        let pending = std::mem::take(&mut self.pending);
        self.decoded_from = pending.first().map(|(_, sample_number)| *sample_number);
        log::debug!(
            "Stream {}: parsers fell short, helper decoding from sample {:?}",
            self.info.index,
            self.decoded_from
        );
        for (packet, sample_number) in pending {
            self.feed_helper(&packet, sample_number, demuxer, threads);
        }
    }

    fn feed_helper(&mut self, packet: &Packet, sample_number: u32, demuxer: &mut dyn Demuxer, threads: u32) {
        if self.disabled.is_some() || !self.ensure_helper(demuxer, threads) {
            return;
        }
        let Some(helper) = self.helper.as_mut() else {
            return;
        };
        match helper.decode(Some(packet), sample_number) {
            Ok(Some(unit)) => self.absorb(unit),
            Ok(None) => {}
            Err(error) => {
                log::debug!(
                    "Stream {}: helper decode of sample {sample_number} failed: {error}",
                    self.info.index
                );
                if let Some(record) = self.video.get_mut(sample_number as usize) {
                    record.flags.insert(FrameFlags::CORRUPT);
                }
            }
        }
    }

    fn drain_helper(&mut self) {
        if !self.decoding {
            return;
        }
        while let Some(helper) = self.helper.as_mut() {
            match helper.decode(None, 0) {
                Ok(Some(unit)) => self.absorb(unit),
                Ok(None) | Err(_) => break,
            }
        }
    }

    fn absorb(&mut self, unit: DecodedUnit) {
        match unit {
            DecodedUnit::Video(picture) => self.absorb_picture(picture),
            DecodedUnit::Audio(audio) => self.absorb_audio(audio),
        }
    }

    /// Fill in what the parser left unknown from a helper output.
    ///
    /// Outputs arrive in presentation order; their rank is kept for
    /// [`assign_output_order`](Self::assign_output_order).
    fn absorb_picture(&mut self, picture: DecodedPicture) {
        let rank = self.next_output_rank;
        self.next_output_rank += 1;
        let Some(identity) = picture.identity.map(|identity| identity as usize) else {
            return;
        };
        let Some(record) = self.video.get_mut(identity) else {
            return;
        };
        if self.output_ranks.len() <= identity {
            self.output_ranks.resize(identity + 1, None);
        }
        self.output_ranks[identity] = Some(rank);
        if record.picture_type == PictureType::Unknown {
            record.picture_type = picture.picture_type;
        }
        if picture.interlaced && record.field_order == FieldOrder::Unknown {
            record.field_order = if picture.top_field_first {
                FieldOrder::TopFirst
            } else {
                FieldOrder::BottomFirst
            };
        }
        if record.repeat_pict == 0 && matches!(picture.repeat_pict, 1 | 2 | 4) {
            record.repeat_pict = picture.repeat_pict;
        }
        record.width = picture.width;
        record.height = picture.height;
        record.pixel_format = picture.pixel_format.clone();
        self.configurations
            .observe_picture(record.epoch, picture.width, picture.height, &picture.pixel_format);
    }

    fn absorb_audio(&mut self, audio: DecodedAudio) {
        let Some(record) = audio
            .identity
            .and_then(|identity| self.audio.get_mut(identity as usize))
        else {
            return;
        };
        if record.length < 0 {
            if self.known_samples + audio.sample_count as u64 > u32::MAX as u64 {
                return;
            }
            self.known_samples += audio.sample_count as u64;
            record.length = audio.sample_count as i32;
        }
        if audio.sample_rate > 0 {
            record.sample_rate = audio.sample_rate;
        }
    }

    /// Replace the picture order counts of every sample the helper saw with
    /// counts taken from its output order.
    ///
    /// Each coded keyframe and each new epoch restarts the count at zero,
    /// so pictures output before their keyframe count negative and the
    /// parser's counts for earlier samples stay in their own domains.
    fn assign_output_order(&mut self) {
        let Some(start) = self.decoded_from else {
            return;
        };
        if !self.family.reorders() {
            return;
        }
        let mut anchor: Option<i64> = None;
        let mut epoch = None;
        for record in self.video.iter_mut().skip(start as usize) {
            let rank = self
                .output_ranks
                .get(record.sample_number as usize)
                .copied()
                .flatten()
                .map(i64::from);
            if record.coded_key || epoch != Some(record.epoch) {
                anchor = rank;
            }
            epoch = Some(record.epoch);
            record.poc = match (rank, anchor) {
                (Some(rank), Some(anchor)) => i32::try_from(2 * (rank - anchor)).ok(),
                _ => None,
            };
        }
    }

    fn into_stream_index(mut self, demuxer: &dyn Demuxer, byte_seekable: bool) -> Option<StreamIndex> {
        if self.disabled.is_some() || self.record_count() == 0 {
            return None;
        }
        self.assign_output_order();
        let records = match self.info.media_type {
            MediaType::Audio => ObservedRecords::Audio(std::mem::take(&mut self.audio)),
            _ => ObservedRecords::Video(std::mem::take(&mut self.video)),
        };
        Some(StreamIndex::derive(
            self.info.index,
            self.info.time_base,
            self.configurations,
            demuxer.seek_table(self.info.index),
            records,
            byte_seekable,
            self.info.duration,
        ))
    }
}

/// Scan `demuxer` from its current position and build an index of every
/// video and audio stream.
///
/// The index is written to [`IndexOptions::index_path_for`] unless index
/// writing is disabled. Cancellation stops the scan with
/// [`FramedexError::Cancelled`] and leaves nothing on disk.
pub(crate) fn build_index(
    path: &Path,
    demuxer: &mut dyn Demuxer,
    options: &IndexOptions,
) -> Result<MediaIndex, FramedexError> {
    let (source_size, source_modified) = source_stat(path)?;
    let container = demuxer.container().clone();
    let byte_seekable = container.is_byte_seekable();
    log::info!(
        "Indexing {} ({}, {} streams)",
        path.display(),
        container.format_name,
        container.streams.len()
    );

    let mut scans: BTreeMap<usize, StreamScan> = container
        .streams
        .iter()
        .filter(|stream| stream.media_type != MediaType::Other)
        .map(|stream| (stream.index, StreamScan::new(stream)))
        .collect();
    let mut packet_order = Vec::new();
    let mut tracker = ProgressTracker::new(
        options.progress.clone(),
        OperationType::Indexing,
        None,
        options.batch_size,
    );

    loop {
        if options.is_cancelled() {
            log::info!("Indexing of {} cancelled", path.display());
            return Err(FramedexError::Cancelled);
        }
        let Some(packet) = demuxer.read_packet()? else {
            break;
        };
        let timestamp = scans
            .get(&packet.stream_index)
            .and_then(|scan| packet.pts.map(|pts| ticks_to_duration(pts, scan.info.time_base)));
        tracker.advance(packet.position.map(|position| position as u64), timestamp);

        let Some(scan) = scans.get_mut(&packet.stream_index) else {
            continue;
        };
        if scan.disabled.is_some() {
            continue;
        }
        scan.observe_configuration(&packet);
        let before = scan.record_count();
        scan.scan_packet(&packet, demuxer, options.decoder_threads);
        if scan.record_count() > before {
            packet_order.push(packet.stream_index);
        }
    }
    tracker.finish();

    for scan in scans.values_mut() {
        scan.drain_helper();
        scan.helper = None;
    }

    let mut streams = Vec::new();
    for (_, scan) in scans {
        let stream_index = scan.info.index;
        if let Some(reason) = &scan.disabled {
            log::warn!("Stream {stream_index} left out of the index: {reason}");
        }
        if let Some(stream) = scan.into_stream_index(demuxer, byte_seekable) {
            streams.push(stream);
        }
    }
    packet_order.retain(|stream_index| streams.iter().any(|stream| stream.stream_index == *stream_index));

    let mut index = MediaIndex {
        source_path: path.to_path_buf(),
        source_size,
        source_modified,
        format_name: container.format_name,
        format_flags: container.flags,
        active_video_stream: None,
        active_audio_stream: None,
        streams,
        packet_order,
    };
    let (video, audio) = select_active_streams(&index, options)?;
    index.active_video_stream = video;
    index.active_audio_stream = audio;

    log::info!(
        "Indexed {} records in {} streams (video {:?}, audio {:?})",
        index.packet_order.len(),
        index.streams.len(),
        video,
        audio
    );

    if options.write_index {
        let index_path = options.index_path_for(path);
        if let Err(error) = write_index_file(&index, &index_path) {
            log::warn!("Could not write index to {}: {error}", index_path.display());
        }
    }
    Ok(index)
}

/// Read the persisted index for `path` and check it against the source and
/// the request.
///
/// Active streams that differ from the recorded ones are patched into the
/// file in place.
pub(crate) fn load_index(path: &Path, options: &IndexOptions) -> Result<MediaIndex, FramedexError> {
    let index_path = options.index_path_for(path);
    let mut tracker = ProgressTracker::new(
        options.progress.clone(),
        OperationType::IndexLoading,
        Some(1),
        1,
    );
    let mut index = read_index_file(&index_path)?;

    if index.source_path != path {
        return Err(FramedexError::StaleIndex(format!(
            "index was built for {}",
            index.source_path.display()
        )));
    }
    if let Err(error) = fs::File::open(path) {
        return Err(FramedexError::StaleIndex(format!(
            "{} cannot be opened: {error}",
            path.display()
        )));
    }
    let (size, modified) = source_stat(path)?;
    if size != index.source_size || modified != index.source_modified {
        return Err(FramedexError::StaleIndex(format!(
            "{} changed since it was indexed",
            path.display()
        )));
    }
    let (video, audio) = select_active_streams(&index, options)
        .map_err(|error| FramedexError::StaleIndex(error.to_string()))?;
    if (video, audio) != (index.active_video_stream, index.active_audio_stream) {
        log::debug!(
            "Active streams changed from ({:?}, {:?}) to ({video:?}, {audio:?})",
            index.active_video_stream,
            index.active_audio_stream
        );
        if let Err(error) = patch_active_streams(&index_path, video, audio) {
            log::warn!("Could not update active streams in {}: {error}", index_path.display());
        }
        index.active_video_stream = video;
        index.active_audio_stream = audio;
    }
    tracker.advance(None, None);
    log::info!(
        "Loaded index {} ({} streams)",
        index_path.display(),
        index.streams.len()
    );
    Ok(index)
}

/// Forced streams when given, otherwise the default stream of each type.
fn select_active_streams(
    index: &MediaIndex,
    options: &IndexOptions,
) -> Result<(Option<usize>, Option<usize>), FramedexError> {
    let video = match options.video_stream {
        Some(stream_index) => {
            if index.stream(stream_index).map(StreamIndex::media_type) != Some(MediaType::Video) {
                return Err(FramedexError::VideoTrackOutOfRange {
                    track_index: stream_index,
                    track_count: index.streams_of(MediaType::Video).count(),
                });
            }
            Some(stream_index)
        }
        None => index.default_stream(MediaType::Video),
    };
    let audio = match options.audio_stream {
        Some(stream_index) => {
            if index.stream(stream_index).map(StreamIndex::media_type) != Some(MediaType::Audio) {
                return Err(FramedexError::AudioTrackOutOfRange {
                    track_index: stream_index,
                    track_count: index.streams_of(MediaType::Audio).count(),
                });
            }
            Some(stream_index)
        }
        None => index.default_stream(MediaType::Audio),
    };
    Ok((video, audio))
}
