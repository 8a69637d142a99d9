//! Per-codec-family packet inspection.
//!
//! Extracts picture type, field structure, picture order count and
//! visibility from a compressed video packet, and the decoded sample count
//! from a compressed audio packet, without running a decoder. Anything a
//! parser cannot determine is left unknown; the index builder then falls
//! back to observing a real decode.

use std::collections::HashMap;

use crate::{
    bitstream::{BitReader, NalFraming, remove_emulation_prevention_bytes, skip_scaling_list, split_nal_units, split_start_code_units},
    extradata::DecoderConfiguration,
    frame::{FieldOrder, PictureStructure, PictureType},
};

/// Codec family, as far as indexing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecFamily {
    /// H.264 / AVC.
    H264,
    /// H.265 / HEVC.
    Hevc,
    /// MPEG-1 and MPEG-2 video.
    Mpeg12,
    /// MPEG-4 Part 2 (DivX, Xvid).
    Mpeg4Part2,
    /// VC-1 / WMV3.
    Vc1,
    /// VP8.
    Vp8,
    /// VP9.
    Vp9,
    /// AAC.
    Aac,
    /// MPEG audio layers I to III.
    MpegAudio,
    /// AC-3.
    Ac3,
    /// E-AC-3.
    Eac3,
    /// FLAC.
    Flac,
    /// Opus.
    Opus,
    /// Uncompressed PCM.
    Pcm,
    /// Anything else.
    Other,
}

/// How presentation timestamps are generated when the container's cannot
/// be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtsStrategy {
    /// Anchor pictures are delayed behind the B pictures that follow them in
    /// decoding order.
    PictureTypePattern,
    /// Presentation order follows picture order count.
    PictureOrderCount,
}

impl CodecFamily {
    /// Classify a codec by its short name.
    pub fn from_codec_name(name: &str) -> Self {
        match name {
            "h264" | "avc" | "avc1" => CodecFamily::H264,
            "hevc" | "h265" | "hvc1" | "hev1" => CodecFamily::Hevc,
            "mpeg1video" | "mpeg2video" | "mpegvideo" => CodecFamily::Mpeg12,
            "mpeg4" => CodecFamily::Mpeg4Part2,
            "vc1" | "wmv3" => CodecFamily::Vc1,
            "vp8" => CodecFamily::Vp8,
            "vp9" => CodecFamily::Vp9,
            "aac" | "aac_latm" => CodecFamily::Aac,
            "mp1" | "mp2" | "mp3" | "mp1float" | "mp2float" | "mp3float" => CodecFamily::MpegAudio,
            "ac3" => CodecFamily::Ac3,
            "eac3" => CodecFamily::Eac3,
            "flac" => CodecFamily::Flac,
            "opus" => CodecFamily::Opus,
            name if name.starts_with("pcm_") => CodecFamily::Pcm,
            _ => CodecFamily::Other,
        }
    }

    /// Whether pictures may be presented in a different order than decoded.
    pub fn reorders(&self) -> bool {
        matches!(
            self,
            CodecFamily::H264
                | CodecFamily::Hevc
                | CodecFamily::Mpeg12
                | CodecFamily::Mpeg4Part2
                | CodecFamily::Vc1
        )
    }

    /// Presentation timestamp generation strategy for this family.
    pub fn pts_strategy(&self) -> Option<PtsStrategy> {
        match self {
            CodecFamily::Mpeg12 | CodecFamily::Mpeg4Part2 | CodecFamily::Vc1 => {
                Some(PtsStrategy::PictureTypePattern)
            }
            CodecFamily::H264 | CodecFamily::Hevc => Some(PtsStrategy::PictureOrderCount),
            _ => None,
        }
    }
}

/// What a video packet reveals about its picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PictureInfo {
    /// Coded picture type.
    pub picture_type: PictureType,
    /// Random-access hint from the bitstream. `None` defers to the
    /// container flag.
    pub key: Option<bool>,
    /// Picture order count.
    pub poc: Option<i32>,
    /// Frame or single field.
    pub structure: PictureStructure,
    /// Field polarity.
    pub field_order: FieldOrder,
    /// Extra fields (ffmpeg `repeat_pict`).
    pub repeat_pict: Option<u8>,
    /// Decoded but never shown.
    pub invisible: bool,
}

impl PictureInfo {
    /// Whether a real decode is needed to fill in what a family needs.
    pub fn needs_decode(&self, family: CodecFamily) -> bool {
        if !family.reorders() {
            return false;
        }
        if self.picture_type == PictureType::Unknown {
            return true;
        }
        family.pts_strategy() == Some(PtsStrategy::PictureOrderCount) && self.poc.is_none()
    }
}

/// Per-family parser state.
enum ParserKind {
    H264(H264Parser),
    Hevc(HevcParser),
    Mpeg12(Mpeg12Parser),
    Mpeg4Part2(Mpeg4Parser),
    Vp8,
    Vp9,
    Opaque,
}

/// Stateful video packet parser for one stream.
///
/// Parameter sets seen in the configuration or in-band are remembered, so
/// packets must be parsed in decoding order.
pub struct VideoParser {
    kind: ParserKind,
}

impl VideoParser {
    /// A parser for `family`, primed with the stream's out-of-band
    /// configuration.
    pub fn new(family: CodecFamily, extradata: &[u8]) -> Self {
        let kind = match family {
            CodecFamily::H264 => ParserKind::H264(H264Parser::default()),
            CodecFamily::Hevc => ParserKind::Hevc(HevcParser::default()),
            CodecFamily::Mpeg12 => ParserKind::Mpeg12(Mpeg12Parser::default()),
            CodecFamily::Mpeg4Part2 => ParserKind::Mpeg4Part2(Mpeg4Parser::default()),
            CodecFamily::Vp8 => ParserKind::Vp8,
            CodecFamily::Vp9 => ParserKind::Vp9,
            _ => ParserKind::Opaque,
        };
        let mut parser = Self { kind };
        parser.configure(extradata);
        parser
    }

    /// Absorb out-of-band configuration (a new epoch).
    pub fn configure(&mut self, extradata: &[u8]) {
        match &mut self.kind {
            ParserKind::H264(parser) => parser.configure(extradata),
            ParserKind::Hevc(parser) => parser.configure(extradata),
            ParserKind::Mpeg12(parser) => {
                parser.parse(extradata);
            }
            ParserKind::Mpeg4Part2(parser) => {
                parser.parse(extradata);
            }
            ParserKind::Vp8 | ParserKind::Vp9 | ParserKind::Opaque => {}
        }
    }

    /// Inspect one compressed packet.
    pub fn parse(&mut self, data: &[u8]) -> PictureInfo {
        match &mut self.kind {
            ParserKind::H264(parser) => parser.parse(data),
            ParserKind::Hevc(parser) => parser.parse(data),
            ParserKind::Mpeg12(parser) => parser.parse(data),
            ParserKind::Mpeg4Part2(parser) => parser.parse(data),
            ParserKind::Vp8 => parse_vp8(data),
            ParserKind::Vp9 => parse_vp9(data),
            ParserKind::Opaque => PictureInfo::default(),
        }
    }
}

// ── H.264 ──

#[derive(Debug, Clone, Copy)]
struct H264Sps {
    log2_max_frame_num: u32,
    poc_type: u32,
    log2_max_poc_lsb: u32,
    frame_mbs_only: bool,
    separate_colour_plane: bool,
}

#[derive(Debug, Clone, Copy)]
struct H264Pps {
    sps_id: u32,
    bottom_field_pic_order_in_frame_present: bool,
}

struct H264Slice {
    nal_ref_idc: u8,
    idr: bool,
    slice_type: u32,
    frame_num: u32,
    field: bool,
    bottom_field: bool,
    poc_lsb: u32,
    delta_poc_bottom: i32,
    sps: H264Sps,
}

#[derive(Default)]
struct H264Parser {
    framing: Option<NalFraming>,
    sps: HashMap<u32, H264Sps>,
    pps: HashMap<u32, H264Pps>,
    previous_poc_msb: i32,
    previous_poc_lsb: i32,
    previous_frame_num: u32,
    previous_frame_num_offset: i64,
}

impl H264Parser {
    fn configure(&mut self, extradata: &[u8]) {
        if extradata.len() >= 7 && extradata[0] == 1 {
            self.framing = Some(NalFraming::LengthPrefixed((extradata[4] & 3) as usize + 1));
            let mut offset = 5;
            let sps_count = (extradata[offset] & 0x1F) as usize;
            offset += 1;
            for _ in 0..sps_count {
                let Some(unit) = read_u16_prefixed(extradata, &mut offset) else {
                    return;
                };
                self.absorb_parameter_set(unit);
            }
            let Some(&pps_count) = extradata.get(offset) else {
                return;
            };
            offset += 1;
            for _ in 0..pps_count {
                let Some(unit) = read_u16_prefixed(extradata, &mut offset) else {
                    return;
                };
                self.absorb_parameter_set(unit);
            }
        } else {
            self.framing = Some(NalFraming::AnnexB);
            for unit in split_nal_units(extradata, NalFraming::AnnexB) {
                self.absorb_parameter_set(unit);
            }
        }
    }

    fn absorb_parameter_set(&mut self, unit: &[u8]) {
        let Some(&header) = unit.first() else {
            return;
        };
        let payload = remove_emulation_prevention_bytes(&unit[1..]);
        match header & 0x1F {
            7 => {
                if let Some((id, sps)) = parse_h264_sps(&payload) {
                    self.sps.insert(id, sps);
                }
            }
            8 => {
                if let Some((id, pps)) = parse_h264_pps(&payload) {
                    self.pps.insert(id, pps);
                }
            }
            _ => {}
        }
    }

    fn parse(&mut self, data: &[u8]) -> PictureInfo {
        let framing = *self.framing.get_or_insert_with(|| detect_framing(data));
        let mut info = PictureInfo::default();
        let mut slices = Vec::new();
        for unit in split_nal_units(data, framing) {
            let Some(&header) = unit.first() else {
                continue;
            };
            match header & 0x1F {
                7 | 8 => self.absorb_parameter_set(unit),
                6 => {
                    if contains_recovery_point(&unit[1..]) {
                        info.key = Some(true);
                    }
                }
                1 | 5 => {
                    if let Some(slice) = self.parse_slice_header(unit) {
                        slices.push(slice);
                    }
                }
                _ => {}
            }
        }
        let Some(first) = slices.first() else {
            return info;
        };
        info.picture_type = match first.slice_type % 5 {
            0 => PictureType::P,
            1 => PictureType::B,
            2 => PictureType::I,
            3 => PictureType::S,
            _ => PictureType::Si,
        };
        if first.idr {
            info.key = Some(true);
        }
        let first_poc = self.picture_order_count(first);
        info.poc = first_poc;
        if first.field {
            let second = slices
                .iter()
                .skip(1)
                .find(|slice| slice.field && slice.bottom_field != first.bottom_field);
            match second {
                Some(second) => {
                    // Both fields in one packet: a complete frame.
                    let second_poc = self.picture_order_count(second);
                    info.structure = PictureStructure::Frame;
                    info.poc = match (first_poc, second_poc) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        _ => None,
                    };
                    info.field_order = if first.bottom_field {
                        FieldOrder::BottomFirst
                    } else {
                        FieldOrder::TopFirst
                    };
                }
                None => {
                    info.structure = if first.bottom_field {
                        PictureStructure::BottomField
                    } else {
                        PictureStructure::TopField
                    };
                }
            }
        }
        info
    }

    fn parse_slice_header(&self, unit: &[u8]) -> Option<H264Slice> {
        let header = unit[0];
        let head = &unit[1..unit.len().min(64)];
        let payload = remove_emulation_prevention_bytes(head);
        let mut reader = BitReader::new(&payload);
        let first_mb = reader.read_ue()?;
        if first_mb != 0 {
            return None;
        }
        let slice_type = reader.read_ue()?;
        let pps = *self.pps.get(&reader.read_ue()?)?;
        let sps = *self.sps.get(&pps.sps_id)?;
        if sps.separate_colour_plane {
            reader.skip_bits(2)?;
        }
        let frame_num = reader.read_bits(sps.log2_max_frame_num as usize)?;
        let mut field = false;
        let mut bottom_field = false;
        if !sps.frame_mbs_only {
            field = reader.read_flag()?;
            if field {
                bottom_field = reader.read_flag()?;
            }
        }
        let idr = header & 0x1F == 5;
        if idr {
            reader.read_ue()?;
        }
        let mut poc_lsb = 0;
        let mut delta_poc_bottom = 0;
        if sps.poc_type == 0 {
            poc_lsb = reader.read_bits(sps.log2_max_poc_lsb as usize)?;
            if pps.bottom_field_pic_order_in_frame_present && !field {
                delta_poc_bottom = reader.read_se()?;
            }
        }
        Some(H264Slice {
            nal_ref_idc: (header >> 5) & 3,
            idr,
            slice_type,
            frame_num,
            field,
            bottom_field,
            poc_lsb,
            delta_poc_bottom,
            sps,
        })
    }

    fn picture_order_count(&mut self, slice: &H264Slice) -> Option<i32> {
        match slice.sps.poc_type {
            0 => {
                if slice.idr {
                    self.previous_poc_msb = 0;
                    self.previous_poc_lsb = 0;
                }
                let max_lsb = 1i32 << slice.sps.log2_max_poc_lsb;
                let lsb = slice.poc_lsb as i32;
                let msb = if lsb < self.previous_poc_lsb && self.previous_poc_lsb - lsb >= max_lsb / 2 {
                    self.previous_poc_msb.checked_add(max_lsb)?
                } else if lsb > self.previous_poc_lsb && lsb - self.previous_poc_lsb > max_lsb / 2 {
                    self.previous_poc_msb.checked_sub(max_lsb)?
                } else {
                    self.previous_poc_msb
                };
                if slice.nal_ref_idc != 0 {
                    self.previous_poc_msb = msb;
                    self.previous_poc_lsb = lsb;
                }
                let top = msb.checked_add(lsb)?;
                if slice.field {
                    Some(top)
                } else {
                    Some(top.min(top.checked_add(slice.delta_poc_bottom)?))
                }
            }
            2 => {
                let max_frame_num = 1i64 << slice.sps.log2_max_frame_num;
                let offset = if slice.idr {
                    0
                } else if self.previous_frame_num > slice.frame_num {
                    self.previous_frame_num_offset + max_frame_num
                } else {
                    self.previous_frame_num_offset
                };
                let poc = if slice.idr {
                    0
                } else {
                    let absolute = offset + slice.frame_num as i64;
                    if slice.nal_ref_idc == 0 {
                        2 * absolute - 1
                    } else {
                        2 * absolute
                    }
                };
                self.previous_frame_num = slice.frame_num;
                self.previous_frame_num_offset = offset;
                i32::try_from(poc).ok()
            }
            _ => None,
        }
    }
}

fn parse_h264_sps(payload: &[u8]) -> Option<(u32, H264Sps)> {
    let mut reader = BitReader::new(payload);
    let profile_idc = reader.read_bits(8)?;
    reader.skip_bits(16)?;
    let sps_id = reader.read_ue()?;
    let mut separate_colour_plane = false;
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        let chroma_format_idc = reader.read_ue()?;
        if chroma_format_idc == 3 {
            separate_colour_plane = reader.read_flag()?;
        }
        reader.read_ue()?;
        reader.read_ue()?;
        reader.skip_bits(1)?;
        if reader.read_flag()? {
            let list_count = if chroma_format_idc == 3 { 12 } else { 8 };
            for list in 0..list_count {
                if reader.read_flag()? {
                    skip_scaling_list(&mut reader, if list < 6 { 16 } else { 64 })?;
                }
            }
        }
    }
    let log2_max_frame_num = read_log2_plus_four(&mut reader)?;
    let poc_type = reader.read_ue()?;
    let mut log2_max_poc_lsb = 0;
    if poc_type == 0 {
        log2_max_poc_lsb = read_log2_plus_four(&mut reader)?;
    } else if poc_type == 1 {
        reader.skip_bits(1)?;
        reader.read_se()?;
        reader.read_se()?;
        let cycle = reader.read_ue()?;
        for _ in 0..cycle.min(255) {
            reader.read_se()?;
        }
    }
    reader.read_ue()?;
    reader.skip_bits(1)?;
    reader.read_ue()?;
    reader.read_ue()?;
    let frame_mbs_only = reader.read_flag()?;
    Some((
        sps_id,
        H264Sps {
            log2_max_frame_num,
            poc_type,
            log2_max_poc_lsb,
            frame_mbs_only,
            separate_colour_plane,
        },
    ))
}

/// A `log2_*_minus4` field, restored and bounded to 16.
fn read_log2_plus_four(reader: &mut BitReader<'_>) -> Option<u32> {
    reader.read_ue()?.checked_add(4).filter(|&bits| bits <= 16)
}

fn parse_h264_pps(payload: &[u8]) -> Option<(u32, H264Pps)> {
    let mut reader = BitReader::new(payload);
    let pps_id = reader.read_ue()?;
    let sps_id = reader.read_ue()?;
    reader.skip_bits(1)?;
    let bottom_field_pic_order_in_frame_present = reader.read_flag()?;
    Some((
        pps_id,
        H264Pps {
            sps_id,
            bottom_field_pic_order_in_frame_present,
        },
    ))
}

/// Whether an SEI NAL payload carries a recovery point message.
fn contains_recovery_point(payload: &[u8]) -> bool {
    let payload = remove_emulation_prevention_bytes(payload);
    let mut offset = 0;
    while offset < payload.len() && payload[offset] != 0x80 {
        let mut payload_type = 0usize;
        while offset < payload.len() && payload[offset] == 0xFF {
            payload_type += 255;
            offset += 1;
        }
        let Some(&last) = payload.get(offset) else {
            return false;
        };
        payload_type += last as usize;
        offset += 1;
        let mut size = 0usize;
        while offset < payload.len() && payload[offset] == 0xFF {
            size += 255;
            offset += 1;
        }
        let Some(&last) = payload.get(offset) else {
            return false;
        };
        size += last as usize;
        offset += 1;
        if payload_type == 6 {
            return true;
        }
        offset += size;
    }
    false
}

// ── HEVC ──

#[derive(Debug, Clone, Copy)]
struct HevcPps {
    num_extra_slice_header_bits: u32,
}

#[derive(Default)]
struct HevcParser {
    framing: Option<NalFraming>,
    pps: HashMap<u32, HevcPps>,
}

impl HevcParser {
    fn configure(&mut self, extradata: &[u8]) {
        if extradata.len() >= 23 && extradata[0] == 1 {
            self.framing = Some(NalFraming::LengthPrefixed((extradata[21] & 3) as usize + 1));
            let array_count = extradata[22];
            let mut offset = 23;
            for _ in 0..array_count {
                if offset + 3 > extradata.len() {
                    return;
                }
                let unit_count = u16::from_be_bytes([extradata[offset + 1], extradata[offset + 2]]);
                offset += 3;
                for _ in 0..unit_count {
                    let Some(unit) = read_u16_prefixed(extradata, &mut offset) else {
                        return;
                    };
                    self.absorb_parameter_set(unit);
                }
            }
        } else {
            self.framing = Some(NalFraming::AnnexB);
            for unit in split_nal_units(extradata, NalFraming::AnnexB) {
                self.absorb_parameter_set(unit);
            }
        }
    }

    fn absorb_parameter_set(&mut self, unit: &[u8]) {
        if unit.len() < 3 || (unit[0] >> 1) & 0x3F != 34 {
            return;
        }
        let payload = remove_emulation_prevention_bytes(&unit[2..]);
        let mut reader = BitReader::new(&payload);
        let parsed = (|| {
            let pps_id = reader.read_ue()?;
            reader.read_ue()?;
            // dependent_slice_segments_enabled, output_flag_present
            reader.skip_bits(2)?;
            let num_extra_slice_header_bits = reader.read_bits(3)?;
            Some((pps_id, HevcPps { num_extra_slice_header_bits }))
        })();
        if let Some((id, pps)) = parsed {
            self.pps.insert(id, pps);
        }
    }

    fn parse(&mut self, data: &[u8]) -> PictureInfo {
        let framing = *self.framing.get_or_insert_with(|| detect_framing(data));
        let mut info = PictureInfo::default();
        for unit in split_nal_units(data, framing) {
            if unit.len() < 3 {
                continue;
            }
            let nal_type = (unit[0] >> 1) & 0x3F;
            if nal_type == 34 {
                self.absorb_parameter_set(unit);
                continue;
            }
            if nal_type >= 32 {
                continue;
            }
            let irap = (16..=23).contains(&nal_type);
            info.key = Some(irap);
            let payload = remove_emulation_prevention_bytes(&unit[2..unit.len().min(48)]);
            let mut reader = BitReader::new(&payload);
            let slice_type = (|| {
                if !reader.read_flag()? {
                    return None;
                }
                if irap {
                    reader.skip_bits(1)?;
                }
                let pps = *self.pps.get(&reader.read_ue()?)?;
                reader.skip_bits(pps.num_extra_slice_header_bits as usize)?;
                reader.read_ue()
            })();
            info.picture_type = match slice_type {
                Some(0) => PictureType::B,
                Some(1) => PictureType::P,
                Some(2) => PictureType::I,
                _ => PictureType::Unknown,
            };
            break;
        }
        info
    }
}

/// Guess NAL framing from a packet when no configuration says otherwise.
fn detect_framing(data: &[u8]) -> NalFraming {
    if data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1]) {
        NalFraming::AnnexB
    } else {
        NalFraming::LengthPrefixed(4)
    }
}

fn read_u16_prefixed<'a>(data: &'a [u8], offset: &mut usize) -> Option<&'a [u8]> {
    let length = u16::from_be_bytes([*data.get(*offset)?, *data.get(*offset + 1)?]) as usize;
    *offset += 2;
    let unit = data.get(*offset..*offset + length)?;
    *offset += length;
    Some(unit)
}

// ── MPEG-1/2 video ──

#[derive(Default)]
struct Mpeg12Parser {
    progressive_sequence: bool,
}

impl Mpeg12Parser {
    fn parse(&mut self, data: &[u8]) -> PictureInfo {
        let mut info = PictureInfo::default();
        let mut sequence_or_gop = false;
        let mut seen_picture = false;
        for unit in split_start_code_units(data) {
            let Some((&code, body)) = unit.split_first() else {
                continue;
            };
            let mut reader = BitReader::new(body);
            match code {
                0xB3 | 0xB8 => sequence_or_gop = true,
                0x00 => {
                    if seen_picture {
                        break;
                    }
                    seen_picture = true;
                    let Some(coding_type) = reader.skip_bits(10).and_then(|_| reader.read_bits(3)) else {
                        continue;
                    };
                    info.picture_type = match coding_type {
                        1 | 4 => PictureType::I,
                        2 => PictureType::P,
                        3 => PictureType::B,
                        _ => PictureType::Unknown,
                    };
                    info.repeat_pict = Some(0);
                }
                0xB5 => match reader.read_bits(4) {
                    Some(1) => {
                        if let Some(progressive) = reader.skip_bits(8).and_then(|_| reader.read_flag()) {
                            self.progressive_sequence = progressive;
                        }
                    }
                    Some(8) if seen_picture => {
                        if let Some(extension) = parse_picture_coding_extension(&mut reader) {
                            info.structure = extension.structure;
                            info.field_order = if self.progressive_sequence {
                                FieldOrder::Unknown
                            } else if extension.top_field_first {
                                FieldOrder::TopFirst
                            } else {
                                FieldOrder::BottomFirst
                            };
                            info.repeat_pict = Some(match (extension.repeat_first_field, self.progressive_sequence) {
                                (false, _) => 0,
                                (true, true) if extension.top_field_first => 4,
                                (true, true) => 2,
                                (true, false) => 1,
                            });
                        }
                    }
                    _ => {}
                },
                _ => {}
            }
        }
        if info.picture_type == PictureType::I && sequence_or_gop {
            info.key = Some(true);
        }
        info
    }
}

struct PictureCodingExtension {
    structure: PictureStructure,
    top_field_first: bool,
    repeat_first_field: bool,
}

fn parse_picture_coding_extension(reader: &mut BitReader<'_>) -> Option<PictureCodingExtension> {
    reader.skip_bits(16 + 2)?;
    let structure = match reader.read_bits(2)? {
        1 => PictureStructure::TopField,
        2 => PictureStructure::BottomField,
        _ => PictureStructure::Frame,
    };
    let top_field_first = reader.read_flag()?;
    reader.skip_bits(5)?;
    let repeat_first_field = reader.read_flag()?;
    Some(PictureCodingExtension {
        structure,
        top_field_first,
        repeat_first_field,
    })
}

// ── MPEG-4 Part 2 ──

#[derive(Default)]
struct Mpeg4Parser {
    time_increment_bits: Option<usize>,
}

impl Mpeg4Parser {
    fn parse(&mut self, data: &[u8]) -> PictureInfo {
        let mut info = PictureInfo::default();
        let mut vop_count = 0;
        let mut coded = true;
        for unit in split_start_code_units(data) {
            let Some((&code, body)) = unit.split_first() else {
                continue;
            };
            match code {
                0x20..=0x2F => {
                    if let Some(bits) = parse_vol_time_increment_bits(body) {
                        self.time_increment_bits = Some(bits);
                    }
                }
                0xB6 => {
                    vop_count += 1;
                    if vop_count > 1 {
                        continue;
                    }
                    let mut reader = BitReader::new(body);
                    let Some(coding_type) = reader.read_bits(2) else {
                        continue;
                    };
                    info.picture_type = match coding_type {
                        0 => PictureType::I,
                        1 => PictureType::P,
                        2 => PictureType::B,
                        _ => PictureType::S,
                    };
                    if let Some(bits) = self.time_increment_bits {
                        if let Some(flag) = read_vop_coded(&mut reader, bits) {
                            coded = flag;
                        }
                    } else if body.len() <= 4 {
                        coded = false;
                    }
                }
                _ => {}
            }
        }
        if info.picture_type == PictureType::I {
            info.key = Some(true);
        }
        info.invisible = vop_count == 1 && !coded;
        info
    }
}

fn read_vop_coded(reader: &mut BitReader<'_>, time_increment_bits: usize) -> Option<bool> {
    while reader.read_flag()? {}
    reader.skip_bits(1)?;
    reader.skip_bits(time_increment_bits)?;
    reader.skip_bits(1)?;
    reader.read_flag()
}

fn parse_vol_time_increment_bits(body: &[u8]) -> Option<usize> {
    let mut reader = BitReader::new(body);
    reader.skip_bits(1 + 8)?;
    let mut verid = 1;
    if reader.read_flag()? {
        verid = reader.read_bits(4)?;
        reader.skip_bits(3)?;
    }
    if reader.read_bits(4)? == 15 {
        reader.skip_bits(16)?;
    }
    if reader.read_flag()? {
        reader.skip_bits(3)?;
        if reader.read_flag()? {
            reader.skip_bits(79)?;
        }
    }
    let shape = reader.read_bits(2)?;
    if shape == 3 && verid != 1 {
        reader.skip_bits(4)?;
    }
    reader.skip_bits(1)?;
    let resolution = reader.read_bits(16)?;
    if resolution == 0 {
        return None;
    }
    let bits = (32 - (resolution - 1).leading_zeros()) as usize;
    Some(bits.max(1))
}

// ── VP8 / VP9 ──

fn parse_vp8(data: &[u8]) -> PictureInfo {
    let Some(&tag) = data.first() else {
        return PictureInfo::default();
    };
    let key = tag & 1 == 0;
    PictureInfo {
        picture_type: if key { PictureType::I } else { PictureType::P },
        key: Some(key),
        invisible: (tag >> 4) & 1 == 0,
        ..PictureInfo::default()
    }
}

fn parse_vp9(data: &[u8]) -> PictureInfo {
    let frames = vp9_superframe_frames(data);
    let mut info = PictureInfo::default();
    let mut shown = false;
    for (position, frame) in frames.iter().enumerate() {
        let Some((key, show)) = parse_vp9_frame_header(frame) else {
            continue;
        };
        if position == 0 {
            info.key = Some(key);
            info.picture_type = if key { PictureType::I } else { PictureType::P };
        }
        shown |= show;
    }
    info.invisible = !shown && info.picture_type != PictureType::Unknown;
    info
}

/// Returns `(key, shown)`.
fn parse_vp9_frame_header(data: &[u8]) -> Option<(bool, bool)> {
    let mut reader = BitReader::new(data);
    if reader.read_bits(2)? != 2 {
        return None;
    }
    let profile = reader.read_bits(1)? | (reader.read_bits(1)? << 1);
    if profile == 3 {
        reader.skip_bits(1)?;
    }
    if reader.read_flag()? {
        // show_existing_frame: displays an already decoded frame.
        return Some((false, true));
    }
    let key = !reader.read_flag()?;
    let show = reader.read_flag()?;
    Some((key, show))
}

fn vp9_superframe_frames(data: &[u8]) -> Vec<&[u8]> {
    let Some(&marker) = data.last() else {
        return Vec::new();
    };
    if marker & 0xE0 == 0xC0 {
        let frame_count = (marker & 7) as usize + 1;
        let size_bytes = ((marker >> 3) & 3) as usize + 1;
        let index_size = 2 + size_bytes * frame_count;
        if data.len() >= index_size && data[data.len() - index_size] == marker {
            let index = &data[data.len() - index_size + 1..data.len() - 1];
            let mut frames = Vec::with_capacity(frame_count);
            let mut offset = 0;
            for entry in index.chunks(size_bytes) {
                let size = entry
                    .iter()
                    .rev()
                    .fold(0usize, |value, &byte| (value << 8) | byte as usize);
                if offset + size > data.len() - index_size {
                    break;
                }
                frames.push(&data[offset..offset + size]);
                offset += size;
            }
            return frames;
        }
    }
    vec![data]
}

// ── Audio ──

/// Computes decoded samples per channel for compressed audio packets.
pub struct AudioFrameParser {
    family: CodecFamily,
    aac_frame_length: Option<u32>,
    pcm_frame_bytes: Option<u32>,
}

impl AudioFrameParser {
    /// A parser for `family` configured by `configuration`.
    pub fn new(family: CodecFamily, configuration: &DecoderConfiguration) -> Self {
        let aac_frame_length = match family {
            CodecFamily::Aac => aac_frame_length(&configuration.extradata),
            _ => None,
        };
        let pcm_frame_bytes = match family {
            CodecFamily::Pcm => {
                let bits = if configuration.bits_per_sample > 0 {
                    configuration.bits_per_sample
                } else {
                    pcm_bits_from_name(&configuration.codec_name).unwrap_or(0)
                };
                let bytes = bits.div_ceil(8) * configuration.channels;
                (bytes > 0).then_some(bytes)
            }
            _ => None,
        };
        Self {
            family,
            aac_frame_length,
            pcm_frame_bytes,
        }
    }

    /// Samples per channel produced by `data`, if it can be told from the
    /// bitstream alone.
    pub fn frame_length(&self, data: &[u8]) -> Option<u32> {
        match self.family {
            CodecFamily::Aac => {
                if data.len() >= 7 && data[0] == 0xFF && data[1] & 0xF6 == 0xF0 {
                    return Some(((data[6] & 3) as u32 + 1) * 1024);
                }
                self.aac_frame_length
            }
            CodecFamily::MpegAudio => mpeg_audio_frame_length(data),
            CodecFamily::Ac3 => Some(1536),
            CodecFamily::Eac3 => eac3_frame_length(data),
            CodecFamily::Flac => flac_frame_length(data),
            CodecFamily::Opus => opus_frame_length(data),
            CodecFamily::Pcm => self
                .pcm_frame_bytes
                .map(|bytes| data.len() as u32 / bytes),
            _ => None,
        }
    }
}

/// Frame length from an AudioSpecificConfig. `None` for SBR/PS profiles
/// whose output length depends on the decoder.
fn aac_frame_length(extradata: &[u8]) -> Option<u32> {
    if extradata.is_empty() {
        return Some(1024);
    }
    let mut reader = BitReader::new(extradata);
    let mut object_type = reader.read_bits(5)?;
    if object_type == 31 {
        object_type = 32 + reader.read_bits(6)?;
    }
    if matches!(object_type, 5 | 29) {
        return None;
    }
    if reader.read_bits(4)? == 15 {
        reader.skip_bits(24)?;
    }
    reader.skip_bits(4)?;
    match object_type {
        1..=4 | 6 | 7 | 17 | 19..=23 => Some(if reader.read_flag()? { 960 } else { 1024 }),
        _ => None,
    }
}

fn mpeg_audio_frame_length(data: &[u8]) -> Option<u32> {
    if data.len() < 4 || data[0] != 0xFF || data[1] & 0xE0 != 0xE0 {
        return None;
    }
    let version = (data[1] >> 3) & 3;
    match (data[1] >> 1) & 3 {
        3 => Some(384),
        2 => Some(1152),
        1 => Some(if version == 3 { 1152 } else { 576 }),
        _ => None,
    }
}

fn eac3_frame_length(data: &[u8]) -> Option<u32> {
    let mut offset = 0;
    let mut total = 0;
    while offset + 5 <= data.len() && data[offset] == 0x0B && data[offset + 1] == 0x77 {
        let mut reader = BitReader::new(&data[offset + 2..]);
        let stream_type = reader.read_bits(2)?;
        reader.skip_bits(3)?;
        let frame_size = (reader.read_bits(11)? as usize + 1) * 2;
        let sample_rate_code = reader.read_bits(2)?;
        let blocks = if sample_rate_code == 3 {
            6
        } else {
            [1, 2, 3, 6][reader.read_bits(2)? as usize]
        };
        // Dependent substreams extend the independent frame's channels.
        if stream_type != 1 {
            total += blocks * 256;
        }
        offset += frame_size;
    }
    (total > 0).then_some(total)
}

fn flac_frame_length(data: &[u8]) -> Option<u32> {
    if data.len() < 5 || data[0] != 0xFF || data[1] & 0xFE != 0xF8 {
        return None;
    }
    let code = data[2] >> 4;
    let number_length = match data[4] {
        byte if byte & 0x80 == 0 => 1,
        byte => byte.leading_ones() as usize,
    };
    let tail = 4 + number_length;
    match code {
        1 => Some(192),
        2..=5 => Some(576 << (code - 2)),
        6 => data.get(tail).map(|&value| value as u32 + 1),
        7 => Some(u16::from_be_bytes([*data.get(tail)?, *data.get(tail + 1)?]) as u32 + 1),
        8..=15 => Some(256 << (code - 8)),
        _ => None,
    }
}

fn opus_frame_length(data: &[u8]) -> Option<u32> {
    let toc = *data.first()?;
    let config = toc >> 3;
    // Frame duration in units of 2.5 ms at 48 kHz (120 samples).
    let units = match config {
        0..=11 => [4, 8, 16, 24][(config % 4) as usize],
        12..=15 => [4, 8][(config % 2) as usize],
        _ => [1, 2, 4, 8][(config % 4) as usize],
    };
    let frames = match toc & 3 {
        0 => 1,
        1 | 2 => 2,
        _ => (*data.get(1)? & 0x3F) as u32,
    };
    Some(units * 120 * frames)
}

fn pcm_bits_from_name(name: &str) -> Option<u32> {
    let digits: String = name
        .trim_start_matches("pcm_")
        .chars()
        .skip_while(|character| !character.is_ascii_digit())
        .take_while(|character| character.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
