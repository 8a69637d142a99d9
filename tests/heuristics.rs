//! Packet inspection tests over hand-assembled bitstream fragments.

mod common;

use common::bitstream::{H264Slice, h264_pps, h264_recovery_point, h264_sps, hevc_pps, hevc_slice};
use framedex::{AudioFrameParser, CodecFamily, DecoderConfiguration, PictureInfo, PictureType, VideoParser};

fn audio_parser(codec_name: &str, extradata: &[u8]) -> AudioFrameParser {
    let configuration = DecoderConfiguration {
        codec_name: codec_name.to_string(),
        extradata: extradata.to_vec(),
        channels: 2,
        bits_per_sample: 16,
        ..DecoderConfiguration::default()
    };
    AudioFrameParser::new(CodecFamily::from_codec_name(codec_name), &configuration)
}

/// MPEG-2 sequence header followed by a picture header of `coding_byte`.
fn mpeg2_packet(with_sequence: bool, coding_byte: u8) -> Vec<u8> {
    let mut data = Vec::new();
    if with_sequence {
        data.extend_from_slice(&[0, 0, 1, 0xB3, 0x14, 0x00, 0xF0, 0x13]);
    }
    data.extend_from_slice(&[0, 0, 1, 0x00, 0x00, coding_byte, 0xFF, 0xF8]);
    data
}

/// H.264 parser primed with sequence and picture parameter sets.
fn h264_parser(log2_max_poc_lsb: Option<u64>, bottom_field_pic_order: bool) -> VideoParser {
    let mut extradata = h264_sps(4, log2_max_poc_lsb);
    extradata.extend(h264_pps(0, bottom_field_pic_order));
    VideoParser::new(CodecFamily::H264, &extradata)
}

fn parse_slice(parser: &mut VideoParser, slice: H264Slice, log2_max_poc_lsb: Option<usize>) -> PictureInfo {
    parser.parse(&slice.encode(4, log2_max_poc_lsb))
}

// ── Codec families ─────────────────────────────────────────────────

#[test]
fn codec_names_map_to_families() {
    assert_eq!(CodecFamily::from_codec_name("h264"), CodecFamily::H264);
    assert_eq!(CodecFamily::from_codec_name("hevc"), CodecFamily::Hevc);
    assert_eq!(CodecFamily::from_codec_name("mpeg2video"), CodecFamily::Mpeg12);
    assert_eq!(CodecFamily::from_codec_name("vp9"), CodecFamily::Vp9);
    assert_eq!(CodecFamily::from_codec_name("mp3float"), CodecFamily::MpegAudio);
    assert_eq!(CodecFamily::from_codec_name("pcm_f32le"), CodecFamily::Pcm);
    assert_eq!(CodecFamily::from_codec_name("prores"), CodecFamily::Other);
}

#[test]
fn only_bidirectional_families_reorder() {
    assert!(CodecFamily::H264.reorders());
    assert!(CodecFamily::Mpeg12.reorders());
    assert!(!CodecFamily::Vp8.reorders());
    assert!(!CodecFamily::Vp9.reorders());
    assert!(!CodecFamily::Other.reorders());
}

// ── Video ──────────────────────────────────────────────────────────

#[test]
fn vp8_frame_tag() {
    let mut parser = VideoParser::new(CodecFamily::Vp8, &[]);

    let key = parser.parse(&[0x10, 0x00, 0x00]);
    assert_eq!(key.picture_type, PictureType::I);
    assert_eq!(key.key, Some(true));
    assert!(!key.invisible);

    let hidden = parser.parse(&[0x01, 0x00, 0x00]);
    assert_eq!(hidden.picture_type, PictureType::P);
    assert_eq!(hidden.key, Some(false));
    assert!(hidden.invisible);
}

#[test]
fn vp9_uncompressed_header() {
    let mut parser = VideoParser::new(CodecFamily::Vp9, &[]);

    let key = parser.parse(&[0x82, 0x49, 0x83]);
    assert_eq!(key.key, Some(true));
    assert_eq!(key.picture_type, PictureType::I);
    assert!(!key.invisible);

    let hidden = parser.parse(&[0x84, 0x00, 0x00]);
    assert_eq!(hidden.key, Some(false));
    assert!(hidden.invisible);
}

#[test]
fn mpeg2_picture_coding_type() {
    let mut parser = VideoParser::new(CodecFamily::Mpeg12, &[]);

    let intra = parser.parse(&mpeg2_packet(true, 0x08));
    assert_eq!(intra.picture_type, PictureType::I);
    assert_eq!(intra.key, Some(true));

    let predicted = parser.parse(&mpeg2_packet(false, 0x10));
    assert_eq!(predicted.picture_type, PictureType::P);
    assert_eq!(predicted.key, None);

    let bidirectional = parser.parse(&mpeg2_packet(false, 0x18));
    assert_eq!(bidirectional.picture_type, PictureType::B);
    assert!(!bidirectional.needs_decode(CodecFamily::Mpeg12));
}

#[test]
fn unparsed_reordering_picture_needs_decode() {
    let mut parser = VideoParser::new(CodecFamily::Mpeg12, &[]);
    let unknown = parser.parse(&[0x12, 0x34]);
    assert_eq!(unknown.picture_type, PictureType::Unknown);
    assert!(unknown.needs_decode(CodecFamily::Mpeg12));
    // Families without reordering never need one.
    assert!(!unknown.needs_decode(CodecFamily::Vp8));
}

// ── H.264 and HEVC ─────────────────────────────────────────────────

#[test]
fn h264_poc_type_zero_follows_lsb_wraps() {
    let mut parser = h264_parser(Some(4), false);

    let idr = parse_slice(&mut parser, H264Slice::idr(), Some(4));
    assert_eq!(idr.picture_type, PictureType::I);
    assert_eq!(idr.key, Some(true));
    assert_eq!(idr.poc, Some(0));
    assert!(!idr.needs_decode(CodecFamily::H264));

    let pocs: Vec<Option<i32>> = [
        H264Slice::predicted(1, 6),
        H264Slice::predicted(2, 12),
        // 12 -> 2 wraps the 4-bit lsb.
        H264Slice::predicted(3, 2),
        // Non-reference pictures leave the wrap state alone.
        H264Slice::bidirectional(4, 0),
        H264Slice::predicted(4, 4),
    ]
    .into_iter()
    .map(|slice| parse_slice(&mut parser, slice, Some(4)).poc)
    .collect();
    assert_eq!(pocs, vec![Some(6), Some(12), Some(18), Some(16), Some(20)]);
}

#[test]
fn h264_poc_type_two_follows_frame_num() {
    let mut parser = h264_parser(None, false);

    let pocs: Vec<Option<i32>> = [
        H264Slice::idr(),
        H264Slice::predicted(1, 0),
        H264Slice::bidirectional(2, 0),
        H264Slice::predicted(2, 0),
        // frame_num wraps at 16.
        H264Slice::predicted(0, 0),
    ]
    .into_iter()
    .map(|slice| parse_slice(&mut parser, slice, None).poc)
    .collect();
    assert_eq!(pocs, vec![Some(0), Some(2), Some(3), Some(4), Some(32)]);
}

#[test]
fn h264_keyframe_hints() {
    let mut parser = h264_parser(Some(4), false);

    let mut recovery = h264_recovery_point();
    recovery.extend(H264Slice::predicted(1, 2).encode(4, Some(4)));
    let info = parser.parse(&recovery);
    assert_eq!(info.picture_type, PictureType::P);
    assert_eq!(info.key, Some(true));

    let plain = parse_slice(&mut parser, H264Slice::predicted(2, 4), Some(4));
    assert_eq!(plain.picture_type, PictureType::P);
    assert_eq!(plain.key, None);

    let bidirectional = parse_slice(&mut parser, H264Slice::bidirectional(3, 2), Some(4));
    assert_eq!(bidirectional.picture_type, PictureType::B);
}

#[test]
fn oversized_sequence_parameter_set_is_ignored() {
    // log2_max_frame_num_minus4 decodes to 4294967294.
    let oversized = [
        0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, 0x80, 0x00, 0x00, 0x03, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x80,
    ];
    let mut parser = VideoParser::new(CodecFamily::H264, &oversized);

    let mut packet = oversized.to_vec();
    packet.extend(h264_pps(0, false));
    packet.extend(H264Slice::idr().encode(4, Some(4)));
    let info = parser.parse(&packet);
    assert_eq!(info.picture_type, PictureType::Unknown);
    assert_eq!(info.key, None);
    assert_eq!(info.poc, None);
    assert!(info.needs_decode(CodecFamily::H264));
}

#[test]
fn overflowing_bottom_field_delta_leaves_poc_unknown() {
    let mut parser = h264_parser(Some(8), true);
    let slice = H264Slice {
        delta_poc_bottom: Some(i32::MAX as i64),
        ..H264Slice::predicted(1, 2)
    };
    let info = parse_slice(&mut parser, slice, Some(8));
    assert_eq!(info.picture_type, PictureType::P);
    assert_eq!(info.poc, None);
}

#[test]
fn hevc_slice_type_and_random_access() {
    let mut parser = VideoParser::new(CodecFamily::Hevc, &hevc_pps(2));

    // IDR_W_RADL
    let idr = parser.parse(&hevc_slice(19, 2, 2));
    assert_eq!(idr.picture_type, PictureType::I);
    assert_eq!(idr.key, Some(true));

    // CRA
    let clean = parser.parse(&hevc_slice(21, 2, 2));
    assert_eq!(clean.picture_type, PictureType::I);
    assert_eq!(clean.key, Some(true));

    // TRAIL_R
    let predicted = parser.parse(&hevc_slice(1, 1, 2));
    assert_eq!(predicted.picture_type, PictureType::P);
    assert_eq!(predicted.key, Some(false));

    // TRAIL_N
    let bidirectional = parser.parse(&hevc_slice(0, 0, 2));
    assert_eq!(bidirectional.picture_type, PictureType::B);
    assert_eq!(bidirectional.key, Some(false));
}

#[test]
fn opaque_codec_reveals_nothing() {
    let mut parser = VideoParser::new(CodecFamily::Other, &[]);
    let info = parser.parse(&[0x00, 0x00, 0x01, 0xB3]);
    assert_eq!(info.picture_type, PictureType::Unknown);
    assert_eq!(info.key, None);
}

// ── Audio ──────────────────────────────────────────────────────────

#[test]
fn mpeg_audio_layers() {
    let parser = audio_parser("mp3", &[]);
    assert_eq!(parser.frame_length(&[0xFF, 0xFB, 0x90, 0x00]), Some(1152));
    // MPEG-2 layer III halves the frame.
    assert_eq!(parser.frame_length(&[0xFF, 0xF3, 0x90, 0x00]), Some(576));
    assert_eq!(parser.frame_length(&[0xFF, 0xFD, 0x90, 0x00]), Some(1152));
    assert_eq!(parser.frame_length(&[0xFF, 0xFF, 0x90, 0x00]), Some(384));
    assert_eq!(parser.frame_length(&[0x00, 0x00, 0x00, 0x00]), None);
}

#[test]
fn ac3_frames_are_fixed_length() {
    assert_eq!(audio_parser("ac3", &[]).frame_length(&[0x0B, 0x77]), Some(1536));
}

#[test]
fn eac3_block_count() {
    let parser = audio_parser("eac3", &[]);
    assert_eq!(parser.frame_length(&[0x0B, 0x77, 0x00, 0x02, 0x30, 0x00]), Some(1536));
    assert_eq!(parser.frame_length(&[0x0B, 0x77, 0x00, 0x02, 0x00, 0x00]), Some(256));
    assert_eq!(parser.frame_length(&[0x00, 0x00, 0x00, 0x00, 0x00]), None);
}

#[test]
fn aac_adts_header() {
    let parser = audio_parser("aac", &[]);
    assert_eq!(parser.frame_length(&[0xFF, 0xF1, 0x50, 0x80, 0x00, 0x1F, 0xFC]), Some(1024));
    assert_eq!(parser.frame_length(&[0xFF, 0xF1, 0x50, 0x80, 0x00, 0x1F, 0xFD]), Some(2048));
}

#[test]
fn aac_audio_specific_config() {
    assert_eq!(audio_parser("aac", &[0x12, 0x10]).frame_length(&[0x21, 0x00]), Some(1024));
    assert_eq!(audio_parser("aac", &[0x12, 0x14]).frame_length(&[0x21, 0x00]), Some(960));
    // SBR output length depends on the decoder.
    assert_eq!(audio_parser("aac", &[0x2B, 0x92, 0x08, 0x00]).frame_length(&[0x21, 0x00]), None);
}

#[test]
fn opus_table_of_contents() {
    let parser = audio_parser("opus", &[]);
    assert_eq!(parser.frame_length(&[0x00]), Some(480));
    assert_eq!(parser.frame_length(&[0x08]), Some(960));
    assert_eq!(parser.frame_length(&[0x09]), Some(1920));
    assert_eq!(parser.frame_length(&[0x0B, 0x03]), Some(2880));
    assert_eq!(parser.frame_length(&[]), None);
}

#[test]
fn flac_block_size() {
    let parser = audio_parser("flac", &[]);
    assert_eq!(parser.frame_length(&[0xFF, 0xF8, 0xC9, 0x00, 0x00]), Some(4096));
    assert_eq!(parser.frame_length(&[0xFF, 0xF8, 0x19, 0x00, 0x00]), Some(192));
    assert_eq!(parser.frame_length(&[0xFF, 0xF8, 0x69, 0x00, 0x00, 0x3F]), Some(64));
}

#[test]
fn pcm_length_from_packet_size() {
    assert_eq!(audio_parser("pcm_s16le", &[]).frame_length(&[0; 400]), Some(100));

    let configuration = DecoderConfiguration {
        codec_name: "pcm_s24le".to_string(),
        channels: 1,
        ..DecoderConfiguration::default()
    };
    let parser = AudioFrameParser::new(CodecFamily::Pcm, &configuration);
    assert_eq!(parser.frame_length(&[0; 30]), Some(10));
}
