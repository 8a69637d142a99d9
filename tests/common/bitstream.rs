//! Bit writer and hand-assembled codec headers for parser-driven clips.

/// MSB-first bit writer.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    length: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the low `count` bits of `value`.
    pub fn bits(mut self, value: u64, count: usize) -> Self {
        for shift in (0..count).rev() {
            if self.length % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> shift) & 1 == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (7 - self.length % 8);
            }
            self.length += 1;
        }
        self
    }

    pub fn flag(self, value: bool) -> Self {
        self.bits(value as u64, 1)
    }

    /// Unsigned Exp-Golomb.
    pub fn ue(self, value: u64) -> Self {
        let code = value + 1;
        let length = 64 - code.leading_zeros() as usize;
        self.bits(0, length - 1).bits(code, length)
    }

    /// Signed Exp-Golomb.
    pub fn se(self, value: i64) -> Self {
        let code = if value > 0 { 2 * value - 1 } else { -2 * value };
        self.ue(code as u64)
    }

    /// Stop bit, then zero padding to a byte boundary.
    pub fn finish(self) -> Vec<u8> {
        self.flag(true).bytes
    }
}

/// Insert emulation-prevention bytes into a NAL payload.
pub fn escape(rbsp: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(rbsp.len() + 4);
    let mut zeros = 0;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 3 {
            escaped.push(3);
            zeros = 0;
        }
        escaped.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    escaped
}

// ── H.264 ──────────────────────────────────────────────────────────

pub fn h264_nal(header: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut unit = vec![0, 0, 0, 1, header];
    unit.extend(escape(rbsp));
    unit
}

/// Baseline sequence parameter set 0. `log2_max_poc_lsb` selects picture
/// order count type 0; without it the stream uses type 2.
pub fn h264_sps(log2_max_frame_num: u64, log2_max_poc_lsb: Option<u64>) -> Vec<u8> {
    let writer = BitWriter::new()
        .bits(66, 8)
        .bits(0, 8)
        .bits(30, 8)
        .ue(0)
        .ue(log2_max_frame_num - 4);
    let writer = match log2_max_poc_lsb {
        Some(bits) => writer.ue(0).ue(bits - 4),
        None => writer.ue(2),
    };
    let rbsp = writer.ue(1).flag(false).ue(0).ue(0).flag(true).flag(true).finish();
    h264_nal(0x67, &rbsp)
}

/// Picture parameter set `pps_id` referring to sequence parameter set 0.
pub fn h264_pps(pps_id: u64, bottom_field_pic_order: bool) -> Vec<u8> {
    let rbsp = BitWriter::new()
        .ue(pps_id)
        .ue(0)
        .flag(false)
        .flag(bottom_field_pic_order)
        .ue(0)
        .finish();
    h264_nal(0x68, &rbsp)
}

/// SEI carrying a recovery point message.
pub fn h264_recovery_point() -> Vec<u8> {
    h264_nal(0x06, &[0x06, 0x01, 0x84, 0x80])
}

/// First slice of a coded frame.
#[derive(Debug, Clone, Copy)]
pub struct H264Slice {
    pub idr: bool,
    pub reference: bool,
    /// 0 P, 1 B, 2 I.
    pub slice_type: u64,
    pub pps_id: u64,
    pub frame_num: u64,
    pub poc_lsb: u64,
    pub delta_poc_bottom: Option<i64>,
}

impl H264Slice {
    pub fn idr() -> Self {
        Self {
            idr: true,
            reference: true,
            slice_type: 2,
            pps_id: 0,
            frame_num: 0,
            poc_lsb: 0,
            delta_poc_bottom: None,
        }
    }

    pub fn predicted(frame_num: u64, poc_lsb: u64) -> Self {
        Self {
            idr: false,
            slice_type: 0,
            frame_num,
            poc_lsb,
            ..Self::idr()
        }
    }

    /// Non-reference B picture.
    pub fn bidirectional(frame_num: u64, poc_lsb: u64) -> Self {
        Self {
            reference: false,
            slice_type: 1,
            ..Self::predicted(frame_num, poc_lsb)
        }
    }

    pub fn encode(&self, log2_max_frame_num: usize, log2_max_poc_lsb: Option<usize>) -> Vec<u8> {
        let header = (if self.reference { 3 << 5 } else { 0 }) | (if self.idr { 5 } else { 1 });
        let mut writer = BitWriter::new()
            .ue(0)
            .ue(self.slice_type + 5)
            .ue(self.pps_id)
            .bits(self.frame_num, log2_max_frame_num);
        if self.idr {
            writer = writer.ue(0);
        }
        if let Some(bits) = log2_max_poc_lsb {
            writer = writer.bits(self.poc_lsb, bits);
            if let Some(delta) = self.delta_poc_bottom {
                writer = writer.se(delta);
            }
        }
        h264_nal(header, &writer.bits(0xA5, 8).finish())
    }
}

// ── HEVC ───────────────────────────────────────────────────────────

pub fn hevc_nal(nal_type: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut unit = vec![0, 0, 0, 1, nal_type << 1, 1];
    unit.extend(escape(rbsp));
    unit
}

/// Picture parameter set 0 with `extra_bits` extra slice header bits.
pub fn hevc_pps(extra_bits: u64) -> Vec<u8> {
    let rbsp = BitWriter::new()
        .ue(0)
        .ue(0)
        .flag(false)
        .flag(false)
        .bits(extra_bits, 3)
        .bits(0xA5, 8)
        .finish();
    hevc_nal(34, &rbsp)
}

/// First slice segment of a picture; `slice_type` is 0 B, 1 P, 2 I.
pub fn hevc_slice(nal_type: u8, slice_type: u64, extra_bits: usize) -> Vec<u8> {
    let mut writer = BitWriter::new().flag(true);
    if (16..=23).contains(&nal_type) {
        writer = writer.flag(false);
    }
    let rbsp = writer
        .ue(0)
        .bits(0, extra_bits)
        .ue(slice_type)
        .bits(0xA5, 8)
        .finish();
    hevc_nal(nal_type, &rbsp)
}

// ── MPEG-2 ─────────────────────────────────────────────────────────

/// Picture header plus picture coding extension.
#[derive(Debug, Clone, Copy)]
pub struct Mpeg2Picture {
    /// 1 I, 2 P, 3 B.
    pub coding_type: u64,
    pub sequence_header: bool,
    /// 1 top field, 2 bottom field, 3 frame.
    pub structure: u64,
    pub top_field_first: bool,
    pub repeat_first_field: bool,
}

impl Mpeg2Picture {
    pub fn frame(coding_type: u64, top_field_first: bool, repeat_first_field: bool) -> Self {
        Self {
            coding_type,
            sequence_header: coding_type == 1,
            structure: 3,
            top_field_first,
            repeat_first_field,
        }
    }

    pub fn field(coding_type: u64, top: bool) -> Self {
        Self {
            structure: if top { 1 } else { 2 },
            ..Self::frame(coding_type, top, false)
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::new();
        if self.sequence_header {
            data.extend_from_slice(&[0, 0, 1, 0xB3, 0x14, 0x00, 0xF0, 0x13]);
        }
        data.extend_from_slice(&[0, 0, 1, 0x00]);
        data.extend(
            BitWriter::new()
                .bits(0, 10)
                .bits(self.coding_type, 3)
                .bits(0xFFFF, 16)
                .finish(),
        );
        data.extend_from_slice(&[0, 0, 1, 0xB5]);
        data.extend(
            BitWriter::new()
                .bits(8, 4)
                .bits(0xFFFF, 16)
                .bits(0, 2)
                .bits(self.structure, 2)
                .flag(self.top_field_first)
                .bits(0, 5)
                .flag(self.repeat_first_field)
                .flag(false)
                .flag(false)
                .finish(),
        );
        data
    }
}
