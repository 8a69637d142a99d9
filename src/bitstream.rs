//! Bit-level readers and NAL unit framing helpers.
//!
//! Only what the codec heuristics need: an MSB-first bit reader with
//! Exp-Golomb support, emulation-prevention removal, and splitting of
//! packets into NAL units or MPEG start-code units.

/// MSB-first bit reader over a byte slice.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    bit_position: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_position: 0,
        }
    }

    pub(crate) fn read_bit(&mut self) -> Option<u8> {
        let byte_position = self.bit_position / 8;
        if byte_position >= self.data.len() {
            return None;
        }
        let bit_offset = 7 - (self.bit_position % 8);
        let bit = (self.data[byte_position] >> bit_offset) & 1;
        self.bit_position += 1;
        Some(bit)
    }

    pub(crate) fn read_flag(&mut self) -> Option<bool> {
        self.read_bit().map(|bit| bit == 1)
    }

    /// Read up to 32 bits.
    pub(crate) fn read_bits(&mut self, count: usize) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Some(value)
    }

    pub(crate) fn skip_bits(&mut self, count: usize) -> Option<()> {
        if self.bit_position + count > self.data.len() * 8 {
            return None;
        }
        self.bit_position += count;
        Some(())
    }

    /// Unsigned Exp-Golomb.
    pub(crate) fn read_ue(&mut self) -> Option<u32> {
        let mut zeros = 0usize;
        while self.read_bit()? == 0 {
            zeros += 1;
            if zeros > 31 {
                return None;
            }
        }
        if zeros == 0 {
            return Some(0);
        }
        let value = self.read_bits(zeros)?;
        Some(((1u64 << zeros) - 1 + value as u64).min(u32::MAX as u64) as u32)
    }

    /// Signed Exp-Golomb.
    pub(crate) fn read_se(&mut self) -> Option<i32> {
        let code = self.read_ue()? as i64;
        let magnitude = (code + 1) / 2;
        Some(if code % 2 == 0 { -magnitude } else { magnitude } as i32)
    }
}

/// Strip `00 00 03` emulation-prevention bytes from a NAL payload.
pub(crate) fn remove_emulation_prevention_bytes(data: &[u8]) -> Vec<u8> {
    let mut cleaned = Vec::with_capacity(data.len());
    let mut index = 0;
    while index < data.len() {
        if index + 2 < data.len() && data[index] == 0 && data[index + 1] == 0 && data[index + 2] == 3 {
            cleaned.push(0);
            cleaned.push(0);
            index += 3;
            continue;
        }
        cleaned.push(data[index]);
        index += 1;
    }
    cleaned
}

pub(crate) fn skip_scaling_list(reader: &mut BitReader<'_>, size: usize) -> Option<()> {
    let mut last_scale = 8i64;
    let mut next_scale = 8i64;
    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = reader.read_se()? as i64;
            next_scale = (last_scale + delta_scale).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Some(())
}

/// How NAL units are delimited inside packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NalFraming {
    /// `00 00 01` / `00 00 00 01` start codes.
    AnnexB,
    /// Big-endian length prefix of the given size (1..=4 bytes).
    LengthPrefixed(usize),
}

/// Split a packet into NAL unit payloads (start codes / length removed).
pub(crate) fn split_nal_units(data: &[u8], framing: NalFraming) -> Vec<&[u8]> {
    match framing {
        NalFraming::AnnexB => split_start_code_units(data),
        NalFraming::LengthPrefixed(length_size) => {
            let mut units = Vec::new();
            let mut offset = 0;
            while offset + length_size <= data.len() {
                let length = data[offset..offset + length_size]
                    .iter()
                    .fold(0usize, |value, &byte| (value << 8) | byte as usize);
                offset += length_size;
                if length == 0 || offset + length > data.len() {
                    break;
                }
                units.push(&data[offset..offset + length]);
                offset += length;
            }
            units
        }
    }
}

/// Split on `00 00 01` start codes. Each returned unit starts right after
/// its start code, so for MPEG video `unit[0]` is the start code value.
pub(crate) fn split_start_code_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut index = 0;
    while index + 3 <= data.len() {
        if data[index] == 0 && data[index + 1] == 0 && data[index + 2] == 1 {
            starts.push(index + 3);
            index += 3;
        } else {
            index += 1;
        }
    }
    let mut units = Vec::with_capacity(starts.len());
    for (position, &start) in starts.iter().enumerate() {
        let mut end = starts
            .get(position + 1)
            .map(|next| next - 3)
            .unwrap_or(data.len());
        // Drop the leading zero of a four-byte start code.
        while end > start && data[end - 1] == 0 && position + 1 < starts.len() {
            end -= 1;
        }
        units.push(&data[start..end]);
    }
    units
}
