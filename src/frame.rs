//! Per-frame metadata records.
//!
//! [`VideoFrameRecord`] and [`AudioFrameRecord`] describe one coded picture
//! or one coded audio packet each, in decoding order. They are produced by
//! the index builder (or the index parser) and consumed by the seek engine.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    ops::{BitOr, BitOrAssign},
};

/// Set of per-record flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(u32);

impl FrameFlags {
    /// No flags.
    pub const NONE: FrameFlags = FrameFlags(0);
    /// Random-access point: decoding can restart here.
    pub const KEY: FrameFlags = FrameFlags(1 << 0);
    /// Presented before the preceding random-access point despite being
    /// decoded after it.
    pub const LEADING: FrameFlags = FrameFlags(1 << 1);
    /// The helper decoder rejected this packet during indexing.
    pub const CORRUPT: FrameFlags = FrameFlags(1 << 2);
    /// Decoded but never presented (VP8/VP9 alt-ref frames).
    pub const INVISIBLE: FrameFlags = FrameFlags(1 << 3);
    /// A single field whose complementary field is missing.
    pub const COUNTERPART_MISSING: FrameFlags = FrameFlags(1 << 4);
    /// Second field of a complementary field pair.
    pub const SECOND_FIELD: FrameFlags = FrameFlags(1 << 5);

    /// Flags that are observed while scanning and therefore persisted.
    /// The others are derived after the scan.
    pub const PERSISTED: FrameFlags = FrameFlags(Self::CORRUPT.0 | Self::INVISIBLE.0);

    /// Raw bit representation.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping unknown bits.
    pub fn from_bits_truncate(bits: u32) -> Self {
        FrameFlags(bits & 0x3F)
    }

    /// Whether all bits of `other` are set.
    pub fn contains(&self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: FrameFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: FrameFlags) {
        self.0 &= !other.0;
    }

    /// Keep only the bits that are also in `other`.
    pub fn intersection(&self, other: FrameFlags) -> FrameFlags {
        FrameFlags(self.0 & other.0)
    }
}

impl BitOr for FrameFlags {
    type Output = FrameFlags;

    fn bitor(self, rhs: FrameFlags) -> FrameFlags {
        FrameFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for FrameFlags {
    fn bitor_assign(&mut self, rhs: FrameFlags) {
        self.0 |= rhs.0;
    }
}

/// Coded picture type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PictureType {
    /// Not known (not parsed, or helper decode failed).
    #[default]
    Unknown,
    /// Intra-coded.
    I,
    /// Forward-predicted.
    P,
    /// Bi-directionally predicted.
    B,
    /// MPEG-4 sprite / H.264 SP.
    S,
    /// H.264 switching intra.
    Si,
}

impl PictureType {
    /// Numeric code used in the persisted index.
    pub fn code(&self) -> u8 {
        match self {
            PictureType::Unknown => 0,
            PictureType::I => 1,
            PictureType::P => 2,
            PictureType::B => 3,
            PictureType::S => 4,
            PictureType::Si => 5,
        }
    }

    /// Inverse of [`code`](PictureType::code).
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => PictureType::Unknown,
            1 => PictureType::I,
            2 => PictureType::P,
            3 => PictureType::B,
            4 => PictureType::S,
            5 => PictureType::Si,
            _ => return None,
        })
    }

    /// Whether other pictures may reference this one (I, P, S, SI).
    pub fn is_anchor(&self) -> bool {
        matches!(
            self,
            PictureType::I | PictureType::P | PictureType::S | PictureType::Si
        )
    }
}

impl Display for PictureType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let letter = match self {
            PictureType::Unknown => "?",
            PictureType::I => "I",
            PictureType::P => "P",
            PictureType::B => "B",
            PictureType::S => "S",
            PictureType::Si => "SI",
        };
        f.write_str(letter)
    }
}

/// Which field of an interlaced picture is displayed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FieldOrder {
    /// Progressive or not known.
    #[default]
    Unknown,
    /// Top field first.
    TopFirst,
    /// Bottom field first.
    BottomFirst,
}

impl FieldOrder {
    /// Numeric code used in the persisted index.
    pub fn code(&self) -> u8 {
        match self {
            FieldOrder::Unknown => 0,
            FieldOrder::TopFirst => 1,
            FieldOrder::BottomFirst => 2,
        }
    }

    /// Inverse of [`code`](FieldOrder::code).
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => FieldOrder::Unknown,
            1 => FieldOrder::TopFirst,
            2 => FieldOrder::BottomFirst,
            _ => return None,
        })
    }
}

/// Whether a coded picture is a full frame or a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PictureStructure {
    /// Frame picture (progressive or MBAFF).
    #[default]
    Frame,
    /// Top field only.
    TopField,
    /// Bottom field only.
    BottomField,
}

impl PictureStructure {
    /// Numeric code used in the persisted index.
    pub fn code(&self) -> u8 {
        match self {
            PictureStructure::Frame => 0,
            PictureStructure::TopField => 1,
            PictureStructure::BottomField => 2,
        }
    }

    /// Inverse of [`code`](PictureStructure::code).
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => PictureStructure::Frame,
            1 => PictureStructure::TopField,
            2 => PictureStructure::BottomField,
            _ => return None,
        })
    }

    /// Whether this is a single field.
    pub fn is_field(&self) -> bool {
        !matches!(self, PictureStructure::Frame)
    }

    /// Whether `other` is the opposite parity field of `self`.
    pub fn complements(&self, other: PictureStructure) -> bool {
        matches!(
            (self, other),
            (PictureStructure::TopField, PictureStructure::BottomField)
                | (PictureStructure::BottomField, PictureStructure::TopField)
        )
    }
}

/// Metadata for one coded video picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrameRecord {
    /// Presentation timestamp in stream ticks.
    pub pts: Option<i64>,
    /// Decoding timestamp in stream ticks.
    pub dts: Option<i64>,
    /// Byte offset of the packet in the file.
    pub position: Option<i64>,
    /// Dense 0-based decoding-order number.
    pub sample_number: u32,
    /// Index into the stream's decoder configuration table.
    pub epoch: u32,
    /// Key flag as observed while scanning (container flag or bitstream).
    pub coded_key: bool,
    /// Record flags. `KEY` is the deduplicated flag.
    pub flags: FrameFlags,
    /// Coded picture type.
    pub picture_type: PictureType,
    /// Picture order count, when known.
    pub poc: Option<i32>,
    /// Extra fields beyond two: 0 normal, 1 repeat first field, 2 frame
    /// doubling, 4 frame tripling.
    pub repeat_pict: u8,
    /// Field polarity.
    pub field_order: FieldOrder,
    /// Frame or single-field picture.
    pub structure: PictureStructure,
    /// Coded width, 0 when unknown.
    pub width: u32,
    /// Coded height, 0 when unknown.
    pub height: u32,
    /// Pixel format name, empty when unknown.
    pub pixel_format: String,
}

impl VideoFrameRecord {
    /// Whether this record is a (deduplicated) random-access point.
    pub fn is_key(&self) -> bool {
        self.flags.contains(FrameFlags::KEY)
    }

    /// Whether this record becomes an output picture of its own.
    pub fn is_presented(&self) -> bool {
        !self.flags.contains(FrameFlags::INVISIBLE) && !self.flags.contains(FrameFlags::SECOND_FIELD)
    }

    /// Number of fields this picture contributes when repeat flags are
    /// honoured.
    pub fn field_count(&self) -> u32 {
        if self.flags.contains(FrameFlags::COUNTERPART_MISSING) {
            return 0;
        }
        2 + self.repeat_pict as u32
    }
}

/// Metadata for one coded audio packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrameRecord {
    /// Presentation timestamp in stream ticks.
    pub pts: Option<i64>,
    /// Decoding timestamp in stream ticks.
    pub dts: Option<i64>,
    /// Byte offset of the packet in the file.
    pub position: Option<i64>,
    /// Dense 0-based decoding-order number.
    pub sample_number: u32,
    /// Index into the stream's decoder configuration table.
    pub epoch: u32,
    /// Sample rate of this packet.
    pub sample_rate: u32,
    /// Decoded samples per channel, -1 when still unknown.
    pub length: i32,
}
