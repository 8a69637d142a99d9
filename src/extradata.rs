//! Decoder-configuration epochs.
//!
//! A stream starts with the configuration its container advertises. Some
//! containers splice several encodes together, or carry new out-of-band
//! configuration as packet side data; every distinct configuration seen on a
//! stream becomes an *epoch*, and each frame record refers to its epoch by
//! index.

/// One decoder-configuration epoch.
///
/// The video fields (`width`, `height`, `pixel_format`) hold the largest
/// geometry seen under this epoch. The audio fields describe the sample
/// layout the decoder is expected to produce.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecoderConfiguration {
    /// Backend codec identifier.
    pub codec_id: u32,
    /// Short codec name, e.g. `h264` or `aac`.
    pub codec_name: String,
    /// Out-of-band configuration blob (avcC, hvcC, AudioSpecificConfig...).
    pub extradata: Vec<u8>,
    /// Largest coded width seen under this epoch.
    pub width: u32,
    /// Largest coded height seen under this epoch.
    pub height: u32,
    /// Pixel format name.
    pub pixel_format: String,
    /// Audio channel count.
    pub channels: u32,
    /// Audio channel layout mask.
    pub channel_layout: u64,
    /// Audio sample rate.
    pub sample_rate: u32,
    /// Audio sample format name.
    pub sample_format: String,
    /// Bits per coded sample.
    pub bits_per_sample: u32,
    /// Audio block alignment.
    pub block_align: u32,
}

impl DecoderConfiguration {
    /// Whether two configurations would initialise a decoder identically.
    pub fn same_decoder_setup(&self, other: &DecoderConfiguration) -> bool {
        self.codec_id == other.codec_id && self.extradata == other.extradata
    }
}

/// The epochs of one stream, in order of first appearance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigurationTable {
    entries: Vec<DecoderConfiguration>,
}

impl ConfigurationTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding the given entries as-is.
    pub fn from_entries(entries: Vec<DecoderConfiguration>) -> Self {
        Self { entries }
    }

    /// Return the epoch index for `configuration`, appending it only when no
    /// earlier epoch has the same codec and configuration bytes.
    pub fn intern(&mut self, configuration: DecoderConfiguration) -> u32 {
        if let Some(position) = self
            .entries
            .iter()
            .position(|entry| entry.same_decoder_setup(&configuration))
        {
            return position as u32;
        }
        self.entries.push(configuration);
        (self.entries.len() - 1) as u32
    }

    /// Look up an epoch.
    pub fn get(&self, epoch: u32) -> Option<&DecoderConfiguration> {
        self.entries.get(epoch as usize)
    }

    /// Widen the recorded video geometry of an epoch.
    pub(crate) fn observe_picture(&mut self, epoch: u32, width: u32, height: u32, pixel_format: &str) {
        if let Some(entry) = self.entries.get_mut(epoch as usize) {
            entry.width = entry.width.max(width);
            entry.height = entry.height.max(height);
            if entry.pixel_format.is_empty() && !pixel_format.is_empty() {
                entry.pixel_format = pixel_format.to_string();
            }
        }
    }

    /// Number of epochs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no epochs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All epochs in index order.
    pub fn entries(&self) -> &[DecoderConfiguration] {
        &self.entries
    }
}
