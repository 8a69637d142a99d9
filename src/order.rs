//! Presentation/decoding order maps.

/// Maps presentation frame numbers to decoding-order sample numbers and back.
///
/// Only built when a stream reorders pictures or carries records that are
/// never presented on their own. Everywhere else the two orders are the
/// same and callers pass `None` (see [`to_decoding`] and [`to_presentation`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderConverter {
    presentation_to_decoding: Vec<u32>,
    decoding_to_presentation: Vec<Option<u32>>,
}

impl OrderConverter {
    /// Build from the decoding-order samples listed in presentation order.
    /// Samples missing from `presentation_order` are not presented.
    pub fn new(presentation_order: Vec<u32>, sample_count: usize) -> Self {
        let mut decoding_to_presentation = vec![None; sample_count];
        for (presentation, &sample) in presentation_order.iter().enumerate() {
            if let Some(slot) = decoding_to_presentation.get_mut(sample as usize) {
                *slot = Some(presentation as u32);
            }
        }
        Self {
            presentation_to_decoding: presentation_order,
            decoding_to_presentation,
        }
    }

    /// Decoding-order sample of presentation frame `presentation`.
    pub fn decoding(&self, presentation: u32) -> Option<u32> {
        self.presentation_to_decoding.get(presentation as usize).copied()
    }

    /// Presentation frame of decoding-order sample `sample`, if presented.
    pub fn presentation(&self, sample: u32) -> Option<u32> {
        self.decoding_to_presentation
            .get(sample as usize)
            .copied()
            .flatten()
    }

    /// Number of presented frames.
    pub fn presented_count(&self) -> u32 {
        self.presentation_to_decoding.len() as u32
    }
}

/// Decoding-order sample of `presentation`, treating `None` as identity.
pub fn to_decoding(converter: Option<&OrderConverter>, presentation: u32) -> u32 {
    match converter {
        Some(converter) => converter.decoding(presentation).unwrap_or(presentation),
        None => presentation,
    }
}

/// Presentation frame of `sample`, treating `None` as identity.
pub fn to_presentation(converter: Option<&OrderConverter>, sample: u32) -> Option<u32> {
    match converter {
        Some(converter) => converter.presentation(sample),
        None => Some(sample),
    }
}

/// Deduplicated random-access flags in decoding order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyframeList {
    flags: Vec<bool>,
}

impl KeyframeList {
    /// Wrap per-sample flags.
    pub fn new(flags: Vec<bool>) -> Self {
        Self { flags }
    }

    /// Whether decoding-order sample `sample` is a random-access point.
    pub fn is_key(&self, sample: u32) -> bool {
        self.flags.get(sample as usize).copied().unwrap_or(false)
    }

    /// Latest random-access point at or before `sample`.
    pub fn at_or_before(&self, sample: u32) -> Option<u32> {
        let end = (sample as usize + 1).min(self.flags.len());
        self.flags[..end]
            .iter()
            .rposition(|&key| key)
            .map(|position| position as u32)
    }

    /// Latest random-access point strictly before `sample`.
    pub fn before(&self, sample: u32) -> Option<u32> {
        if sample == 0 {
            return None;
        }
        self.at_or_before(sample - 1)
    }

    /// Decoding-order samples of all random-access points.
    pub fn samples(&self) -> impl Iterator<Item = u32> + '_ {
        self.flags
            .iter()
            .enumerate()
            .filter(|(_, key)| **key)
            .map(|(sample, _)| sample as u32)
    }

    /// Number of random-access points.
    pub fn count(&self) -> usize {
        self.flags.iter().filter(|&&key| key).count()
    }

    /// Number of samples covered.
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Whether the list covers no samples.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}
