//! Raw packet-level iteration.
//!
//! [`PacketIterator`] walks the demuxed packets of an opened [`Demuxer`]
//! without decoding, optionally keeping only one stream. [`PacketCursor`]
//! builds on it to hand the seek engine the packets of the stream it is
//! decoding, each tagged with its sample number.

use std::collections::HashMap;

use crate::{
    backend::{Decoder, Demuxer, Packet, SeekBasis, SeekFlags, SeekTableEntry},
    error::FramedexError,
    extradata::DecoderConfiguration,
    timeline::basis_value,
};

/// A lazy iterator over demuxed packets.
///
/// The iterator borrows the demuxer mutably. It stops after the first error.
pub struct PacketIterator<'a> {
    demuxer: &'a mut dyn Demuxer,
    stream_index: Option<usize>,
    done: bool,
}

impl<'a> PacketIterator<'a> {
    /// Iterate over packets of every stream.
    pub fn new(demuxer: &'a mut dyn Demuxer) -> Self {
        Self {
            demuxer,
            stream_index: None,
            done: false,
        }
    }

    /// Iterate over packets of `stream_index` only.
    pub fn for_stream(demuxer: &'a mut dyn Demuxer, stream_index: usize) -> Self {
        Self {
            demuxer,
            stream_index: Some(stream_index),
            done: false,
        }
    }
}

impl Iterator for PacketIterator<'_> {
    type Item = Result<Packet, FramedexError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.demuxer.read_packet() {
                Ok(Some(packet)) => {
                    if self
                        .stream_index
                        .is_some_and(|stream_index| stream_index != packet.stream_index)
                    {
                        continue;
                    }
                    return Some(Ok(packet));
                }
                Ok(None) => self.done = true,
                Err(error) => {
                    self.done = true;
                    return Some(Err(error));
                }
            }
        }
        None
    }
}

/// Packets of one stream, identified by decoding-order sample number.
///
/// Packets are recognised by their seek-basis value when the stream has
/// one; otherwise they are counted from the start of the file. Positioning
/// tries a backward seek first and falls back to a rewind and rescan when
/// the demuxer refuses or lands past the target.
pub(crate) struct PacketCursor {
    demuxer: Box<dyn Demuxer>,
    stream_index: usize,
    basis: Option<SeekBasis>,
    /// Seek-basis value to sample number.
    basis_samples: HashMap<i64, u32>,
    /// Packet to hand out before reading more.
    pending: Option<(Packet, u32)>,
    last_sample: Option<u32>,
}

impl PacketCursor {
    pub(crate) fn new(
        mut demuxer: Box<dyn Demuxer>,
        stream_index: usize,
        basis: Option<SeekBasis>,
        values: impl IntoIterator<Item = (Option<i64>, u32)>,
        seek_table: &[SeekTableEntry],
    ) -> Self {
        if !seek_table.is_empty() {
            demuxer.restore_seek_table(stream_index, seek_table);
        }
        let basis_samples = match basis {
            Some(_) => values
                .into_iter()
                .filter_map(|(value, sample)| value.map(|value| (value, sample)))
                .collect(),
            None => HashMap::new(),
        };
        Self {
            demuxer,
            stream_index,
            basis,
            basis_samples,
            pending: None,
            last_sample: None,
        }
    }

    pub(crate) fn open_decoder(
        &mut self,
        configuration: &DecoderConfiguration,
        threads: u32,
    ) -> Result<Box<dyn Decoder>, FramedexError> {
        self.demuxer.open_decoder(self.stream_index, configuration, threads)
    }

    /// Position so the next packet handed out is `sample`, whose seek-basis
    /// value is `target`.
    pub(crate) fn position_at(&mut self, sample: u32, target: Option<i64>) -> Result<(), FramedexError> {
        self.pending = None;
        self.last_sample = None;
        if let (Some(basis), Some(target)) = (self.basis, target) {
            match self.demuxer.seek(self.stream_index, target, basis, SeekFlags::BACKWARD) {
                Ok(()) => {
                    if let Some(packet) = self.scan_for(sample, false)? {
                        self.pending = Some((packet, sample));
                        return Ok(());
                    }
                    log::debug!("Seek for sample {sample} landed past it, rescanning from the start");
                }
                Err(error) => log::debug!("Seek for sample {sample} failed ({error}), rescanning from the start"),
            }
        }
        self.demuxer.rewind()?;
        let packet = self.scan_for(sample, true)?.ok_or_else(|| FramedexError::SeekFailed {
            stream_index: self.stream_index,
            sample,
            reason: "packet not found".to_string(),
        })?;
        self.pending = Some((packet, sample));
        Ok(())
    }

    /// Next packet and its sample number. Unrecognised packets are assumed
    /// to follow the previous one.
    pub(crate) fn next_packet(&mut self) -> Result<Option<(Packet, u32)>, FramedexError> {
        let next = match self.pending.take() {
            Some(pending) => Some(pending),
            None => {
                let expected = self.last_sample.map(|sample| sample + 1).unwrap_or(0);
                match PacketIterator::for_stream(self.demuxer.as_mut(), self.stream_index).next() {
                    Some(packet) => {
                        let packet = packet?;
                        let sample = identify(self.basis, &self.basis_samples, &packet).unwrap_or(expected);
                        Some((packet, sample))
                    }
                    None => None,
                }
            }
        };
        if let Some((_, sample)) = &next {
            self.last_sample = Some(*sample);
        }
        Ok(next)
    }

    /// Read packets until the one for `sample` comes up. `None` when the
    /// demuxer is already past it or the stream ends first.
    fn scan_for(&mut self, sample: u32, from_start: bool) -> Result<Option<Packet>, FramedexError> {
        let mut counted = 0u32;
        for packet in PacketIterator::for_stream(self.demuxer.as_mut(), self.stream_index) {
            let packet = packet?;
            let identified = identify(self.basis, &self.basis_samples, &packet).or(from_start.then_some(counted));
            counted += 1;
            match identified {
                Some(found) if found == sample => return Ok(Some(packet)),
                Some(found) if found > sample => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }
}

fn identify(basis: Option<SeekBasis>, basis_samples: &HashMap<i64, u32>, packet: &Packet) -> Option<u32> {
    let value = basis_value(basis?, packet.pts, packet.dts, packet.position)?;
    basis_samples.get(&value).copied()
}
