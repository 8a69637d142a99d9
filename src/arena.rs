//! Small fixed-capacity frame cache.
//!
//! The seek engine keeps the last two decoded pictures keyed by sample
//! number, so that a repeated request or a field weave across two pictures
//! does not decode anything twice. Entries are reached through
//! [`FrameHandle`]s that carry the generation of the slot they point at; a
//! handle to an evicted entry resolves to `None` instead of to whatever
//! replaced it.

/// Generation-checked reference to an arena entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHandle {
    slot: usize,
    generation: u64,
}

struct Slot<T> {
    key: u32,
    generation: u64,
    value: T,
}

/// A two-slot cache.
pub(crate) struct FrameArena<T> {
    slots: [Option<Slot<T>>; 2],
    generation: u64,
    /// Slot the next new key will overwrite.
    victim: usize,
}

impl<T> Default for FrameArena<T> {
    fn default() -> Self {
        Self {
            slots: [None, None],
            generation: 0,
            victim: 0,
        }
    }
}

impl<T> FrameArena<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing an entry with the same key or
    /// else the less recently stored of the two entries.
    pub(crate) fn insert(&mut self, key: u32, value: T) -> FrameHandle {
        self.generation += 1;
        let slot = self.position(key).unwrap_or(self.victim);
        self.victim = 1 - slot;
        self.slots[slot] = Some(Slot {
            key,
            generation: self.generation,
            value,
        });
        FrameHandle {
            slot,
            generation: self.generation,
        }
    }

    /// Handle to the entry stored under `key`.
    pub(crate) fn find(&self, key: u32) -> Option<FrameHandle> {
        let slot = self.position(key)?;
        self.slots[slot].as_ref().map(|entry| FrameHandle {
            slot,
            generation: entry.generation,
        })
    }

    /// Resolve a handle. `None` once its entry has been replaced.
    pub(crate) fn get(&self, handle: FrameHandle) -> Option<&T> {
        self.slots[handle.slot]
            .as_ref()
            .filter(|entry| entry.generation == handle.generation)
            .map(|entry| &entry.value)
    }

    fn position(&self, key: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|entry| entry.key == key))
    }
}

