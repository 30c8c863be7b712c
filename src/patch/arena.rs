//! Free-list-backed arena owning every field-data buffer of a rank.
//!
//! Buffers are addressed by generation-checked [`BufferHandle`]s: releasing a
//! slot bumps its generation, so a stale handle is rejected instead of
//! silently aliasing the buffer of a newer patch.

use core::fmt::{self, Debug};

use crate::engine_error::EngineError;

/// Generation-checked index of one buffer in a [`DataArena`].
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    index: u32,
    generation: u32,
}

impl BufferHandle {
    /// Sentinel carried by descriptors that own no buffer.
    pub const UNALLOCATED: BufferHandle = BufferHandle {
        index: u32::MAX,
        generation: 0,
    };

    #[inline]
    pub fn is_allocated(self) -> bool {
        self.index != u32::MAX
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

impl Default for BufferHandle {
    fn default() -> Self {
        Self::UNALLOCATED
    }
}

impl Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_allocated() {
            write!(f, "BufferHandle({}@{})", self.index, self.generation)
        } else {
            f.write_str("BufferHandle(unallocated)")
        }
    }
}

struct Slot {
    generation: u32,
    data: Option<Vec<f64>>,
}

/// Contiguous arena of `f64` buffers with slot reuse.
#[derive(Default)]
pub struct DataArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl DataArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zero-filled buffer of `len` values.
    pub fn allocate(&mut self, len: usize) -> BufferHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.data = Some(vec![0.0; len]);
            return BufferHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            data: Some(vec![0.0; len]),
        });
        BufferHandle {
            index,
            generation: 0,
        }
    }

    /// Release a live buffer; its slot becomes reusable under a new generation.
    pub fn release(&mut self, handle: BufferHandle) -> Result<(), EngineError> {
        let slot = self.live_slot_mut(handle)?;
        slot.data = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Ok(())
    }

    #[inline]
    pub fn is_valid(&self, handle: BufferHandle) -> bool {
        self.live_slot(handle).is_ok()
    }

    pub fn get(&self, handle: BufferHandle) -> Result<&[f64], EngineError> {
        self.live_slot(handle)?
            .data
            .as_deref()
            .ok_or(EngineError::InvalidBufferHandle(handle))
    }

    pub fn get_mut(&mut self, handle: BufferHandle) -> Result<&mut [f64], EngineError> {
        self.live_slot_mut(handle)?
            .data
            .as_deref_mut()
            .ok_or(EngineError::InvalidBufferHandle(handle))
    }

    /// Mutable access to two distinct buffers at once.
    pub fn get_pair_mut(
        &mut self,
        a: BufferHandle,
        b: BufferHandle,
    ) -> Result<(&mut [f64], &mut [f64]), EngineError> {
        self.live_slot(a)?;
        self.live_slot(b)?;
        if a.index == b.index {
            return Err(EngineError::InvalidBufferHandle(b));
        }
        let (lo, hi, swapped) = if a.index < b.index {
            (a.index as usize, b.index as usize, false)
        } else {
            (b.index as usize, a.index as usize, true)
        };
        let (head, tail) = self.slots.split_at_mut(hi);
        let first = head[lo]
            .data
            .as_deref_mut()
            .ok_or(EngineError::InvalidBufferHandle(a))?;
        let second = tail[0]
            .data
            .as_deref_mut()
            .ok_or(EngineError::InvalidBufferHandle(b))?;
        Ok(if swapped { (second, first) } else { (first, second) })
    }

    /// Number of buffers currently allocated.
    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    fn live_slot(&self, handle: BufferHandle) -> Result<&Slot, EngineError> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation && s.data.is_some())
            .ok_or(EngineError::InvalidBufferHandle(handle))
    }

    fn live_slot_mut(&mut self, handle: BufferHandle) -> Result<&mut Slot, EngineError> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation && s.data.is_some())
            .ok_or(EngineError::InvalidBufferHandle(handle))
    }
}

impl Debug for DataArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataArena")
            .field("slots", &self.slots.len())
            .field("live", &self.live)
            .field("free", &self.free.len())
            .finish()
    }
}
