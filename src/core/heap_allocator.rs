//! Heap slot allocator for the shared physical tile pool.
//!
//! Tracks free/used state of a fixed number of equal-size slots. Pure
//! bookkeeping; the backing memory itself is owned by the backend.

use crate::error::{ResidencyError, ResidencyResult};

/// Default slot size, matching a 64 KiB hardware tile.
pub const TILE_SLOT_BYTES: u64 = 64 * 1024;

/// Fixed-capacity pool of equal-size physical storage slots.
pub struct HeapSlotAllocator {
    used: Vec<bool>,
    free_count: usize,
    slot_bytes: u64,
}

impl HeapSlotAllocator {
    pub fn new(capacity_in_slots: usize, slot_bytes: u64) -> Self {
        Self {
            used: vec![false; capacity_in_slots],
            free_count: capacity_in_slots,
            slot_bytes,
        }
    }

    /// Returns `n` distinct free slot indices and marks them used.
    ///
    /// First-fit scan over the bitmap, restarting at index 0 each call.
    /// All slots are equal size, so fragmentation is not a concern.
    pub fn allocate(&mut self, n: usize) -> ResidencyResult<Vec<u32>> {
        if self.free_count < n {
            return Err(ResidencyError::HeapExhausted {
                requested: n,
                free: self.free_count,
                capacity: self.used.len(),
            });
        }

        let mut indices = Vec::with_capacity(n);
        let mut cursor = 0usize;
        while indices.len() < n {
            if !self.used[cursor] {
                self.used[cursor] = true;
                indices.push(cursor as u32);
            }
            cursor += 1;
        }
        self.free_count -= n;
        Ok(indices)
    }

    /// Marks each slot as free. Freeing an already-free slot is a no-op,
    /// but callers must not rely on that: the allocator has no ownership
    /// verification.
    pub fn free(&mut self, slots: &[u32]) {
        for &slot in slots {
            let idx = slot as usize;
            debug_assert!(idx < self.used.len(), "heap slot {slot} out of range");
            debug_assert!(self.used[idx], "double free of heap slot {slot}");
            if idx < self.used.len() && self.used[idx] {
                self.used[idx] = false;
                self.free_count += 1;
            }
        }
    }

    pub fn is_used(&self, slot: u32) -> bool {
        self.used.get(slot as usize).copied().unwrap_or(false)
    }

    pub fn capacity(&self) -> usize {
        self.used.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free_count
    }

    pub fn used_slots(&self) -> usize {
        self.used.len() - self.free_count
    }

    pub fn slot_bytes(&self) -> u64 {
        self.slot_bytes
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.used.len() as u64 * self.slot_bytes
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_slots() as u64 * self.slot_bytes
    }
}
