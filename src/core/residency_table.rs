//! Per-surface, per-tile residency state.
//!
//! Pure state, decoupled from the allocator and the mapping commit so
//! decode decisions and commit batching can be tested independently.
//! The per-tile tuple (residency, timestamp, heap slot) lives in a flat
//! arena indexed by a computed `(mip, y, x)` offset.

use std::time::Instant;

use glam::UVec2;

/// Whether a tile currently has physical memory backing it.
///
/// Loading/Evicting are covered by pending-list membership in the update
/// manager rather than extra states here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Residency {
    NotResident = 0,
    Resident = 1,
}

#[derive(Debug, Clone, Copy)]
struct TileState {
    residency: Residency,
    last_access: Instant,
    heap_slot: u32,
}

/// Residency, last-access timestamp and assigned heap slot for every
/// tile of one surface's standard region.
pub struct TileResidencyTable {
    mips: Vec<UVec2>,
    offsets: Vec<usize>,
    states: Vec<TileState>,
}

impl TileResidencyTable {
    /// Sized from the surface's per-mip tile grids; all tiles start
    /// NotResident with `now` as their timestamp.
    pub fn new(mips: &[UVec2], now: Instant) -> Self {
        let mut offsets = Vec::with_capacity(mips.len());
        let mut total = 0usize;
        for extent in mips {
            offsets.push(total);
            total += (extent.x * extent.y) as usize;
        }

        Self {
            mips: mips.to_vec(),
            offsets,
            states: vec![
                TileState {
                    residency: Residency::NotResident,
                    last_access: now,
                    heap_slot: 0,
                };
                total
            ],
        }
    }

    fn index(&self, x: u32, y: u32, mip: u32) -> usize {
        let extent = self.mips[mip as usize];
        debug_assert!(x < extent.x && y < extent.y);
        self.offsets[mip as usize] + (y * extent.x + x) as usize
    }

    pub fn is_resident(&self, x: u32, y: u32, mip: u32) -> bool {
        self.states[self.index(x, y, mip)].residency == Residency::Resident
    }

    pub fn is_not_resident(&self, x: u32, y: u32, mip: u32) -> bool {
        !self.is_resident(x, y, mip)
    }

    pub fn set_resident(&mut self, x: u32, y: u32, mip: u32) {
        let idx = self.index(x, y, mip);
        self.states[idx].residency = Residency::Resident;
    }

    pub fn set_not_resident(&mut self, x: u32, y: u32, mip: u32) {
        let idx = self.index(x, y, mip);
        self.states[idx].residency = Residency::NotResident;
    }

    pub fn timestamp(&self, x: u32, y: u32, mip: u32) -> Instant {
        self.states[self.index(x, y, mip)].last_access
    }

    pub fn set_timestamp(&mut self, x: u32, y: u32, mip: u32, time: Instant) {
        let idx = self.index(x, y, mip);
        self.states[idx].last_access = time;
    }

    /// Assigned heap slot; only meaningful while the tile is resident.
    pub fn heap_slot(&self, x: u32, y: u32, mip: u32) -> u32 {
        self.states[self.index(x, y, mip)].heap_slot
    }

    pub fn set_heap_slot(&mut self, x: u32, y: u32, mip: u32, slot: u32) {
        let idx = self.index(x, y, mip);
        self.states[idx].heap_slot = slot;
    }

    pub fn mip_count(&self) -> u32 {
        self.mips.len() as u32
    }

    pub fn mip_extent(&self, mip: u32) -> UVec2 {
        self.mips[mip as usize]
    }

    pub fn tile_count(&self) -> usize {
        self.states.len()
    }

    pub fn resident_count(&self) -> usize {
        self.states
            .iter()
            .filter(|s| s.residency == Residency::Resident)
            .count()
    }

    /// Residency and slot of every tile in `(mip, y, x)` arena order.
    pub fn entries(&self) -> impl Iterator<Item = (Residency, u32)> + '_ {
        self.states.iter().map(|s| (s.residency, s.heap_slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn table() -> TileResidencyTable {
        TileResidencyTable::new(
            &[UVec2::new(4, 2), UVec2::new(2, 1)],
            Instant::now(),
        )
    }

    #[test]
    fn test_arena_layout() {
        let t = table();
        assert_eq!(t.tile_count(), 8 + 2);
        assert_eq!(t.mip_count(), 2);
        assert_eq!(t.mip_extent(1), UVec2::new(2, 1));
    }

    #[test]
    fn test_residency_flip() {
        let mut t = table();
        assert!(t.is_not_resident(3, 1, 0));

        t.set_resident(3, 1, 0);
        assert!(t.is_resident(3, 1, 0));
        // a neighbour in the flat arena is unaffected
        assert!(t.is_not_resident(2, 1, 0));
        assert!(t.is_not_resident(0, 0, 1));

        t.set_not_resident(3, 1, 0);
        assert!(t.is_not_resident(3, 1, 0));
    }

    #[test]
    fn test_timestamp_and_slot() {
        let mut t = table();
        let later = Instant::now() + Duration::from_secs(7);

        t.set_timestamp(1, 0, 1, later);
        t.set_heap_slot(1, 0, 1, 42);

        assert_eq!(t.timestamp(1, 0, 1), later);
        assert_eq!(t.heap_slot(1, 0, 1), 42);
    }

    #[test]
    fn test_resident_count() {
        let mut t = table();
        t.set_resident(0, 0, 0);
        t.set_resident(1, 1, 0);
        t.set_resident(0, 0, 1);
        assert_eq!(t.resident_count(), 3);
    }
}
