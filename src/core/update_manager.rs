//! Tile update manager: the per-cycle residency orchestrator.
//!
//! Owns one residency table per surface and the shared heap allocator,
//! and drives the decode → commit → clear-feedback cycle across the
//! managed surfaces. A rolling window bounds how many surfaces are
//! processed per cycle; the window wraps so every surface is visited
//! within `ceil(total / max_surfaces_per_cycle)` cycles.

use std::mem;
use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use glam::UVec2;
use log::{debug, warn};

use crate::backend::TileBackend;
use crate::core::feedback::FeedbackReady;
use crate::core::heap_allocator::{HeapSlotAllocator, TILE_SLOT_BYTES};
use crate::core::residency_table::TileResidencyTable;
use crate::error::ResidencyResult;
use crate::surface::{SurfaceTiling, TexelRect, TileCoord};

/// Tile update manager configuration
#[derive(Debug, Clone)]
pub struct TileUpdateConfig {
    /// Capacity of the shared physical pool, in slots
    pub heap_capacity_in_slots: usize,
    /// Size of one pool slot in bytes
    pub slot_size_bytes: u64,
    /// How long a tile may go unused before it becomes an eviction
    /// candidate
    pub eviction_timeout: Duration,
    /// Upper bound on surfaces processed per cycle
    pub max_surfaces_per_cycle: usize,
    /// Number of the coarsest standard mips to map permanently at
    /// construction, excluded from the feedback loop
    pub pre_allocated_mips: u32,
}

impl Default for TileUpdateConfig {
    fn default() -> Self {
        Self {
            heap_capacity_in_slots: 1024,
            slot_size_bytes: TILE_SLOT_BYTES,
            eviction_timeout: Duration::from_secs(5),
            max_surfaces_per_cycle: 10,
            pre_allocated_mips: 0,
        }
    }
}

/// One row of a surface's residency snapshot, laid out for direct
/// upload as a shader-visible indirection table.
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PageEntry {
    /// 1 when the tile has physical backing
    pub resident: u32,
    /// Assigned heap slot, valid only when `resident` is 1
    pub heap_slot: u32,
}

/// Residency telemetry snapshot; pure reads, no side effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResidencyStats {
    /// Slots currently in use (demand-paged, pre-allocated and packed)
    pub resident_tiles: usize,
    /// `resident_tiles` × slot size
    pub mapped_bytes: u64,
    /// Tiles mapped since construction
    pub total_loads: u64,
    /// Tiles unmapped since construction
    pub total_evictions: u64,
    /// Load requests dropped because the pool was full
    pub dropped_loads: u64,
    /// Completed `run_cycle` invocations
    pub cycles: u64,
}

struct SurfaceRuntime {
    tiling: SurfaceTiling,
    table: TileResidencyTable,
    /// Standard mips participating in the feedback loop; coarser
    /// standard mips are pre-allocated and never revisited.
    feedback_mips: u32,
    pending_loads: Vec<TileCoord>,
    pending_evicts: Vec<TileCoord>,
    /// Heap slots of `pending_evicts`, captured at decision time.
    pending_evict_slots: Vec<u32>,
}

/// Orchestrates tile residency for a set of surfaces sharing one
/// physical pool.
pub struct TileUpdateManager {
    config: TileUpdateConfig,
    surfaces: Vec<SurfaceRuntime>,
    heap: HeapSlotAllocator,
    window_start: usize,
    total_loads: u64,
    total_evictions: u64,
    dropped_loads: u64,
    cycles: u64,
}

impl TileUpdateManager {
    /// Builds residency state for every backend surface, maps each
    /// packed region, and permanently maps any pre-allocated mips.
    pub fn new<B: TileBackend>(
        backend: &mut B,
        config: TileUpdateConfig,
    ) -> ResidencyResult<Self> {
        let now = Instant::now();
        let mut surfaces = Vec::with_capacity(backend.surface_count());

        for index in 0..backend.surface_count() {
            let tiling = backend.tiling(index).clone();
            let feedback_mips = tiling
                .standard_mip_count()
                .saturating_sub(config.pre_allocated_mips);
            let table =
                TileResidencyTable::new(&tiling.standard_extents()[..feedback_mips as usize], now);

            surfaces.push(SurfaceRuntime {
                tiling,
                table,
                feedback_mips,
                pending_loads: Vec::new(),
                pending_evicts: Vec::new(),
                pending_evict_slots: Vec::new(),
            });
        }

        let mut manager = Self {
            heap: HeapSlotAllocator::new(config.heap_capacity_in_slots, config.slot_size_bytes),
            config,
            surfaces,
            window_start: 0,
            total_loads: 0,
            total_evictions: 0,
            dropped_loads: 0,
            cycles: 0,
        };

        for index in 0..manager.surfaces.len() {
            manager.map_packed_region(backend, index)?;
            manager.pre_allocate_mips(backend, index)?;
        }

        Ok(manager)
    }

    /// Maps the packed region (coarsest, untileable mips) as one unit.
    /// The backend clears it to the zero baseline as part of the map.
    fn map_packed_region<B: TileBackend>(
        &mut self,
        backend: &mut B,
        index: usize,
    ) -> ResidencyResult<()> {
        let count = self.surfaces[index].tiling.packed_tile_count() as usize;
        if count == 0 {
            return Ok(());
        }
        let slots = self.heap.allocate(count)?;
        backend.map_packed_region(index, &slots)
    }

    /// Permanently maps the coarsest `pre_allocated_mips` standard mips.
    /// These sit above the residency table's coverage and are never
    /// decoded, so they can never be evicted.
    fn pre_allocate_mips<B: TileBackend>(
        &mut self,
        backend: &mut B,
        index: usize,
    ) -> ResidencyResult<()> {
        let standard = self.surfaces[index].tiling.standard_mip_count();
        let count = self.config.pre_allocated_mips.min(standard);

        for mip_index in 0..count {
            // mip_index 0 is the coarsest standard mip
            let mip = standard - 1 - mip_index;
            let extent = self.surfaces[index].tiling.mip_extent(mip);

            let mut coords = Vec::with_capacity((extent.x * extent.y) as usize);
            for y in 0..extent.y {
                for x in 0..extent.x {
                    coords.push(TileCoord::new(x, y, mip));
                }
            }

            let slots = self.heap.allocate(coords.len())?;
            backend.map_tiles(index, &coords, &slots)?;

            let rects: Vec<TexelRect> = coords
                .iter()
                .map(|&c| self.surfaces[index].tiling.texel_rect(c))
                .collect();
            backend.clear_regions(index, mip, &rects)?;
        }
        Ok(())
    }

    /// Decode usage signals of surfaces `[start, end)` into pending
    /// load/evict decisions, stamping access times with the current
    /// instant. Requires the cycle's transfer-complete token.
    pub fn process_feedback<B: TileBackend>(
        &mut self,
        backend: &B,
        ready: &FeedbackReady,
        start: usize,
        end: usize,
    ) {
        self.process_feedback_at(backend, ready, start, end, Instant::now());
    }

    /// Decode entry point with an injected timestamp, for deterministic
    /// eviction timing.
    pub fn process_feedback_at<B: TileBackend>(
        &mut self,
        backend: &B,
        _ready: &FeedbackReady,
        start: usize,
        end: usize,
        now: Instant,
    ) {
        for index in start..end {
            self.decode_surface(backend, index, now);
        }
    }

    fn decode_surface<B: TileBackend>(&mut self, backend: &B, index: usize, now: Instant) {
        let timeout = self.config.eviction_timeout;
        let surface = &mut self.surfaces[index];

        for mip in 0..surface.feedback_mips {
            let grid = backend.usage_grid(index, mip);
            let extent = grid.extent();
            debug_assert_eq!(extent, surface.tiling.mip_extent(mip));

            for y in 0..extent.y {
                let row = grid.row(y);
                for x in 0..extent.x {
                    if row[x as usize] != 0 {
                        if surface.table.is_not_resident(x, y, mip) {
                            // flip before commit so the same tile cannot
                            // be queued twice before its mapping lands
                            surface.pending_loads.push(TileCoord::new(x, y, mip));
                            surface.table.set_resident(x, y, mip);
                        }
                        surface.table.set_timestamp(x, y, mip, now);
                    } else if surface.table.is_resident(x, y, mip) {
                        let elapsed =
                            now.saturating_duration_since(surface.table.timestamp(x, y, mip));
                        if elapsed > timeout {
                            surface.pending_evicts.push(TileCoord::new(x, y, mip));
                            surface
                                .pending_evict_slots
                                .push(surface.table.heap_slot(x, y, mip));
                            surface.table.set_not_resident(x, y, mip);
                        }
                    }
                }
            }
        }

        if !surface.pending_loads.is_empty() || !surface.pending_evicts.is_empty() {
            debug!(
                "surface {index}: {} loads, {} evictions pending",
                surface.pending_loads.len(),
                surface.pending_evicts.len()
            );
        }
    }

    /// Commit pending decisions of surfaces `[start, end)`: map and
    /// clear new tiles, clear and unmap evicted ones. Pending lists are
    /// drained; they never survive a cycle.
    pub fn update_tiles<B: TileBackend>(
        &mut self,
        backend: &mut B,
        start: usize,
        end: usize,
    ) -> ResidencyResult<()> {
        for index in start..end {
            if !self.surfaces[index].pending_loads.is_empty() {
                self.commit_loads(backend, index)?;
            }
            if !self.surfaces[index].pending_evicts.is_empty() {
                self.commit_evictions(backend, index)?;
            }
        }
        Ok(())
    }

    fn commit_loads<B: TileBackend>(
        &mut self,
        backend: &mut B,
        index: usize,
    ) -> ResidencyResult<()> {
        // Degrade instead of over-committing: requests beyond the free
        // slot count are rolled back to NotResident so later feedback
        // re-requests them.
        let free = self.heap.free_slots();
        let surface = &mut self.surfaces[index];
        if surface.pending_loads.len() > free {
            let dropped = surface.pending_loads.split_off(free);
            for coord in &dropped {
                surface.table.set_not_resident(coord.x, coord.y, coord.mip);
            }
            self.dropped_loads += dropped.len() as u64;
            warn!(
                "surface {index}: pool exhausted, dropped {} of {} tile loads",
                dropped.len(),
                free + dropped.len()
            );
        }
        if surface.pending_loads.is_empty() {
            return Ok(());
        }

        let coords = mem::take(&mut surface.pending_loads);
        let slots = self.heap.allocate(coords.len())?;
        for (coord, &slot) in coords.iter().zip(&slots) {
            surface.table.set_heap_slot(coord.x, coord.y, coord.mip, slot);
        }
        backend.map_tiles(index, &coords, &slots)?;

        // newly mapped slots still hold a previous tenant's bytes;
        // clear exactly the mapped rectangles before they are sampled
        Self::clear_tile_rects(backend, index, &self.surfaces[index], &coords)?;

        self.total_loads += coords.len() as u64;
        Ok(())
    }

    fn commit_evictions<B: TileBackend>(
        &mut self,
        backend: &mut B,
        index: usize,
    ) -> ResidencyResult<()> {
        let surface = &mut self.surfaces[index];
        let coords = mem::take(&mut surface.pending_evicts);
        let slots = mem::take(&mut surface.pending_evict_slots);

        // clear while still mapped, so a slot that lingers mapped in a
        // batched backend never exposes stale data, then vacate
        Self::clear_tile_rects(backend, index, &self.surfaces[index], &coords)?;
        backend.unmap_tiles(index, &coords)?;
        self.heap.free(&slots);

        self.total_evictions += coords.len() as u64;
        Ok(())
    }

    /// Batched per-mip clear of the bounding rectangle of each tile.
    fn clear_tile_rects<B: TileBackend>(
        backend: &mut B,
        index: usize,
        surface: &SurfaceRuntime,
        coords: &[TileCoord],
    ) -> ResidencyResult<()> {
        let mut per_mip: Vec<Vec<TexelRect>> = vec![Vec::new(); surface.feedback_mips as usize];
        for &coord in coords {
            per_mip[coord.mip as usize].push(surface.tiling.texel_rect(coord));
        }
        for (mip, rects) in per_mip.iter().enumerate() {
            if !rects.is_empty() {
                backend.clear_regions(index, mip as u32, rects)?;
            }
        }
        Ok(())
    }

    /// Reset every surface's usage signals to the zero baseline.
    /// Clears all surfaces, not only the cycle's window, as stale
    /// signals on unvisited surfaces would otherwise accumulate.
    pub fn clear_feedback<B: TileBackend>(&mut self, backend: &mut B) -> ResidencyResult<()> {
        for index in 0..self.surfaces.len() {
            backend.clear_feedback(index)?;
        }
        Ok(())
    }

    /// One full decode → commit → clear pass over the current window,
    /// then advance the window.
    pub fn run_cycle<B: TileBackend>(&mut self, backend: &mut B) -> ResidencyResult<()> {
        self.run_cycle_at(backend, Instant::now())
    }

    /// `run_cycle` with an injected timestamp.
    pub fn run_cycle_at<B: TileBackend>(
        &mut self,
        backend: &mut B,
        now: Instant,
    ) -> ResidencyResult<()> {
        let total = self.surfaces.len();
        if total == 0 {
            return Ok(());
        }
        let quota = self.config.max_surfaces_per_cycle.clamp(1, total);
        let start = self.window_start;
        let first_end = total.min(start + quota);

        // up to two contiguous segments: the tail of the surface list,
        // then a wraparound fill from the front
        let mut segments = [(start, first_end), (0, 0)];
        let consumed = first_end - start;
        if consumed < quota {
            segments[1] = (0, quota - consumed);
        }

        for (seg_start, seg_end) in segments {
            if seg_start == seg_end {
                continue;
            }
            let ready = backend.resolve_feedback(seg_start..seg_end)?;
            self.process_feedback_at(backend, &ready, seg_start, seg_end, now);
            self.update_tiles(backend, seg_start, seg_end)?;
        }

        self.clear_feedback(backend)?;
        self.window_start = (start + quota) % total;
        self.cycles += 1;
        Ok(())
    }

    /// First surface index the next cycle will process.
    pub fn window_start(&self) -> usize {
        self.window_start
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Whether a standard-region tile currently has physical backing.
    /// Pre-allocated mips are permanently resident.
    pub fn is_resident(&self, surface: usize, coord: TileCoord) -> bool {
        let s = &self.surfaces[surface];
        if !s.tiling.contains(coord) {
            return false;
        }
        if coord.mip >= s.feedback_mips {
            return true;
        }
        s.table.is_resident(coord.x, coord.y, coord.mip)
    }

    /// Heap slot backing a resident tile.
    pub fn heap_slot(&self, surface: usize, coord: TileCoord) -> Option<u32> {
        let s = &self.surfaces[surface];
        if coord.mip < s.feedback_mips && s.table.is_resident(coord.x, coord.y, coord.mip) {
            Some(s.table.heap_slot(coord.x, coord.y, coord.mip))
        } else {
            None
        }
    }

    /// Residency snapshot of one surface's feedback mips in `(mip, y,
    /// x)` order, ready for upload via `bytemuck::cast_slice`.
    pub fn residency_snapshot(&self, surface: usize) -> Vec<PageEntry> {
        self.surfaces[surface]
            .table
            .entries()
            .map(|(residency, slot)| PageEntry {
                resident: (residency == crate::core::residency_table::Residency::Resident) as u32,
                heap_slot: slot,
            })
            .collect()
    }

    /// Total physical pool size in bytes.
    pub fn pool_capacity_bytes(&self) -> u64 {
        self.heap.capacity_bytes()
    }

    /// Slots in use × slot size.
    pub fn mapped_bytes(&self) -> u64 {
        self.heap.used_bytes()
    }

    pub fn heap(&self) -> &HeapSlotAllocator {
        &self.heap
    }

    pub fn config(&self) -> &TileUpdateConfig {
        &self.config
    }

    pub fn stats(&self) -> ResidencyStats {
        ResidencyStats {
            resident_tiles: self.heap.used_slots(),
            mapped_bytes: self.heap.used_bytes(),
            total_loads: self.total_loads,
            total_evictions: self.total_evictions,
            dropped_loads: self.dropped_loads,
            cycles: self.cycles,
        }
    }

    #[cfg(test)]
    fn pending_counts(&self, surface: usize) -> (usize, usize) {
        (
            self.surfaces[surface].pending_loads.len(),
            self.surfaces[surface].pending_evicts.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_backend::MemoryBackend;

    fn setup(
        grid: UVec2,
        mips: u32,
        heap_slots: usize,
    ) -> (MemoryBackend, TileUpdateManager) {
        let mut backend = MemoryBackend::new();
        backend.allocate_physical_pool(heap_slots, 64);
        backend.create_surface(SurfaceTiling::with_mip_chain(
            UVec2::new(8, 8),
            grid,
            mips,
            0,
            0,
        ));
        let manager = TileUpdateManager::new(
            &mut backend,
            TileUpdateConfig {
                heap_capacity_in_slots: heap_slots,
                slot_size_bytes: 64,
                ..Default::default()
            },
        )
        .unwrap();
        (backend, manager)
    }

    #[test]
    fn test_decode_queues_load_once() {
        let (mut backend, mut manager) = setup(UVec2::new(4, 4), 1, 16);
        backend.touch(0, TileCoord::new(1, 1, 0));
        let ready = backend.resolve_feedback(0..1).unwrap();

        let now = Instant::now();
        manager.process_feedback_at(&backend, &ready, 0, 1, now);
        assert_eq!(manager.pending_counts(0), (1, 0));

        // decoding the same signals again must not re-queue: the
        // optimistic flip already marked the tile resident
        manager.process_feedback_at(&backend, &ready, 0, 1, now);
        assert_eq!(manager.pending_counts(0), (1, 0));
    }

    #[test]
    fn test_all_zero_feedback_is_idempotent() {
        let (mut backend, mut manager) = setup(UVec2::new(4, 4), 1, 16);
        let ready = backend.resolve_feedback(0..1).unwrap();
        let now = Instant::now();

        manager.process_feedback_at(&backend, &ready, 0, 1, now);
        manager.process_feedback_at(&backend, &ready, 0, 1, now);
        assert_eq!(manager.pending_counts(0), (0, 0));
        assert_eq!(manager.stats().total_loads, 0);
    }

    #[test]
    fn test_pending_lists_drained_by_commit() {
        let (mut backend, mut manager) = setup(UVec2::new(4, 4), 1, 16);
        backend.touch(0, TileCoord::new(0, 0, 0));
        backend.touch(0, TileCoord::new(3, 3, 0));
        let ready = backend.resolve_feedback(0..1).unwrap();

        manager.process_feedback_at(&backend, &ready, 0, 1, Instant::now());
        manager.update_tiles(&mut backend, 0, 1).unwrap();

        assert_eq!(manager.pending_counts(0), (0, 0));
        assert_eq!(manager.stats().resident_tiles, 2);
        assert!(backend.is_mapped(0, TileCoord::new(0, 0, 0)));
        assert!(backend.is_mapped(0, TileCoord::new(3, 3, 0)));
    }

    #[test]
    fn test_load_batch_truncated_when_pool_full() {
        let (mut backend, mut manager) = setup(UVec2::new(4, 4), 1, 3);
        for y in 0..4 {
            for x in 0..4 {
                backend.touch(0, TileCoord::new(x, y, 0));
            }
        }
        let ready = backend.resolve_feedback(0..1).unwrap();
        manager.process_feedback_at(&backend, &ready, 0, 1, Instant::now());
        manager.update_tiles(&mut backend, 0, 1).unwrap();

        let stats = manager.stats();
        assert_eq!(stats.resident_tiles, 3);
        assert_eq!(stats.total_loads, 3);
        assert_eq!(stats.dropped_loads, 13);
        assert_eq!(manager.heap().free_slots(), 0);
        // dropped tiles rolled back so later feedback can re-request
        assert_eq!(backend.mapped_tile_count(0), 3);
    }

    #[test]
    fn test_packed_region_mapped_at_construction() {
        let mut backend = MemoryBackend::new();
        backend.allocate_physical_pool(8, 64);
        backend.create_surface(SurfaceTiling::with_mip_chain(
            UVec2::new(8, 8),
            UVec2::new(2, 2),
            2,
            3,
            2,
        ));
        let manager =
            TileUpdateManager::new(&mut backend, TileUpdateConfig {
                heap_capacity_in_slots: 8,
                slot_size_bytes: 64,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(backend.packed_slots(0).len(), 2);
        assert_eq!(manager.stats().resident_tiles, 2);
        // packed contents are zero baseline from the start
        for &slot in backend.packed_slots(0) {
            assert!(backend.slot_data(slot).iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_pre_allocated_mips_permanently_resident() {
        let mut backend = MemoryBackend::new();
        backend.allocate_physical_pool(64, 64);
        backend.create_surface(SurfaceTiling::with_mip_chain(
            UVec2::new(8, 8),
            UVec2::new(4, 4),
            3,
            0,
            0,
        ));
        let mut manager = TileUpdateManager::new(
            &mut backend,
            TileUpdateConfig {
                heap_capacity_in_slots: 64,
                slot_size_bytes: 64,
                pre_allocated_mips: 2,
                ..Default::default()
            },
        )
        .unwrap();

        // mips 1 (2x2) and 2 (1x1) are mapped up front
        assert_eq!(manager.stats().resident_tiles, 5);
        assert!(manager.is_resident(0, TileCoord::new(0, 0, 1)));
        assert!(manager.is_resident(0, TileCoord::new(0, 0, 2)));
        assert!(!manager.is_resident(0, TileCoord::new(0, 0, 0)));

        // zero feedback for a long time never evicts pre-allocated mips
        let later = Instant::now() + Duration::from_secs(60);
        manager.run_cycle_at(&mut backend, later).unwrap();
        assert_eq!(manager.stats().total_evictions, 0);
        assert_eq!(manager.stats().resident_tiles, 5);
    }

    #[test]
    fn test_residency_snapshot_layout() {
        let (mut backend, mut manager) = setup(UVec2::new(2, 2), 1, 8);
        backend.touch(0, TileCoord::new(1, 0, 0));
        manager.run_cycle(&mut backend).unwrap();

        let snapshot = manager.residency_snapshot(0);
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot[1].resident, 1); // (mip 0, y 0, x 1)
        assert_eq!(snapshot[0].resident, 0);

        let bytes: &[u8] = bytemuck::cast_slice(&snapshot);
        assert_eq!(bytes.len(), 4 * std::mem::size_of::<PageEntry>());
    }
}
