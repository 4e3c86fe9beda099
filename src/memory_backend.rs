//! In-process reference backend over a host byte pool.
//!
//! Implements the full `TileBackend` protocol against plain memory: the
//! physical pool is a set of equal-size byte slots, mappings are a tile
//! to slot table, and clears actually zero slot contents. This is the
//! executable model of the mapping/clearing contract and the backend the
//! integration tests drive.

use std::collections::HashMap;
use std::ops::Range;

use glam::UVec2;

use crate::backend::TileBackend;
use crate::core::feedback::{FeedbackReady, UsageGrid};
use crate::error::{ResidencyError, ResidencyResult};
use crate::surface::{SurfaceTiling, TexelRect, TileCoord};

/// Fill byte for freshly allocated pool memory, so that uncleared stale
/// contents are observable in tests.
const POOL_GARBAGE: u8 = 0xA5;

struct SurfaceState {
    tiling: SurfaceTiling,
    /// Written by the consumer (`touch`), device-side.
    device_feedback: Vec<UsageGrid>,
    /// Filled from `device_feedback` by `resolve_feedback`.
    host_feedback: Vec<UsageGrid>,
    /// Standard-region tile mappings.
    mapping: HashMap<TileCoord, u32>,
    packed_slots: Vec<u32>,
}

/// Host-memory resource backend.
pub struct MemoryBackend {
    slot_bytes: usize,
    slots: Vec<Vec<u8>>,
    surfaces: Vec<SurfaceState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            slot_bytes: 0,
            slots: Vec::new(),
            surfaces: Vec::new(),
        }
    }

    /// Create the physical pool: `capacity_in_slots` slots of
    /// `slot_bytes` each, filled with a garbage pattern.
    pub fn allocate_physical_pool(&mut self, capacity_in_slots: usize, slot_bytes: usize) {
        self.slot_bytes = slot_bytes;
        self.slots = vec![vec![POOL_GARBAGE; slot_bytes]; capacity_in_slots];
    }

    /// Create a surface and return its index.
    pub fn create_surface(&mut self, tiling: SurfaceTiling) -> usize {
        let grids: Vec<UsageGrid> = tiling
            .standard_extents()
            .iter()
            .map(|&extent| UsageGrid::new(extent))
            .collect();

        self.surfaces.push(SurfaceState {
            tiling,
            device_feedback: grids.clone(),
            host_feedback: grids,
            mapping: HashMap::new(),
            packed_slots: Vec::new(),
        });
        self.surfaces.len() - 1
    }

    /// Consumer-side usage signal: mark a tile used this interval.
    pub fn touch(&mut self, surface: usize, coord: TileCoord) {
        let state = &mut self.surfaces[surface];
        debug_assert!(state.tiling.contains(coord));
        state.device_feedback[coord.mip as usize].set(coord.x, coord.y, 1);
    }

    pub fn mapped_slot(&self, surface: usize, coord: TileCoord) -> Option<u32> {
        self.surfaces[surface].mapping.get(&coord).copied()
    }

    pub fn is_mapped(&self, surface: usize, coord: TileCoord) -> bool {
        self.mapped_slot(surface, coord).is_some()
    }

    pub fn mapped_tile_count(&self, surface: usize) -> usize {
        self.surfaces[surface].mapping.len()
    }

    pub fn packed_slots(&self, surface: usize) -> &[u32] {
        &self.surfaces[surface].packed_slots
    }

    /// Raw contents of one pool slot.
    pub fn slot_data(&self, slot: u32) -> &[u8] {
        &self.slots[slot as usize]
    }

    /// Overwrite a mapped tile's slot contents, standing in for the
    /// consumer rendering into it.
    pub fn write_tile(&mut self, surface: usize, coord: TileCoord, value: u8) {
        let slot = self.surfaces[surface].mapping[&coord];
        self.slots[slot as usize].fill(value);
    }

    fn surface(&self, surface: usize) -> ResidencyResult<&SurfaceState> {
        self.surfaces
            .get(surface)
            .ok_or_else(|| ResidencyError::surface(format!("no surface {surface}")))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TileBackend for MemoryBackend {
    fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    fn tiling(&self, surface: usize) -> &SurfaceTiling {
        &self.surfaces[surface].tiling
    }

    fn resolve_feedback(&mut self, surfaces: Range<usize>) -> ResidencyResult<FeedbackReady> {
        for index in surfaces {
            let state = self
                .surfaces
                .get_mut(index)
                .ok_or_else(|| ResidencyError::feedback(format!("no surface {index}")))?;
            for (host, device) in state
                .host_feedback
                .iter_mut()
                .zip(state.device_feedback.iter())
            {
                host.copy_from(device);
            }
        }
        // plain memcpy, complete once the loop returns
        Ok(FeedbackReady::after_transfer())
    }

    fn usage_grid(&self, surface: usize, mip: u32) -> &UsageGrid {
        &self.surfaces[surface].host_feedback[mip as usize]
    }

    fn map_tiles(
        &mut self,
        surface: usize,
        coords: &[TileCoord],
        slots: &[u32],
    ) -> ResidencyResult<()> {
        if coords.len() != slots.len() {
            return Err(ResidencyError::mapping(format!(
                "coordinate/slot count mismatch: {} vs {}",
                coords.len(),
                slots.len()
            )));
        }
        self.surface(surface)?;

        let state = &mut self.surfaces[surface];
        for (&coord, &slot) in coords.iter().zip(slots) {
            if !state.tiling.contains(coord) {
                return Err(ResidencyError::mapping(format!(
                    "tile {coord:?} outside surface {surface}"
                )));
            }
            if state.mapping.insert(coord, slot).is_some() {
                return Err(ResidencyError::mapping(format!(
                    "tile {coord:?} of surface {surface} already mapped"
                )));
            }
        }
        Ok(())
    }

    fn map_packed_region(&mut self, surface: usize, slots: &[u32]) -> ResidencyResult<()> {
        self.surface(surface)?;
        let state = &mut self.surfaces[surface];
        if !state.packed_slots.is_empty() {
            return Err(ResidencyError::mapping(format!(
                "packed region of surface {surface} already mapped"
            )));
        }
        state.packed_slots = slots.to_vec();
        for &slot in slots {
            self.slots[slot as usize].fill(0);
        }
        Ok(())
    }

    fn unmap_tiles(&mut self, surface: usize, coords: &[TileCoord]) -> ResidencyResult<()> {
        self.surface(surface)?;
        let state = &mut self.surfaces[surface];
        for coord in coords {
            if state.mapping.remove(coord).is_none() {
                return Err(ResidencyError::mapping(format!(
                    "tile {coord:?} of surface {surface} is not mapped"
                )));
            }
        }
        Ok(())
    }

    fn clear_regions(
        &mut self,
        surface: usize,
        mip: u32,
        rects: &[TexelRect],
    ) -> ResidencyResult<()> {
        self.surface(surface)?;

        // Zero every mapped tile of this mip whose texel footprint
        // intersects a clear rectangle. A slot backs exactly one tile,
        // so a hit clears the whole slot.
        let cleared: Vec<u32> = {
            let state = &self.surfaces[surface];
            state
                .mapping
                .iter()
                .filter(|(coord, _)| coord.mip == mip)
                .filter(|(coord, _)| {
                    let tile_rect = state.tiling.texel_rect(**coord);
                    rects.iter().any(|r| r.intersects(&tile_rect))
                })
                .map(|(_, &slot)| slot)
                .collect()
        };
        for slot in cleared {
            self.slots[slot as usize].fill(0);
        }
        Ok(())
    }

    fn clear_feedback(&mut self, surface: usize) -> ResidencyResult<()> {
        let state = self
            .surfaces
            .get_mut(surface)
            .ok_or_else(|| ResidencyError::feedback(format!("no surface {surface}")))?;
        for grid in &mut state.device_feedback {
            grid.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_with_surface() -> (MemoryBackend, usize) {
        let mut backend = MemoryBackend::new();
        backend.allocate_physical_pool(16, 64);
        let surface = backend.create_surface(SurfaceTiling::with_mip_chain(
            UVec2::new(8, 8),
            UVec2::new(4, 4),
            2,
            0,
            0,
        ));
        (backend, surface)
    }

    #[test]
    fn test_touch_visible_only_after_resolve() {
        let (mut backend, s) = backend_with_surface();
        backend.touch(s, TileCoord::new(1, 2, 0));

        assert_eq!(backend.usage_grid(s, 0).get(1, 2), 0);
        backend.resolve_feedback(s..s + 1).unwrap();
        assert_eq!(backend.usage_grid(s, 0).get(1, 2), 1);
    }

    #[test]
    fn test_map_clear_unmap_roundtrip() {
        let (mut backend, s) = backend_with_surface();
        let coord = TileCoord::new(0, 0, 0);

        backend.map_tiles(s, &[coord], &[3]).unwrap();
        assert!(backend.slot_data(3).iter().all(|&b| b == POOL_GARBAGE));

        let rect = backend.tiling(s).texel_rect(coord);
        backend.clear_regions(s, 0, &[rect]).unwrap();
        assert!(backend.slot_data(3).iter().all(|&b| b == 0));

        backend.unmap_tiles(s, &[coord]).unwrap();
        assert!(!backend.is_mapped(s, coord));
    }

    #[test]
    fn test_double_map_rejected() {
        let (mut backend, s) = backend_with_surface();
        let coord = TileCoord::new(2, 2, 0);

        backend.map_tiles(s, &[coord], &[0]).unwrap();
        assert!(backend.map_tiles(s, &[coord], &[1]).is_err());
    }

    #[test]
    fn test_unmap_of_unmapped_rejected() {
        let (mut backend, s) = backend_with_surface();
        assert!(backend.unmap_tiles(s, &[TileCoord::new(0, 1, 0)]).is_err());
    }

    #[test]
    fn test_clear_scoped_to_rects() {
        let (mut backend, s) = backend_with_surface();
        let a = TileCoord::new(0, 0, 0);
        let b = TileCoord::new(1, 0, 0);
        backend.map_tiles(s, &[a, b], &[4, 5]).unwrap();

        let rect = backend.tiling(s).texel_rect(a);
        backend.clear_regions(s, 0, &[rect]).unwrap();

        assert!(backend.slot_data(4).iter().all(|&v| v == 0));
        assert!(backend.slot_data(5).iter().all(|&v| v == POOL_GARBAGE));
    }

    #[test]
    fn test_clear_feedback_resets_device_side() {
        let (mut backend, s) = backend_with_surface();
        backend.touch(s, TileCoord::new(3, 3, 0));
        backend.clear_feedback(s).unwrap();
        backend.resolve_feedback(s..s + 1).unwrap();

        assert!(!backend.usage_grid(s, 0).any_set());
    }
}
