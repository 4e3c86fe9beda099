//! Backend capability trait for the external resource collaborator.
//!
//! The residency core never talks to a graphics API directly. Everything
//! it needs from the resource backend — tiling queries, feedback
//! transfer, mapping updates and region clears — goes through this small
//! capability interface, passed explicitly into each operation.

use std::ops::Range;

use crate::core::feedback::{FeedbackReady, UsageGrid};
use crate::error::ResidencyResult;
use crate::surface::{SurfaceTiling, TexelRect, TileCoord};

/// Resource backend owning the managed surfaces and the physical pool.
///
/// Surfaces are addressed by index in creation order; their tile grids
/// are immutable after creation.
pub trait TileBackend {
    /// Number of managed surfaces.
    fn surface_count(&self) -> usize;

    /// Tile grid layout of one surface.
    fn tiling(&self, surface: usize) -> &SurfaceTiling;

    /// Transfer the device-side usage signals of `surfaces` into
    /// host-visible memory and wait for the copy to complete.
    ///
    /// The returned token is the decode phase's precondition; returning
    /// it before the copy is done makes decode read undefined data.
    fn resolve_feedback(&mut self, surfaces: Range<usize>) -> ResidencyResult<FeedbackReady>;

    /// Host-side usage grid of one standard mip, valid after the last
    /// `resolve_feedback` covering this surface.
    fn usage_grid(&self, surface: usize, mip: u32) -> &UsageGrid;

    /// Map each tile in `coords` to the heap slot at the same position
    /// in `slots`, as one batched update.
    fn map_tiles(
        &mut self,
        surface: usize,
        coords: &[TileCoord],
        slots: &[u32],
    ) -> ResidencyResult<()>;

    /// Map the surface's packed region (all packed mips as one unit) to
    /// the given slots and clear its contents to the zero baseline.
    fn map_packed_region(&mut self, surface: usize, slots: &[u32]) -> ResidencyResult<()>;

    /// Remove the mapping of each tile in `coords`.
    fn unmap_tiles(&mut self, surface: usize, coords: &[TileCoord]) -> ResidencyResult<()>;

    /// Clear the given texel rectangles of one standard mip to the zero
    /// baseline. Only mapped memory is affected.
    fn clear_regions(
        &mut self,
        surface: usize,
        mip: u32,
        rects: &[TexelRect],
    ) -> ResidencyResult<()>;

    /// Reset the surface's device-side usage signals to zero so the next
    /// interval starts uncontaminated.
    fn clear_feedback(&mut self, surface: usize) -> ResidencyResult<()>;
}
