//! Tile residency management for sparse, demand-paged 2D surfaces.
//!
//! A virtual surface far larger than physical memory is backed by a
//! fixed pool of equal-size slots. Tiles are loaded on demand from
//! per-frame usage feedback, evicted after an idle timeout, and the
//! mapping between virtual tile coordinates and pool slots stays
//! consistent across continuous feedback cycles.
//!
//! The per-cycle flow is one-directional: usage grid → decoded tile
//! requests → residency table mutation → slot allocation → batched
//! mapping commit → zero-clear of the affected regions. The
//! [`TileUpdateManager`] drives it; the graphics-API side lives behind
//! the [`TileBackend`] trait, with [`MemoryBackend`] as the in-process
//! reference implementation.

pub mod backend;
pub mod core;
pub mod error;
pub mod memory_backend;
pub mod surface;

pub use crate::backend::TileBackend;
pub use crate::core::feedback::{FeedbackReady, UsageGrid};
pub use crate::core::heap_allocator::{HeapSlotAllocator, TILE_SLOT_BYTES};
pub use crate::core::residency_table::{Residency, TileResidencyTable};
pub use crate::core::update_manager::{
    PageEntry, ResidencyStats, TileUpdateConfig, TileUpdateManager,
};
pub use crate::error::{ResidencyError, ResidencyResult};
pub use crate::memory_backend::MemoryBackend;
pub use crate::surface::{SurfaceTiling, TexelRect, TileCoord};
