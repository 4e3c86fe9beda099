//! Surface tiling descriptors.
//!
//! A managed surface is described by its per-mip tile grid: the finer
//! "standard" mips are demand-paged tile by tile, the coarsest "packed"
//! mips are too small to tile individually and stay resident as one
//! pre-mapped unit.

use glam::UVec2;

/// Identifies one tile within a surface's standard region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Tile X coordinate within the mip's tile grid
    pub x: u32,
    /// Tile Y coordinate within the mip's tile grid
    pub y: u32,
    /// Mip level (0 = finest)
    pub mip: u32,
}

impl TileCoord {
    pub fn new(x: u32, y: u32, mip: u32) -> Self {
        Self { x, y, mip }
    }
}

/// Axis-aligned texel rectangle, `min` inclusive, `max` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexelRect {
    pub min: UVec2,
    pub max: UVec2,
}

impl TexelRect {
    pub fn new(min: UVec2, max: UVec2) -> Self {
        Self { min, max }
    }

    pub fn intersects(&self, other: &TexelRect) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }
}

/// Tile grid layout of one surface, fixed at creation.
#[derive(Debug, Clone)]
pub struct SurfaceTiling {
    /// Texel extent of a single tile
    tile_shape: UVec2,
    /// Width/height in tiles for each standard mip, index 0 = finest
    standard: Vec<UVec2>,
    /// Number of packed (always-resident) mips below the standard chain
    packed_mip_count: u32,
    /// Heap slots consumed by the packed region as a whole
    packed_tile_count: u32,
}

impl SurfaceTiling {
    pub fn new(
        tile_shape: UVec2,
        standard: Vec<UVec2>,
        packed_mip_count: u32,
        packed_tile_count: u32,
    ) -> Self {
        debug_assert!(tile_shape.x > 0 && tile_shape.y > 0);
        debug_assert!(standard.iter().all(|e| e.x > 0 && e.y > 0));
        Self {
            tile_shape,
            standard,
            packed_mip_count,
            packed_tile_count,
        }
    }

    /// Build a standard mip chain by halving a base tile grid, clamped to 1.
    pub fn with_mip_chain(
        tile_shape: UVec2,
        base_extent_in_tiles: UVec2,
        standard_mips: u32,
        packed_mip_count: u32,
        packed_tile_count: u32,
    ) -> Self {
        let standard = (0..standard_mips)
            .map(|mip| {
                UVec2::new(
                    (base_extent_in_tiles.x >> mip).max(1),
                    (base_extent_in_tiles.y >> mip).max(1),
                )
            })
            .collect();
        Self::new(tile_shape, standard, packed_mip_count, packed_tile_count)
    }

    pub fn tile_shape(&self) -> UVec2 {
        self.tile_shape
    }

    pub fn standard_mip_count(&self) -> u32 {
        self.standard.len() as u32
    }

    pub fn mip_count(&self) -> u32 {
        self.standard_mip_count() + self.packed_mip_count
    }

    pub fn packed_mip_count(&self) -> u32 {
        self.packed_mip_count
    }

    pub fn packed_tile_count(&self) -> u32 {
        self.packed_tile_count
    }

    /// Tile grid extent of one standard mip
    pub fn mip_extent(&self, mip: u32) -> UVec2 {
        self.standard[mip as usize]
    }

    /// Standard mip extents, finest first
    pub fn standard_extents(&self) -> &[UVec2] {
        &self.standard
    }

    /// Total number of tiles across the standard region
    pub fn standard_tile_count(&self) -> usize {
        self.standard
            .iter()
            .map(|e| (e.x * e.y) as usize)
            .sum()
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        (coord.mip as usize) < self.standard.len() && {
            let extent = self.standard[coord.mip as usize];
            coord.x < extent.x && coord.y < extent.y
        }
    }

    /// Texel rectangle covered by one tile within its mip
    pub fn texel_rect(&self, coord: TileCoord) -> TexelRect {
        debug_assert!(self.contains(coord));
        let min = UVec2::new(coord.x * self.tile_shape.x, coord.y * self.tile_shape.y);
        TexelRect::new(min, min + self.tile_shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_chain_halving() {
        let tiling =
            SurfaceTiling::with_mip_chain(UVec2::new(128, 128), UVec2::new(8, 4), 4, 2, 1);

        assert_eq!(tiling.standard_mip_count(), 4);
        assert_eq!(tiling.mip_count(), 6);
        assert_eq!(tiling.mip_extent(0), UVec2::new(8, 4));
        assert_eq!(tiling.mip_extent(1), UVec2::new(4, 2));
        assert_eq!(tiling.mip_extent(2), UVec2::new(2, 1));
        assert_eq!(tiling.mip_extent(3), UVec2::new(1, 1));
        assert_eq!(tiling.standard_tile_count(), 32 + 8 + 2 + 1);
    }

    #[test]
    fn test_texel_rect() {
        let tiling =
            SurfaceTiling::with_mip_chain(UVec2::new(64, 32), UVec2::new(4, 4), 2, 0, 0);
        let rect = tiling.texel_rect(TileCoord::new(2, 1, 0));

        assert_eq!(rect.min, UVec2::new(128, 32));
        assert_eq!(rect.max, UVec2::new(192, 64));
    }

    #[test]
    fn test_rect_intersection() {
        let a = TexelRect::new(UVec2::new(0, 0), UVec2::new(64, 64));
        let b = TexelRect::new(UVec2::new(32, 32), UVec2::new(96, 96));
        let c = TexelRect::new(UVec2::new(64, 0), UVec2::new(128, 64));

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c)); // exclusive max, touching edges do not overlap
    }

    #[test]
    fn test_contains_bounds() {
        let tiling =
            SurfaceTiling::with_mip_chain(UVec2::new(128, 128), UVec2::new(4, 4), 2, 0, 0);

        assert!(tiling.contains(TileCoord::new(3, 3, 0)));
        assert!(!tiling.contains(TileCoord::new(4, 3, 0)));
        assert!(tiling.contains(TileCoord::new(1, 1, 1)));
        assert!(!tiling.contains(TileCoord::new(0, 0, 2)));
    }
}
