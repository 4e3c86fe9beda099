//! Host-side usage-signal grids.
//!
//! The consumer writes one byte per tile into a device-side feedback
//! surface; the backend copies it into host-visible memory before decode
//! runs. Rows carry a readback pitch, so walking a grid must respect the
//! per-row stride rather than assuming tight packing.

use glam::UVec2;

/// Row pitch alignment of readback buffers, in bytes.
pub const ROW_PITCH_ALIGNMENT: usize = 256;

/// Proof that the device-to-host feedback transfer for a cycle has
/// completed. `TileUpdateManager::process_feedback` requires one, so
/// decode can never run on partially written data.
///
/// Backends must construct this only once their copy is observably done.
#[derive(Debug)]
pub struct FeedbackReady(());

impl FeedbackReady {
    pub fn after_transfer() -> Self {
        FeedbackReady(())
    }
}

/// One mip level's usage grid: one byte per tile, nonzero = used.
#[derive(Debug, Clone)]
pub struct UsageGrid {
    extent: UVec2,
    row_pitch: usize,
    data: Vec<u8>,
}

impl UsageGrid {
    pub fn new(extent: UVec2) -> Self {
        let row_pitch =
            (extent.x as usize + ROW_PITCH_ALIGNMENT - 1) & !(ROW_PITCH_ALIGNMENT - 1);
        Self {
            extent,
            row_pitch,
            data: vec![0; row_pitch * extent.y as usize],
        }
    }

    pub fn extent(&self) -> UVec2 {
        self.extent
    }

    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    /// The `width` valid bytes of one row, pitch excluded.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.row_pitch;
        &self.data[start..start + self.extent.x as usize]
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.row_pitch + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        debug_assert!(x < self.extent.x && y < self.extent.y);
        self.data[y as usize * self.row_pitch + x as usize] = value;
    }

    /// Reset every signal to the zero baseline.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Copy another grid's signals into this one. Extents must match.
    pub fn copy_from(&mut self, other: &UsageGrid) {
        debug_assert_eq!(self.extent, other.extent);
        self.data.copy_from_slice(&other.data);
    }

    pub fn any_set(&self) -> bool {
        (0..self.extent.y).any(|y| self.row(y).iter().any(|&v| v != 0))
    }
}
