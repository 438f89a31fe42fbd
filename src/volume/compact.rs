//! Flattened, offset-indexed frame representation for downstream consumers.

use bytemuck::{Pod, Zeroable};

use super::brick::BRICK_BITMAP_WORDS;
use super::frame::{EMPTY_BRICK, Frame};
use crate::error::{Error, Result};

/// Occupancy of one brick plus the start of its colors in the voxel array.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BrickCompact {
    pub bitmap: [u32; BRICK_BITMAP_WORDS],
    pub voxels_offset: u32,
}

impl BrickCompact {
    pub fn num_voxels(&self) -> u32 {
        self.bitmap.iter().map(|w| w.count_ones()).sum()
    }
}

/// Exact-sized flattening of a [`Frame`].
///
/// Uses the same map indexing as the source frame. The colors of every
/// filled voxel are packed into one array, brick after brick, each brick's
/// colors in ascending bit position.
#[derive(Debug, Clone)]
pub struct FrameCompact {
    width: u32,
    height: u32,
    depth: u32,
    map: Vec<u32>,
    bricks: Vec<BrickCompact>,
    voxels: Vec<u32>,
}

impl FrameCompact {
    /// Allocate an empty compact frame with exactly the given sizes.
    pub fn new(
        width: u32,
        height: u32,
        depth: u32,
        num_bricks: usize,
        num_voxels: usize,
    ) -> Result<Self> {
        let map_len = (width as u64 * height as u64 * depth as u64) as usize;
        if map_len == 0 {
            return Err(Error::invalid_arguments(format!(
                "frame dimensions must be non-zero, got {width}x{height}x{depth}"
            )));
        }

        let mut map = Vec::new();
        map.try_reserve_exact(map_len)?;
        map.resize(map_len, EMPTY_BRICK);

        let mut bricks = Vec::new();
        bricks.try_reserve_exact(num_bricks)?;
        bricks.resize(num_bricks, BrickCompact::default());

        let mut voxels = Vec::new();
        voxels.try_reserve_exact(num_voxels)?;
        voxels.resize(num_voxels, 0);

        Ok(Self {
            width,
            height,
            depth,
            map,
            bricks,
            voxels,
        })
    }

    /// Flatten a frame, keeping its brick storage order.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let num_voxels = frame.num_voxels();
        if num_voxels > u32::MAX as u64 {
            return Err(Error::invalid_input(format!(
                "{num_voxels} voxels do not fit a compact frame"
            )));
        }

        let (width, height, depth) = frame.dimensions();
        let mut compact = Self::new(width, height, depth, frame.bricks_len(), num_voxels as usize)?;
        compact.map.copy_from_slice(frame.map());

        let mut offset = 0usize;
        for (src, dst) in frame.bricks().iter().zip(compact.bricks.iter_mut()) {
            dst.bitmap = src.bitmap;
            dst.voxels_offset = offset as u32;
            for idx in src.filled_indices() {
                compact.voxels[offset] = src.color[idx];
                offset += 1;
            }
        }
        debug_assert_eq!(offset, compact.voxels.len());

        Ok(compact)
    }

    /// Dimensions in bricks as `(width, height, depth)`.
    pub fn dimensions(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.depth)
    }

    pub fn map(&self) -> &[u32] {
        &self.map
    }

    pub fn bricks(&self) -> &[BrickCompact] {
        &self.bricks
    }

    /// Packed colors of all filled voxels.
    pub fn voxels(&self) -> &[u32] {
        &self.voxels
    }

    pub fn num_voxels(&self) -> usize {
        self.voxels.len()
    }

    /// Colors belonging to one brick.
    pub fn brick_voxels(&self, brick_idx: usize) -> &[u32] {
        let brick = &self.bricks[brick_idx];
        let start = brick.voxels_offset as usize;
        &self.voxels[start..start + brick.num_voxels() as usize]
    }

    /// Raw bytes of the map, for upload to a GPU buffer.
    pub fn map_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.map)
    }

    /// Raw bytes of the brick table.
    pub fn bricks_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.bricks)
    }

    /// Raw bytes of the voxel colors.
    pub fn voxels_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.voxels)
    }
}
