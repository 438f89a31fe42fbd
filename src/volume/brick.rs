//! 8x8x8 voxel brick, the unit of sparse storage.

use bytemuck::{Pod, Zeroable};

/// Edge length of a brick in voxels.
pub const BRICK_SIZE: u32 = 8;

/// Number of voxels in a brick.
pub const BRICK_LEN: usize = 512;

/// Number of 32-bit words in a brick's occupancy bitmap.
pub const BRICK_BITMAP_WORDS: usize = BRICK_LEN / 32;

/// Linear index of a voxel within a brick (x fastest).
#[inline]
pub(crate) fn voxel_index(x: u32, y: u32, z: u32) -> usize {
    debug_assert!(x < BRICK_SIZE && y < BRICK_SIZE && z < BRICK_SIZE);
    (x | (y << 3) | (z << 6)) as usize
}

/// Pack an opaque RGB color into the `0xRRGGBBAA` layout used by bricks.
#[inline]
pub fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    ((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | 0xFF
}

/// Unpack the RGB channels of a packed color.
#[inline]
pub fn unpack_rgb(color: u32) -> (u8, u8, u8) {
    ((color >> 24) as u8, (color >> 16) as u8, (color >> 8) as u8)
}

/// Dense 8x8x8 block of colored voxels.
///
/// A color entry is only meaningful while its occupancy bit is set. Clearing
/// a voxel leaves its stale color in place.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Brick {
    /// Occupancy, one bit per voxel in [`voxel_index`] order.
    pub bitmap: [u32; BRICK_BITMAP_WORDS],
    /// Packed `0xRRGGBBAA` colors.
    pub color: [u32; BRICK_LEN],
}

impl Default for Brick {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Brick {
    /// Brick with no filled voxels.
    pub const EMPTY: Brick = Brick {
        bitmap: [0; BRICK_BITMAP_WORDS],
        color: [0; BRICK_LEN],
    };

    /// Fill a voxel with the given packed color.
    pub fn set_voxel_filled(&mut self, x: u32, y: u32, z: u32, color: u32) {
        let idx = voxel_index(x, y, z);
        self.bitmap[idx >> 5] |= 1 << (idx & 31);
        self.color[idx] = color;
    }

    /// Mark a voxel empty. The color entry is left untouched.
    pub fn set_voxel_empty(&mut self, x: u32, y: u32, z: u32) {
        let idx = voxel_index(x, y, z);
        self.bitmap[idx >> 5] &= !(1 << (idx & 31));
    }

    /// Whether the voxel is filled.
    pub fn get_voxel(&self, x: u32, y: u32, z: u32) -> bool {
        self.is_filled(voxel_index(x, y, z))
    }

    /// Color of the voxel, or `None` if it is empty.
    pub fn get_voxel_color(&self, x: u32, y: u32, z: u32) -> Option<u32> {
        let idx = voxel_index(x, y, z);
        self.is_filled(idx).then(|| self.color[idx])
    }

    /// Empty every voxel. Colors are not touched.
    pub fn clear(&mut self) {
        self.bitmap = [0; BRICK_BITMAP_WORDS];
    }

    /// Number of filled voxels.
    pub fn num_voxels(&self) -> u32 {
        self.bitmap.iter().map(|w| w.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.iter().all(|&w| w == 0)
    }

    #[inline]
    pub(crate) fn is_filled(&self, idx: usize) -> bool {
        (self.bitmap[idx >> 5] >> (idx & 31)) & 1 != 0
    }

    #[inline]
    pub(crate) fn fill_index(&mut self, idx: usize, color: u32) {
        self.bitmap[idx >> 5] |= 1 << (idx & 31);
        self.color[idx] = color;
    }

    /// Linear indices of filled voxels, ascending.
    pub fn filled_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.bitmap.iter().enumerate().flat_map(|(word_idx, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(word_idx * 32 + bit)
            })
        })
    }

    /// Equal occupancy and equal colors on every filled voxel.
    ///
    /// Stale colors of empty voxels are ignored.
    pub fn same_content(&self, other: &Brick) -> bool {
        self.bitmap == other.bitmap
            && self
                .filled_indices()
                .all(|idx| self.color[idx] == other.color[idx])
    }
}
