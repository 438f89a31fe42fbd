//! Sparse voxel frame: a grid of brick cells backed by growable brick storage.

use std::ops::{Deref, DerefMut};

use super::brick::{BRICK_SIZE, Brick};
use crate::error::{Error, Result};

/// Map entry for a cell with no brick.
pub const EMPTY_BRICK: u32 = u32::MAX;

/// One sparse voxel frame.
///
/// Dimensions are in brick units. Each cell of the map is either
/// [`EMPTY_BRICK`] or an index into the frame's brick storage, and every
/// stored brick is referenced by exactly one cell.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    depth: u32,
    map: Vec<u32>,
    bricks: Vec<Brick>,
}

impl Frame {
    /// Create an empty frame with room for `initial_brick_capacity` bricks.
    pub fn new(width: u32, height: u32, depth: u32, initial_brick_capacity: usize) -> Result<Self> {
        let map_len = map_len(width, height, depth)?;

        let mut map = Vec::new();
        map.try_reserve_exact(map_len)?;
        map.resize(map_len, EMPTY_BRICK);

        let mut bricks = Vec::new();
        bricks.try_reserve(initial_brick_capacity)?;

        Ok(Self {
            width,
            height,
            depth,
            map,
            bricks,
        })
    }

    /// Assemble a frame from parts already known to be consistent.
    pub(crate) fn from_parts(
        width: u32,
        height: u32,
        depth: u32,
        map: Vec<u32>,
        bricks: Vec<Brick>,
    ) -> Self {
        debug_assert_eq!(map.len(), (width * height * depth) as usize);
        debug_assert_eq!(
            map.iter().filter(|&&e| e != EMPTY_BRICK).count(),
            bricks.len()
        );
        Self {
            width,
            height,
            depth,
            map,
            bricks,
        }
    }

    /// Width in bricks.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in bricks.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Depth in bricks.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Dimensions in bricks as `(width, height, depth)`.
    pub fn dimensions(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.depth)
    }

    /// Row-major map index of a brick cell.
    #[inline]
    pub fn get_map_index(&self, x: u32, y: u32, z: u32) -> usize {
        debug_assert!(x < self.width && y < self.height && z < self.depth);
        x as usize + self.width as usize * (y as usize + self.height as usize * z as usize)
    }

    /// Brick coordinates of a map index.
    #[inline]
    pub fn map_coords(&self, map_idx: usize) -> (u32, u32, u32) {
        let w = self.width as usize;
        let h = self.height as usize;
        ((map_idx % w) as u32, ((map_idx / w) % h) as u32, (map_idx / (w * h)) as u32)
    }

    pub fn map(&self) -> &[u32] {
        &self.map
    }

    pub fn bricks(&self) -> &[Brick] {
        &self.bricks
    }

    /// Number of committed bricks.
    pub fn bricks_len(&self) -> usize {
        self.bricks.len()
    }

    /// Brick stored at a cell, if any.
    pub fn brick_at(&self, x: u32, y: u32, z: u32) -> Option<&Brick> {
        if x >= self.width || y >= self.height || z >= self.depth {
            return None;
        }
        self.brick_at_index(self.get_map_index(x, y, z))
    }

    /// True if the cell holds no brick. Out-of-range cells count as empty.
    pub fn is_empty_cell(&self, x: u32, y: u32, z: u32) -> bool {
        self.brick_at(x, y, z).is_none()
    }

    /// Mutable brick stored at a cell, if any.
    pub fn brick_at_mut(&mut self, x: u32, y: u32, z: u32) -> Option<&mut Brick> {
        if x >= self.width || y >= self.height || z >= self.depth {
            return None;
        }
        match self.map[self.get_map_index(x, y, z)] {
            EMPTY_BRICK => None,
            idx => self.bricks.get_mut(idx as usize),
        }
    }

    #[inline]
    pub(crate) fn brick_at_index(&self, map_idx: usize) -> Option<&Brick> {
        match self.map[map_idx] {
            EMPTY_BRICK => None,
            idx => self.bricks.get(idx as usize),
        }
    }

    /// Occupied cells in map order as `(map_index, brick)`.
    pub fn occupied_cells(&self) -> impl Iterator<Item = (usize, &Brick)> + '_ {
        self.map
            .iter()
            .enumerate()
            .filter(|&(_, &entry)| entry != EMPTY_BRICK)
            .map(|(map_idx, &entry)| (map_idx, &self.bricks[entry as usize]))
    }

    /// Reserve the next brick slot.
    ///
    /// The returned handle derefs to a cleared brick that can be filled in
    /// place, then linked into the map with [`BrickReservation::commit`].
    /// Dropping the handle without committing discards the slot.
    pub fn reserve_next_brick(&mut self) -> Result<BrickReservation<'_>> {
        self.bricks.try_reserve(1)?;
        let slot = self.bricks.len();
        self.bricks.push(Brick::EMPTY);
        Ok(BrickReservation {
            frame: self,
            slot,
            committed: false,
        })
    }

    /// Total filled voxels across all bricks.
    pub fn num_voxels(&self) -> u64 {
        self.bricks.iter().map(|b| b.num_voxels() as u64).sum()
    }

    /// Approximate heap size of the frame in bytes.
    pub fn size_bytes(&self) -> usize {
        self.map.len() * size_of::<u32>() + self.bricks.len() * size_of::<Brick>()
    }

    /// Whether the voxel at global voxel coordinates is filled.
    ///
    /// Coordinates outside the grid are empty.
    pub fn voxel_filled(&self, x: i64, y: i64, z: i64) -> bool {
        self.voxel_color(x, y, z).is_some()
    }

    /// Color of the voxel at global voxel coordinates, if filled.
    pub fn voxel_color(&self, x: i64, y: i64, z: i64) -> Option<u32> {
        let size = BRICK_SIZE as i64;
        if x < 0 || y < 0 || z < 0 {
            return None;
        }
        let (bx, by, bz) = (x / size, y / size, z / size);
        if bx >= self.width as i64 || by >= self.height as i64 || bz >= self.depth as i64 {
            return None;
        }
        let brick = self.brick_at(bx as u32, by as u32, bz as u32)?;
        brick.get_voxel_color((x % size) as u32, (y % size) as u32, (z % size) as u32)
    }

    /// Make this frame an exact copy of `other`, reusing allocations.
    pub fn copy_from(&mut self, other: &Frame) -> Result<()> {
        self.map.clear();
        self.map.try_reserve(other.map.len())?;
        self.map.extend_from_slice(&other.map);

        self.bricks.clear();
        self.bricks.try_reserve(other.bricks.len())?;
        self.bricks.extend_from_slice(&other.bricks);

        self.width = other.width;
        self.height = other.height;
        self.depth = other.depth;
        Ok(())
    }

    /// Build a new frame keeping only voxels that touch empty space.
    ///
    /// A voxel survives if any of its six face neighbours is empty, counting
    /// neighbours outside the grid as empty. Bricks left without voxels are
    /// dropped.
    pub fn remove_nonvisible_voxels(&self) -> Result<Frame> {
        let mut out = Frame::new(self.width, self.height, self.depth, self.bricks.len())?;
        let size = BRICK_SIZE as i64;

        for (map_idx, brick) in self.occupied_cells() {
            let (bx, by, bz) = self.map_coords(map_idx);
            let origin = (bx as i64 * size, by as i64 * size, bz as i64 * size);

            let mut reservation = out.reserve_next_brick()?;
            for idx in brick.filled_indices() {
                let (lx, ly, lz) = ((idx & 7) as i64, ((idx >> 3) & 7) as i64, (idx >> 6) as i64);
                let (x, y, z) = (origin.0 + lx, origin.1 + ly, origin.2 + lz);

                let visible = !self.voxel_filled(x - 1, y, z)
                    || !self.voxel_filled(x + 1, y, z)
                    || !self.voxel_filled(x, y - 1, z)
                    || !self.voxel_filled(x, y + 1, z)
                    || !self.voxel_filled(x, y, z - 1)
                    || !self.voxel_filled(x, y, z + 1);
                if visible {
                    reservation.fill_index(idx, brick.color[idx]);
                }
            }

            if !reservation.is_empty() {
                reservation.commit(bx, by, bz)?;
            }
        }

        Ok(out)
    }
}

fn map_len(width: u32, height: u32, depth: u32) -> Result<usize> {
    if width == 0 || height == 0 || depth == 0 {
        return Err(Error::invalid_arguments(format!(
            "frame dimensions must be non-zero, got {width}x{height}x{depth}"
        )));
    }
    (width as u64)
        .checked_mul(height as u64)
        .and_then(|wh| wh.checked_mul(depth as u64))
        .filter(|&len| len < EMPTY_BRICK as u64)
        .map(|len| len as usize)
        .ok_or_else(|| {
            Error::invalid_arguments(format!(
                "frame of {width}x{height}x{depth} bricks is too large"
            ))
        })
}

/// Handle to an uncommitted brick slot returned by
/// [`Frame::reserve_next_brick`].
pub struct BrickReservation<'a> {
    frame: &'a mut Frame,
    slot: usize,
    committed: bool,
}

impl BrickReservation<'_> {
    /// Link the reserved brick into the map at brick coordinates `(x, y, z)`.
    ///
    /// Returns the brick's storage index. The target cell must be in bounds
    /// and unoccupied.
    pub fn commit(mut self, x: u32, y: u32, z: u32) -> Result<u32> {
        let frame = &mut *self.frame;
        if x >= frame.width || y >= frame.height || z >= frame.depth {
            return Err(Error::invalid_arguments(format!(
                "brick coordinate ({x}, {y}, {z}) outside {}x{}x{} frame",
                frame.width, frame.height, frame.depth
            )));
        }
        let map_idx = frame.get_map_index(x, y, z);
        if frame.map[map_idx] != EMPTY_BRICK {
            return Err(Error::invalid_arguments(format!(
                "brick cell ({x}, {y}, {z}) is already occupied"
            )));
        }

        frame.map[map_idx] = self.slot as u32;
        self.committed = true;
        Ok(self.slot as u32)
    }
}

impl Deref for BrickReservation<'_> {
    type Target = Brick;

    fn deref(&self) -> &Brick {
        &self.frame.bricks[self.slot]
    }
}

impl DerefMut for BrickReservation<'_> {
    fn deref_mut(&mut self) -> &mut Brick {
        &mut self.frame.bricks[self.slot]
    }
}

impl Drop for BrickReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.frame.bricks.truncate(self.slot);
        }
    }
}
