//! Sparse voxel volumes: bricks, frames and their compact flattening.
//!
//! A [`Frame`] is a grid of brick cells. Each cell is either empty or points
//! at an 8x8x8 [`Brick`] holding an occupancy bitmap and packed colors:
//!
//! ```text
//! voxel (x, y, z) -> brick cell (x / 8, y / 8, z / 8)
//!                    map index  bx + width * (by + height * bz)
//!                    voxel bit  (x % 8) | (y % 8) << 3 | (z % 8) << 6
//! ```
//!
//! [`FrameCompact`] packs a frame into three flat arrays (map, per-brick
//! bitmap + offset, voxel colors) suitable for uploading as-is.

mod brick;
mod compact;
mod frame;

pub use brick::{BRICK_BITMAP_WORDS, BRICK_LEN, BRICK_SIZE, Brick, pack_rgb, unpack_rgb};
pub(crate) use brick::voxel_index;
pub use compact::{BrickCompact, FrameCompact};
pub use frame::{BrickReservation, EMPTY_BRICK, Frame};
