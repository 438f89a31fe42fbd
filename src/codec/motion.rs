//! Block-matching motion search against the previous frame.

use crate::volume::{BRICK_LEN, BRICK_SIZE, Brick, Frame, unpack_rgb};

/// Largest displacement searched along each axis, in voxels.
pub(crate) const MAX_DISPLACEMENT: i32 = 7;

/// First step size of the coarse-to-fine search.
const INITIAL_STEP: i32 = 4;

/// Cost of a voxel filled on one side of the match but not the other.
const GEOMETRY_MISMATCH_COST: u64 = 768;

/// Voxel displacement into the previous frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MotionVector {
    pub dx: i8,
    pub dy: i8,
    pub dz: i8,
}

impl MotionVector {
    pub fn new(dx: i8, dy: i8, dz: i8) -> Self {
        Self { dx, dy, dz }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    pub fn in_range(&self) -> bool {
        [self.dx, self.dy, self.dz]
            .iter()
            .all(|&d| (d as i32).abs() <= MAX_DISPLACEMENT)
    }
}

/// Build the brick seen in `prev` at brick cell `cell` displaced by `mv`.
pub(crate) fn sample_reference(prev: &Frame, cell: (u32, u32, u32), mv: MotionVector) -> Brick {
    if mv.is_zero() {
        return prev.brick_at(cell.0, cell.1, cell.2).copied().unwrap_or_default();
    }

    let size = BRICK_SIZE as i64;
    let origin = (
        cell.0 as i64 * size + mv.dx as i64,
        cell.1 as i64 * size + mv.dy as i64,
        cell.2 as i64 * size + mv.dz as i64,
    );

    let mut out = Brick::EMPTY;
    for idx in 0..BRICK_LEN {
        let (x, y, z) = local_coords(idx);
        if let Some(color) = prev.voxel_color(origin.0 + x, origin.1 + y, origin.2 + z) {
            out.fill_index(idx, color);
        }
    }
    out
}

/// Find the displacement into `prev` that best predicts `brick`.
///
/// Starts from no displacement and refines coarse-to-fine: each pass probes
/// the 26 neighbours at the current step, moves to any improvement, and
/// halves the step once nothing improves.
pub(crate) fn search(brick: &Brick, prev: &Frame, cell: (u32, u32, u32)) -> (MotionVector, Brick) {
    let mut best = MotionVector::default();
    let mut best_ref = sample_reference(prev, cell, best);
    let mut best_cost = match_cost(brick, &best_ref, u64::MAX);

    let mut step = INITIAL_STEP;
    while step > 0 && best_cost > 0 {
        let center = best;
        let mut improved = false;
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    let candidate = (
                        center.dx as i32 + dx * step,
                        center.dy as i32 + dy * step,
                        center.dz as i32 + dz * step,
                    );
                    if [candidate.0, candidate.1, candidate.2]
                        .iter()
                        .any(|c| c.abs() > MAX_DISPLACEMENT)
                    {
                        continue;
                    }

                    let mv = MotionVector::new(candidate.0 as i8, candidate.1 as i8, candidate.2 as i8);
                    let reference = sample_reference(prev, cell, mv);
                    let cost = match_cost(brick, &reference, best_cost);
                    if cost < best_cost {
                        best = mv;
                        best_ref = reference;
                        best_cost = cost;
                        improved = true;
                    }
                }
            }
        }
        if !improved {
            step /= 2;
        }
    }

    log::trace!("cell {cell:?}: motion {best:?} cost {best_cost}");
    (best, best_ref)
}

/// Matching cost between a brick and a candidate reference.
///
/// Stops early and returns a value of at least `limit` once the running
/// total reaches it.
fn match_cost(brick: &Brick, reference: &Brick, limit: u64) -> u64 {
    let mut cost = 0u64;
    for (word_idx, (&a, &b)) in brick.bitmap.iter().zip(reference.bitmap.iter()).enumerate() {
        cost += (a ^ b).count_ones() as u64 * GEOMETRY_MISMATCH_COST;

        let mut both = a & b;
        while both != 0 {
            let idx = word_idx * 32 + both.trailing_zeros() as usize;
            both &= both - 1;
            cost += color_distance(brick.color[idx], reference.color[idx]);
        }

        if cost >= limit {
            return cost;
        }
    }
    cost
}

fn color_distance(a: u32, b: u32) -> u64 {
    let (ar, ag, ab) = unpack_rgb(a);
    let (br, bg, bb) = unpack_rgb(b);
    (ar.abs_diff(br) as u64) + (ag.abs_diff(bg) as u64) + (ab.abs_diff(bb) as u64)
}

#[inline]
fn local_coords(idx: usize) -> (i64, i64, i64) {
    ((idx & 7) as i64, ((idx >> 3) & 7) as i64, (idx >> 6) as i64)
}
