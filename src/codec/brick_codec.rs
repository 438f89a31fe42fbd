//! Per-brick record coding.
//!
//! Occupancy bitmaps are run-length coded over bit positions 0..512: each
//! byte holds the fill value in its top bit and a run length of 1..=127 in
//! the low seven bits. Colors follow as four wrapping per-channel
//! differences per filled voxel, ascending by bit position.

use crate::error::{Error, Result};
use crate::volume::{BRICK_BITMAP_WORDS, BRICK_LEN, Brick};

use super::format::ByteReader;

const MAX_RUN: u32 = 127;

/// Upper bound on the raw size of one encoded record of any kind.
/// MapIndex(4) + Kind(1) + MotionVector(3) + Runs(512) + Colors(512 * 4)
pub(crate) const MAX_RECORD_LEN: usize = 4 + 1 + 3 + BRICK_LEN + BRICK_LEN * 4;

#[inline]
fn color_sub(a: u32, b: u32) -> [u8; 4] {
    let (a, b) = (a.to_be_bytes(), b.to_be_bytes());
    std::array::from_fn(|i| a[i].wrapping_sub(b[i]))
}

#[inline]
fn color_add(base: u32, diff: [u8; 4]) -> u32 {
    let base = base.to_be_bytes();
    u32::from_be_bytes(std::array::from_fn(|i| base[i].wrapping_add(diff[i])))
}

#[inline]
fn bit(bits: &[u32; BRICK_BITMAP_WORDS], idx: usize) -> u32 {
    (bits[idx >> 5] >> (idx & 31)) & 1
}

fn encode_runs(bits: &[u32; BRICK_BITMAP_WORDS], out: &mut Vec<u8>) {
    let mut value = bit(bits, 0);
    let mut run = 0u32;
    for idx in 0..BRICK_LEN {
        let b = bit(bits, idx);
        if b != value || run == MAX_RUN {
            out.push(((value << 7) | run) as u8);
            value = b;
            run = 0;
        }
        run += 1;
    }
    out.push(((value << 7) | run) as u8);
}

fn decode_runs(r: &mut ByteReader<'_>) -> Result<[u32; BRICK_BITMAP_WORDS]> {
    let mut bits = [0u32; BRICK_BITMAP_WORDS];
    let mut idx = 0usize;
    while idx < BRICK_LEN {
        let byte = r.u8()?;
        let run = (byte & 0x7F) as usize;
        if run == 0 || idx + run > BRICK_LEN {
            return Err(Error::invalid_input(format!(
                "invalid occupancy run of {run} at bit {idx}"
            )));
        }
        if byte & 0x80 != 0 {
            for i in idx..idx + run {
                bits[i >> 5] |= 1 << (i & 31);
            }
        }
        idx += run;
    }
    Ok(bits)
}

/// Append a self-contained encoding of `brick`.
pub(crate) fn encode_intra(brick: &Brick, out: &mut Vec<u8>) {
    encode_runs(&brick.bitmap, out);
    let mut prev = 0u32;
    for idx in brick.filled_indices() {
        let color = brick.color[idx];
        out.extend_from_slice(&color_sub(color, prev));
        prev = color;
    }
}

/// Decode a brick written by [`encode_intra`].
pub(crate) fn decode_intra(r: &mut ByteReader<'_>, out: &mut Brick) -> Result<()> {
    out.bitmap = decode_runs(r)?;
    let mut prev = 0u32;
    for idx in filled(&out.bitmap) {
        let diff = r.bytes(4)?;
        let color = color_add(prev, [diff[0], diff[1], diff[2], diff[3]]);
        out.color[idx] = color;
        prev = color;
    }
    Ok(())
}

/// Append `brick` as a difference against `reference`.
///
/// Occupancy is stored as the XOR of both bitmaps. Each filled voxel stores
/// its color residual against the reference voxel, or against zero where
/// the reference is empty.
pub(crate) fn encode_predicted(brick: &Brick, reference: &Brick, out: &mut Vec<u8>) {
    let diff: [u32; BRICK_BITMAP_WORDS] = std::array::from_fn(|i| brick.bitmap[i] ^ reference.bitmap[i]);
    encode_runs(&diff, out);
    for idx in brick.filled_indices() {
        out.extend_from_slice(&color_sub(brick.color[idx], reference_color(reference, idx)));
    }
}

/// Decode a brick written by [`encode_predicted`] against the same reference.
pub(crate) fn decode_predicted(r: &mut ByteReader<'_>, reference: &Brick, out: &mut Brick) -> Result<()> {
    let diff = decode_runs(r)?;
    out.bitmap = std::array::from_fn(|i| diff[i] ^ reference.bitmap[i]);
    for idx in filled(&out.bitmap) {
        let d = r.bytes(4)?;
        out.color[idx] = color_add(reference_color(reference, idx), [d[0], d[1], d[2], d[3]]);
    }
    Ok(())
}

/// Number of voxels whose occupancy differs between two bricks.
pub(crate) fn geometry_difference(a: &Brick, b: &Brick) -> u32 {
    a.bitmap
        .iter()
        .zip(b.bitmap.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

#[inline]
fn reference_color(reference: &Brick, idx: usize) -> u32 {
    if reference.is_filled(idx) {
        reference.color[idx]
    } else {
        0
    }
}

fn filled(bits: &[u32; BRICK_BITMAP_WORDS]) -> impl Iterator<Item = usize> + '_ {
    (0..BRICK_LEN).filter(move |&idx| bit(bits, idx) != 0)
}
