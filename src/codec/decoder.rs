//! Random-access SPLV decoder.

use std::path::Path;
use std::sync::Arc;

use super::brick_codec::{MAX_RECORD_LEN, decode_intra, decode_predicted};
use super::format::{
    ByteReader, FramePrelude, FrameTableEntry, FrameType, GroupEntry, RecordKind, SplvHeader,
    decompress_lz4_into,
};
use super::motion::{MotionVector, sample_reference};
use super::source::DecoderInput;
use crate::error::{Error, Result};
use crate::schema::EncodingParams;
use crate::volume::{Brick, EMPTY_BRICK, Frame, FrameCompact};
use crate::work::{ScratchPool, WorkPool, default_pool, map_jobs};

/// A decoded frame together with its index in the stream.
#[derive(Debug, Clone, Copy)]
pub struct IndexedFrame<'a> {
    pub index: u64,
    pub frame: &'a Frame,
}

/// One compressed brick group inside a frame payload.
struct GroupSlice<'p> {
    records: u32,
    blob: &'p [u8],
}

/// Reads frames back out of an SPLV stream.
///
/// Keyframes decode on their own. A delta frame needs the fully decoded
/// frame before it, which in turn needs its own predecessor back to the
/// nearest keyframe; [`Decoder::get_frame_dependencies`] lists that chain.
///
/// Usage:
/// ```ignore
/// let mut decoder = Decoder::open("clip.splv")?;
/// println!("{} frames", decoder.frame_count());
///
/// // Random access, replaying dependencies internally
/// let frame = decoder.decode_frame_replay(42)?;
///
/// // Or play through sequentially
/// for frame in decoder.frames() {
///     let frame = frame?;
/// }
/// ```
pub struct Decoder {
    input: DecoderInput,
    header: SplvHeader,
    frame_table: Vec<FrameTableEntry>,
    pool: Arc<dyn WorkPool>,
    scratch: ScratchPool,
}

impl Decoder {
    /// Open an SPLV file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_pool(path, default_pool())
    }

    /// Like [`Decoder::open`], decompressing groups on `pool`.
    pub fn open_with_pool<P: AsRef<Path>>(path: P, pool: Arc<dyn WorkPool>) -> Result<Self> {
        Self::new(DecoderInput::open(path)?, pool)
    }

    /// Decode from an in-memory file image.
    pub fn from_memory(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        Self::from_memory_with_pool(bytes, default_pool())
    }

    /// Like [`Decoder::from_memory`], decompressing groups on `pool`.
    pub fn from_memory_with_pool(bytes: impl Into<Vec<u8>>, pool: Arc<dyn WorkPool>) -> Result<Self> {
        Self::new(DecoderInput::Memory(bytes.into()), pool)
    }

    /// Parse and validate the header and frame table of `input`.
    pub fn new(mut input: DecoderInput, pool: Arc<dyn WorkPool>) -> Result<Self> {
        let header = SplvHeader::parse(input.read_window(0, SplvHeader::SIZE)?)?;
        header.validate()?;

        let table_ptr = header.frame_table_ptr;
        let table_len = header.frame_count as usize * FrameTableEntry::SIZE;
        if table_ptr < SplvHeader::SIZE as u64 {
            return Err(Error::invalid_input(format!(
                "frame table pointer {table_ptr} points into the header"
            )));
        }
        let table_bytes = input.read_window(table_ptr, table_len)?;

        let mut r = ByteReader::new(table_bytes);
        let mut frame_table = Vec::new();
        frame_table.try_reserve_exact(header.frame_count as usize)?;
        for _ in 0..header.frame_count {
            frame_table.push(FrameTableEntry::unpack(r.u64()?)?);
        }

        validate_frame_table(&frame_table, &header)?;

        let expected_duration = header.frame_count as f32 / header.framerate;
        if (header.duration - expected_duration).abs() > 1e-3 * expected_duration.max(1.0) {
            log::warn!(
                "header duration {}s does not match {} frames at {} fps",
                header.duration,
                header.frame_count,
                header.framerate
            );
        }

        log::debug!(
            "opened SPLV stream: {}x{}x{} voxels, {} frames at {} fps, gop {}",
            header.width,
            header.height,
            header.depth,
            header.frame_count,
            header.framerate,
            header.params.gop_size
        );

        let scratch = ScratchPool::new(0);
        Ok(Self {
            input,
            header,
            frame_table,
            pool,
            scratch,
        })
    }

    /// Get file header.
    pub fn header(&self) -> &SplvHeader {
        &self.header
    }

    /// Get total number of frames.
    pub fn frame_count(&self) -> u64 {
        self.header.frame_count as u64
    }

    /// Dimensions in voxels.
    pub fn dimensions(&self) -> (u32, u32, u32) {
        (self.header.width, self.header.height, self.header.depth)
    }

    /// Dimensions in bricks.
    pub fn brick_dimensions(&self) -> (u32, u32, u32) {
        self.header.brick_dimensions()
    }

    pub fn framerate(&self) -> f32 {
        self.header.framerate
    }

    /// Clip length in seconds.
    pub fn duration(&self) -> f32 {
        self.header.duration
    }

    pub fn params(&self) -> &EncodingParams {
        &self.header.params
    }

    /// How frame `idx` is encoded.
    pub fn frame_type(&self, idx: u64) -> Result<FrameType> {
        self.check_index(idx)?;
        Ok(self.frame_table[idx as usize].frame_type)
    }

    fn check_index(&self, idx: u64) -> Result<()> {
        if idx >= self.frame_count() {
            return Err(Error::invalid_arguments(format!(
                "frame index {idx} out of range ({} frames)",
                self.frame_count()
            )));
        }
        Ok(())
    }

    /// Frames that must be decoded before `idx`.
    ///
    /// Keyframes have no dependencies. For a delta frame the non-recursive
    /// answer is its keyframe alone; the recursive answer is every frame from
    /// that keyframe up to `idx - 1`, in decode order.
    pub fn get_frame_dependencies(&self, idx: u64, recursive: bool) -> Result<Vec<u64>> {
        let keyframe = self.get_prev_i_frame_idx(idx)?;
        if keyframe == idx {
            return Ok(Vec::new());
        }
        if !recursive {
            return Ok(vec![keyframe]);
        }
        Ok((keyframe..idx).collect())
    }

    /// Nearest keyframe at or before `idx`.
    pub fn get_prev_i_frame_idx(&self, idx: u64) -> Result<u64> {
        self.check_index(idx)?;
        Ok(idx - idx % self.header.params.gop_size as u64)
    }

    /// First keyframe strictly after `idx`, or `None` if there is none.
    pub fn get_next_i_frame_idx(&self, idx: u64) -> Result<Option<u64>> {
        self.check_index(idx)?;
        let gop = self.header.params.gop_size as u64;
        let next = (idx / gop + 1) * gop;
        Ok((next < self.frame_count()).then_some(next))
    }

    /// Decode frame `idx`.
    ///
    /// `dependencies` must hold the decoded frames listed by
    /// `get_frame_dependencies(idx, true)`, in that order.
    pub fn decode_frame(&mut self, idx: u64, dependencies: &[IndexedFrame<'_>]) -> Result<Frame> {
        let base = self.check_dependencies(idx, dependencies)?;
        self.decode_payload(idx, base)
    }

    /// Decode frame `idx` and also flatten it to a [`FrameCompact`].
    pub fn decode_frame_compact(
        &mut self,
        idx: u64,
        dependencies: &[IndexedFrame<'_>],
    ) -> Result<(Frame, FrameCompact)> {
        let frame = self.decode_frame(idx, dependencies)?;
        let compact = FrameCompact::from_frame(&frame)?;
        Ok((frame, compact))
    }

    /// Decode frame `idx`, decoding its dependency chain internally.
    pub fn decode_frame_replay(&mut self, idx: u64) -> Result<Frame> {
        let mut state: Option<Frame> = None;
        for dep in self.get_frame_dependencies(idx, true)? {
            state = Some(self.decode_payload(dep, state.as_ref())?);
        }
        self.decode_payload(idx, state.as_ref())
    }

    /// Create an iterator decoding every frame in order.
    pub fn frames(&mut self) -> FrameIterator<'_> {
        FrameIterator {
            decoder: self,
            current: 0,
            prev: None,
        }
    }

    fn check_dependencies<'a>(
        &self,
        idx: u64,
        dependencies: &[IndexedFrame<'a>],
    ) -> Result<Option<&'a Frame>> {
        let expected = self.get_frame_dependencies(idx, true)?;
        let matches = dependencies.len() == expected.len()
            && dependencies.iter().zip(&expected).all(|(d, &e)| d.index == e);
        if !matches {
            let given: Vec<u64> = dependencies.iter().map(|d| d.index).collect();
            return Err(Error::invalid_arguments(format!(
                "frame {idx} needs decoded dependencies {expected:?}, got {given:?}"
            )));
        }

        let base = dependencies.last().map(|d| d.frame);
        if let Some(frame) = base
            && frame.dimensions() != self.header.brick_dimensions()
        {
            return Err(Error::invalid_arguments(format!(
                "dependency frame is {:?} bricks, stream is {:?}",
                frame.dimensions(),
                self.header.brick_dimensions()
            )));
        }
        Ok(base)
    }

    /// Decode one payload on top of `base`, the fully decoded previous frame.
    fn decode_payload(&mut self, idx: u64, base: Option<&Frame>) -> Result<Frame> {
        self.check_index(idx)?;
        let entry = self.frame_table[idx as usize];
        let end = self
            .frame_table
            .get(idx as usize + 1)
            .map_or(self.header.frame_table_ptr, |next| next.offset);
        let len = usize::try_from(end - entry.offset)
            .map_err(|_| Error::invalid_input(format!("frame {idx} payload is too large")))?;

        let dims = self.header.brick_dimensions();
        let payload = self.input.read_window(entry.offset, len)?;
        let mut r = ByteReader::new(payload);
        let prelude = FramePrelude::read_from(&mut r)?;
        if prelude.frame_type != entry.frame_type {
            return Err(Error::invalid_input(format!(
                "frame {idx} is {:?} in the frame table but {:?} in its payload",
                entry.frame_type, prelude.frame_type
            )));
        }

        let pool = self.pool.as_ref();
        let frame = match prelude.frame_type {
            FrameType::Key => decode_keyframe(&mut r, &prelude, dims, pool, &self.scratch)?,
            FrameType::Delta => {
                let prev = base.ok_or_else(|| {
                    Error::invalid_arguments(format!(
                        "delta frame {idx} needs the decoded frame {}",
                        idx - 1
                    ))
                })?;
                decode_delta(&mut r, &prelude, prev, pool, &self.scratch)?
            }
        };

        if frame.num_voxels() != prelude.voxels {
            return Err(Error::invalid_input(format!(
                "frame {idx} decoded to {} voxels, header says {}",
                frame.num_voxels(),
                prelude.voxels
            )));
        }

        log::debug!(
            "decoded frame {idx} ({:?}): {} records in {} groups",
            prelude.frame_type,
            prelude.records,
            prelude.groups
        );
        Ok(frame)
    }
}

fn validate_frame_table(table: &[FrameTableEntry], header: &SplvHeader) -> Result<()> {
    let mut min_offset = SplvHeader::SIZE as u64;
    for (i, entry) in table.iter().enumerate() {
        let expected = if header.params.is_keyframe(i as u64) {
            FrameType::Key
        } else {
            FrameType::Delta
        };
        if entry.frame_type != expected {
            return Err(Error::invalid_input(format!(
                "frame {i} is marked {:?}, gop size {} implies {expected:?}",
                entry.frame_type, header.params.gop_size
            )));
        }
        if entry.offset < min_offset {
            return Err(Error::invalid_input(format!(
                "frame {i} offset {} overlaps the previous frame",
                entry.offset
            )));
        }
        min_offset = entry.offset + FramePrelude::SIZE as u64;
    }
    if min_offset > header.frame_table_ptr {
        return Err(Error::invalid_input("last frame overlaps the frame table"));
    }
    Ok(())
}

/// Read the group directory and slice out each group's blob.
fn read_groups<'p>(r: &mut ByteReader<'p>, prelude: &FramePrelude) -> Result<Vec<GroupSlice<'p>>> {
    let num_groups = prelude.groups as usize;
    if num_groups > prelude.records as usize || (prelude.records > 0 && num_groups == 0) {
        return Err(Error::invalid_input(format!(
            "{num_groups} groups cannot hold {} records",
            prelude.records
        )));
    }
    if num_groups * GroupEntry::SIZE > r.remaining() {
        return Err(Error::invalid_input("group directory is truncated"));
    }

    let entries = (0..num_groups)
        .map(|_| GroupEntry::read_from(r))
        .collect::<Result<Vec<_>>>()?;
    let total: u64 = entries.iter().map(|e| e.records as u64).sum();
    if total != prelude.records as u64 || entries.iter().any(|e| e.records == 0) {
        return Err(Error::invalid_input(format!(
            "group record counts do not add up to {}",
            prelude.records
        )));
    }

    let groups = entries
        .iter()
        .map(|e| {
            Ok(GroupSlice {
                records: e.records,
                blob: r.bytes(e.blob_len as usize)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    r.finish("frame payload")?;
    Ok(groups)
}

fn decode_keyframe(
    r: &mut ByteReader<'_>,
    prelude: &FramePrelude,
    (width, height, depth): (u32, u32, u32),
    pool: &dyn WorkPool,
    scratch: &ScratchPool,
) -> Result<Frame> {
    let map_len = (width * height * depth) as usize;

    let map_blob_len = r.u32()? as usize;
    let map_blob = r.bytes(map_blob_len)?;
    let mut map_bytes = scratch.acquire();
    decompress_lz4_into(map_blob, map_len * 4, &mut map_bytes)?;
    if map_bytes.len() != map_len * 4 {
        return Err(Error::invalid_input(format!(
            "occupancy map has {} bytes, expected {}",
            map_bytes.len(),
            map_len * 4
        )));
    }

    // Stored brick indices must count up in map order
    let mut map = Vec::new();
    map.try_reserve_exact(map_len)?;
    let mut next = 0u32;
    for cell in map_bytes.chunks_exact(4) {
        let entry = u32::from_le_bytes([cell[0], cell[1], cell[2], cell[3]]);
        if entry != EMPTY_BRICK {
            if entry != next {
                return Err(Error::invalid_input(format!(
                    "occupancy map entry {entry} out of order, expected {next}"
                )));
            }
            next += 1;
        }
        map.push(entry);
    }
    if next != prelude.records {
        return Err(Error::invalid_input(format!(
            "occupancy map references {next} bricks, payload holds {}",
            prelude.records
        )));
    }

    let groups = read_groups(r, prelude)?;
    let decoded = map_jobs(pool, None, groups, |group| {
        let mut raw = scratch.acquire();
        let max_len = (group.records as usize).saturating_mul(MAX_RECORD_LEN);
        decompress_lz4_into(group.blob, max_len, &mut raw)?;

        let mut gr = ByteReader::new(&raw);
        let mut bricks = Vec::new();
        bricks.try_reserve_exact(group.records as usize)?;
        for _ in 0..group.records {
            let mut brick = Brick::EMPTY;
            decode_intra(&mut gr, &mut brick)?;
            bricks.push(brick);
        }
        gr.finish("brick group")?;
        Ok(bricks)
    })?;

    let mut bricks = Vec::new();
    bricks.try_reserve_exact(prelude.records as usize)?;
    for group in decoded {
        bricks.extend(group);
    }

    Ok(Frame::from_parts(width, height, depth, map, bricks))
}

fn decode_delta(
    r: &mut ByteReader<'_>,
    prelude: &FramePrelude,
    prev: &Frame,
    pool: &dyn WorkPool,
    scratch: &ScratchPool,
) -> Result<Frame> {
    let (width, height, depth) = prev.dimensions();
    let map_len = prev.map().len();

    // Each cell changes at most once per frame
    if prelude.records as usize > map_len {
        return Err(Error::invalid_input(format!(
            "{} changed cells in a map of {map_len} cells",
            prelude.records
        )));
    }

    let groups = read_groups(r, prelude)?;
    let decoded = map_jobs(pool, None, groups, |group| {
        let mut raw = scratch.acquire();
        let max_len = (group.records as usize).saturating_mul(MAX_RECORD_LEN);
        decompress_lz4_into(group.blob, max_len, &mut raw)?;

        let mut gr = ByteReader::new(&raw);
        let mut updates: Vec<(u32, Option<Brick>)> = Vec::new();
        updates.try_reserve_exact(group.records as usize)?;
        for _ in 0..group.records {
            let map_idx = gr.u32()?;
            if map_idx as usize >= map_len {
                return Err(Error::invalid_input(format!(
                    "changed cell {map_idx} outside map of {map_len} cells"
                )));
            }
            let tag = gr.u8()?;
            let kind = RecordKind::from_u8(tag)
                .ok_or_else(|| Error::invalid_input(format!("invalid record kind {tag}")))?;

            let brick = match kind {
                RecordKind::Removed => None,
                RecordKind::Intra => {
                    let mut brick = Brick::EMPTY;
                    decode_intra(&mut gr, &mut brick)?;
                    Some(brick)
                }
                RecordKind::Predicted => {
                    let mv = MotionVector::new(gr.i8()?, gr.i8()?, gr.i8()?);
                    if !mv.in_range() {
                        return Err(Error::invalid_input(format!(
                            "motion vector {mv:?} out of range"
                        )));
                    }
                    let reference = sample_reference(prev, prev.map_coords(map_idx as usize), mv);
                    let mut brick = Brick::EMPTY;
                    decode_predicted(&mut gr, &reference, &mut brick)?;
                    Some(brick)
                }
            };
            updates.push((map_idx, brick));
        }
        gr.finish("brick group")?;
        Ok(updates)
    })?;

    // Records are in map order; merge them over the previous frame
    let mut updates = decoded.into_iter().flatten().peekable();
    let mut map = Vec::new();
    map.try_reserve_exact(map_len)?;
    let mut bricks = Vec::new();
    bricks.try_reserve(prev.bricks_len())?;

    for map_idx in 0..map_len {
        let update = match updates.peek() {
            Some(&(cell, _)) if cell as usize == map_idx => updates.next(),
            _ => None,
        };
        let brick = match update {
            Some((_, Some(brick))) => Some(brick),
            Some((_, None)) => {
                if prev.brick_at_index(map_idx).is_none() {
                    return Err(Error::invalid_input(format!(
                        "removal of empty cell {map_idx}"
                    )));
                }
                None
            }
            None => prev.brick_at_index(map_idx).copied(),
        };

        match brick {
            Some(brick) => {
                map.push(bricks.len() as u32);
                bricks.try_reserve(1)?;
                bricks.push(brick);
            }
            None => map.push(EMPTY_BRICK),
        }
    }
    if let Some((cell, _)) = updates.next() {
        return Err(Error::invalid_input(format!(
            "changed cell {cell} is duplicated or out of order"
        )));
    }

    Ok(Frame::from_parts(width, height, depth, map, bricks))
}

/// Iterator decoding frames in order, reusing each frame as the next one's
/// reference.
pub struct FrameIterator<'a> {
    decoder: &'a mut Decoder,
    current: u64,
    prev: Option<Frame>,
}

impl Iterator for FrameIterator<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.decoder.frame_count() {
            return None;
        }

        let result = self.decoder.decode_payload(self.current, self.prev.as_ref());
        self.prev = result.as_ref().ok().cloned();
        self.current += 1;
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.decoder.frame_count() - self.current) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FrameIterator<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoder;
    use crate::volume::pack_rgb;
    use crate::work::InlinePool;
    use proptest::prelude::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn assert_frames_equal(a: &Frame, b: &Frame) {
        assert_eq!(a.dimensions(), b.dimensions());
        for map_idx in 0..a.map().len() {
            match (a.brick_at_index(map_idx), b.brick_at_index(map_idx)) {
                (None, None) => {}
                (Some(x), Some(y)) => assert!(x.same_content(y), "cell {map_idx} differs"),
                _ => panic!("occupancy of cell {map_idx} differs"),
            }
        }
    }

    /// 16^3 voxel frame with one voxel at (x, 4, 4).
    fn single_voxel_frame(x: u32) -> Frame {
        let mut frame = Frame::new(2, 2, 2, 1).unwrap();
        let mut brick = frame.reserve_next_brick().unwrap();
        brick.set_voxel_filled(x % 8, 4, 4, pack_rgb(200, 10, 10));
        brick.commit(x / 8, 0, 0).unwrap();
        frame
    }

    /// 32^3 voxel frame with a 6^3 cube whose corner is at `at`.
    fn cube_frame(at: (u32, u32, u32), tint: u8) -> Frame {
        let mut frame = Frame::new(4, 4, 4, 8).unwrap();
        for z in at.2..at.2 + 6 {
            for y in at.1..at.1 + 6 {
                for x in at.0..at.0 + 6 {
                    let (bx, by, bz) = (x / 8, y / 8, z / 8);
                    if frame.brick_at(bx, by, bz).is_none() {
                        frame.reserve_next_brick().unwrap().commit(bx, by, bz).unwrap();
                    }
                    let color = pack_rgb(x as u8 * 8, y as u8 * 8, tint);
                    frame
                        .brick_at_mut(bx, by, bz)
                        .unwrap()
                        .set_voxel_filled(x % 8, y % 8, z % 8, color);
                }
            }
        }
        frame
    }

    fn encode_to_memory(frames: &[Frame], voxels: u32, params: EncodingParams) -> Vec<u8> {
        let mut encoder = Encoder::from_writer(
            Cursor::new(Vec::new()),
            voxels,
            voxels,
            voxels,
            30.0,
            params,
            Arc::new(InlinePool),
        )
        .unwrap();
        for frame in frames {
            encoder.encode_frame(frame).unwrap();
        }
        encoder.finish_into_inner().unwrap().0.into_inner()
    }

    fn shifting_voxel_decoder() -> (Vec<Frame>, Decoder) {
        let frames: Vec<Frame> = (0..16).map(single_voxel_frame).collect();
        let params = EncodingParams {
            gop_size: 10,
            ..Default::default()
        };
        let bytes = encode_to_memory(&frames, 16, params);
        (frames, Decoder::from_memory(bytes).unwrap())
    }

    #[test]
    fn test_shifting_voxel_gop_layout() {
        let (_, decoder) = shifting_voxel_decoder();
        assert_eq!(decoder.frame_count(), 16);
        assert_eq!(decoder.dimensions(), (16, 16, 16));
        assert_eq!(decoder.brick_dimensions(), (2, 2, 2));

        let keyframes: Vec<u64> = (0..16)
            .filter(|&i| decoder.frame_type(i).unwrap() == FrameType::Key)
            .collect();
        assert_eq!(keyframes, vec![0, 10]);

        assert_eq!(
            decoder.get_frame_dependencies(15, true).unwrap(),
            vec![10, 11, 12, 13, 14]
        );
        assert_eq!(decoder.get_frame_dependencies(15, false).unwrap(), vec![10]);
        assert!(decoder.get_frame_dependencies(10, false).unwrap().is_empty());
        assert!(decoder.get_frame_dependencies(0, true).unwrap().is_empty());
    }

    #[test]
    fn test_keyframe_navigation() {
        let (_, decoder) = shifting_voxel_decoder();
        assert_eq!(decoder.get_prev_i_frame_idx(0).unwrap(), 0);
        assert_eq!(decoder.get_prev_i_frame_idx(9).unwrap(), 0);
        assert_eq!(decoder.get_prev_i_frame_idx(13).unwrap(), 10);
        assert_eq!(decoder.get_next_i_frame_idx(0).unwrap(), Some(10));
        assert_eq!(decoder.get_next_i_frame_idx(9).unwrap(), Some(10));
        assert_eq!(decoder.get_next_i_frame_idx(10).unwrap(), None);
        assert_eq!(decoder.get_next_i_frame_idx(15).unwrap(), None);
        assert!(matches!(
            decoder.get_prev_i_frame_idx(16),
            Err(Error::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_decode_with_dependency_chains() {
        let (frames, mut decoder) = shifting_voxel_decoder();

        let mut decoded: Vec<Frame> = Vec::new();
        for idx in 0..16u64 {
            let deps = decoder.get_frame_dependencies(idx, true).unwrap();
            let chain: Vec<IndexedFrame<'_>> = deps
                .iter()
                .map(|&d| IndexedFrame {
                    index: d,
                    frame: &decoded[d as usize],
                })
                .collect();
            let frame = decoder.decode_frame(idx, &chain).unwrap();
            assert_frames_equal(&frame, &frames[idx as usize]);
            decoded.push(frame);
        }
    }

    #[test]
    fn test_bad_dependencies_rejected() {
        let (frames, mut decoder) = shifting_voxel_decoder();
        let kf = decoder.decode_frame(10, &[]).unwrap();

        // Skipping intermediate frames
        let err = decoder
            .decode_frame(12, &[IndexedFrame { index: 10, frame: &kf }])
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArguments);

        // Keyframes take no dependencies
        assert!(decoder
            .decode_frame(10, &[IndexedFrame { index: 9, frame: &kf }])
            .is_err());

        // The decoder stays usable after a failed call
        let f11 = decoder
            .decode_frame(11, &[IndexedFrame { index: 10, frame: &kf }])
            .unwrap();
        assert_frames_equal(&f11, &frames[11]);
    }

    #[test]
    fn test_replay_and_compact() {
        let (frames, mut decoder) = shifting_voxel_decoder();
        let f7 = decoder.decode_frame_replay(7).unwrap();
        assert_frames_equal(&f7, &frames[7]);
        assert_eq!(f7.voxel_color(7, 4, 4), Some(pack_rgb(200, 10, 10)));

        let kf = decoder.decode_frame(10, &[]).unwrap();
        let (f11, compact) = decoder
            .decode_frame_compact(11, &[IndexedFrame { index: 10, frame: &kf }])
            .unwrap();
        assert_frames_equal(&f11, &frames[11]);
        assert_eq!(compact.num_voxels(), 1);
        assert_eq!(compact.voxels(), &[pack_rgb(200, 10, 10)]);
        assert_eq!(compact.map(), f11.map());
    }

    #[test]
    fn test_motion_vectors_roundtrip_across_bricks() {
        let frames: Vec<Frame> = (0..12)
            .map(|i| cube_frame((2 + i, 3 + i / 2, 5), i as u8 * 10))
            .collect();

        for motion_vectors in [false, true] {
            let params = EncodingParams {
                gop_size: 6,
                max_brick_group_size: 2,
                motion_vectors,
            };
            let bytes = encode_to_memory(&frames, 32, params);
            let mut decoder = Decoder::from_memory(bytes).unwrap();
            assert_eq!(decoder.params().motion_vectors, motion_vectors);

            let decoded: Vec<Frame> = decoder.frames().collect::<Result<_>>().unwrap();
            assert_eq!(decoded.len(), frames.len());
            for (a, b) in decoded.iter().zip(&frames) {
                assert_frames_equal(a, b);
            }
        }
    }

    #[test]
    fn test_removed_bricks() {
        let frames = vec![
            cube_frame((4, 4, 4), 1),
            Frame::new(4, 4, 4, 0).unwrap(),
            cube_frame((20, 20, 20), 2),
        ];
        let params = EncodingParams {
            gop_size: 3,
            ..Default::default()
        };
        let mut decoder = Decoder::from_memory(encode_to_memory(&frames, 32, params)).unwrap();
        let decoded: Vec<Frame> = decoder.frames().collect::<Result<_>>().unwrap();
        assert_eq!(decoded[1].bricks_len(), 0);
        assert_eq!(decoded[1].num_voxels(), 0);
        assert_frames_equal(&decoded[2], &frames[2]);
    }

    #[test]
    fn test_file_decoder_with_rayon_pool() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cube.splv");
        let frames: Vec<Frame> = (0..5).map(|i| cube_frame((i * 3, 8, 8), 50)).collect();

        let mut encoder = Encoder::create(
            &path,
            32,
            32,
            32,
            12.0,
            EncodingParams {
                gop_size: 4,
                max_brick_group_size: 1,
                motion_vectors: true,
            },
        )
        .unwrap();
        for frame in &frames {
            encoder.encode_frame(frame).unwrap();
        }
        encoder.finish().unwrap();

        let pool = Arc::new(crate::work::RayonPool::with_threads(4).unwrap());
        let mut decoder = Decoder::open_with_pool(&path, pool).unwrap();
        assert!((decoder.duration() - 5.0 / 12.0).abs() < 1e-6);
        let iter = decoder.frames();
        assert_eq!(iter.len(), 5);
        for (decoded, original) in iter.zip(&frames) {
            assert_frames_equal(&decoded.unwrap(), original);
        }
        assert_frames_equal(&decoder.decode_frame_replay(4).unwrap(), &frames[4]);
    }

    #[test]
    fn test_corrupt_inputs_rejected() {
        let frames: Vec<Frame> = (0..3).map(single_voxel_frame).collect();
        let params = EncodingParams {
            gop_size: 2,
            ..Default::default()
        };
        let bytes = encode_to_memory(&frames, 16, params);

        // Truncated before the frame table
        let err = Decoder::from_memory(bytes[..bytes.len() - 4].to_vec()).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);

        // Bad magic
        let mut bad = bytes.clone();
        bad[1] = b'Q';
        assert!(Decoder::from_memory(bad).is_err());

        // Frame type in the table contradicting the gop size
        let header = SplvHeader::parse(&bytes[..SplvHeader::SIZE]).unwrap();
        let mut bad = bytes.clone();
        let second = header.frame_table_ptr as usize + FrameTableEntry::SIZE;
        bad[second + 7] = 0;
        assert!(matches!(Decoder::from_memory(bad), Err(Error::InvalidInput(_))));

        // Too short to hold a header
        assert!(matches!(
            Decoder::from_memory(vec![0u8; 10]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_corrupt_payload_fails_only_that_frame() {
        let frames: Vec<Frame> = (0..4).map(single_voxel_frame).collect();
        let params = EncodingParams {
            gop_size: 2,
            ..Default::default()
        };
        let mut bytes = encode_to_memory(&frames, 16, params);

        // Inflate the voxel count stored in frame 0's prelude
        let offset = SplvHeader::SIZE + 1 + 4;
        bytes[offset] = bytes[offset].wrapping_add(1);
        let mut decoder = Decoder::from_memory(bytes).unwrap();

        assert!(matches!(decoder.decode_frame(0, &[]), Err(Error::InvalidInput(_))));
        let f2 = decoder.decode_frame(2, &[]).unwrap();
        assert_frames_equal(&f2, &frames[2]);
    }

    #[test]
    fn test_delta_record_count_bounded_by_map() {
        let frames: Vec<Frame> = (0..2).map(single_voxel_frame).collect();
        let params = EncodingParams {
            gop_size: 2,
            ..Default::default()
        };
        let bytes = encode_to_memory(&frames, 16, params);
        let header = SplvHeader::parse(&bytes[..SplvHeader::SIZE]).unwrap();
        let table_ptr = header.frame_table_ptr as usize;
        let delta_offset = FrameTableEntry::unpack(u64::from_le_bytes(
            bytes[table_ptr + 8..table_ptr + 16].try_into().unwrap(),
        ))
        .unwrap()
        .offset as usize;

        // Replace frame 1 with a delta claiming far more records than the
        // 8-cell map holds, in one group whose blob declares 1.5 GiB
        let mut crafted = bytes[..delta_offset].to_vec();
        FramePrelude {
            frame_type: FrameType::Delta,
            records: 1_000_000,
            voxels: 1,
            groups: 1,
        }
        .write_to(&mut crafted);
        GroupEntry {
            records: 1_000_000,
            blob_len: 8,
        }
        .write_to(&mut crafted);
        crafted.extend_from_slice(&1_500_000_000u32.to_le_bytes());
        crafted.extend_from_slice(&[0, 0, 0, 0]);

        let new_table_ptr = crafted.len() as u64;
        for entry in [
            FrameTableEntry { frame_type: FrameType::Key, offset: SplvHeader::SIZE as u64 },
            FrameTableEntry { frame_type: FrameType::Delta, offset: delta_offset as u64 },
        ] {
            crafted.extend_from_slice(&entry.pack().to_le_bytes());
        }
        // Frame table pointer sits right before the trailing reserved bytes
        let ptr_at = SplvHeader::SIZE - 12;
        crafted[ptr_at..ptr_at + 8].copy_from_slice(&new_table_ptr.to_le_bytes());
        assert!(crafted.len() < 512);

        let mut decoder = Decoder::from_memory(crafted).unwrap();
        let kf = decoder.decode_frame(0, &[]).unwrap();
        assert_frames_equal(&kf, &frames[0]);
        let err = decoder
            .decode_frame(1, &[IndexedFrame { index: 0, frame: &kf }])
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_roundtrip_random_sequences(
            sequence in proptest::collection::vec(
                proptest::collection::vec((0u32..16, 0u32..16, 0u32..16, 0u8..4), 0..60),
                1..8,
            ),
            gop_size in 1u32..5,
            max_brick_group_size in 1u32..4,
            motion_vectors in any::<bool>(),
        ) {
            let frames: Vec<Frame> = sequence
                .iter()
                .map(|voxels| {
                    let mut frame = Frame::new(2, 2, 2, 0).unwrap();
                    for &(x, y, z, c) in voxels {
                        let (bx, by, bz) = (x / 8, y / 8, z / 8);
                        if frame.brick_at(bx, by, bz).is_none() {
                            frame.reserve_next_brick().unwrap().commit(bx, by, bz).unwrap();
                        }
                        frame
                            .brick_at_mut(bx, by, bz)
                            .unwrap()
                            .set_voxel_filled(x % 8, y % 8, z % 8, pack_rgb(c * 60, 255 - c, c));
                    }
                    frame
                })
                .collect();

            let params = EncodingParams { gop_size, max_brick_group_size, motion_vectors };
            let mut decoder = Decoder::from_memory_with_pool(
                encode_to_memory(&frames, 16, params),
                Arc::new(InlinePool),
            )
            .unwrap();

            for (idx, original) in frames.iter().enumerate() {
                let decoded = decoder.decode_frame_replay(idx as u64).unwrap();
                prop_assert_eq!(decoded.num_voxels(), original.num_voxels());
                for z in 0..16i64 {
                    for y in 0..16i64 {
                        for x in 0..16i64 {
                            prop_assert_eq!(decoded.voxel_color(x, y, z), original.voxel_color(x, y, z));
                        }
                    }
                }
            }
        }
    }
}
