//! Sequential SPLV encoder.

use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::brick_codec::{encode_intra, encode_predicted, geometry_difference};
use super::format::{
    FramePrelude, FrameTableEntry, FrameType, GroupEntry, RecordKind, SplvHeader, compress_lz4,
    partition_groups, put_u32,
};
use super::motion;
use crate::error::{Error, Result};
use crate::schema::EncodingParams;
use crate::volume::{BRICK_SIZE, Brick, EMPTY_BRICK, Frame};
use crate::work::{ScratchPool, WorkPool, default_pool, map_jobs};

/// Initial scratch capacity reserved per brick record in a group.
const SCRATCH_BYTES_PER_RECORD: usize = 1024;

/// Cap on the initial capacity of one scratch buffer.
const MAX_SCRATCH_PREALLOC: usize = 16 << 20;

/// Compressed output of one brick group.
struct CompressedGroup {
    records: u32,
    blob: Vec<u8>,
}

/// A cell whose content differs from the previous frame.
#[derive(Clone, Copy)]
enum CellChange<'f> {
    Removed,
    Changed(&'f Brick),
}

/// Writes a sequence of frames as an SPLV stream.
///
/// Frames are encoded in presentation order. Every `gop_size`-th frame is a
/// keyframe; the rest store only the cells that changed since the previous
/// frame. Brick groups are compressed in parallel on the shared work pool,
/// but each call blocks until its frame is written.
///
/// Usage:
/// ```ignore
/// let mut encoder = Encoder::create("clip.splv", 64, 64, 64, 30.0, EncodingParams::default())?;
/// for frame in &frames {
///     encoder.encode_frame(frame)?;
/// }
/// let stats = encoder.finish()?;
/// ```
pub struct Encoder<W: Write + Seek = BufWriter<File>> {
    writer: W,
    /// Set when the encoder created its own output file.
    out_path: Option<PathBuf>,
    header: SplvHeader,
    frame_table: Vec<FrameTableEntry>,
    /// Full state of the previously encoded frame.
    last_frame: Option<Frame>,
    pool: Arc<dyn WorkPool>,
    scratch: ScratchPool,
    failed: bool,
    keyframes: u32,
}

impl Encoder<BufWriter<File>> {
    /// Create an encoder writing to a new file at `path`.
    ///
    /// Dimensions are in voxels and must be positive multiples of 8.
    pub fn create<P: AsRef<Path>>(
        path: P,
        width: u32,
        height: u32,
        depth: u32,
        framerate: f32,
        params: EncodingParams,
    ) -> Result<Self> {
        Self::create_with_pool(path, width, height, depth, framerate, params, default_pool())
    }

    /// Like [`Encoder::create`], running group jobs on `pool`.
    pub fn create_with_pool<P: AsRef<Path>>(
        path: P,
        width: u32,
        height: u32,
        depth: u32,
        framerate: f32,
        params: EncodingParams,
        pool: Arc<dyn WorkPool>,
    ) -> Result<Self> {
        validate_stream(width, height, depth, framerate, &params)?;

        let path = path.as_ref();
        let file = File::create(path).map_err(|source| Error::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;

        let mut encoder = Self::from_writer(
            BufWriter::new(file),
            width,
            height,
            depth,
            framerate,
            params,
            pool,
        )?;
        encoder.out_path = Some(path.to_path_buf());
        Ok(encoder)
    }
}

impl<W: Write + Seek> Encoder<W> {
    /// Create an encoder writing to an arbitrary seekable sink.
    pub fn from_writer(
        mut writer: W,
        width: u32,
        height: u32,
        depth: u32,
        framerate: f32,
        params: EncodingParams,
        pool: Arc<dyn WorkPool>,
    ) -> Result<Self> {
        validate_stream(width, height, depth, framerate, &params)?;
        if params.max_brick_group_size < 8 {
            log::warn!(
                "max_brick_group_size {} is very small, groups will compress poorly",
                params.max_brick_group_size
            );
        }

        let header = SplvHeader {
            width,
            height,
            depth,
            framerate,
            frame_count: 0, // Will be updated on finish
            duration: 0.0,
            params,
            frame_table_ptr: 0,
        };

        // Write placeholder header
        header.write_to(&mut writer).map_err(Error::FileWrite)?;

        let scratch_capacity = (params.max_brick_group_size as usize)
            .saturating_mul(SCRATCH_BYTES_PER_RECORD)
            .min(MAX_SCRATCH_PREALLOC);

        Ok(Self {
            writer,
            out_path: None,
            header,
            frame_table: Vec::new(),
            last_frame: None,
            pool,
            scratch: ScratchPool::new(scratch_capacity),
            failed: false,
            keyframes: 0,
        })
    }

    /// Number of frames encoded so far.
    pub fn frame_count(&self) -> u32 {
        self.header.frame_count
    }

    pub fn params(&self) -> &EncodingParams {
        &self.header.params
    }

    /// Dimensions in voxels.
    pub fn dimensions(&self) -> (u32, u32, u32) {
        (self.header.width, self.header.height, self.header.depth)
    }

    pub fn framerate(&self) -> f32 {
        self.header.framerate
    }

    /// Encode the next frame.
    ///
    /// Returns whether the caller may release `frame` and every earlier
    /// frame. The encoder keeps its own copy of the reference state, so this
    /// is always `true` once the call succeeds.
    ///
    /// After an error other than a rejected argument the encoder can only
    /// be aborted.
    pub fn encode_frame(&mut self, frame: &Frame) -> Result<bool> {
        if self.failed {
            return Err(Error::Runtime(
                "encoder failed earlier and can only be aborted".into(),
            ));
        }

        let expected = self.header.brick_dimensions();
        if frame.dimensions() != expected {
            return Err(Error::invalid_arguments(format!(
                "frame is {:?} bricks, encoder expects {:?}",
                frame.dimensions(),
                expected
            )));
        }
        if self.header.frame_count == u32::MAX {
            return Err(Error::invalid_arguments("frame count limit reached"));
        }

        match self.write_frame(frame) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let idx = self.header.frame_count;
        let frame_type = if self.header.params.is_keyframe(idx as u64) {
            FrameType::Key
        } else {
            FrameType::Delta
        };

        let payload = match (frame_type, &self.last_frame) {
            (FrameType::Key, _) => self.encode_keyframe(frame)?,
            (FrameType::Delta, Some(prev)) => self.encode_delta(frame, prev)?,
            (FrameType::Delta, None) => {
                return Err(Error::Runtime(format!(
                    "frame {idx} is a delta frame but no reference frame is retained"
                )));
            }
        };

        let offset = self.writer.stream_position().map_err(Error::FileWrite)?;
        if offset > FrameTableEntry::max_offset() {
            return Err(Error::Runtime(format!(
                "output offset {offset} exceeds the frame table range"
            )));
        }
        self.writer.write_all(&payload).map_err(Error::FileWrite)?;
        self.frame_table.try_reserve(1)?;
        self.frame_table.push(FrameTableEntry { frame_type, offset });

        // Only needed when the next frame may be a delta
        if self.header.params.gop_size > 1 {
            match &mut self.last_frame {
                Some(last) => last.copy_from(frame)?,
                None => {
                    let (w, h, d) = frame.dimensions();
                    let mut last = Frame::new(w, h, d, frame.bricks_len())?;
                    last.copy_from(frame)?;
                    self.last_frame = Some(last);
                }
            }
        }

        self.header.frame_count += 1;
        if frame_type == FrameType::Key {
            self.keyframes += 1;
        }

        log::debug!(
            "encoded frame {idx} ({frame_type:?}): {} bricks, {} bytes",
            frame.bricks_len(),
            payload.len()
        );
        Ok(())
    }

    fn encode_keyframe(&self, frame: &Frame) -> Result<Vec<u8>> {
        let bricks: Vec<&Brick> = frame.occupied_cells().map(|(_, brick)| brick).collect();

        // Stored bricks are renumbered in map order
        let mut map_bytes = Vec::new();
        map_bytes.try_reserve_exact(frame.map().len() * 4)?;
        let mut next = 0u32;
        for &entry in frame.map() {
            let stored = if entry == EMPTY_BRICK {
                EMPTY_BRICK
            } else {
                next += 1;
                next - 1
            };
            put_u32(&mut map_bytes, stored);
        }
        let map_blob = compress_lz4(&map_bytes);

        let ranges = partition_groups(bricks.len(), self.header.params.max_brick_group_size as usize);
        let groups = self.compress_groups(ranges, |range, raw| {
            for brick in &bricks[range] {
                encode_intra(brick, raw);
            }
        })?;

        let prelude = FramePrelude {
            frame_type: FrameType::Key,
            records: bricks.len() as u32,
            voxels: frame.num_voxels(),
            groups: groups.len() as u32,
        };
        assemble_payload(prelude, Some(&map_blob), &groups)
    }

    fn encode_delta(&self, frame: &Frame, prev: &Frame) -> Result<Vec<u8>> {
        let mut changes: Vec<(u32, CellChange<'_>)> = Vec::new();
        for map_idx in 0..frame.map().len() {
            let change = match (frame.brick_at_index(map_idx), prev.brick_at_index(map_idx)) {
                (None, None) => continue,
                (None, Some(_)) => CellChange::Removed,
                (Some(cur), Some(old)) if cur.same_content(old) => continue,
                (Some(cur), _) => CellChange::Changed(cur),
            };
            changes.try_reserve(1)?;
            changes.push((map_idx as u32, change));
        }

        let motion_vectors = self.header.params.motion_vectors;
        let ranges = partition_groups(changes.len(), self.header.params.max_brick_group_size as usize);
        let groups = self.compress_groups(ranges, |range, raw| {
            for &(map_idx, change) in &changes[range] {
                put_u32(raw, map_idx);
                match change {
                    CellChange::Removed => raw.push(RecordKind::Removed as u8),
                    CellChange::Changed(brick) => {
                        let cell = frame.map_coords(map_idx as usize);
                        encode_changed_brick(brick, prev, cell, motion_vectors, raw);
                    }
                }
            }
        })?;

        let prelude = FramePrelude {
            frame_type: FrameType::Delta,
            records: changes.len() as u32,
            voxels: frame.num_voxels(),
            groups: groups.len() as u32,
        };
        assemble_payload(prelude, None, &groups)
    }

    /// Encode and compress each record range as its own job.
    fn compress_groups<F>(&self, ranges: Vec<Range<usize>>, encode: F) -> Result<Vec<CompressedGroup>>
    where
        F: Fn(Range<usize>, &mut Vec<u8>) + Sync,
    {
        let scratch = &self.scratch;
        map_jobs(self.pool.as_ref(), None, ranges, |range| {
            let records = range.len() as u32;
            let mut raw = scratch.acquire();
            encode(range, &mut *raw);

            let blob = compress_lz4(&raw);
            if blob.len() > u32::MAX as usize {
                return Err(Error::Runtime(format!(
                    "compressed group of {} bytes is too large",
                    blob.len()
                )));
            }
            Ok(CompressedGroup { records, blob })
        })
    }

    /// Write the frame table, finalize the header and flush.
    pub fn finish(self) -> Result<EncoderStats> {
        self.finish_into_inner().map(|(_, stats)| stats)
    }

    /// Like [`Encoder::finish`], also handing back the underlying sink.
    pub fn finish_into_inner(mut self) -> Result<(W, EncoderStats)> {
        if self.failed {
            return Err(Error::Runtime(
                "encoder failed earlier and can only be aborted".into(),
            ));
        }
        if self.header.frame_count == 0 {
            return Err(Error::invalid_arguments("no frames were encoded"));
        }

        // Write frame table at current position
        let table_ptr = self.writer.stream_position().map_err(Error::FileWrite)?;
        for entry in &self.frame_table {
            self.writer
                .write_all(&entry.pack().to_le_bytes())
                .map_err(Error::FileWrite)?;
        }

        self.header.frame_table_ptr = table_ptr;
        self.header.duration = self.header.frame_count as f32 / self.header.framerate;

        // Seek back and rewrite header
        self.writer.seek(SeekFrom::Start(0)).map_err(Error::FileWrite)?;
        self.header.write_to(&mut self.writer).map_err(Error::FileWrite)?;
        self.writer.flush().map_err(Error::FileWrite)?;

        let frame_count = self.header.frame_count;
        let total_bytes = table_ptr + (frame_count as u64 * FrameTableEntry::SIZE as u64);
        let stats = EncoderStats {
            frame_count,
            keyframes: self.keyframes,
            total_bytes,
            average_frame_size: table_ptr.saturating_sub(SplvHeader::SIZE as u64)
                / frame_count as u64,
        };
        log::info!("finished SPLV stream: {stats}");

        Ok((self.writer, stats))
    }

    /// Stop encoding and discard the output.
    ///
    /// `encode_frame` waits for all of its group jobs, so no work is
    /// outstanding by the time this runs. If the encoder created its output
    /// file, the file is removed. A sink passed to
    /// [`Encoder::from_writer`] is dropped as is: whatever was already
    /// written to it (placeholder header, frame payloads) stays there and
    /// is not a valid stream.
    pub fn abort(self) {
        drop(self.writer);
        if let Some(path) = self.out_path
            && let Err(e) = fs::remove_file(&path)
        {
            log::warn!("failed to remove aborted output {}: {e}", path.display());
        }
    }
}

fn validate_stream(
    width: u32,
    height: u32,
    depth: u32,
    framerate: f32,
    params: &EncodingParams,
) -> Result<()> {
    for (name, dim) in [("width", width), ("height", height), ("depth", depth)] {
        if dim == 0 || dim % BRICK_SIZE != 0 {
            return Err(Error::invalid_arguments(format!(
                "{name} {dim} is not a positive multiple of {BRICK_SIZE}"
            )));
        }
    }
    let cells = (width / BRICK_SIZE) as u64 * (height / BRICK_SIZE) as u64 * (depth / BRICK_SIZE) as u64;
    if cells >= EMPTY_BRICK as u64 {
        return Err(Error::invalid_arguments(format!(
            "{width}x{height}x{depth} voxels is too large"
        )));
    }
    if !(framerate > 0.0 && framerate.is_finite()) {
        return Err(Error::invalid_arguments(format!(
            "framerate {framerate} must be positive"
        )));
    }
    params.validate()?;
    Ok(())
}

/// Append a changed brick record body, predicted from `prev` when that wins.
fn encode_changed_brick(
    brick: &Brick,
    prev: &Frame,
    cell: (u32, u32, u32),
    motion_vectors: bool,
    raw: &mut Vec<u8>,
) {
    if motion_vectors {
        let (mv, reference) = motion::search(brick, prev, cell);
        // Predict only while fewer than half the voxels change occupancy
        if geometry_difference(brick, &reference) * 2 < brick.num_voxels() {
            let start = raw.len();
            raw.push(RecordKind::Predicted as u8);
            raw.extend_from_slice(&[mv.dx as u8, mv.dy as u8, mv.dz as u8]);
            encode_predicted(brick, &reference, raw);
            let predicted_len = raw.len() - start;

            raw.push(RecordKind::Intra as u8);
            encode_intra(brick, raw);
            let intra_len = raw.len() - start - predicted_len;

            if intra_len < predicted_len {
                raw.drain(start..start + predicted_len);
            } else {
                raw.truncate(start + predicted_len);
            }
            return;
        }
    }
    raw.push(RecordKind::Intra as u8);
    encode_intra(brick, raw);
}

fn assemble_payload(
    prelude: FramePrelude,
    map_blob: Option<&[u8]>,
    groups: &[CompressedGroup],
) -> Result<Vec<u8>> {
    let map_len = map_blob.map_or(0, |blob| 4 + blob.len());
    let blobs_len: usize = groups.iter().map(|g| g.blob.len()).sum();
    let total = FramePrelude::SIZE + map_len + groups.len() * GroupEntry::SIZE + blobs_len;

    let mut out = Vec::new();
    out.try_reserve_exact(total)?;

    prelude.write_to(&mut out);
    if let Some(blob) = map_blob {
        let blob_len = u32::try_from(blob.len())
            .map_err(|_| Error::Runtime("occupancy map too large".into()))?;
        put_u32(&mut out, blob_len);
        out.extend_from_slice(blob);
    }
    for group in groups {
        GroupEntry {
            records: group.records,
            blob_len: group.blob.len() as u32,
        }
        .write_to(&mut out);
    }
    for group in groups {
        out.extend_from_slice(&group.blob);
    }

    debug_assert_eq!(out.len(), total);
    Ok(out)
}

/// Statistics from an encoding session.
#[derive(Debug, Clone)]
pub struct EncoderStats {
    /// Total frames encoded.
    pub frame_count: u32,
    /// Frames encoded as keyframes.
    pub keyframes: u32,
    /// Total file size in bytes.
    pub total_bytes: u64,
    /// Average encoded frame size.
    pub average_frame_size: u64,
}

impl std::fmt::Display for EncoderStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames ({} keyframes), {} bytes total, {} bytes/frame avg",
            self.frame_count, self.keyframes, self.total_bytes, self.average_frame_size
        )
    }
}
