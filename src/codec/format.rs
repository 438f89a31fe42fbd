//! Binary layout of SPLV files.
//!
//! All integers and floats are little-endian.

use std::io::{self, Write};
use std::ops::Range;

use crate::error::{Error, Result};
use crate::schema::EncodingParams;
use crate::volume::{BRICK_SIZE, EMPTY_BRICK};

/// Magic bytes identifying an SPLV file.
pub const SPLV_MAGIC: &[u8; 4] = b"SPLV";

/// Pack a four-part version number into one word.
pub const fn make_version(major: u8, minor: u8, patch: u8, tweak: u8) -> u32 {
    ((major as u32) << 24) | ((minor as u32) << 16) | ((patch as u32) << 8) | tweak as u32
}

/// Current format version.
pub const SPLV_VERSION: u32 = make_version(0, 2, 0, 0);

/// How a frame payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Self-contained frame.
    Key = 0,
    /// Changes relative to the previous frame.
    Delta = 1,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(FrameType::Key),
            1 => Some(FrameType::Delta),
            _ => None,
        }
    }
}

/// Kind of a changed-cell record in a delta frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RecordKind {
    /// The cell's brick was removed.
    Removed = 0,
    /// Full brick replacement.
    Intra = 1,
    /// Motion vector plus residual against the previous frame.
    Predicted = 2,
}

impl RecordKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(RecordKind::Removed),
            1 => Some(RecordKind::Intra),
            2 => Some(RecordKind::Predicted),
            _ => None,
        }
    }
}

/// File header.
#[derive(Debug, Clone, PartialEq)]
pub struct SplvHeader {
    /// Width in voxels.
    pub width: u32,
    /// Height in voxels.
    pub height: u32,
    /// Depth in voxels.
    pub depth: u32,
    /// Frames per second.
    pub framerate: f32,
    /// Number of encoded frames (written at finish).
    pub frame_count: u32,
    /// Clip length in seconds (written at finish).
    pub duration: f32,
    pub params: EncodingParams,
    /// Byte offset of the frame table (written at finish).
    pub frame_table_ptr: u64,
}

impl SplvHeader {
    /// Size of header in bytes.
    /// Magic(4) + Version(4) + Width(4) + Height(4) + Depth(4) + Framerate(4) +
    /// FrameCount(4) + Duration(4) + GopSize(4) + MaxBrickGroupSize(4) +
    /// MotionVectors(1) + Reserved(3) + FrameTablePtr(8) + Reserved(4) = 56
    pub const SIZE: usize = 56;

    /// Dimensions in bricks.
    pub fn brick_dimensions(&self) -> (u32, u32, u32) {
        (
            self.width / BRICK_SIZE,
            self.height / BRICK_SIZE,
            self.depth / BRICK_SIZE,
        )
    }

    /// Check structural well-formedness of a header read from a file.
    pub fn validate(&self) -> Result<()> {
        for (name, dim) in [("width", self.width), ("height", self.height), ("depth", self.depth)] {
            if dim == 0 || dim % BRICK_SIZE != 0 {
                return Err(Error::invalid_input(format!(
                    "{name} {dim} is not a positive multiple of {BRICK_SIZE}"
                )));
            }
        }
        let (bw, bh, bd) = self.brick_dimensions();
        if bw as u64 * bh as u64 * bd as u64 >= EMPTY_BRICK as u64 {
            return Err(Error::invalid_input(format!(
                "{}x{}x{} voxels is too large",
                self.width, self.height, self.depth
            )));
        }
        if !(self.framerate > 0.0 && self.framerate.is_finite()) {
            return Err(Error::invalid_input(format!(
                "framerate {} must be positive",
                self.framerate
            )));
        }
        if self.frame_count == 0 {
            return Err(Error::invalid_input("file contains no frames"));
        }
        self.params
            .validate()
            .map_err(|e| Error::invalid_input(format!("bad encoding parameters: {e}")))?;
        Ok(())
    }

    /// Write header to output.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(SPLV_MAGIC)?;
        w.write_all(&SPLV_VERSION.to_le_bytes())?;
        w.write_all(&self.width.to_le_bytes())?;
        w.write_all(&self.height.to_le_bytes())?;
        w.write_all(&self.depth.to_le_bytes())?;
        w.write_all(&self.framerate.to_le_bytes())?;
        w.write_all(&self.frame_count.to_le_bytes())?;
        w.write_all(&self.duration.to_le_bytes())?;
        w.write_all(&self.params.gop_size.to_le_bytes())?;
        w.write_all(&self.params.max_brick_group_size.to_le_bytes())?;
        w.write_all(&[self.params.motion_vectors as u8, 0, 0, 0])?;
        w.write_all(&self.frame_table_ptr.to_le_bytes())?;
        // Reserved bytes
        w.write_all(&[0u8; 4])?;
        Ok(())
    }

    /// Parse a header from the first [`SplvHeader::SIZE`] bytes of a file.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);

        if r.bytes(4)? != SPLV_MAGIC {
            return Err(Error::invalid_input("invalid SPLV magic bytes"));
        }
        let version = r.u32()?;
        if version != SPLV_VERSION {
            return Err(Error::invalid_input(format!(
                "unsupported SPLV version {version:#010x}, expected {SPLV_VERSION:#010x}"
            )));
        }

        let width = r.u32()?;
        let height = r.u32()?;
        let depth = r.u32()?;
        let framerate = r.f32()?;
        let frame_count = r.u32()?;
        let duration = r.f32()?;
        let gop_size = r.u32()?;
        let max_brick_group_size = r.u32()?;
        let motion_vectors = match r.u8()? {
            0 => false,
            1 => true,
            v => return Err(Error::invalid_input(format!("invalid motion vector flag {v}"))),
        };
        r.bytes(3)?;
        let frame_table_ptr = r.u64()?;
        r.bytes(4)?;

        Ok(Self {
            width,
            height,
            depth,
            framerate,
            frame_count,
            duration,
            params: EncodingParams {
                gop_size,
                max_brick_group_size,
                motion_vectors,
            },
            frame_table_ptr,
        })
    }
}

/// One frame table entry: payload offset tagged with the frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTableEntry {
    pub frame_type: FrameType,
    pub offset: u64,
}

impl FrameTableEntry {
    /// Size of one entry in bytes.
    pub const SIZE: usize = 8;

    const OFFSET_MASK: u64 = (1 << 56) - 1;

    pub fn pack(&self) -> u64 {
        debug_assert!(self.offset <= Self::OFFSET_MASK);
        ((self.frame_type as u64) << 56) | self.offset
    }

    pub fn unpack(v: u64) -> Result<Self> {
        let frame_type = FrameType::from_u8((v >> 56) as u8)
            .ok_or_else(|| Error::invalid_input(format!("invalid frame type {}", v >> 56)))?;
        Ok(Self {
            frame_type,
            offset: v & Self::OFFSET_MASK,
        })
    }

    /// Largest payload offset an entry can express.
    pub fn max_offset() -> u64 {
        Self::OFFSET_MASK
    }
}

/// Fixed fields at the start of every frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FramePrelude {
    pub frame_type: FrameType,
    /// Keyframes: brick count. Delta frames: changed cell count.
    pub records: u32,
    /// Filled voxels in the reconstructed frame.
    pub voxels: u64,
    pub groups: u32,
}

impl FramePrelude {
    pub const SIZE: usize = 17;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.frame_type as u8);
        put_u32(out, self.records);
        put_u64(out, self.voxels);
        put_u32(out, self.groups);
    }

    pub fn read_from(r: &mut ByteReader<'_>) -> Result<Self> {
        let tag = r.u8()?;
        let frame_type = FrameType::from_u8(tag)
            .ok_or_else(|| Error::invalid_input(format!("invalid frame type {tag}")))?;
        Ok(Self {
            frame_type,
            records: r.u32()?,
            voxels: r.u64()?,
            groups: r.u32()?,
        })
    }
}

/// Directory entry describing one compressed brick group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GroupEntry {
    pub records: u32,
    pub blob_len: u32,
}

impl GroupEntry {
    pub const SIZE: usize = 8;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        put_u32(out, self.records);
        put_u32(out, self.blob_len);
    }

    pub fn read_from(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            records: r.u32()?,
            blob_len: r.u32()?,
        })
    }
}

#[inline]
pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

#[inline]
pub(crate) fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Bounds-checked little-endian reader over a byte slice.
///
/// Running past the end is reported as invalid input.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::invalid_input(format!(
                "unexpected end of data: need {n} bytes, {} left",
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(&self, what: &str) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::invalid_input(format!(
                "{} trailing bytes after {what}",
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Compress a raw group stream using LZ4, prefixed with its raw size.
pub(crate) fn compress_lz4(raw: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(raw)
}

/// Largest output an LZ4 block can produce per input byte.
const LZ4_MAX_EXPANSION: usize = 255;

/// Decompress a size-prefixed LZ4 blob into `out`.
///
/// The declared size is checked against `max_len` and against what the
/// compressed bytes could possibly expand to before anything is allocated.
pub(crate) fn decompress_lz4_into(blob: &[u8], max_len: usize, out: &mut Vec<u8>) -> Result<()> {
    let mut r = ByteReader::new(blob);
    let raw_len = r.u32()? as usize;
    if raw_len > max_len {
        return Err(Error::invalid_input(format!(
            "compressed block claims {raw_len} bytes, at most {max_len} expected"
        )));
    }
    let max_expansion = r.remaining().saturating_mul(LZ4_MAX_EXPANSION);
    if raw_len > max_expansion {
        return Err(Error::invalid_input(format!(
            "compressed block of {} bytes cannot expand to {raw_len} bytes",
            r.remaining()
        )));
    }

    out.clear();
    out.try_reserve(raw_len)?;
    out.resize(raw_len, 0);
    let written = lz4_flex::block::decompress_into(&blob[4..], out)
        .map_err(|e| Error::invalid_input(format!("corrupt LZ4 block: {e}")))?;
    if written != raw_len {
        return Err(Error::invalid_input(format!(
            "LZ4 block decoded to {written} bytes, expected {raw_len}"
        )));
    }
    Ok(())
}

/// Split `len` records into balanced groups of at most `max_group` each.
///
/// The group count is the minimum possible and sizes differ by at most one,
/// larger groups first.
pub(crate) fn partition_groups(len: usize, max_group: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let max_group = max_group.max(1);
    let num_groups = len.div_ceil(max_group);
    let base = len / num_groups;
    let extra = len % num_groups;

    let mut start = 0;
    (0..num_groups)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}
