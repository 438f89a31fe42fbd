//! SPLV sparse voxel video encoding and decoding.
//!
//! An SPLV file stores a fixed-size voxel volume over time, split into
//! 8x8x8 bricks. Frames are grouped into GOPs: the first frame of each GOP
//! is a self-contained keyframe, every other frame is a delta against the
//! frame before it. A frame table at the end of the file allows random
//! access to any keyframe.
//!
//! # File Format
//!
//! All integers are little-endian.
//!
//! ```text
//! Header (56 bytes):
//!   Magic: "SPLV" (4 bytes)
//!   Version: u32 (major.minor.patch.tweak, one byte each)
//!   Width, Height, Depth: u32 (voxels, multiples of 8)
//!   Frame rate: f32
//!   Frame count: u32
//!   Duration: f32 (seconds)
//!   GOP size: u32
//!   Max brick group size: u32
//!   Motion vectors: u8 + 3 reserved bytes
//!   Frame table pointer: u64
//!   Reserved: 4 bytes
//!
//! Frame payload (variable):
//!   Frame type: u8 (0 = key, 1 = delta)
//!   Records: u32
//!   Voxels: u64
//!   Groups: u32
//!   [keyframes] Map length: u32, LZ4 occupancy map (u32 per brick cell)
//!   Group directory: (records: u32, compressed length: u32) per group
//!   Group blobs: LZ4 block, uncompressed size prepended
//!
//! Frame table (frame_count * 8 bytes):
//!   (frame type << 56) | payload offset: u64
//! ```
//!
//! Keyframe records are intra-coded bricks in occupancy map order. Delta
//! records carry a cell index and either remove the cell, intra-code it,
//! or code it as a residual against a motion-compensated block of the
//! previous frame.

mod brick_codec;
mod decoder;
mod encoder;
mod format;
mod motion;
mod source;

pub use decoder::{Decoder, FrameIterator, IndexedFrame};
pub use encoder::{Encoder, EncoderStats};
pub use format::{
    FrameTableEntry, FrameType, SPLV_MAGIC, SPLV_VERSION, SplvHeader, make_version,
};
pub use source::DecoderInput;
