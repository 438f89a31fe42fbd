//! SPLV - Sparse voxel video encoding and decoding.
//!
//! This crate stores animated voxel volumes as `.splv` files. Each frame is
//! a fixed-size grid of 8x8x8 bricks, only occupied bricks are stored, and
//! frames after a keyframe are encoded as brick-level deltas with optional
//! motion compensation.
//!
//! # Architecture
//!
//! - `volume`: In-memory frame representation (bricks, frames, compact layout)
//! - `codec`: File format, encoder and random-access decoder
//! - `schema`: Encoding parameters
//! - `work`: Job pool and scratch buffers used for parallel group coding
//! - `tools`: File-level utilities (inspect, concat, split)
//!
//! # Example
//!
//! ```rust,no_run
//! use splv::{Decoder, Encoder, EncodingParams, Frame, pack_rgb};
//!
//! # fn main() -> splv::Result<()> {
//! // 64^3 voxel volume, 8x8x8 bricks
//! let mut encoder = Encoder::create("clip.splv", 64, 64, 64, 30.0, EncodingParams::default())?;
//!
//! for t in 0..60 {
//!     let mut frame = Frame::new(8, 8, 8, 16)?;
//!     let mut brick = frame.reserve_next_brick()?;
//!     brick.set_voxel_filled(t % 8, 4, 4, pack_rgb(255, 128, 0));
//!     brick.commit(3, 3, 3)?;
//!     encoder.encode_frame(&frame)?;
//! }
//! let stats = encoder.finish()?;
//! println!("{stats}");
//!
//! let mut decoder = Decoder::open("clip.splv")?;
//! let frame = decoder.decode_frame_replay(42)?;
//! println!("Frame 42 has {} voxels", frame.num_voxels());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod schema;
pub mod tools;
pub mod volume;
pub mod work;

// Re-export commonly used types
pub use codec::{Decoder, Encoder, EncoderStats, FrameType, IndexedFrame};
pub use error::{Error, ErrorKind, Result};
pub use schema::EncodingParams;
pub use volume::{Brick, Frame, FrameCompact, pack_rgb, unpack_rgb};
