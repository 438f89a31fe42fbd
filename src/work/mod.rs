//! Work submission for parallel brick group coding.
//!
//! Codec operations split a frame into brick groups and hand each group to
//! a shared [`WorkPool`] as an independent job. Every operation waits for
//! its whole batch before returning, so callers only ever see blocking
//! calls. Jobs draw temporary byte buffers from a [`ScratchPool`].

mod pool;
mod scratch;

#[cfg(not(target_arch = "wasm32"))]
pub use pool::RayonPool;
pub use pool::{CancelToken, InlinePool, Job, WorkPool, default_pool, map_jobs};
pub use scratch::{ScratchBuffer, ScratchPool};
