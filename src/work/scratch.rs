//! Reusable byte buffers handed out to jobs.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

/// Pool of scratch byte buffers.
///
/// Each job acquires its own buffer for the duration of its work, so no
/// buffer is ever shared between concurrently running jobs. Buffers keep
/// their capacity when returned.
#[derive(Debug)]
pub struct ScratchPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    initial_capacity: usize,
}

impl ScratchPool {
    /// Create an empty pool whose fresh buffers start with `initial_capacity` bytes.
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            initial_capacity,
        }
    }

    /// Take a cleared buffer from the pool, allocating one if none is free.
    pub fn acquire(&self) -> ScratchBuffer<'_> {
        let buf = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.initial_capacity));
        ScratchBuffer { pool: self, buf }
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A buffer borrowed from a [`ScratchPool`], returned on drop.
pub struct ScratchBuffer<'a> {
    pool: &'a ScratchPool,
    buf: Vec<u8>,
}

impl Deref for ScratchBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for ScratchBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for ScratchBuffer<'_> {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        self.pool
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(buf);
    }
}
