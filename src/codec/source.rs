//! Byte sources a decoder can read from.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Error, Result};

/// Input backing a decoder: either an in-memory file image or an open file.
///
/// Both expose the same contract: [`DecoderInput::read_window`] returns
/// exactly the requested byte range, or an error if it lies outside the
/// input.
#[derive(Debug)]
pub enum DecoderInput {
    /// Whole file image held in memory.
    Memory(Vec<u8>),
    /// File read on demand through a reusable window buffer.
    File {
        file: File,
        len: u64,
        window: Vec<u8>,
    },
}

impl DecoderInput {
    /// Open a file for windowed reads.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let len = file.metadata().map_err(Error::FileRead)?.len();
        Ok(DecoderInput::File {
            file,
            len,
            window: Vec::new(),
        })
    }

    /// Total input length in bytes.
    pub fn len(&self) -> u64 {
        match self {
            DecoderInput::Memory(bytes) => bytes.len() as u64,
            DecoderInput::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow `len` bytes starting at `offset`.
    ///
    /// For file inputs the returned slice lives in the window buffer and is
    /// overwritten by the next call.
    pub fn read_window(&mut self, offset: u64, len: usize) -> Result<&[u8]> {
        let end = offset.checked_add(len as u64).filter(|&end| end <= self.len());
        let Some(end) = end else {
            return Err(Error::invalid_input(format!(
                "read of {len} bytes at offset {offset} exceeds input of {} bytes",
                self.len()
            )));
        };

        match self {
            DecoderInput::Memory(bytes) => Ok(&bytes[offset as usize..end as usize]),
            DecoderInput::File { file, window, .. } => {
                window.clear();
                window.try_reserve(len)?;
                window.resize(len, 0);
                file.seek(SeekFrom::Start(offset)).map_err(Error::FileRead)?;
                file.read_exact(window).map_err(Error::FileRead)?;
                Ok(window.as_slice())
            }
        }
    }
}
