//! Error types for the SPLV codec.

use std::collections::TryReserveError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::schema::ParamsError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the codec.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid encoding parameters: {0}")]
    InvalidParams(#[from] ParamsError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),

    #[error("Failed to open {}: {source}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read input: {0}")]
    FileRead(#[source] io::Error),

    #[error("Failed to write output: {0}")]
    FileWrite(#[source] io::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller broke an API contract.
    InvalidArguments,
    /// Encoded data is corrupt or from an unsupported version.
    InvalidInput,
    OutOfMemory,
    /// Opening, reading or writing a file failed.
    Io,
    /// Internal invariant violation or work pool failure.
    Runtime,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArguments(_) | Error::InvalidParams(_) => ErrorKind::InvalidArguments,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Error::FileOpen { .. } | Error::FileRead(_) | Error::FileWrite(_) => ErrorKind::Io,
            Error::Runtime(_) => ErrorKind::Runtime,
        }
    }

    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub(crate) fn invalid_arguments(msg: impl Into<String>) -> Self {
        Error::InvalidArguments(msg.into())
    }
}
