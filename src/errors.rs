//! Crate-specific error types for slide-mmap.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias for slide-mmap operations.
pub type Result<T> = std::result::Result<T, MappedFileError>;

/// Error type covering argument validation, missing files, OS failures and handle state.
#[derive(Debug, Error)]
pub enum MappedFileError {
    /// A size or path argument cannot be honored (zero size, unmappable size, overflow).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The file to open does not exist.
    #[error("file not found: {}", path.display())]
    NotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    /// Wrapper for `std::io::Error` raised at the OS boundary
    /// (creation, truncation, mapping, remapping, flushing, locking).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation on a handle that is closed, poisoned by a failed resize,
    /// or lacks the access it needs.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Error when a requested offset/length pair is out of bounds.
    #[error("range out of bounds: offset={offset}, len={len}, total={total}")]
    OutOfBounds {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: u64,
        /// Total size of the mapped file.
        total: u64,
    },
}

impl MappedFileError {
    /// Map an `open(2)`-style failure onto the taxonomy, keeping `NotFound` distinct.
    pub(crate) fn from_open(err: io::Error, path: PathBuf) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io(err)
        }
    }
}
