//! Boundary operations for codec and binding layers.
//!
//! Each operation takes an info struct, logs failures, and returns them as values.
//! [`Status`] flattens any result into the success-flag-plus-message shape a
//! binding layer hands to its host.

use std::fmt;
use std::path::PathBuf;

use crate::config::MapConfig;
use crate::errors::Result;
use crate::mmap::MappedFile;

/// Request to create a new persistent file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCreateInfo {
    /// Target path; an existing file is truncated.
    pub path: PathBuf,
    /// Initial size in bytes; must be non-zero.
    pub initial_size: u64,
}

/// Request to open an existing persistent file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOpenInfo {
    /// Path to open.
    pub path: PathBuf,
    /// Map read-write instead of read-only.
    pub write_access: bool,
}

/// Request to create a cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheCreateInfo {
    /// Sizing and page granularity; the process-wide configuration when `None`.
    pub config: Option<MapConfig>,
}

/// Request to resize a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileResizeInfo {
    /// Requested size in bytes.
    pub size: u64,
    /// Round down to a page and add one page.
    pub page_align: bool,
}

/// Success flag plus human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Empty on success, the error text otherwise.
    pub message: String,
}

impl Status {
    /// A successful status.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(err) => Self {
                success: false,
                message: err.to_string(),
            },
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            f.write_str("success")
        } else {
            write!(f, "failure: {}", self.message)
        }
    }
}

/// Create and map a new persistent file.
///
/// # Errors
///
/// Returns errors from [`MappedFile::create`].
pub fn create_file(info: &FileCreateInfo) -> Result<MappedFile> {
    MappedFile::create(&info.path, info.initial_size).inspect_err(|err| {
        log::error!("failed to create file {}: {err}", info.path.display());
    })
}

/// Open and map an existing persistent file.
///
/// # Errors
///
/// Returns errors from [`MappedFile::open`].
pub fn open_file(info: &FileOpenInfo) -> Result<MappedFile> {
    MappedFile::open(&info.path, info.write_access).inspect_err(|err| {
        log::error!("failed to open file {}: {err}", info.path.display());
    })
}

/// Create and map a temporary cache file.
///
/// # Errors
///
/// Returns errors from [`MappedFile::create_cache_with`].
pub fn create_cache_file(info: &CacheCreateInfo) -> Result<MappedFile> {
    let config = info.config.unwrap_or_else(|| *MapConfig::global());
    MappedFile::create_cache_with(&config).inspect_err(|err| {
        log::error!("failed to create a cache file: {err}");
    })
}

/// Resize a mapped file, returning the new size.
///
/// # Errors
///
/// Returns errors from [`MappedFile::resize`].
pub fn resize_file(file: &MappedFile, info: &FileResizeInfo) -> Result<u64> {
    file.resize(info.size, info.page_align).inspect_err(|err| {
        log::error!("failed to resize {file:?} to {} bytes: {err}", info.size);
    })
}

#[cfg(feature = "async")]
pub mod r#async {
    //! Async constructors (Tokio) that run the blocking work on the blocking pool.
    use std::io;

    use tokio::task;

    use super::{CacheCreateInfo, FileCreateInfo, FileOpenInfo};
    use crate::errors::{MappedFileError, Result};
    use crate::mmap::MappedFile;

    async fn blocking<F>(f: F) -> Result<MappedFile>
    where
        F: FnOnce() -> Result<MappedFile> + Send + 'static,
    {
        task::spawn_blocking(f)
            .await
            .map_err(|e| MappedFileError::Io(io::Error::new(io::ErrorKind::Other, e)))?
    }

    /// Async [`create_file`](super::create_file).
    ///
    /// # Errors
    ///
    /// Returns errors from [`create_file`](super::create_file), or `Io` if the task fails.
    pub async fn create_file_async(info: FileCreateInfo) -> Result<MappedFile> {
        blocking(move || super::create_file(&info)).await
    }

    /// Async [`open_file`](super::open_file).
    ///
    /// # Errors
    ///
    /// Returns errors from [`open_file`](super::open_file), or `Io` if the task fails.
    pub async fn open_file_async(info: FileOpenInfo) -> Result<MappedFile> {
        blocking(move || super::open_file(&info)).await
    }

    /// Async [`create_cache_file`](super::create_cache_file).
    ///
    /// # Errors
    ///
    /// Returns errors from [`create_cache_file`](super::create_cache_file), or `Io` if the task fails.
    pub async fn create_cache_file_async(info: CacheCreateInfo) -> Result<MappedFile> {
        blocking(move || super::create_cache_file(&info)).await
    }
}
