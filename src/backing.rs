//! Backing-store resolution: produces an open, sized storage primitive before any mapping.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::{MappedFileError, Result};

/// What kind of storage a handle sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    /// A named file that outlives the handle.
    Persistent,
    /// An unnamed temporary file, gone once the handle closes.
    Cache,
}

/// Create (or truncate) `path` for read-write access and size it to `size` bytes.
pub(crate) fn create(path: &Path, size: u64) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .truncate(true)
        .open(path)?;
    set_len(&file, 0, size)?;
    Ok(file)
}

/// Open an existing file and report its true length.
pub(crate) fn open(path: &Path, write_access: bool) -> Result<(File, u64)> {
    let file = OpenOptions::new()
        .read(true)
        .write(write_access)
        .open(path)
        .map_err(|e| MappedFileError::from_open(e, path.to_path_buf()))?;
    let len = query_len(&file)?;
    Ok((file, len))
}

/// Allocate an unlinked temporary file of `size` bytes plus a diagnostic label.
pub(crate) fn temporary(size: u64) -> Result<(File, PathBuf)> {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let file = tempfile::tempfile()?;
    set_len(&file, 0, size)?;
    let label = format!(
        "cache://{}-{}",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    );
    Ok((file, PathBuf::from(label)))
}

/// Length of the storage primitive, measured by seeking to its end.
pub(crate) fn query_len(mut file: &File) -> io::Result<u64> {
    let len = file.seek(SeekFrom::End(0))?;
    file.rewind()?;
    Ok(len)
}

/// Truncate or extend `file` from `current` to `len` bytes.
///
/// When growing, a zero byte is written at `len - 1` so the filesystem allocates
/// the extension instead of leaving a hole the mapping would fault on later.
pub(crate) fn set_len(file: &File, current: u64, len: u64) -> io::Result<()> {
    file.set_len(len)?;
    if len > current {
        materialize(file, len)?;
    }
    Ok(())
}

pub(crate) fn materialize(mut file: &File, len: u64) -> io::Result<()> {
    file.seek(SeekFrom::Start(len - 1))?;
    file.write_all(&[0])?;
    file.rewind()?;
    Ok(())
}
