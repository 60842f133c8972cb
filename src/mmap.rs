//! Memory-mapped file handle: construction, access, resize and teardown.

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backing::{self, BackingKind};
use crate::config::MapConfig;
use crate::errors::{MappedFileError, Result};
use crate::lock::{AdvisoryLock, LockState, PlatformLock};
use crate::region::Region;
use crate::utils::{mappable_len, slice_range};

// Error message constants
const ERR_ZERO_SIZE: &str = "size must be greater than zero";
const ERR_ZERO_LENGTH_FILE: &str = "cannot map a zero-length file";
const ERR_CLOSED: &str = "handle is closed";
const ERR_POISONED: &str = "handle is unusable after a failed resize and must be closed";
const ERR_READ_ONLY: &str = "operation requires write access";

#[cfg(test)]
thread_local! {
    static FAIL_NEXT_REMAP: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Fault point between extending the file and remapping it.
#[cfg(test)]
fn remap_fault() -> io::Result<()> {
    if FAIL_NEXT_REMAP.with(|fail| fail.replace(false)) {
        return Err(io::Error::new(io::ErrorKind::Other, "injected remap failure"));
    }
    Ok(())
}

#[cfg(not(test))]
#[inline(always)]
fn remap_fault() -> io::Result<()> {
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Mapped,
    /// A resize changed the file but could not remap it.
    Poisoned,
    Closed,
}

/// Mutable part of a handle. Storage primitive, mapping and size change together
/// under one write lock.
pub(crate) struct State {
    // Field order matters for the implicit drop: region before file.
    region: Option<Region>,
    file: Option<File>,
    size: u64,
    status: Status,
}

impl State {
    pub(crate) fn ensure_mapped(&self) -> Result<()> {
        match self.status {
            Status::Mapped => Ok(()),
            Status::Poisoned => Err(MappedFileError::InvalidState(ERR_POISONED)),
            Status::Closed => Err(MappedFileError::InvalidState(ERR_CLOSED)),
        }
    }

    pub(crate) fn file(&self) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or(MappedFileError::InvalidState(ERR_CLOSED))
    }

    fn region(&self) -> Result<&Region> {
        self.ensure_mapped()?;
        self.region
            .as_ref()
            .ok_or(MappedFileError::InvalidState(ERR_CLOSED))
    }

    fn region_mut(&mut self) -> Result<&mut Region> {
        self.ensure_mapped()?;
        self.region
            .as_mut()
            .ok_or(MappedFileError::InvalidState(ERR_CLOSED))
    }

    fn size(&self) -> Result<u64> {
        self.ensure_mapped()?;
        Ok(self.size)
    }

    /// Bring file and mapping to `target` bytes. The caller has ruled out no-ops.
    fn resize_to(&mut self, target: u64) -> Result<()> {
        let current = self.size;
        let Some(file) = self.file.as_ref() else {
            return Err(MappedFileError::InvalidState(ERR_CLOSED));
        };

        // Windows refuses to shrink a file while a view of it is open.
        #[cfg(windows)]
        if target < current {
            self.region = None;
        }

        if let Err(err) = file.set_len(target) {
            if self.region.is_none() {
                match Region::map(file, current, true, false) {
                    Ok(region) => self.region = Some(region),
                    Err(remap_err) => {
                        log::error!("failed to restore mapping after truncation error: {remap_err}");
                        self.status = Status::Poisoned;
                    }
                }
            }
            return Err(err.into());
        }

        // From here the file no longer matches the mapping: any failure is terminal.
        let mut outcome = if target > current {
            backing::materialize(file, target)
        } else {
            Ok(())
        };
        if outcome.is_ok() {
            outcome = remap_fault();
        }
        if outcome.is_ok() {
            outcome = if let Some(region) = self.region.as_mut() {
                region.remap(file, target)
            } else {
                Region::map(file, target, true, false).map(|region| {
                    self.region = Some(region);
                })
            };
        }
        if let Err(err) = outcome {
            log::error!("resize to {target} bytes failed after truncation: {err}");
            self.region = None;
            self.status = Status::Poisoned;
            return Err(err.into());
        }

        self.size = target;
        Ok(())
    }

    /// Unmap, then close. Safe to call repeatedly.
    fn teardown(&mut self, lock_state: &mut LockState, write_back: bool) {
        if self.status == Status::Closed {
            return;
        }
        if let Some(file) = self.file.as_ref() {
            if *lock_state != LockState::Unlocked {
                if let Err(err) = PlatformLock::release(file) {
                    log::warn!("failed to release advisory lock on close: {err}");
                }
                *lock_state = LockState::Unlocked;
            }
            if let Some(region) = self.region.take() {
                region.release(file, write_back);
            }
        }
        self.region = None;
        self.file = None;
        self.status = Status::Closed;
    }
}

pub(crate) struct Inner {
    pub(crate) path: PathBuf,
    pub(crate) write_access: bool,
    pub(crate) backing: BackingKind,
    pub(crate) config: MapConfig,
    pub(crate) state: RwLock<State>,
    pub(crate) lock_state: Mutex<LockState>,
}

impl Inner {
    fn write_back(&self) -> bool {
        self.write_access && self.backing == BackingKind::Persistent
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let write_back = self.write_back();
        let lock_state = self.lock_state.get_mut();
        let state = self.state.get_mut();
        if state.status != Status::Closed {
            log::debug!("releasing mapped file {}", self.path.display());
        }
        state.teardown(lock_state, write_back);
    }
}

/// Memory-mapped file handle.
///
/// A handle owns one open file and one mapping of exactly [`size`](Self::size)
/// bytes. It is created mapped by [`create`](Self::create), [`open`](Self::open)
/// or [`create_cache`](Self::create_cache), may be resized any number of times,
/// and is torn down (mapping released, then file closed) by [`close`](Self::close)
/// or when the last clone is dropped.
///
/// # Examples
///
/// ```no_run
/// use slide_mmap::MappedFile;
///
/// // New 1KB slide file
/// let file = MappedFile::create("slide.dat", 1024)?;
/// file.write_at(0, b"IRIS")?;
///
/// // Grow it; bytes already written are kept
/// let new_size = file.resize(10_000, true)?;
/// assert!(new_size > 10_000);
/// file.flush()?;
///
/// // Open it again read-only
/// let ro = MappedFile::open("slide.dat", false)?;
/// let mut magic = [0u8; 4];
/// ro.read_into(0, &mut magic)?;
/// assert_eq!(&magic, b"IRIS");
/// # Ok::<(), slide_mmap::MappedFileError>(())
/// ```
///
/// Cloning is cheap and shares the same mapping; see [`crate::view`] for
/// sub-range views handed to tile consumers.
#[derive(Clone)]
pub struct MappedFile {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("MappedFile")
            .field("path", &self.inner.path)
            .field("write_access", &self.inner.write_access)
            .field("backing", &self.inner.backing)
            .field("size", &state.size)
            .field("status", &state.status)
            .finish()
    }
}

impl MappedFile {
    fn from_parts(
        path: PathBuf,
        file: File,
        size: u64,
        write_access: bool,
        backing: BackingKind,
        fresh: bool,
        config: &MapConfig,
    ) -> Result<Self> {
        let region = Region::map(&file, size, write_access, fresh)?;
        log::debug!(
            "mapped {} ({size} bytes, {})",
            path.display(),
            if write_access { "read-write" } else { "read-only" }
        );
        let inner = Inner {
            path,
            write_access,
            backing,
            config: *config,
            state: RwLock::new(State {
                region: Some(region),
                file: Some(file),
                size,
                status: Status::Mapped,
            }),
            lock_state: Mutex::new(LockState::Unlocked),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Create a new file (truncating if it exists) of `size` bytes and map it read-write.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidArgument` if size is zero or unmappable; no file is touched.
    /// Returns `MappedFileError::Io` if file creation, sizing or mapping fails.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        Self::create_with(path, size, MapConfig::global())
    }

    /// [`create`](Self::create) with an explicit configuration.
    ///
    /// # Errors
    ///
    /// See [`create`](Self::create).
    pub fn create_with<P: AsRef<Path>>(path: P, size: u64, config: &MapConfig) -> Result<Self> {
        if size == 0 {
            return Err(MappedFileError::InvalidArgument(ERR_ZERO_SIZE.into()));
        }
        mappable_len(size)?;
        let path = path.as_ref();
        let file = backing::create(path, size)?;
        Self::from_parts(
            path.to_path_buf(),
            file,
            size,
            true,
            BackingKind::Persistent,
            true,
            config,
        )
    }

    /// Open an existing file and map it, read-write when `write_access` is set.
    /// The size is measured from the file itself.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::NotFound` if the path does not exist.
    /// Returns `MappedFileError::InvalidArgument` if the file is empty.
    /// Returns `MappedFileError::Io` if opening or mapping fails.
    pub fn open<P: AsRef<Path>>(path: P, write_access: bool) -> Result<Self> {
        Self::open_with(path, write_access, MapConfig::global())
    }

    /// [`open`](Self::open) with an explicit configuration.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_with<P: AsRef<Path>>(path: P, write_access: bool, config: &MapConfig) -> Result<Self> {
        let path = path.as_ref();
        let (file, size) = backing::open(path, write_access)?;
        if size == 0 {
            return Err(MappedFileError::InvalidArgument(ERR_ZERO_LENGTH_FILE.into()));
        }
        Self::from_parts(
            path.to_path_buf(),
            file,
            size,
            write_access,
            BackingKind::Persistent,
            false,
            config,
        )
    }

    /// Open an existing file and map it read-only.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_ro<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path, false)
    }

    /// Open an existing file and map it read-write.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path, true)
    }

    /// Create an unnamed, self-deleting cache file and map it read-write.
    ///
    /// The initial size follows [`MapConfig::cache`]; by default about 500 MB
    /// with one page of headroom, so typical workloads start large and double
    /// rather than creep up.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::Io` if no temporary storage can be allocated or mapped.
    pub fn create_cache() -> Result<Self> {
        Self::create_cache_with(MapConfig::global())
    }

    /// [`create_cache`](Self::create_cache) with an explicit configuration.
    ///
    /// # Errors
    ///
    /// See [`create_cache`](Self::create_cache). Also returns
    /// `MappedFileError::InvalidArgument` if the configured cache size is unusable.
    pub fn create_cache_with(config: &MapConfig) -> Result<Self> {
        let size = config.cache.initial_size(config.page_size)?;
        mappable_len(size)?;
        let (file, label) = backing::temporary(size)?;
        Self::from_parts(label, file, size, true, BackingKind::Cache, true, config)
    }

    /// Whether the handle still holds its mapping.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.state.read().status == Status::Mapped
    }

    /// Size of the file and of its mapping, in bytes.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed or poisoned.
    pub fn size(&self) -> Result<u64> {
        self.inner.state.read().size()
    }

    /// Path of the file; a synthetic `cache://` label for cache files.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed or poisoned.
    pub fn path(&self) -> Result<&Path> {
        self.inner.state.read().ensure_mapped()?;
        Ok(&self.inner.path)
    }

    /// Whether the handle was opened for writing.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed or poisoned.
    pub fn write_access(&self) -> Result<bool> {
        self.inner.state.read().ensure_mapped()?;
        Ok(self.inner.write_access)
    }

    /// Backing storage kind.
    #[must_use]
    pub fn backing(&self) -> BackingKind {
        self.inner.backing
    }

    /// Configuration the handle was created with.
    #[must_use]
    pub fn config(&self) -> &MapConfig {
        &self.inner.config
    }

    /// Base address of the mapping.
    ///
    /// The pointer is valid for [`size`](Self::size) bytes until the next
    /// [`resize`](Self::resize) or [`close`](Self::close); do not keep it across either.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed or poisoned.
    pub fn as_ptr(&self) -> Result<*const u8> {
        Ok(self.inner.state.read().region()?.as_ptr())
    }

    /// Writable base address of the mapping. Same validity rules as [`as_ptr`](Self::as_ptr).
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed, poisoned or read-only.
    pub fn as_mut_ptr(&self) -> Result<*mut u8> {
        self.inner
            .state
            .write()
            .region_mut()?
            .as_mut_ptr()
            .ok_or(MappedFileError::InvalidState(ERR_READ_ONLY))
    }

    /// Borrow `len` bytes at `offset`. Resizes wait until the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed or poisoned.
    /// Returns `MappedFileError::OutOfBounds` if the range exceeds the file.
    pub fn as_slice(&self, offset: u64, len: u64) -> Result<MappedSlice<'_>> {
        let guard = self.inner.state.read();
        let (start, end) = slice_range(offset, len, guard.size()?)?;
        Ok(MappedSlice {
            guard,
            range: start..end,
        })
    }

    /// Mutably borrow `len` bytes at `offset`, holding the write lock for the guard's lifetime.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed, poisoned or read-only.
    /// Returns `MappedFileError::OutOfBounds` if the range exceeds the file.
    pub fn as_slice_mut(&self, offset: u64, len: u64) -> Result<MappedSliceMut<'_>> {
        if !self.inner.write_access {
            return Err(MappedFileError::InvalidState(ERR_READ_ONLY));
        }
        let guard = self.inner.state.write();
        let (start, end) = slice_range(offset, len, guard.size()?)?;
        Ok(MappedSliceMut {
            guard,
            range: start..end,
        })
    }

    /// Copy bytes starting at `offset` into `buf`.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed or poisoned.
    /// Returns `MappedFileError::OutOfBounds` if the range exceeds the file.
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let state = self.inner.state.read();
        let (start, end) = slice_range(offset, buf.len() as u64, state.size()?)?;
        buf.copy_from_slice(&state.region()?.as_slice()[start..end]);
        Ok(())
    }

    /// Copy `data` into the mapping at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed, poisoned or read-only.
    /// Returns `MappedFileError::OutOfBounds` if the range exceeds the file.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.inner.write_access {
            return Err(MappedFileError::InvalidState(ERR_READ_ONLY));
        }
        let mut state = self.inner.state.write();
        let (start, end) = slice_range(offset, data.len() as u64, state.size()?)?;
        let bytes = state
            .region_mut()?
            .as_mut_slice()
            .ok_or(MappedFileError::InvalidState(ERR_READ_ONLY))?;
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Flush written bytes to the file. A no-op for read-only handles.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed or poisoned.
    /// Returns `MappedFileError::Io` if the flush fails.
    pub fn flush(&self) -> Result<()> {
        let state = self.inner.state.read();
        let region = state.region()?;
        region.flush(state.file()?)?;
        Ok(())
    }

    /// Flush the byte range [offset, offset+len) to the file.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed or poisoned.
    /// Returns `MappedFileError::OutOfBounds` if the range exceeds the file.
    /// Returns `MappedFileError::Io` if the flush fails.
    pub fn flush_range(&self, offset: u64, len: u64) -> Result<()> {
        let state = self.inner.state.read();
        let (start, end) = slice_range(offset, len, state.size()?)?;
        if start == end {
            return Ok(());
        }
        state
            .region()?
            .flush_range(state.file()?, start, end - start)?;
        Ok(())
    }

    /// Resize the file and its mapping, returning the new size.
    ///
    /// With `page_align`, the target is `new_size` rounded down to a page boundary
    /// plus one page, so it always lies in `(new_size, new_size + page]`.
    /// A target equal to the current size changes nothing. Growth keeps every byte
    /// already written. The mapping may move: pointers from [`as_ptr`](Self::as_ptr)
    /// taken before the call are invalid after it.
    ///
    /// If the file was already truncated when remapping fails, the handle is
    /// poisoned: every later call except [`close`](Self::close) fails.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed, poisoned or read-only.
    /// Returns `MappedFileError::InvalidArgument` if the target is zero, overflows or is unmappable.
    /// Returns `MappedFileError::Io` if truncation, extension or remapping fails.
    pub fn resize(&self, new_size: u64, page_align: bool) -> Result<u64> {
        let mut state = self.inner.state.write();
        state.ensure_mapped()?;
        if !self.inner.write_access {
            return Err(MappedFileError::InvalidState(ERR_READ_ONLY));
        }
        let target = if page_align {
            self.inner
                .config
                .page_size
                .align_past(new_size)
                .ok_or_else(|| {
                    MappedFileError::InvalidArgument(format!(
                        "page-aligned size for {new_size} overflows"
                    ))
                })?
        } else {
            new_size
        };
        if target == 0 {
            return Err(MappedFileError::InvalidArgument(ERR_ZERO_SIZE.into()));
        }
        mappable_len(target)?;
        if target == state.size {
            return Ok(target);
        }
        let previous = state.size;
        state.resize_to(target)?;
        log::debug!(
            "resized {} from {previous} to {target} bytes",
            self.inner.path.display()
        );
        Ok(target)
    }

    /// Release the mapping, then close the file. Idempotent; clones observe the close.
    pub fn close(&self) {
        let write_back = self.inner.write_back();
        let mut state = self.inner.state.write();
        if state.status == Status::Closed {
            return;
        }
        let mut lock_state = self.inner.lock_state.lock();
        state.teardown(&mut lock_state, write_back);
        log::debug!("closed {}", self.inner.path.display());
    }
}

/// Read guard over a byte range of a mapping.
pub struct MappedSlice<'a> {
    guard: RwLockReadGuard<'a, State>,
    range: std::ops::Range<usize>,
}

impl std::ops::Deref for MappedSlice<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // The guard was taken on a mapped state and holds off resize and close.
        self.guard
            .region
            .as_ref()
            .map_or(&[][..], |r| &r.as_slice()[self.range.clone()])
    }
}

/// Wrapper for a mutable slice that holds a write lock guard,
/// ensuring exclusive access for the lifetime of the slice.
pub struct MappedSliceMut<'a> {
    guard: RwLockWriteGuard<'a, State>,
    range: std::ops::Range<usize>,
}

impl MappedSliceMut<'_> {
    /// Get the mutable slice.
    #[allow(clippy::should_implement_trait)]
    pub fn as_mut(&mut self) -> &mut [u8] {
        let range = self.range.clone();
        match self.guard.region.as_mut().and_then(Region::as_mut_slice) {
            Some(bytes) => &mut bytes[range],
            None => &mut [],
        }
    }
}

impl std::ops::Deref for MappedSliceMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard
            .region
            .as_ref()
            .map_or(&[][..], |r| &r.as_slice()[self.range.clone()])
    }
}
