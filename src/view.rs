//! Views over a byte range of a shared mapping, handed to tile consumers.
//!
//! A view keeps its parent handle alive, so the mapping is torn down only after
//! the last view and the last handle are gone. Views store offsets, not pointers:
//! a resize between accesses is fine, and every access re-checks the range
//! against the current size.

use crate::errors::Result;
use crate::mmap::{MappedFile, MappedSlice, MappedSliceMut};
use crate::utils::slice_range;

/// Read-only view into a region of a mapped file.
///
/// # Examples
///
/// ```no_run
/// use slide_mmap::{MappedFile, view::MappedView};
///
/// let slide = MappedFile::open("slide.dat", false)?;
///
/// // Tile bytes 4096..8192
/// let tile = MappedView::new(slide.clone(), 4096, 4096)?;
/// let bytes = tile.as_slice()?;
/// assert_eq!(bytes.len(), 4096);
/// # Ok::<(), slide_mmap::MappedFileError>(())
/// ```
#[derive(Clone, Debug)]
pub struct MappedView {
    parent: MappedFile,
    offset: u64,
    len: u64,
}

impl MappedView {
    /// Create a view over [offset, offset+len).
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the parent is closed.
    /// Returns `MappedFileError::OutOfBounds` if the range exceeds the file.
    pub fn new(parent: MappedFile, offset: u64, len: u64) -> Result<Self> {
        slice_range(offset, len, parent.size()?)?;
        Ok(Self {
            parent,
            offset,
            len,
        })
    }

    /// Borrow the viewed bytes. Resizes of the parent wait for the guard.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::OutOfBounds` if the parent shrank below the view.
    /// Returns `MappedFileError::InvalidState` if the parent is closed.
    pub fn as_slice(&self) -> Result<MappedSlice<'_>> {
        self.parent.as_slice(self.offset, self.len)
    }

    /// Copy the viewed bytes into an owned buffer.
    ///
    /// # Errors
    ///
    /// See [`as_slice`](Self::as_slice).
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(self.as_slice()?.to_vec())
    }

    /// Length of the view.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the view is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the view in the file.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Parent handle.
    #[must_use]
    pub fn parent(&self) -> &MappedFile {
        &self.parent
    }
}

/// Writable view into a region of a mapped file, typically a cache slot for one decoded tile.
#[derive(Clone, Debug)]
pub struct MappedViewMut {
    parent: MappedFile,
    offset: u64,
    len: u64,
}

impl MappedViewMut {
    /// Create a writable view over [offset, offset+len).
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the parent is closed or read-only.
    /// Returns `MappedFileError::OutOfBounds` if the range exceeds the file.
    pub fn new(parent: MappedFile, offset: u64, len: u64) -> Result<Self> {
        if !parent.write_access()? {
            return Err(crate::MappedFileError::InvalidState(
                "writable view requires write access",
            ));
        }
        slice_range(offset, len, parent.size()?)?;
        Ok(Self {
            parent,
            offset,
            len,
        })
    }

    /// Mutably borrow the viewed bytes, holding the parent's write lock.
    ///
    /// # Errors
    ///
    /// Returns errors from [`MappedFile::as_slice_mut`].
    pub fn as_slice_mut(&self) -> Result<MappedSliceMut<'_>> {
        self.parent.as_slice_mut(self.offset, self.len)
    }

    /// Write `data` at the start of the view. `data` may be shorter than the view.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::OutOfBounds` if `data` is longer than the view.
    /// Returns errors from [`MappedFile::write_at`].
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let len = data.len() as u64;
        if len > self.len {
            return Err(crate::MappedFileError::OutOfBounds {
                offset: self.offset,
                len,
                total: self.offset + self.len,
            });
        }
        self.parent.write_at(self.offset, data)
    }

    /// Read the viewed bytes into `buf`, which may be shorter than the view.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::OutOfBounds` if `buf` is longer than the view.
    /// Returns errors from [`MappedFile::read_into`].
    pub fn read_into(&self, buf: &mut [u8]) -> Result<()> {
        let len = buf.len() as u64;
        if len > self.len {
            return Err(crate::MappedFileError::OutOfBounds {
                offset: self.offset,
                len,
                total: self.offset + self.len,
            });
        }
        self.parent.read_into(self.offset, buf)
    }

    /// Length of the view.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the view is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the view in the file.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Parent handle.
    #[must_use]
    pub fn parent(&self) -> &MappedFile {
        &self.parent
    }
}
