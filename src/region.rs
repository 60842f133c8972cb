//! The mapped region behind a handle.
//!
//! Native targets map the file with `memmap2`. Restricted targets (the `sandbox`
//! feature, or `wasm`) have no shared file mappings, so the region is a heap
//! buffer loaded from the file and written back on flush and teardown.

use std::fs::File;
use std::io;

use crate::utils::mappable_len;

cfg_if::cfg_if! {
    if #[cfg(any(feature = "sandbox", target_family = "wasm"))] {
        pub(crate) use self::buffered::Region;
    } else {
        pub(crate) use self::native::Region;
    }
}

fn to_len(size: u64) -> io::Result<usize> {
    mappable_len(size).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
}

#[cfg(not(any(feature = "sandbox", target_family = "wasm")))]
mod native {
    use super::*;
    use memmap2::{Mmap, MmapMut, MmapOptions};

    pub(crate) enum Region {
        ReadOnly(Mmap),
        ReadWrite(MmapMut),
    }

    impl Region {
        /// Map `size` bytes of `file`. A fresh file (create/cache) maps the same way.
        pub(crate) fn map(file: &File, size: u64, writable: bool, _fresh: bool) -> io::Result<Self> {
            let len = to_len(size)?;
            let mut opts = MmapOptions::new();
            opts.len(len);
            // SAFETY: the file is open for the lifetime of the mapping (the handle
            // drops the region before the file) and has been sized to at least `len`.
            let region = unsafe {
                if writable {
                    Self::ReadWrite(opts.map_mut(file)?)
                } else {
                    Self::ReadOnly(opts.map(file)?)
                }
            };
            Ok(region)
        }

        /// Replace the mapping with one covering `size` bytes. Contents come from the file.
        pub(crate) fn remap(&mut self, file: &File, size: u64) -> io::Result<()> {
            let writable = matches!(self, Self::ReadWrite(_));
            *self = Self::map(file, size, writable, false)?;
            Ok(())
        }

        pub(crate) fn as_slice(&self) -> &[u8] {
            match self {
                Self::ReadOnly(m) => &m[..],
                Self::ReadWrite(m) => &m[..],
            }
        }

        pub(crate) fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
            match self {
                Self::ReadOnly(_) => None,
                Self::ReadWrite(m) => Some(&mut m[..]),
            }
        }

        pub(crate) fn as_ptr(&self) -> *const u8 {
            self.as_slice().as_ptr()
        }

        pub(crate) fn as_mut_ptr(&mut self) -> Option<*mut u8> {
            match self {
                Self::ReadOnly(_) => None,
                Self::ReadWrite(m) => Some(m.as_mut_ptr()),
            }
        }

        pub(crate) fn flush(&self, _file: &File) -> io::Result<()> {
            match self {
                Self::ReadOnly(_) => Ok(()),
                Self::ReadWrite(m) => m.flush(),
            }
        }

        pub(crate) fn flush_range(&self, _file: &File, start: usize, len: usize) -> io::Result<()> {
            match self {
                Self::ReadOnly(_) => Ok(()),
                Self::ReadWrite(m) => m.flush_range(start, len),
            }
        }

        /// Unmap. Shared mappings already reflect every write in the file.
        pub(crate) fn release(self, _file: &File, _write_back: bool) {
            drop(self);
        }
    }
}

#[cfg(any(feature = "sandbox", target_family = "wasm"))]
mod buffered {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};

    pub(crate) struct Region {
        buf: Vec<u8>,
        writable: bool,
    }

    impl Region {
        /// Load `size` bytes of `file` into memory. A fresh file is known to be all
        /// zeroes, so it is not read back.
        pub(crate) fn map(file: &File, size: u64, writable: bool, fresh: bool) -> io::Result<Self> {
            let len = to_len(size)?;
            let mut buf = vec![0u8; len];
            if !fresh {
                let mut reader = file;
                reader.seek(SeekFrom::Start(0))?;
                reader.read_exact(&mut buf)?;
                reader.rewind()?;
            }
            Ok(Self { buf, writable })
        }

        /// Resize the buffer in place; the kept prefix is untouched and growth is zero-filled.
        pub(crate) fn remap(&mut self, _file: &File, size: u64) -> io::Result<()> {
            let len = to_len(size)?;
            self.buf.resize(len, 0);
            self.buf.shrink_to_fit();
            Ok(())
        }

        pub(crate) fn as_slice(&self) -> &[u8] {
            &self.buf
        }

        pub(crate) fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
            self.writable.then_some(self.buf.as_mut_slice())
        }

        pub(crate) fn as_ptr(&self) -> *const u8 {
            self.buf.as_ptr()
        }

        pub(crate) fn as_mut_ptr(&mut self) -> Option<*mut u8> {
            self.writable.then(|| self.buf.as_mut_ptr())
        }

        pub(crate) fn flush(&self, file: &File) -> io::Result<()> {
            self.flush_range(file, 0, self.buf.len())
        }

        pub(crate) fn flush_range(&self, file: &File, start: usize, len: usize) -> io::Result<()> {
            if !self.writable || len == 0 {
                return Ok(());
            }
            let mut writer = file;
            writer.seek(SeekFrom::Start(start as u64))?;
            writer.write_all(&self.buf[start..start + len])?;
            writer.rewind()?;
            Ok(())
        }

        /// Drop the buffer, writing it back first when the file must persist.
        pub(crate) fn release(self, file: &File, write_back: bool) {
            if write_back {
                if let Err(err) = self.flush(file) {
                    log::warn!("write-back on release failed: {err}");
                }
            }
        }
    }
}
