//! Advisory file locking across processes.
//!
//! Two implementations share one contract: [`OsLock`] uses the platform's
//! advisory locks (`flock` on Unix, `LockFileEx` on Windows), [`NoopLock`] grants
//! every request and is used where there is no multi-process file semantics.
//! [`PlatformLock`] picks one at build time.

use std::fs::File;
use std::io;

use crate::errors::{MappedFileError, Result};
use crate::mmap::MappedFile;

/// Requested lock strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many holders at once.
    Shared,
    /// Single holder.
    Exclusive,
}

/// Lock currently held by a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    /// No lock held.
    #[default]
    Unlocked,
    /// Shared lock held.
    Shared,
    /// Exclusive lock held.
    Exclusive,
}

impl LockState {
    /// Mode of the held lock, `None` when unlocked.
    #[must_use]
    pub fn mode(self) -> Option<LockMode> {
        match self {
            Self::Unlocked => None,
            Self::Shared => Some(LockMode::Shared),
            Self::Exclusive => Some(LockMode::Exclusive),
        }
    }
}

impl From<LockMode> for LockState {
    fn from(mode: LockMode) -> Self {
        match mode {
            LockMode::Shared => Self::Shared,
            LockMode::Exclusive => Self::Exclusive,
        }
    }
}

/// Advisory locking on an open file.
pub trait AdvisoryLock {
    /// Whether a refused mode conversion can leave the file with no lock held.
    const CONVERSION_MAY_RELEASE: bool = false;

    /// Acquire a lock of `mode` on `file`.
    ///
    /// With `wait`, blocks until the lock is granted. Without it, returns
    /// `Ok(false)` when another holder prevents the lock.
    ///
    /// # Errors
    ///
    /// Returns the OS error for any failure other than contention.
    fn acquire(file: &File, mode: LockMode, wait: bool) -> io::Result<bool>;

    /// Release whatever lock is held on `file`. Releasing nothing succeeds.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the release call fails.
    fn release(file: &File) -> io::Result<()>;
}

/// Lock implementation that always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLock;

impl AdvisoryLock for NoopLock {
    #[inline]
    fn acquire(_file: &File, _mode: LockMode, _wait: bool) -> io::Result<bool> {
        Ok(true)
    }

    #[inline]
    fn release(_file: &File) -> io::Result<()> {
        Ok(())
    }
}

/// Operating-system advisory locks.
#[cfg(not(any(feature = "sandbox", target_family = "wasm")))]
#[derive(Debug, Clone, Copy, Default)]
pub struct OsLock;

#[cfg(all(unix, not(any(feature = "sandbox", target_family = "wasm"))))]
impl AdvisoryLock for OsLock {
    // flock drops the old lock before taking the new one.
    const CONVERSION_MAY_RELEASE: bool = true;

    fn acquire(file: &File, mode: LockMode, wait: bool) -> io::Result<bool> {
        use std::os::unix::io::AsRawFd;

        let mut op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };
        if !wait {
            op |= libc::LOCK_NB;
        }
        loop {
            // SAFETY: the descriptor is owned by `file` and open for the call.
            let result = unsafe { libc::flock(file.as_raw_fd(), op) };
            if result == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(code) if code == libc::EWOULDBLOCK => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    fn release(file: &File) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        // SAFETY: the descriptor is owned by `file` and open for the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(all(windows, not(feature = "sandbox")))]
mod windows_ffi {
    #![allow(non_snake_case, clippy::upper_case_acronyms)]

    pub(super) const LOCKFILE_FAIL_IMMEDIATELY: u32 = 0x1;
    pub(super) const LOCKFILE_EXCLUSIVE_LOCK: u32 = 0x2;
    pub(super) const ERROR_LOCK_VIOLATION: i32 = 33;
    pub(super) const ERROR_NOT_LOCKED: i32 = 158;

    #[repr(C)]
    pub(super) struct OVERLAPPED {
        pub Internal: usize,
        pub InternalHigh: usize,
        pub Offset: u32,
        pub OffsetHigh: u32,
        pub hEvent: *mut core::ffi::c_void,
    }

    impl OVERLAPPED {
        pub(super) fn zeroed() -> Self {
            Self {
                Internal: 0,
                InternalHigh: 0,
                Offset: 0,
                OffsetHigh: 0,
                hEvent: core::ptr::null_mut(),
            }
        }
    }

    extern "system" {
        pub(super) fn LockFileEx(
            hFile: *mut core::ffi::c_void,
            dwFlags: u32,
            dwReserved: u32,
            nNumberOfBytesToLockLow: u32,
            nNumberOfBytesToLockHigh: u32,
            lpOverlapped: *mut OVERLAPPED,
        ) -> i32;

        pub(super) fn UnlockFileEx(
            hFile: *mut core::ffi::c_void,
            dwReserved: u32,
            nNumberOfBytesToUnlockLow: u32,
            nNumberOfBytesToUnlockHigh: u32,
            lpOverlapped: *mut OVERLAPPED,
        ) -> i32;
    }
}

#[cfg(all(windows, not(feature = "sandbox")))]
impl AdvisoryLock for OsLock {
    fn acquire(file: &File, mode: LockMode, wait: bool) -> io::Result<bool> {
        use std::os::windows::io::AsRawHandle;
        use windows_ffi::*;

        let mut flags = 0;
        if mode == LockMode::Exclusive {
            flags |= LOCKFILE_EXCLUSIVE_LOCK;
        }
        if !wait {
            flags |= LOCKFILE_FAIL_IMMEDIATELY;
        }
        let mut overlapped = OVERLAPPED::zeroed();
        // SAFETY: the handle is owned by `file`; the whole byte range is locked.
        let result = unsafe {
            LockFileEx(
                file.as_raw_handle().cast(),
                flags,
                0,
                u32::MAX,
                u32::MAX,
                &mut overlapped,
            )
        };
        if result != 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION) {
            return Ok(false);
        }
        Err(err)
    }

    fn release(file: &File) -> io::Result<()> {
        use std::os::windows::io::AsRawHandle;
        use windows_ffi::*;

        let mut overlapped = OVERLAPPED::zeroed();
        // SAFETY: the handle is owned by `file`; the range matches `acquire`.
        let result = unsafe {
            UnlockFileEx(file.as_raw_handle().cast(), 0, u32::MAX, u32::MAX, &mut overlapped)
        };
        if result == 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(ERROR_NOT_LOCKED) {
                return Err(err);
            }
        }
        Ok(())
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(feature = "sandbox", target_family = "wasm"))] {
        /// Lock implementation selected for this build.
        pub type PlatformLock = NoopLock;
    } else {
        /// Lock implementation selected for this build.
        pub type PlatformLock = OsLock;
    }
}

impl MappedFile {
    /// Acquire an advisory lock on the underlying file.
    ///
    /// Returns `Ok(false)` when `wait` is false and the lock is held elsewhere.
    /// Requesting a different mode while a lock is held converts it. If a refused
    /// conversion dropped the previous lock, it is re-taken when possible and
    /// [`lock_state`](Self::lock_state) reports whatever is held afterwards.
    /// Under the `sandbox` feature and on `wasm` targets the lock is always granted.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed or poisoned.
    /// Returns `MappedFileError::Io` if the OS call fails for a reason other than contention.
    pub fn lock(&self, exclusive: bool, wait: bool) -> Result<bool> {
        let mode = if exclusive {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        };
        let state = self.inner.state.read();
        state.ensure_mapped()?;
        let file = state.file()?;
        let mut held = self.inner.lock_state.lock();
        if PlatformLock::acquire(file, mode, wait)? {
            *held = mode.into();
            return Ok(true);
        }
        if PlatformLock::CONVERSION_MAY_RELEASE {
            if let Some(previous) = held.mode().filter(|m| *m != mode) {
                let restored = PlatformLock::acquire(file, previous, false).unwrap_or_else(|err| {
                    log::warn!("failed to re-take {previous:?} lock: {err}");
                    false
                });
                if restored {
                    *held = previous.into();
                } else {
                    log::debug!("refused conversion released the {previous:?} lock");
                    *held = LockState::Unlocked;
                }
            }
        }
        Ok(false)
    }

    /// Release the advisory lock, if any.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidState` if the handle is closed or poisoned.
    /// Returns `MappedFileError::Io` if the OS call fails.
    pub fn unlock(&self) -> Result<()> {
        let state = self.inner.state.read();
        state.ensure_mapped()?;
        let file = state.file()?;
        let mut held = self.inner.lock_state.lock();
        if *held == LockState::Unlocked {
            return Ok(());
        }
        PlatformLock::release(file).map_err(MappedFileError::Io)?;
        *held = LockState::Unlocked;
        Ok(())
    }

    /// Lock currently held through this handle.
    #[must_use]
    pub fn lock_state(&self) -> LockState {
        *self.inner.lock_state.lock()
    }
}
