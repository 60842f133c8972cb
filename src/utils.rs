//! Utility helpers for page size, alignment, and safe range calculations.

use crate::errors::{MappedFileError, Result};

/// Page size used on restricted targets where the OS cannot be asked.
pub const RESTRICTED_PAGE_SIZE: usize = 16384;

/// Get the platform page size in bytes.
///
/// Prefer [`MapConfig::global`](crate::config::MapConfig::global), which resolves
/// this once per process, over calling it repeatedly.
#[must_use]
pub fn page_size() -> usize {
    cfg_if::cfg_if! {
        if #[cfg(any(feature = "sandbox", target_family = "wasm"))] {
            RESTRICTED_PAGE_SIZE
        } else if #[cfg(target_os = "windows")] {
            windows_page_size()
        } else {
            unix_page_size()
        }
    }
}

#[cfg(all(target_os = "windows", not(feature = "sandbox")))]
fn windows_page_size() -> usize {
    use std::mem::MaybeUninit;
    #[allow(non_snake_case)]
    #[repr(C)]
    struct SYSTEM_INFO {
        wProcessorArchitecture: u16,
        wReserved: u16,
        dwPageSize: u32,
        lpMinimumApplicationAddress: *mut core::ffi::c_void,
        lpMaximumApplicationAddress: *mut core::ffi::c_void,
        dwActiveProcessorMask: usize,
        dwNumberOfProcessors: u32,
        dwProcessorType: u32,
        dwAllocationGranularity: u32,
        wProcessorLevel: u16,
        wProcessorRevision: u16,
    }
    extern "system" {
        fn GetSystemInfo(lpSystemInfo: *mut SYSTEM_INFO);
    }
    let mut sysinfo = MaybeUninit::<SYSTEM_INFO>::uninit();
    // SAFETY: GetSystemInfo always fills the structure it is given.
    unsafe {
        GetSystemInfo(sysinfo.as_mut_ptr());
        let s = sysinfo.assume_init();
        s.dwPageSize as usize
    }
}

#[cfg(all(unix, not(any(feature = "sandbox", target_family = "wasm"))))]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn unix_page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE is safe to call.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        log::warn!("sysconf(_SC_PAGESIZE) failed, falling back to {RESTRICTED_PAGE_SIZE}");
        return RESTRICTED_PAGE_SIZE;
    }
    page_size as usize
}

/// Round `value` down to a multiple of `alignment` (a power of two).
#[must_use]
pub fn align_down(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

/// Round `value` up to the nearest multiple of `alignment` (a power of two).
/// Returns `None` on overflow.
#[must_use]
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment.is_power_of_two());
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// Round `value` down to a page boundary and add one page.
///
/// The result is always strictly greater than `value` and at most one page above it,
/// so monotonically growing workloads never land exactly on a boundary and remap
/// for every small increment. Returns `None` on overflow.
#[must_use]
pub fn align_past(value: u64, alignment: u64) -> Option<u64> {
    align_down(value, alignment).checked_add(alignment)
}

/// Ensure the requested [offset, offset+len) range is within [0, total).
/// Returns `Ok(())` if valid; otherwise an `OutOfBounds` error.
///
/// # Errors
///
/// Returns `MappedFileError::OutOfBounds` if the range exceeds bounds.
pub fn ensure_in_bounds(offset: u64, len: u64, total: u64) -> Result<()> {
    if offset > total {
        return Err(MappedFileError::OutOfBounds { offset, len, total });
    }
    let end = offset.saturating_add(len);
    if end > total {
        return Err(MappedFileError::OutOfBounds { offset, len, total });
    }
    Ok(())
}

/// Compute a safe byte slice range for a given total length, returning start..end as usize tuple.
///
/// # Errors
///
/// Returns `MappedFileError::OutOfBounds` if the requested range exceeds the total length.
#[allow(clippy::cast_possible_truncation)]
pub fn slice_range(offset: u64, len: u64, total: u64) -> Result<(usize, usize)> {
    ensure_in_bounds(offset, len, total)?;
    // total is the length of a live mapping, so it fits in usize
    let start = offset as usize;
    let end = (offset + len) as usize;
    Ok((start, end))
}

/// Convert a byte count into a mapping length, rejecting sizes the address space cannot hold.
///
/// # Errors
///
/// Returns `MappedFileError::InvalidArgument` if `size` exceeds `isize::MAX`.
pub fn mappable_len(size: u64) -> Result<usize> {
    usize::try_from(size)
        .ok()
        .filter(|len| isize::try_from(*len).is_ok())
        .ok_or_else(|| {
            MappedFileError::InvalidArgument(format!(
                "size {size} exceeds the maximum mappable length"
            ))
        })
}
