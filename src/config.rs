//! Mapping configuration: page size and cache-file sizing.
//!
//! The page size is resolved once per process ([`MapConfig::global`]) and then
//! carried by value inside every handle, so all alignment math for a handle uses
//! the same granularity it was created with.

use std::sync::OnceLock;

use crate::errors::{MappedFileError, Result};
use crate::utils::{align_down, align_past, align_up, page_size};

/// Default base size of a new cache file, before page rounding.
pub const DEFAULT_CACHE_BASE: u64 = 500_000_000;

/// Memory-page granularity. Always a non-zero power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageSize(u64);

impl PageSize {
    /// Build a page size from a byte count.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidArgument` unless `bytes` is a non-zero power of two.
    pub fn new(bytes: u64) -> Result<Self> {
        if !bytes.is_power_of_two() {
            return Err(MappedFileError::InvalidArgument(format!(
                "page size {bytes} is not a power of two"
            )));
        }
        Ok(Self(bytes))
    }

    /// Query the platform page size.
    #[must_use]
    pub fn detect() -> Self {
        let bytes = page_size() as u64;
        Self::new(bytes).unwrap_or_else(|_| {
            log::warn!("platform reported unusable page size {bytes}, using 4096");
            Self(4096)
        })
    }

    /// Page size in bytes.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Round down to a page boundary.
    #[must_use]
    pub fn align_down(self, value: u64) -> u64 {
        align_down(value, self.0)
    }

    /// Round up to a page boundary. `None` on overflow.
    #[must_use]
    pub fn align_up(self, value: u64) -> Option<u64> {
        align_up(value, self.0)
    }

    /// Round down to a page boundary, then add one page. `None` on overflow.
    #[must_use]
    pub fn align_past(self, value: u64) -> Option<u64> {
        align_past(value, self.0)
    }
}

/// How a cache file's base size is turned into its initial size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheHeadroom {
    /// Round down to a page boundary and add one full page, even when the base
    /// is already aligned.
    #[default]
    ExtraPage,
    /// Round up to the next page boundary; an aligned base is kept as is.
    AlignUp,
}

/// Initial sizing of cache (temporary) files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSizing {
    /// Requested size before page rounding.
    pub base: u64,
    /// Rounding rule.
    pub headroom: CacheHeadroom,
}

impl Default for CacheSizing {
    fn default() -> Self {
        Self {
            base: DEFAULT_CACHE_BASE,
            headroom: CacheHeadroom::default(),
        }
    }
}

impl CacheSizing {
    /// Initial cache size in bytes for the given page size.
    ///
    /// # Errors
    ///
    /// Returns `MappedFileError::InvalidArgument` if the rounded size is zero or overflows.
    pub fn initial_size(&self, page: PageSize) -> Result<u64> {
        let size = match self.headroom {
            CacheHeadroom::ExtraPage => page.align_past(self.base),
            CacheHeadroom::AlignUp => page.align_up(self.base),
        };
        size.filter(|s| *s > 0).ok_or_else(|| {
            MappedFileError::InvalidArgument(format!(
                "cache base size {} cannot be page aligned",
                self.base
            ))
        })
    }
}

/// Configuration threaded into every handle at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapConfig {
    /// Page granularity used for page-aligned resizes and cache sizing.
    pub page_size: PageSize,
    /// Cache-file sizing.
    pub cache: CacheSizing,
}

impl Default for MapConfig {
    fn default() -> Self {
        *Self::global()
    }
}

impl MapConfig {
    /// Build a configuration from the platform page size and default cache sizing.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            page_size: PageSize::detect(),
            cache: CacheSizing::default(),
        }
    }

    /// Process-wide configuration, resolved on first use.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<MapConfig> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = Self::detect();
            log::debug!("resolved page size: {} bytes", config.page_size.get());
            config
        })
    }

    /// Replace the page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: PageSize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Replace the cache sizing.
    #[must_use]
    pub const fn with_cache_sizing(mut self, cache: CacheSizing) -> Self {
        self.cache = cache;
        self
    }
}
