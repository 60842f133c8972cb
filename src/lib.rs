//! # slide-mmap: memory-mapped storage for tiled slide images
//!
//! This crate provides the file layer under a tiled image codec: persistent slide
//! files and disposable cache files, each exposed as a single mapped region whose
//! size, on-disk length and mapping always agree.
//!
//! ## Features
//!
//! - **Three constructors**: create a slide file, open an existing one, or create an
//!   unnamed page-aligned cache file that disappears with the process
//! - **Consistent growth**: page-aligned resize keeps file, mapping and reported size in step
//! - **Ordered teardown**: the mapping is always released before the file is closed
//! - **Advisory locking**: shared/exclusive locks across processes, degrading to
//!   always-granted locks on restricted targets
//! - **Shared views**: tile consumers hold cheap clones and range views of one mapping
//!
//! ## Quick Start
//!
//! ```no_run
//! use slide_mmap::MappedFile;
//!
//! // Spill-over storage for decoded tiles
//! let cache = MappedFile::create_cache()?;
//! cache.write_at(0, &[0xff; 256])?;
//!
//! // Need more room: grow past 1 GB on a page boundary
//! let size = cache.resize(1 << 30, true)?;
//! assert!(size > 1 << 30);
//! # Ok::<(), slide_mmap::MappedFileError>(())
//! ```
//!
//! ## Modules
//!
//! - [`errors`]: Error types for all operations
//! - [`config`]: Page size and cache sizing
//! - [`utils`]: Page size query, alignment and bounds helpers
//! - [`backing`]: Kinds of backing storage
//! - [`mmap`]: Core `MappedFile` implementation
//! - [`lock`]: Advisory locking
//! - [`view`]: Range views for tile consumers
//! - [`manager`]: Request/response style boundary operations
//!
//! ## Feature Flags
//!
//! - `async`: Tokio-based async constructors
//! - `sandbox`: Restricted-target backend (heap-buffered region, no-op locks, fixed
//!   16 KiB page size); selected automatically on `wasm` targets

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![deny(missing_docs)]

pub mod backing;
pub mod config;
pub mod errors;
pub mod lock;
pub mod manager;
pub mod mmap;
mod region;
pub mod utils;
pub mod view;

pub use backing::BackingKind;
pub use config::{CacheHeadroom, CacheSizing, MapConfig, PageSize};
pub use errors::{MappedFileError, Result};
pub use lock::{AdvisoryLock, LockMode, LockState, NoopLock, PlatformLock};
pub use manager::{
    create_cache_file, create_file, open_file, resize_file, CacheCreateInfo, FileCreateInfo,
    FileOpenInfo, FileResizeInfo, Status,
};
pub use mmap::MappedFile;
