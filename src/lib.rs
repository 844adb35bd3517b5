//! Size-routed memory allocator built from two layers over the host's
//! virtual memory:
//!
//! ```text
//!                       Allocator::alloc(size)
//!                                |
//!              size < cutoff     |     size >= cutoff
//!         +----------------------+----------------------+
//!         |                                             |
//!         v                                             v
//! +---------------+                             +---------------+
//! | Pool (class)  |  frames of equal slots      |     Arena     |  whole pages
//! +---------------+                             +---------------+
//!         |   new frames                                |
//!         +-------------------------------------------->|
//!                                                       v
//!                                               PlatformMemory
//!                                          (mmap / VirtualAlloc / heap)
//! ```
//!
//! * [`Arena`] hands out zeroed, page-aligned blocks and escalates host
//!   denials to an optional recovery hook.
//! * [`Pool`] carves arena blocks into frames of fixed-size slots tracked by
//!   a bitmap, always giving out the lowest free slot, and periodically
//!   returns empty frames to the arena.
//! * [`Allocator`] rounds small requests up to the alignment and routes them
//!   to one lazily created pool per class; large requests go to the arena.
//!
//! Nothing is global: every operation goes through an explicit
//! [`Allocator`] or [`Arena`] value, and sizes are supplied by the caller
//! on release.

mod allocator;
mod arena;
mod bitmap;
mod config;
mod error;
mod frame;
mod kernel;
mod limit;
mod list;
mod pool;
mod utils;

pub use allocator::{Allocator, AllocatorStats, SizeClass};
pub use arena::{Arena, ArenaStats, RecoveryHook};
pub use config::{
    Config, DEFAULT_ALIGNMENT, DEFAULT_COMPACT_INTERVAL, DEFAULT_CUTOFF, MAX_SIZE_CLASSES,
};
pub use error::{AllocError, ConfigError};
pub use frame::MAX_ENTITIES_PER_FRAME;
#[cfg(any(unix, windows))]
pub use kernel::Kernel;
pub use kernel::{HEAP_PAGE_SIZE, HeapMemory, PlatformMemory, Protection, SystemMemory};
pub use limit::Limited;
pub use pool::Pool;
