//! Page-granular block allocator sitting directly on a [`PlatformMemory`].
//!
//! Every block the arena hands out is page aligned and its length is the
//! requested size rounded up to whole pages. The arena keeps no record of
//! live blocks: callers give back the same size they asked for, and the
//! rounding is repeated on the way out.
//!
//! ```text
//!                 acquire(5000)                 page = 4096
//! +---------------+---------------+
//! |    page 0     |    page 1     |   <- one block, 8192 bytes, zeroed
//! +---------------+---------------+
//! ^ returned address
//! ```
//!
//! When the host denies a request the arena escalates once to the
//! recovery hook, if one is installed. The hook may free reserves through
//! the `&mut Arena` it receives and return a block; that block becomes the
//! result of the failed call.

use std::ptr::{self, NonNull};

use crate::{
    error::AllocError,
    kernel::{PlatformMemory, Protection, SystemMemory},
    utils::checked_align,
};

/// Callback run when the host denies a request of `requested` bytes.
///
/// While it runs the hook is detached from the arena, so a failure inside
/// the hook itself is reported as a plain [`AllocError::OutOfMemory`].
pub type RecoveryHook<P> = Box<dyn FnMut(&mut Arena<P>, usize) -> Option<NonNull<u8>>>;

/// Counters kept by the arena.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Blocks acquired and not yet released.
    pub live_blocks: usize,
    /// Bytes currently mapped through the arena.
    pub mapped_bytes: usize,
    /// Highest value `mapped_bytes` ever reached.
    pub peak_mapped_bytes: usize,
    /// Number of times the recovery hook was called.
    pub hook_invocations: usize,
}

pub struct Arena<P: PlatformMemory = SystemMemory> {
    platform: P,
    page_size: usize,
    hook: Option<RecoveryHook<P>>,
    stats: ArenaStats,
}

#[cfg(any(unix, windows))]
impl Arena<SystemMemory> {
    /// Arena over the host's virtual memory.
    pub fn system() -> Self {
        Self::new(crate::kernel::Kernel::new())
    }
}

impl<P: PlatformMemory> Arena<P> {
    pub fn new(platform: P) -> Self {
        let page_size = platform.page_size();
        Self {
            platform,
            page_size,
            hook: None,
            stats: ArenaStats::default(),
        }
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn stats(&self) -> ArenaStats {
        self.stats
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Length of the block backing a request of `size` bytes: whole pages,
    /// at least one. `None` if the rounding overflows or the length can't
    /// describe a Rust allocation.
    pub fn block_len(&self, size: usize) -> Option<usize> {
        checked_align(size.max(1), self.page_size).filter(|len| *len <= isize::MAX as usize)
    }

    /// Installs `hook`, replacing any previous one.
    pub fn set_recovery_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&mut Arena<P>, usize) -> Option<NonNull<u8>> + 'static,
    {
        self.hook = Some(Box::new(hook));
    }

    /// Removes and returns the installed hook.
    pub fn take_recovery_hook(&mut self) -> Option<RecoveryHook<P>> {
        self.hook.take()
    }

    pub fn has_recovery_hook(&self) -> bool {
        self.hook.is_some()
    }

    /// Acquires a zeroed, read/write block of at least `size` bytes.
    pub fn acquire(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if let Some(len) = self.block_len(size) {
            if let Some(block) = unsafe { self.platform.request_memory(len) } {
                self.record_mapped(len);
                return Ok(block);
            }
        }

        self.escalate(size)
    }

    /// Moves the block at `addr` to a block of `new_size` bytes, keeping the
    /// first `min(old_size, new_size)` bytes. Bytes past that prefix are
    /// unspecified. On failure the old block is still valid.
    ///
    /// # Safety
    ///
    /// `addr` and `old_size` must describe a live block of this arena.
    pub unsafe fn resize(
        &mut self,
        old_size: usize,
        addr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let Some(old_len) = self.block_len(old_size) else {
            return Err(AllocError::OutOfMemory { requested: new_size });
        };

        if let Some(new_len) = self.block_len(new_size) {
            if new_len == old_len {
                return Ok(addr);
            }

            if let Some(moved) = unsafe { self.platform.resize_memory(addr, old_len, new_len) } {
                self.record_unmapped(old_len);
                self.record_mapped(new_len);
                return Ok(moved);
            }
        }

        let fresh = self.acquire(new_size)?;
        unsafe {
            ptr::copy_nonoverlapping(addr.as_ptr(), fresh.as_ptr(), old_size.min(new_size));
            self.release(old_size, addr);
        }

        Ok(fresh)
    }

    /// Returns the block at `addr` to the host.
    ///
    /// # Safety
    ///
    /// `addr` and `size` must describe a live block of this arena, exactly
    /// as returned by [`Arena::acquire`] or [`Arena::resize`].
    pub unsafe fn release(&mut self, size: usize, addr: NonNull<u8>) {
        let Some(len) = self.block_len(size) else {
            debug_assert!(false, "released a block of impossible size {size}");
            return;
        };

        unsafe { self.platform.return_memory(addr, len) };
        self.record_unmapped(len);
    }

    /// Changes the protection of a block. Best effort: when the host
    /// refuses, the block keeps its current, more permissive, mode.
    ///
    /// # Safety
    ///
    /// `addr` and `size` must describe a live block of this arena.
    pub unsafe fn protect(&mut self, size: usize, addr: NonNull<u8>, mode: Protection) {
        let Some(len) = self.block_len(size) else {
            return;
        };

        if !unsafe { self.platform.protect_memory(addr, len, mode) } {
            log::debug!("protection change to {mode:?} ignored for block {addr:p} ({len} bytes)");
        }
    }

    fn escalate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        log::warn!("host denied a request for {size} bytes");

        let Some(mut hook) = self.hook.take() else {
            log::error!("out of memory: no recovery hook for {size} bytes");
            return Err(AllocError::OutOfMemory { requested: size });
        };

        self.stats.hook_invocations += 1;
        let recovered = hook(self, size);

        // The hook may have installed a replacement while it ran.
        if self.hook.is_none() {
            self.hook = Some(hook);
        }

        recovered.ok_or_else(|| {
            log::error!("out of memory: recovery hook gave up on {size} bytes");
            AllocError::OutOfMemory { requested: size }
        })
    }

    fn record_mapped(&mut self, len: usize) {
        self.stats.live_blocks += 1;
        self.stats.mapped_bytes += len;
        self.stats.peak_mapped_bytes = self.stats.peak_mapped_bytes.max(self.stats.mapped_bytes);
    }

    fn record_unmapped(&mut self, len: usize) {
        self.stats.live_blocks -= 1;
        self.stats.mapped_bytes -= len;
    }
}
