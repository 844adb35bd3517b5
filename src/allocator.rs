//! Size-routed facade.
//!
//! Requests below the configured cutoff are rounded up to the alignment
//! and served by the pool for that size class, which is created the first
//! time the class is seen. Everything else goes straight to the arena.
//!
//! ```text
//!                  alloc(size)
//!                      |
//!          size < cutoff ? ----- no -----> Arena::acquire(size)
//!                      |
//!                     yes
//!                      |
//!      pools[align(size) / alignment] -----> Pool::acquire
//! ```
//!
//! The facade stores no size next to the blocks it hands out: callers must
//! pass the same `size` back to [`Allocator::realloc`] and
//! [`Allocator::free`].

use std::ptr::{self, NonNull};

use crate::{
    arena::{Arena, ArenaStats},
    config::Config,
    error::{AllocError, ConfigError},
    kernel::{PlatformMemory, Protection, SystemMemory},
    pool::Pool,
    utils::align,
};

/// Where a request of a given size is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Pooled, with this entity size.
    Pool(usize),
    /// Straight from the arena, this many pages.
    Arena(usize),
}

/// Snapshot of the facade's bookkeeping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub arena: ArenaStats,
    /// Size-class pools created so far.
    pub pools: usize,
    /// Frames across those pools.
    pub frames: usize,
    /// Slots handed out across those pools.
    pub live_slots: usize,
}

pub struct Allocator<P: PlatformMemory = SystemMemory> {
    arena: Arena<P>,
    config: Config,
    /// Size-class registry: index `i` holds the pool of
    /// `(i + 1) * alignment` byte entities.
    pools: Vec<Option<Pool>>,
}

#[cfg(any(unix, windows))]
impl Allocator<SystemMemory> {
    /// Allocator over the host's virtual memory with the default policy.
    pub fn new() -> Self {
        Self::with_platform(crate::kernel::Kernel::new())
    }
}

#[cfg(any(unix, windows))]
impl Default for Allocator<SystemMemory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PlatformMemory> Allocator<P> {
    /// Allocator over `platform` with the default policy.
    pub fn with_platform(platform: P) -> Self {
        Self::build(Arena::new(platform), Config::default())
    }

    pub fn with_config(platform: P, config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(Arena::new(platform), config))
    }

    fn build(arena: Arena<P>, config: Config) -> Self {
        let classes = config.size_classes().unwrap_or(0).max(1);
        Self {
            arena,
            config,
            pools: (0..classes).map(|_| None).collect(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn arena(&self) -> &Arena<P> {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut Arena<P> {
        &mut self.arena
    }

    /// Routing decision for a request of `size` bytes. A zero size counts
    /// as one alignment unit.
    pub fn size_class(&self, size: usize) -> SizeClass {
        if size < self.config.cutoff {
            SizeClass::Pool(align(size.max(1), self.config.alignment))
        } else {
            SizeClass::Arena(size.div_ceil(self.arena.page_size()))
        }
    }

    /// Pool serving `entity_size`, if it was created already.
    pub fn pool(&self, entity_size: usize) -> Option<&Pool> {
        if entity_size == 0 || entity_size % self.config.alignment != 0 {
            return None;
        }
        self.pools.get(self.class_index(entity_size))?.as_ref()
    }

    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        match self.size_class(size) {
            SizeClass::Pool(entity_size) => {
                let index = self.class_index(entity_size);
                let pool = match &mut self.pools[index] {
                    Some(pool) => pool,
                    empty => empty.insert(
                        Pool::new(entity_size, self.arena.page_size())?
                            .with_compact_interval(self.config.compact_interval),
                    ),
                };
                pool.acquire(&mut self.arena)
            }
            SizeClass::Arena(_) => self.arena.acquire(size),
        }
    }

    /// Moves the block at `addr` from `size` to `new_size` bytes. Within the
    /// same size class the block stays where it is.
    ///
    /// # Safety
    ///
    /// `addr` must be live and have been obtained from this allocator with
    /// `size`.
    pub unsafe fn realloc(
        &mut self,
        size: usize,
        addr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let (from, to) = (self.size_class(size), self.size_class(new_size));
        if from == to {
            return Ok(addr);
        }

        if let (SizeClass::Arena(_), SizeClass::Arena(_)) = (from, to) {
            return unsafe { self.arena.resize(size, addr, new_size) };
        }

        let fresh = self.alloc(new_size)?;
        unsafe {
            ptr::copy_nonoverlapping(addr.as_ptr(), fresh.as_ptr(), size.min(new_size));
            self.free(size, addr);
        }
        Ok(fresh)
    }

    /// Gives back a block obtained with `size`.
    ///
    /// # Safety
    ///
    /// `addr` must be live and have been obtained from this allocator with
    /// `size`.
    pub unsafe fn free(&mut self, size: usize, addr: NonNull<u8>) {
        match self.size_class(size) {
            SizeClass::Pool(entity_size) => {
                let index = self.class_index(entity_size);
                match &mut self.pools[index] {
                    Some(pool) => unsafe { pool.release(&mut self.arena, addr) },
                    None => debug_assert!(false, "no {entity_size} byte pool for {addr:p}"),
                }
            }
            SizeClass::Arena(_) => unsafe { self.arena.release(size, addr) },
        }
    }

    /// Gives back a pooled block without its size: the owning pool is
    /// found from the address alone.
    ///
    /// # Safety
    ///
    /// `addr` must be a live block handed out by [`Allocator::alloc`]
    /// through a size-class pool.
    pub unsafe fn release_slot(&mut self, addr: NonNull<u8>) {
        let owner = self.pools.iter_mut().flatten().find(|pool| pool.owns(addr));
        match owner {
            Some(pool) => unsafe { pool.release(&mut self.arena, addr) },
            None => debug_assert!(false, "{addr:p} is not a pooled block"),
        }
    }

    /// Changes the protection of an arena-routed block. Best effort.
    ///
    /// # Safety
    ///
    /// `addr` must be a live block obtained from this allocator with
    /// `size`, and `size` must be at or above the cutoff.
    pub unsafe fn protect(&mut self, size: usize, addr: NonNull<u8>, mode: Protection) {
        debug_assert!(matches!(self.size_class(size), SizeClass::Arena(_)));
        unsafe { self.arena.protect(size, addr, mode) }
    }

    /// Compacts every size-class pool. Returns the number of frames
    /// released.
    pub fn compact_all(&mut self) -> usize {
        let arena = &mut self.arena;
        self.pools
            .iter_mut()
            .flatten()
            .map(|pool| pool.compact(arena))
            .sum()
    }

    /// A pool outside the size-class registry, for callers that want a
    /// dedicated pool for one record type. It shares this allocator's
    /// arena and must be torn down with [`Allocator::destroy_pool`].
    pub fn create_pool(&self, entity_size: usize) -> Result<Pool, AllocError> {
        Ok(Pool::new(entity_size, self.arena.page_size())?
            .with_compact_interval(self.config.compact_interval))
    }

    pub fn pool_acquire(&mut self, pool: &mut Pool) -> Result<NonNull<u8>, AllocError> {
        pool.acquire(&mut self.arena)
    }

    /// # Safety
    ///
    /// Same contract as [`Pool::release`].
    pub unsafe fn pool_release(&mut self, pool: &mut Pool, addr: NonNull<u8>) {
        unsafe { pool.release(&mut self.arena, addr) }
    }

    pub fn compact_pool(&mut self, pool: &mut Pool) -> usize {
        pool.compact(&mut self.arena)
    }

    pub fn destroy_pool(&mut self, pool: Pool) {
        pool.destroy(&mut self.arena);
    }

    /// Installs the hook run when the host denies a request. See
    /// [`Arena::set_recovery_hook`].
    pub fn set_recovery_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&mut Arena<P>, usize) -> Option<NonNull<u8>> + 'static,
    {
        self.arena.set_recovery_hook(hook);
    }

    pub fn clear_recovery_hook(&mut self) {
        drop(self.arena.take_recovery_hook());
    }

    pub fn stats(&self) -> AllocatorStats {
        let pools = self.pools.iter().flatten();
        AllocatorStats {
            arena: self.arena.stats(),
            pools: pools.clone().count(),
            frames: pools.clone().map(Pool::frame_count).sum(),
            live_slots: pools.map(Pool::live_slots).sum(),
        }
    }

    #[inline]
    fn class_index(&self, entity_size: usize) -> usize {
        entity_size / self.config.alignment - 1
    }
}

impl<P: PlatformMemory> Drop for Allocator<P> {
    fn drop(&mut self) {
        for pool in self.pools.iter_mut().filter_map(Option::take) {
            pool.destroy(&mut self.arena);
        }
    }
}
