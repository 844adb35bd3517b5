use std::ptr::NonNull;

use crate::kernel::{PlatformMemory, Protection};

/// Caps the number of bytes a backend may have mapped at once. Requests
/// that would cross the cap are denied exactly like a host that ran out
/// of memory, which makes exhaustion reproducible.
#[derive(Debug, Clone)]
pub struct Limited<P> {
    inner: P,
    limit: usize,
    in_use: usize,
}

impl<P: PlatformMemory> Limited<P> {
    pub fn new(inner: P, limit: usize) -> Self {
        Self { inner, limit, in_use: 0 }
    }

    /// Bytes currently mapped through this wrapper.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn fits(&self, extra: usize) -> bool {
        self.in_use
            .checked_add(extra)
            .is_some_and(|total| total <= self.limit)
    }
}

impl<P: PlatformMemory> PlatformMemory for Limited<P> {
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    unsafe fn request_memory(&mut self, len: usize) -> Option<NonNull<u8>> {
        if !self.fits(len) {
            return None;
        }
        let block = unsafe { self.inner.request_memory(len)? };
        self.in_use += len;
        Some(block)
    }

    unsafe fn resize_memory(
        &mut self,
        addr: NonNull<u8>,
        old_len: usize,
        new_len: usize,
    ) -> Option<NonNull<u8>> {
        if new_len > old_len && !self.fits(new_len - old_len) {
            return None;
        }
        let moved = unsafe { self.inner.resize_memory(addr, old_len, new_len)? };
        self.in_use = self.in_use - old_len + new_len;
        Some(moved)
    }

    unsafe fn return_memory(&mut self, addr: NonNull<u8>, len: usize) {
        unsafe { self.inner.return_memory(addr, len) };
        self.in_use -= len;
    }

    unsafe fn protect_memory(&mut self, addr: NonNull<u8>, len: usize, protection: Protection)
        -> bool {
        unsafe { self.inner.protect_memory(addr, len, protection) }
    }
}
