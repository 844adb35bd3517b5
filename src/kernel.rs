use std::{alloc::Layout, ptr::NonNull};

/// Page protection modes accepted by [`PlatformMemory::protect_memory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadOnly,
    ReadWrite,
    ReadExecute,
}

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. The arena, our top level view of this, has nothing to do
/// with the concrete implementations / APIs offered by each host, and the
/// pools and the facade never see it at all.
///
/// Every block handed out must be page aligned, zero filled and mapped
/// read/write, and its length is always a multiple of [`page_size`].
///
/// [`page_size`]: PlatformMemory::page_size
pub trait PlatformMemory {
    /// Returns the virtual memory page size of the host in bytes.
    fn page_size(&self) -> usize;

    /// Request a memory block of size `len`. It returns a pointer to the
    /// given location or `None` if the underlying syscall fails.
    ///
    /// # Safety
    ///
    /// `len` must be a non-zero multiple of [`PlatformMemory::page_size`].
    unsafe fn request_memory(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// Grows or shrinks the block at `addr` without the caller copying it,
    /// possibly moving it. Hosts without a remap facility return `None`,
    /// in which case the block at `addr` is left untouched.
    ///
    /// # Safety
    ///
    /// `addr` and `old_len` must describe a live block returned by this
    /// platform. `new_len` follows the same rules as in `request_memory`.
    unsafe fn resize_memory(
        &mut self,
        addr: NonNull<u8>,
        old_len: usize,
        new_len: usize,
    ) -> Option<NonNull<u8>> {
        let _ = (addr, old_len, new_len);
        None
    }

    /// Returns the memory of size `len` starting from `addr` back to the host.
    ///
    /// # Safety
    ///
    /// `addr` and `len` must describe a live block returned by this platform.
    unsafe fn return_memory(&mut self, addr: NonNull<u8>, len: usize);

    /// Changes the protection of a block. Returns `false` if the host
    /// refused or has no such facility.
    ///
    /// # Safety
    ///
    /// `addr` and `len` must describe a live block returned by this platform.
    unsafe fn protect_memory(&mut self, addr: NonNull<u8>, len: usize, protection: Protection)
        -> bool;
}

/// Host virtual memory: `mmap` family on unix, `VirtualAlloc` family on
/// windows. The page size is queried once when the value is built.
#[cfg(any(unix, windows))]
#[derive(Debug, Clone, Copy)]
pub struct Kernel {
    page_size: usize,
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory, Protection};

    use libc::{mmap, mprotect, munmap, off_t, size_t};

    use std::{os::raw::{c_int, c_void}, ptr::NonNull};

    impl Kernel {
        pub fn new() -> Self {
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            Self { page_size: page_size as usize }
        }
    }

    impl PlatformMemory for Kernel {
        fn page_size(&self) -> usize {
            self.page_size
        }

        unsafe fn request_memory(&mut self, len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                match mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        #[cfg(target_os = "linux")]
        unsafe fn resize_memory(
            &mut self,
            addr: NonNull<u8>,
            old_len: usize,
            new_len: usize,
        ) -> Option<NonNull<u8>> {
            unsafe {
                let moved = libc::mremap(
                    addr.as_ptr().cast::<c_void>(),
                    old_len as size_t,
                    new_len as size_t,
                    libc::MREMAP_MAYMOVE,
                );

                match moved {
                    libc::MAP_FAILED => None,
                    moved => NonNull::new(moved.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(&mut self, addr: NonNull<u8>, len: usize) {
            unsafe {
                munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
            }
        }

        unsafe fn protect_memory(
            &mut self,
            addr: NonNull<u8>,
            len: usize,
            protection: Protection,
        ) -> bool {
            let prot = match protection {
                Protection::ReadOnly => libc::PROT_READ,
                Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
                Protection::ReadExecute => libc::PROT_READ | libc::PROT_EXEC,
            };

            unsafe { mprotect(addr.as_ptr().cast::<c_void>(), len as size_t, prot) == 0 }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory, Protection};

    use windows::Win32::System::{Memory, SystemInformation};

    impl Kernel {
        pub fn new() -> Self {
            let page_size = unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            };
            Self { page_size }
        }
    }

    impl PlatformMemory for Kernel {
        fn page_size(&self) -> usize {
            self.page_size
        }

        unsafe fn request_memory(&mut self, len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(&mut self, addr: NonNull<u8>, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn protect_memory(
            &mut self,
            addr: NonNull<u8>,
            len: usize,
            protection: Protection,
        ) -> bool {
            let new_protection = match protection {
                Protection::ReadOnly => Memory::PAGE_READONLY,
                Protection::ReadWrite => Memory::PAGE_READWRITE,
                Protection::ReadExecute => Memory::PAGE_EXECUTE_READ,
            };
            let mut old_protection = Memory::PAGE_PROTECTION_FLAGS::default();

            unsafe {
                Memory::VirtualProtect(
                    addr.as_ptr().cast::<c_void>().cast_const(),
                    len,
                    new_protection,
                    &mut old_protection,
                )
                .is_ok()
            }
        }
    }
}

#[cfg(any(unix, windows))]
impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Page size assumed by [`HeapMemory`] when none is given.
pub const HEAP_PAGE_SIZE: usize = 4096;

/// Fallback for hosts without a virtual memory facility. Blocks come from
/// the global heap with page alignment; there is no remap and no
/// protection change.
#[derive(Debug, Clone, Copy)]
pub struct HeapMemory {
    page_size: usize,
}

impl HeapMemory {
    /// `page_size` must be a power of two.
    pub const fn with_page_size(page_size: usize) -> Self {
        Self { page_size }
    }

    fn layout(&self, len: usize) -> Option<Layout> {
        Layout::from_size_align(len, self.page_size).ok()
    }
}

impl Default for HeapMemory {
    fn default() -> Self {
        Self::with_page_size(HEAP_PAGE_SIZE)
    }
}

impl PlatformMemory for HeapMemory {
    fn page_size(&self) -> usize {
        self.page_size
    }

    unsafe fn request_memory(&mut self, len: usize) -> Option<NonNull<u8>> {
        let layout = self.layout(len)?;
        unsafe { NonNull::new(std::alloc::alloc_zeroed(layout)) }
    }

    unsafe fn resize_memory(
        &mut self,
        addr: NonNull<u8>,
        old_len: usize,
        new_len: usize,
    ) -> Option<NonNull<u8>> {
        let layout = self.layout(old_len)?;
        // Validates `new_len` against the alignment before handing it to realloc.
        self.layout(new_len)?;
        let moved = unsafe { NonNull::new(std::alloc::realloc(addr.as_ptr(), layout, new_len))? };
        if new_len > old_len {
            // Grown pages read as zero, same as a fresh mapping.
            unsafe { moved.add(old_len).write_bytes(0, new_len - old_len) }
        }
        Some(moved)
    }

    unsafe fn return_memory(&mut self, addr: NonNull<u8>, len: usize) {
        if let Some(layout) = self.layout(len) {
            unsafe { std::alloc::dealloc(addr.as_ptr(), layout) }
        }
    }

    unsafe fn protect_memory(&mut self, _addr: NonNull<u8>, _len: usize, _: Protection) -> bool {
        false
    }
}

/// Backend picked at build time for the host.
#[cfg(any(unix, windows))]
pub type SystemMemory = Kernel;

/// Backend picked at build time for the host.
#[cfg(not(any(unix, windows)))]
pub type SystemMemory = HeapMemory;
