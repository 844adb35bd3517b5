//! Fixed-size slab pools.
//!
//! A [`Pool`] serves a single entity size. It owns a chain of frames, each
//! one an arena block holding many slots of that size plus one occupancy
//! bit per slot. Slots carry no header of their own.
//!
//! ```text
//!  Pool (24 byte entities)
//!    |
//!    v
//! +-------+---------+----+----+----+-----+      +-------+---------+----+-----+
//! | Frame | bitmap  | s0 | s1 | s2 | ... | ---> | Frame | bitmap  | s0 | ... |
//! +-------+---------+----+----+----+-----+      +-------+---------+----+-----+
//! ```
//!
//! Slot addresses are mapped back to their frame through a side table keyed
//! by frame base address, so releasing a slot never needs its size.

use std::{collections::BTreeMap, ptr::NonNull};

use crate::{
    arena::Arena,
    config::DEFAULT_COMPACT_INTERVAL,
    error::AllocError,
    frame::{Frame, FrameHandle, FrameLayout},
    kernel::PlatformMemory,
    list::List,
};

pub struct Pool {
    layout: FrameLayout,
    /// Frames in allocation order. New frames go to the tail.
    frames: List<Frame>,
    /// Frame base address -> frame.
    owners: BTreeMap<usize, FrameHandle>,
    releases_since_compact: usize,
    compact_interval: usize,
}

impl Pool {
    /// Creates an empty pool for `entity_size` byte entities, using frames
    /// made of `page_size` pages.
    pub fn new(entity_size: usize, page_size: usize) -> Result<Self, AllocError> {
        let layout = FrameLayout::new(entity_size, page_size)
            .ok_or(AllocError::InvalidEntitySize(entity_size))?;

        log::debug!(
            "pool for {entity_size} byte entities: {} slots per {} byte frame",
            layout.max_entities,
            layout.frame_len
        );

        Ok(Self {
            layout,
            frames: List::new(),
            owners: BTreeMap::new(),
            releases_since_compact: 0,
            compact_interval: DEFAULT_COMPACT_INTERVAL,
        })
    }

    /// Number of releases between two automatic [`Pool::compact`] passes.
    #[must_use]
    pub fn with_compact_interval(mut self, releases: usize) -> Self {
        self.compact_interval = releases.max(1);
        self
    }

    #[inline]
    pub fn entity_size(&self) -> usize {
        self.layout.entity_size
    }

    #[inline]
    pub fn max_entities_per_frame(&self) -> usize {
        self.layout.max_entities
    }

    /// Length in bytes of the block backing each frame.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.layout.frame_len
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of slots currently handed out.
    pub fn live_slots(&self) -> usize {
        self.frames
            .nodes()
            .map(|node| unsafe { FrameHandle::new(node).occupied() })
            .sum()
    }

    /// Whether `addr` lies inside one of this pool's frames.
    pub fn owns(&self, addr: NonNull<u8>) -> bool {
        self.owner(addr).is_some()
    }

    /// Hands out the lowest free slot of the first frame that has one,
    /// growing the chain by one frame when every frame is full.
    pub fn acquire<P: PlatformMemory>(
        &mut self,
        arena: &mut Arena<P>,
    ) -> Result<NonNull<u8>, AllocError> {
        for node in self.frames.nodes() {
            if let Some(slot) = unsafe { FrameHandle::new(node).take_slot(&self.layout) } {
                return Ok(slot);
            }
        }

        let frame = self.grow(arena)?;
        unsafe { frame.take_slot(&self.layout) }.ok_or(AllocError::OutOfMemory {
            requested: self.layout.frame_len,
        })
    }

    /// Gives the slot at `addr` back to its frame. Every
    /// `compact_interval` releases the chain is compacted.
    ///
    /// # Safety
    ///
    /// `addr` must be a live slot handed out by [`Pool::acquire`] on this
    /// pool. Anything else is undefined behaviour; debug builds assert.
    pub unsafe fn release<P: PlatformMemory>(&mut self, arena: &mut Arena<P>, addr: NonNull<u8>) {
        let Some(frame) = self.owner(addr) else {
            debug_assert!(false, "{addr:p} does not belong to this pool");
            return;
        };

        unsafe { frame.give_back(&self.layout, addr) };

        self.releases_since_compact += 1;
        if self.releases_since_compact >= self.compact_interval {
            self.releases_since_compact = 0;
            self.compact(arena);
        }
    }

    /// Returns every empty frame to the arena, except the last frame
    /// standing. Frames with a live slot are never touched. Returns the
    /// number of frames released.
    pub fn compact<P: PlatformMemory>(&mut self, arena: &mut Arena<P>) -> usize {
        let empty: Vec<FrameHandle> = self
            .frames
            .nodes()
            .map(FrameHandle::new)
            .filter(|frame| unsafe { frame.is_empty() })
            .collect();

        let mut released = 0;
        // Tail first, so the head frame is the one kept.
        for frame in empty.into_iter().rev() {
            if self.frames.len() == 1 {
                break;
            }
            unsafe { self.drop_frame(arena, frame) };
            released += 1;
        }

        if released > 0 {
            log::trace!(
                "compacted {} byte pool: released {released} frames, {} left",
                self.layout.entity_size,
                self.frames.len()
            );
        }
        released
    }

    /// Releases every frame, live slots included.
    pub fn destroy<P: PlatformMemory>(mut self, arena: &mut Arena<P>) {
        let frames: Vec<FrameHandle> = self.frames.nodes().map(FrameHandle::new).collect();
        for frame in frames {
            unsafe { self.drop_frame(arena, frame) };
        }
    }

    fn owner(&self, addr: NonNull<u8>) -> Option<FrameHandle> {
        let addr = addr.as_ptr() as usize;
        self.owners
            .range(..=addr)
            .next_back()
            .filter(|(base, _)| addr - **base < self.layout.frame_len)
            .map(|(_, frame)| *frame)
    }

    fn grow<P: PlatformMemory>(&mut self, arena: &mut Arena<P>) -> Result<FrameHandle, AllocError> {
        let block = arena.acquire(self.layout.frame_len)?;

        let header = Frame {
            entity_size: self.layout.entity_size,
            max_entities: self.layout.max_entities,
            occupied: 0,
        };
        let frame = unsafe { FrameHandle::new(self.frames.append(header, block)) };
        unsafe { frame.init(&self.layout) };
        self.owners.insert(block.as_ptr() as usize, frame);

        log::trace!(
            "frame {block:p} added to {} byte pool ({} frames)",
            self.layout.entity_size,
            self.frames.len()
        );
        Ok(frame)
    }

    unsafe fn drop_frame<P: PlatformMemory>(&mut self, arena: &mut Arena<P>, frame: FrameHandle) {
        let base = frame.base();
        unsafe {
            self.frames.remove(frame.node());
            arena.release(self.layout.frame_len, base);
        }
        self.owners.remove(&(base.as_ptr() as usize));

        log::trace!("frame {base:p} released from {} byte pool", self.layout.entity_size);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if !self.frames.is_empty() {
            log::warn!(
                "{} byte pool dropped with {} frames still mapped",
                self.layout.entity_size,
                self.frames.len()
            );
        }
    }
}
