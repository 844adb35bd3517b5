use std::{mem, ptr::NonNull, slice};

use crate::{
    bitmap::{self, WORD_BITS},
    list::Node,
    utils::{align, checked_align},
};

/// Size of the frame header. The header is a [`Node`] of the pool's frame
/// chain, see [`crate::list::List`].
pub(crate) const FRAME_HEADER_SIZE: usize = mem::size_of::<Node<Frame>>();

/// Hard cap on slots per frame: eight bitmap words.
pub const MAX_ENTITIES_PER_FRAME: usize = 8 * WORD_BITS;

/// Alignment of the first slot of a frame. Slots of entities sized in
/// multiples of it keep it, so it bounds the facade alignment.
pub(crate) const SLOT_ALIGN: usize = 16;

/// Frame header. Always wrapped in a [`Node`] placed at the very start of
/// the frame's block:
///
/// ```text
/// +---------------------+ <- block base (page aligned)
/// |     Node<Frame>     |    next / prev / entity_size / max_entities / occupied
/// +---------------------+ <- FRAME_HEADER_SIZE
/// |   bitmap words      |    one bit per slot, padding bits set
/// +---------------------+ <- slots_offset
/// |   slot 0            |
/// |   slot 1            |
/// |   ...               |
/// |   slot max - 1      |
/// +---------------------+
/// |   unused tail       |
/// +---------------------+ <- base + frame_len (whole pages)
/// ```
pub(crate) struct Frame {
    pub entity_size: usize,
    pub max_entities: usize,
    /// Number of bits set in the bitmap.
    pub occupied: usize,
}

/// Geometry shared by every frame of a pool, computed once when the pool
/// is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameLayout {
    pub entity_size: usize,
    pub max_entities: usize,
    pub bitmap_words: usize,
    pub slots_offset: usize,
    pub frame_len: usize,
}

impl FrameLayout {
    /// A frame is the smallest number of whole pages that holds one slot.
    /// Within it we keep the largest slot count (up to
    /// [`MAX_ENTITIES_PER_FRAME`]) whose header, bitmap and slots still fit.
    pub fn new(entity_size: usize, page_size: usize) -> Option<Self> {
        if entity_size == 0 {
            return None;
        }

        let smallest = Self::footprint(1, entity_size)?;
        let frame_len = checked_align(smallest, page_size)?;

        let mut max_entities =
            MAX_ENTITIES_PER_FRAME.min((frame_len - FRAME_HEADER_SIZE) / entity_size);
        while Self::footprint(max_entities, entity_size)? > frame_len {
            max_entities -= 1;
        }

        Some(Self {
            entity_size,
            max_entities,
            bitmap_words: bitmap::words_for(max_entities),
            slots_offset: Self::slots_offset(max_entities),
            frame_len,
        })
    }

    fn slots_offset(entities: usize) -> usize {
        align(FRAME_HEADER_SIZE + bitmap::words_for(entities) * mem::size_of::<u64>(), SLOT_ALIGN)
    }

    fn footprint(entities: usize, entity_size: usize) -> Option<usize> {
        entities
            .checked_mul(entity_size)?
            .checked_add(Self::slots_offset(entities))
    }
}

/// Raw handle over a live frame. All accessors trust that the node was
/// written by [`crate::list::List::append`] into a block laid out with
/// `layout`.
#[derive(Clone, Copy)]
pub(crate) struct FrameHandle {
    node: NonNull<Node<Frame>>,
}

impl FrameHandle {
    pub fn new(node: NonNull<Node<Frame>>) -> Self {
        Self { node }
    }

    #[inline]
    pub fn node(self) -> NonNull<Node<Frame>> {
        self.node
    }

    #[inline]
    pub fn base(self) -> NonNull<u8> {
        self.node.cast()
    }

    /// Prepares the bitmap of a freshly written frame.
    pub unsafe fn init(self, layout: &FrameLayout) {
        unsafe { bitmap::reset(self.bitmap(layout), layout.max_entities) }
    }

    pub unsafe fn occupied(self) -> usize {
        unsafe { (*self.node.as_ptr()).data.occupied }
    }

    pub unsafe fn is_empty(self) -> bool {
        unsafe { self.occupied() == 0 }
    }

    /// Marks the lowest free slot as taken and returns its address.
    pub unsafe fn take_slot(self, layout: &FrameLayout) -> Option<NonNull<u8>> {
        unsafe {
            let frame = &mut (*self.node.as_ptr()).data;
            if frame.occupied == frame.max_entities {
                return None;
            }

            let words = self.bitmap(layout);
            let index = bitmap::first_free(words)?;
            bitmap::set(words, index);
            frame.occupied += 1;

            Some(self.slot(layout, index))
        }
    }

    /// Clears the bit of the slot at `addr`.
    pub unsafe fn give_back(self, layout: &FrameLayout, addr: NonNull<u8>) {
        unsafe {
            let frame = &mut (*self.node.as_ptr()).data;
            debug_assert_eq!(frame.entity_size, layout.entity_size);

            let offset = addr.as_ptr() as usize - self.base().as_ptr() as usize;
            debug_assert!(offset >= layout.slots_offset, "address {addr:p} points into a frame header");
            let index = (offset - layout.slots_offset) / frame.entity_size;
            debug_assert_eq!((offset - layout.slots_offset) % frame.entity_size, 0);
            debug_assert!(index < frame.max_entities);

            let words = self.bitmap(layout);
            debug_assert!(bitmap::is_set(words, index), "slot {index} released twice");
            bitmap::clear(words, index);
            frame.occupied -= 1;
        }
    }

    #[inline]
    unsafe fn slot(self, layout: &FrameLayout, index: usize) -> NonNull<u8> {
        unsafe { self.base().add(layout.slots_offset + index * layout.entity_size) }
    }

    #[inline]
    unsafe fn bitmap<'a>(self, layout: &FrameLayout) -> &'a mut [u64] {
        unsafe {
            let words = self.base().add(FRAME_HEADER_SIZE).cast::<u64>();
            slice::from_raw_parts_mut(words.as_ptr(), layout.bitmap_words)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 4096;

    #[test]
    fn small_entities_hit_the_cap() {
        let layout = FrameLayout::new(4, PAGE).unwrap();
        assert_eq!(layout.frame_len, PAGE);
        assert_eq!(layout.max_entities, MAX_ENTITIES_PER_FRAME);
        assert_eq!(layout.bitmap_words, 8);
    }

    #[test]
    fn layouts_fit_their_frame() {
        for entity_size in (1..4000).step_by(7) {
            let layout = FrameLayout::new(entity_size, PAGE).unwrap();
            assert_eq!(layout.frame_len, PAGE, "entity size {entity_size}");
            assert!(layout.max_entities >= 1);
            assert!(layout.max_entities <= MAX_ENTITIES_PER_FRAME);
            assert!(layout.slots_offset >= FRAME_HEADER_SIZE + layout.bitmap_words * 8);
            assert!(layout.slots_offset + layout.max_entities * entity_size <= layout.frame_len);

            // One more slot would not fit, unless the cap is what binds.
            if layout.max_entities < MAX_ENTITIES_PER_FRAME {
                let more = FrameLayout::footprint(layout.max_entities + 1, entity_size).unwrap();
                assert!(more > layout.frame_len, "entity size {entity_size}");
            }
        }
    }

    #[test]
    fn twelve_byte_entities() {
        let layout = FrameLayout::new(12, PAGE).unwrap();
        let expected_offset = align(FRAME_HEADER_SIZE + 6 * 8, SLOT_ALIGN);
        assert_eq!(layout.max_entities, (PAGE - expected_offset) / 12);
        assert_eq!(layout.slots_offset, expected_offset);
    }

    #[test]
    fn large_entities_span_pages() {
        let layout = FrameLayout::new(3 * PAGE, PAGE).unwrap();
        assert_eq!(layout.frame_len, 4 * PAGE);
        assert_eq!(layout.max_entities, 1);
    }

    #[test]
    fn rejects_zero_and_overflow() {
        assert!(FrameLayout::new(0, PAGE).is_none());
        assert!(FrameLayout::new(usize::MAX, PAGE).is_none());
    }
}
