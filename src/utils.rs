//! Helper functions shared by the arena, the pools and the facade.
//! These don't particularly belong to any concrete module of the crate.

/// It aligns `to_be_aligned` up to a multiple of `alignment`.
///
/// Used to round block lengths to a multiple of the page size and entity
/// sizes to a multiple of the facade alignment. `alignment` must be a
/// power of two.
#[inline]
pub const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when
/// the rounded value does not fit in a `usize`.
#[inline]
pub const fn checked_align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    match to_be_aligned.checked_add(alignment - 1) {
        Some(sum) => Some(sum & !(alignment - 1)),
        None => None,
    }
}
