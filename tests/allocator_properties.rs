use std::{
    cell::Cell,
    panic::{self, AssertUnwindSafe},
    ptr::NonNull,
    rc::Rc,
    slice,
};

use rand::{Rng, SeedableRng, rngs::StdRng};
use slabarena::{AllocError, Allocator, Arena, Config, HeapMemory, Limited, PlatformMemory};

const PAGE: usize = 4096;

fn heap_allocator() -> Allocator<HeapMemory> {
    Allocator::with_platform(HeapMemory::default())
}

unsafe fn fill(addr: NonNull<u8>, len: usize, seed: usize) {
    let bytes = unsafe { slice::from_raw_parts_mut(addr.as_ptr(), len) };
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = (i.wrapping_mul(31) ^ seed) as u8;
    }
}

unsafe fn holds(addr: NonNull<u8>, len: usize, seed: usize) -> bool {
    let bytes = unsafe { slice::from_raw_parts(addr.as_ptr(), len) };
    bytes
        .iter()
        .enumerate()
        .all(|(i, byte)| *byte == (i.wrapping_mul(31) ^ seed) as u8)
}

fn arena_blocks_start_zeroed<P: PlatformMemory>(arena: &mut Arena<P>) {
    for size in [0, 1, 64, PAGE - 1, PAGE, PAGE + 1, 16 * PAGE + 3] {
        let block = arena.acquire(size).unwrap();
        unsafe {
            let bytes = slice::from_raw_parts(block.as_ptr(), size);
            assert!(bytes.iter().all(|b| *b == 0), "{size} byte block not zeroed");
            arena.release(size, block);
        }
    }
    assert_eq!(arena.stats().live_blocks, 0);
}

#[test]
fn fresh_arena_blocks_are_zeroed() {
    arena_blocks_start_zeroed(&mut Arena::new(HeapMemory::default()));
}

#[cfg(any(unix, windows))]
#[test]
fn fresh_system_blocks_are_zeroed() {
    arena_blocks_start_zeroed(&mut Arena::system());
}

#[test]
fn pooled_slots_round_trip_without_aliasing() {
    let mut rng = StdRng::seed_from_u64(0xa11c);
    let mut allocator = heap_allocator();

    for words in 1..=22 {
        let entity_size = words * 8;
        let mut pool = allocator.create_pool(entity_size).unwrap();
        let per_frame = pool.max_entities_per_frame();

        let mut counts = vec![1, per_frame, per_frame + 1, 1025];
        counts.extend((0..3).map(|_| rng.gen_range(2..=1025)));

        for count in counts {
            let slots: Vec<NonNull<u8>> = (0..count)
                .map(|_| allocator.pool_acquire(&mut pool).unwrap())
                .collect();
            assert_eq!(pool.live_slots(), count);

            for (i, slot) in slots.iter().enumerate() {
                unsafe { fill(*slot, entity_size, i) };
            }
            for (i, slot) in slots.iter().enumerate() {
                assert!(
                    unsafe { holds(*slot, entity_size, i) },
                    "slot {i} of {count} ({entity_size} bytes) was overwritten"
                );
            }

            let mut addrs: Vec<usize> = slots.iter().map(|s| s.as_ptr() as usize).collect();
            addrs.sort_unstable();
            assert!(addrs.windows(2).all(|w| w[1] - w[0] >= entity_size));

            for slot in slots {
                unsafe { allocator.pool_release(&mut pool, slot) };
            }
            assert_eq!(pool.live_slots(), 0);
        }

        allocator.compact_pool(&mut pool);
        assert!(pool.frame_count() <= 1);
        allocator.destroy_pool(pool);
    }

    assert_eq!(allocator.arena().stats().live_blocks, 0);
}

#[test]
fn realloc_to_double_keeps_the_prefix() {
    let mut allocator = heap_allocator();

    for size in [1, 7, 100, 1999, 2000, 3999, 4000, 5000, 3 * PAGE + 5] {
        let block = allocator.alloc(size).unwrap();
        unsafe {
            fill(block, size, size);
            let grown = allocator.realloc(size, block, 2 * size).unwrap();
            assert!(holds(grown, size, size), "prefix of {size} bytes lost");

            fill(grown, 2 * size, size);
            assert!(holds(grown, 2 * size, size), "{} byte block is short", 2 * size);
            allocator.free(2 * size, grown);
        }
    }

    assert_eq!(allocator.stats().live_slots, 0);
}

#[test]
fn realloc_within_a_class_keeps_the_address() {
    let mut allocator = heap_allocator();

    let small = allocator.alloc(9).unwrap();
    let large = allocator.alloc(PAGE + 1).unwrap();
    unsafe {
        assert_eq!(allocator.realloc(9, small, 16).unwrap(), small);
        assert_eq!(allocator.realloc(PAGE + 1, large, 2 * PAGE).unwrap(), large);

        allocator.free(16, small);
        allocator.free(2 * PAGE, large);
    }
}

#[test]
fn compaction_leaves_at_most_one_frame() {
    let config = Config::default().with_compact_interval(usize::MAX);
    let mut allocator = Allocator::with_config(HeapMemory::default(), config).unwrap();

    let blocks: Vec<NonNull<u8>> = (0..2000).map(|_| allocator.alloc(64).unwrap()).collect();
    assert!(allocator.pool(64).unwrap().frame_count() > 1);

    for block in blocks {
        unsafe { allocator.free(64, block) };
    }
    allocator.compact_all();

    let pool = allocator.pool(64).unwrap();
    assert_eq!(pool.live_slots(), 0);
    assert!(pool.frame_count() <= 1);
}

#[test]
fn exhaustion_escalates_to_sentinel_then_terminates() {
    let mut allocator = Allocator::with_platform(Limited::new(HeapMemory::default(), 2 * PAGE));

    let sentinel = NonNull::from(Box::leak(Box::new([0u8; 64]))).cast::<u8>();
    let calls = Rc::new(Cell::new(0));
    let hook_calls = Rc::clone(&calls);
    allocator.set_recovery_hook(move |_, requested| {
        hook_calls.set(hook_calls.get() + 1);
        if hook_calls.get() == 1 {
            Some(sentinel)
        } else {
            panic!("out of memory: {requested} bytes");
        }
    });

    assert_eq!(allocator.alloc(3 * PAGE), Ok(sentinel));
    assert_eq!(calls.get(), 1);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| allocator.alloc(3 * PAGE)));
    assert!(outcome.is_err());
    assert_eq!(calls.get(), 2);
    assert_eq!(allocator.stats().arena.hook_invocations, 2);

    // Requests the host can serve never reach the hook.
    let block = allocator.alloc(PAGE).unwrap();
    unsafe { allocator.free(PAGE, block) };
    assert_eq!(calls.get(), 2);

    // The hook unwound while detached, so the next denial has no one to ask.
    assert_eq!(
        allocator.alloc(3 * PAGE),
        Err(AllocError::OutOfMemory { requested: 3 * PAGE })
    );
}

#[test]
fn twelve_byte_records() {
    let mut allocator = heap_allocator();
    let mut pool = allocator.create_pool(12).unwrap();

    let slots: Vec<NonNull<u8>> = (0..10)
        .map(|_| allocator.pool_acquire(&mut pool).unwrap())
        .collect();
    for window in slots.windows(2) {
        assert_eq!(window[1].as_ptr() as usize - window[0].as_ptr() as usize, 12);
    }

    for (i, slot) in slots.iter().enumerate() {
        unsafe { fill(*slot, 12, i) };
    }
    for (i, slot) in slots.iter().enumerate() {
        assert!(unsafe { holds(*slot, 12, i) });
    }

    for slot in slots {
        unsafe { allocator.pool_release(&mut pool, slot) };
    }
    allocator.compact_pool(&mut pool);
    assert!(pool.frame_count() <= 1);
    assert_eq!(pool.live_slots(), 0);

    allocator.destroy_pool(pool);
}

#[cfg(unix)]
#[test]
fn system_allocator_mixed_churn() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut allocator = Allocator::new();
    let mut live: Vec<(NonNull<u8>, usize, usize)> = Vec::new();

    for round in 0..3000 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let size = if rng.gen_bool(0.9) {
                rng.gen_range(0..4000)
            } else {
                rng.gen_range(4000..64 * 1024)
            };
            let block = allocator.alloc(size).unwrap();
            unsafe { fill(block, size, round) };
            live.push((block, size, round));
        } else {
            let (block, size, seed) = live.swap_remove(rng.gen_range(0..live.len()));
            unsafe {
                assert!(holds(block, size, seed));
                allocator.free(size, block);
            }
        }
    }

    for (block, size, seed) in live {
        unsafe {
            assert!(holds(block, size, seed));
            allocator.free(size, block);
        }
    }
    assert_eq!(allocator.stats().live_slots, 0);
}
