/*!
 * Arena Recycling Tests
 * Slabs drained by returns are recycled through the bounded free list
 * instead of going back to the allocator
 */

use pretty_assertions::assert_eq;
use slabkit::{ArenaSlabPool, CountingAllocator, PoolError, PoolInfo, SlabPool};
use std::ptr::NonNull;

const SLAB_SIZE: usize = 256;
/// 16-byte header + 48-byte payload: four blocks fill a slab exactly
const BLOCK: usize = 48;
const BLOCKS_PER_SLAB: usize = 4;

fn fill_slab(pool: &mut ArenaSlabPool<CountingAllocator>) -> Vec<NonNull<u8>> {
    (0..BLOCKS_PER_SLAB).map(|_| pool.rent(BLOCK).unwrap()).collect()
}

fn release_all(pool: &mut ArenaSlabPool<CountingAllocator>, blocks: Vec<NonNull<u8>>) {
    for block in blocks {
        unsafe { pool.release(block).unwrap() };
    }
}

#[test]
fn test_full_slab_cycles_reuse_one_slab() {
    for max_free in 0..4 {
        let counting = CountingAllocator::new();
        let mut pool = ArenaSlabPool::with_allocator(SLAB_SIZE, max_free, counting.clone()).unwrap();

        for _ in 0..max_free + 2 {
            let blocks = fill_slab(&mut pool);
            assert!(pool.slabs() <= max_free + 1);
            release_all(&mut pool, blocks);
        }

        assert_eq!(pool.live(), 0);
        assert!(counting.allocs() <= max_free + 1);
    }
}

#[test]
fn test_staggered_cycles_recycle_retired_slabs() {
    let max_free = 2;
    let counting = CountingAllocator::new();
    let mut pool = ArenaSlabPool::with_allocator(SLAB_SIZE, max_free, counting.clone()).unwrap();

    let mut previous = fill_slab(&mut pool);
    for _ in 0..max_free + 2 {
        // the current slab is full, so this batch lands in another slab
        let current = fill_slab(&mut pool);
        release_all(&mut pool, previous);

        assert!(pool.slabs() <= max_free + 1);
        assert!(pool.free_slabs() <= max_free);
        previous = current;
    }
    release_all(&mut pool, previous);

    assert!(counting.allocs() <= max_free + 1, "allocs = {}", counting.allocs());
    assert_eq!(counting.frees(), 0);

    drop(pool);
    assert_eq!(counting.live_blocks(), 0);
}

#[test]
fn test_free_list_never_exceeds_bound() {
    let max_free = 1;
    let counting = CountingAllocator::new();
    let mut pool = ArenaSlabPool::with_allocator(SLAB_SIZE, max_free, counting.clone()).unwrap();

    // five full slabs outstanding at once
    let batches: Vec<_> = (0..5).map(|_| fill_slab(&mut pool)).collect();
    assert_eq!(pool.slabs(), 5);
    assert_eq!(counting.allocs(), 5);

    for batch in batches {
        release_all(&mut pool, batch);
        assert!(pool.free_slabs() <= max_free);
    }

    // four drained non-current slabs: one kept, three released
    assert_eq!(pool.free_slabs(), 1);
    assert_eq!(counting.frees(), 3);
    assert_eq!(pool.slabs(), 1);
}

#[test]
fn test_oversized_request_is_capacity_error() {
    let counting = CountingAllocator::new();
    let mut pool = ArenaSlabPool::with_allocator(SLAB_SIZE, 1, counting.clone()).unwrap();

    let err = pool.rent(SLAB_SIZE).unwrap_err();
    assert!(matches!(err, PoolError::CapacityExceeded { .. }));
    assert!(!err.is_protocol_violation());
    assert_eq!(counting.allocs(), 0);
}
