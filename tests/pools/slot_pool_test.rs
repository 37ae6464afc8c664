/*!
 * Slot Pool Tests
 * Exhaustion, reuse order and protocol-violation detection across the
 * fixed-slot pool variants
 */

use pretty_assertions::assert_eq;
use slabkit::{
    BorrowedSlotPool, CountingAllocator, FixedSlot64Pool, FixedSlotPool, PoolConfig, PoolError, PoolInfo,
    RingIndexPool, SlabPool,
};
use std::mem::MaybeUninit;

#[test]
fn test_double_free_is_deterministic() {
    let mut fixed = FixedSlotPool::new(32, 8).unwrap();
    let slot = fixed.try_rent().unwrap();
    fixed.release(slot).unwrap();
    assert!(matches!(fixed.release(slot), Err(PoolError::DuplicateReturn { .. })));

    let mut slot64 = FixedSlot64Pool::new(32, 1).unwrap();
    let slot = slot64.try_rent().unwrap();
    let _other = slot64.try_rent().unwrap();
    slot64.release(slot).unwrap();
    assert!(matches!(slot64.release(slot), Err(PoolError::DuplicateReturn { .. })));

    let mut ring = RingIndexPool::new(32, 8).unwrap();
    let slot = ring.rent().unwrap();
    ring.release(slot).unwrap();
    assert!(matches!(ring.release(slot), Err(PoolError::DuplicateReturn { .. })));

    let mut buffer = vec![MaybeUninit::<u8>::uninit(); 4096];
    let mut borrowed = BorrowedSlotPool::new(&mut buffer, 32, 8).unwrap();
    let slot = borrowed.try_rent().unwrap();
    borrowed.release(slot).unwrap();
    let err = borrowed.release(slot).unwrap_err();
    assert!(err.is_protocol_violation());
}

#[test]
fn test_lifo_versus_fifo_reuse() {
    let mut fixed = FixedSlotPool::new(16, 4).unwrap();
    let mut ring = RingIndexPool::new(16, 4).unwrap();

    let fixed_slots: Vec<_> = (0..3).map(|_| fixed.try_rent().unwrap()).collect();
    let ring_slots: Vec<_> = (0..3).map(|_| ring.rent().unwrap()).collect();

    for slot in &fixed_slots {
        fixed.release(*slot).unwrap();
    }
    for slot in &ring_slots {
        ring.release(*slot).unwrap();
    }

    // most recently freed first
    assert_eq!(fixed.try_rent(), Some(fixed_slots[2]));
    // never-rented slot 3 was queued first, then the returns in order
    assert_eq!(ring.rent().map(|p| p.as_ptr() as usize), Some(ring_slots[0].as_ptr() as usize + 48));
    assert_eq!(ring.rent(), Some(ring_slots[0]));
}

#[test]
fn test_exhaustion_is_not_an_error() {
    let mut fixed = FixedSlotPool::new(8, 2).unwrap();
    assert!(fixed.try_rent().is_some());
    assert!(fixed.try_rent().is_some());
    assert!(fixed.try_rent().is_none());
    assert_eq!(fixed.stats().utilization(), 1.0);

    let mut ring = RingIndexPool::new(8, 1).unwrap();
    assert!(ring.rent().is_some());
    assert!(ring.rent().is_none());
}

#[test]
fn test_slot64_handles_round_trip() {
    let mut pool = FixedSlot64Pool::new(24, 2).unwrap();
    let (id, ptr) = pool.try_rent_slot().unwrap();
    assert_eq!(pool.slot_ptr(id), Some(ptr));
    assert!(pool.is_rented(ptr));

    pool.release_slot(id).unwrap();
    assert!(!pool.is_rented(ptr));
    assert!(matches!(pool.release(ptr), Err(PoolError::DuplicateReturn { .. })));
}

#[test]
fn test_slot64_recycles_through_free_list() {
    let counting = CountingAllocator::new();
    let mut pool = FixedSlot64Pool::with_allocator(16, 16, 1, counting.clone()).unwrap();

    for _ in 0..5 {
        // two slabs' worth, then return all of it
        let slots: Vec<_> = (0..128).map(|_| pool.try_rent().unwrap()).collect();
        for slot in slots {
            pool.release(slot).unwrap();
        }
        assert!(pool.free_slabs() <= 1);
    }

    assert!(counting.allocs() <= 2, "allocs = {}", counting.allocs());
    assert_eq!(pool.live(), 0);
}

#[test]
fn test_from_config() {
    let config = PoolConfig::new(12, 3);

    let fixed = FixedSlotPool::from_config(16, &config).unwrap();
    assert_eq!(fixed.capacity(), 12);

    let ring = RingIndexPool::from_config(16, &config).unwrap();
    assert_eq!(ring.capacity(), 12);

    let slot64 = FixedSlot64Pool::from_config(16, &config).unwrap();
    assert_eq!(slot64.max_free_slabs(), 3);
}
