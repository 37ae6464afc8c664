/*!
 * Pool Conservation Property Tests
 * For any rent/return trace, live == rents - returns, stays within
 * capacity, and the free-slab count ends where the trace says it should
 */

use proptest::prelude::*;
use slabkit::{ArenaSlabPool, FixedSlot64Pool, FixedSlotPool, PoolInfo, RingIndexPool, SlabPool};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::ptr::NonNull;

#[derive(Debug, Clone)]
enum Op {
    /// Rent (the payload is the arena request length)
    Rent(usize),
    /// Return the outstanding block at this position (mod outstanding count)
    Return(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..=96).prop_map(Op::Rent),
        2 => any::<usize>().prop_map(Op::Return),
    ]
}

fn take<T>(outstanding: &mut Vec<T>, pick: usize) -> Option<T> {
    if outstanding.is_empty() {
        None
    } else {
        let index = pick % outstanding.len();
        Some(outstanding.swap_remove(index))
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_fixed_slot_pool_conserves(ops in prop::collection::vec(op_strategy(), 1..200)) {
        const CAPACITY: usize = 16;
        let mut pool = FixedSlotPool::new(24, CAPACITY).unwrap();
        let mut outstanding = Vec::new();

        for op in ops {
            match op {
                Op::Rent(_) => match pool.try_rent() {
                    Some(ptr) => outstanding.push(ptr),
                    None => {
                        prop_assert_eq!(outstanding.len(), CAPACITY);
                    }
                },
                Op::Return(pick) => {
                    if let Some(ptr) = take(&mut outstanding, pick) {
                        prop_assert!(pool.release(ptr).is_ok());
                    }
                }
            }
            prop_assert_eq!(pool.live(), outstanding.len());
            prop_assert!(pool.live() <= CAPACITY);
            prop_assert_eq!(pool.available(), CAPACITY - outstanding.len());
        }
    }

    #[test]
    fn prop_ring_pool_conserves(ops in prop::collection::vec(op_strategy(), 1..200)) {
        const CAPACITY: usize = 9;
        let mut pool = RingIndexPool::new(8, CAPACITY).unwrap();
        let mut outstanding = Vec::new();

        for op in ops {
            match op {
                Op::Rent(_) => match pool.rent() {
                    Some(ptr) => outstanding.push(ptr),
                    None => {
                        prop_assert_eq!(outstanding.len(), CAPACITY);
                    }
                },
                Op::Return(pick) => {
                    if let Some(ptr) = take(&mut outstanding, pick) {
                        prop_assert!(pool.release(ptr).is_ok());
                    }
                }
            }
            prop_assert_eq!(pool.live(), outstanding.len());
        }
    }

    #[test]
    fn prop_slot64_pool_conserves(
        ops in prop::collection::vec(op_strategy(), 1..400),
        max_free in 0usize..3,
    ) {
        let mut pool = FixedSlot64Pool::new(16, max_free).unwrap();
        let mut model = SlabModel::new(max_free);
        let mut outstanding = Vec::new();

        for op in ops {
            match op {
                Op::Rent(_) => {
                    let (slot, ptr) = pool.try_rent_slot().unwrap();
                    let fresh = model.rent_into(slot.slab());
                    if fresh {
                        // a new slab only joins the ring once every ring slab is full
                        prop_assert_eq!(outstanding.len(), (model.slabs() - 1) * 64);
                    }
                    outstanding.push((slot.slab(), ptr));
                }
                Op::Return(pick) => {
                    if let Some((slab, ptr)) = take(&mut outstanding, pick) {
                        let released = pool.release(ptr);
                        prop_assert!(released.is_ok());
                        model.release_from(slab);
                    }
                }
            }
            prop_assert_eq!(pool.live(), outstanding.len());
            prop_assert!(pool.live() <= pool.stats().capacity);
            prop_assert_eq!(pool.slabs(), model.slabs());
            prop_assert_eq!(pool.free_slabs(), model.free);
        }

        for (slab, ptr) in outstanding.drain(..) {
            let released = pool.release(ptr);
            prop_assert!(released.is_ok());
            model.release_from(slab);
        }
        prop_assert_eq!(pool.live(), 0);
        prop_assert_eq!(pool.slabs(), model.slabs());
        prop_assert!(pool.slabs() <= 1);
        prop_assert_eq!(pool.free_slabs(), model.free);
    }

    #[test]
    fn prop_arena_pool_conserves(
        ops in prop::collection::vec(op_strategy(), 1..300),
        max_free in 0usize..3,
    ) {
        let mut pool = ArenaSlabPool::new(512, max_free).unwrap();
        let mut model = ArenaModel::new(512, max_free);
        let mut outstanding = Vec::new();

        for op in ops {
            match op {
                Op::Rent(len) => {
                    let ptr = pool.rent(len).unwrap();
                    // the whole requested range is writable
                    unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0x5A, len) };
                    outstanding.push((model.rent(len), ptr));
                }
                Op::Return(pick) => {
                    if let Some((slab, ptr)) = take(&mut outstanding, pick) {
                        let released = unsafe { pool.release(ptr) };
                        prop_assert!(released.is_ok());
                        model.release(slab);
                    }
                }
            }
            prop_assert_eq!(pool.live(), outstanding.len());
            prop_assert_eq!(pool.slabs(), model.slabs.slabs());
            prop_assert_eq!(pool.free_slabs(), model.slabs.free);
        }

        for (slab, ptr) in outstanding.drain(..) {
            let released = unsafe { pool.release(ptr) };
            prop_assert!(released.is_ok());
            model.release(slab);
        }
        prop_assert_eq!(pool.live(), 0);
        prop_assert_eq!(pool.slabs(), model.slabs.slabs());
        prop_assert!(pool.slabs() <= 1);
        prop_assert_eq!(pool.free_slabs(), model.slabs.free);
    }
}

/// Expected ring and free-list sizes for a sentinel-based slab pool
struct SlabModel<K> {
    live: HashMap<K, usize>,
    sentinel: Option<K>,
    free: usize,
    max_free: usize,
}

impl<K: Copy + Eq + Hash + Debug> SlabModel<K> {
    fn new(max_free: usize) -> Self {
        Self {
            live: HashMap::new(),
            sentinel: None,
            free: 0,
            max_free,
        }
    }

    fn slabs(&self) -> usize {
        self.live.len()
    }

    /// Record a rent served by `slab`; true if the slab just joined the ring
    fn rent_into(&mut self, slab: K) -> bool {
        let fresh = !self.live.contains_key(&slab);
        if fresh {
            // joining slabs come off the free list first
            self.free = self.free.saturating_sub(1);
        }
        *self.live.entry(slab).or_insert(0) += 1;
        self.sentinel = Some(slab);
        fresh
    }

    /// Record a return to `slab`; true if it drained the sentinel
    fn release_from(&mut self, slab: K) -> bool {
        let Some(count) = self.live.get_mut(&slab) else {
            panic!("slab {:?} not in the ring", slab);
        };
        *count -= 1;
        if *count > 0 {
            return false;
        }
        if self.sentinel == Some(slab) {
            return true;
        }
        self.live.remove(&slab);
        if self.free < self.max_free {
            self.free += 1;
        }
        false
    }
}

/// Bump placement of the arena pool, numbering slabs as they join the ring
struct ArenaModel {
    slabs: SlabModel<u32>,
    slab_size: usize,
    used: usize,
    joined: u32,
}

impl ArenaModel {
    fn new(slab_size: usize, max_free: usize) -> Self {
        Self {
            slabs: SlabModel::new(max_free),
            slab_size,
            used: 0,
            joined: 0,
        }
    }

    fn rent(&mut self, len: usize) -> u32 {
        // 16-byte header, zero-length rents still take a byte, 16-byte steps
        let needed = (len.max(1) + 16).next_multiple_of(16);
        let slab = match self.slabs.sentinel {
            Some(slab) if self.used + needed <= self.slab_size => slab,
            _ => {
                self.used = 0;
                self.joined += 1;
                self.joined
            }
        };
        self.used += needed;
        self.slabs.rent_into(slab);
        slab
    }

    fn release(&mut self, slab: u32) {
        if self.slabs.release_from(slab) {
            // a drained sentinel rewinds in place
            self.used = 0;
        }
    }
}
