/*!
 * Ring Index Pool
 *
 * Same single-slab shape as `FixedSlotPool`, but free indices live in a
 * circular buffer: rent reads at `head`, return writes at `tail`. The slot
 * that has been free the longest is handed out next, so slot reuse is
 * round-robin rather than most-recently-freed.
 */

use super::bitmap::{self, words_for};
use super::raw::{RawAllocator, SystemAllocator};
use super::slot::{report, single_slab_capacity, RegionLayout};
use super::traits::{PoolInfo, SlabPool};
use super::types::PoolStats;
use crate::core::config::PoolConfig;
use crate::core::errors::{PoolError, PoolResult};
use crate::core::limits::MIN_SLOT_ALIGN;
use std::alloc::Layout;
use std::ptr::NonNull;
use tracing::{debug, warn};

/// FIFO fixed-size slot pool
pub struct RingIndexPool<A: RawAllocator = SystemAllocator> {
    slots: NonNull<u8>,
    ring: NonNull<u32>,
    bits: NonNull<u64>,
    stride: usize,
    capacity: usize,
    head: usize,
    tail: usize,
    count: usize,
    layout: Layout,
    allocator: A,
}

// Safety: the pool exclusively owns its region
unsafe impl<A: RawAllocator> Send for RingIndexPool<A> {}

impl RingIndexPool<SystemAllocator> {
    /// `capacity` slots of `slot_size` bytes, 16-byte aligned
    pub fn new(slot_size: usize, capacity: usize) -> PoolResult<Self> {
        Self::with_allocator(slot_size, MIN_SLOT_ALIGN, capacity, SystemAllocator)
    }

    pub fn with_align(slot_size: usize, align: usize, capacity: usize) -> PoolResult<Self> {
        Self::with_allocator(slot_size, align, capacity, SystemAllocator)
    }

    /// `config.size` is the slot count
    pub fn from_config(slot_size: usize, config: &PoolConfig) -> PoolResult<Self> {
        Self::new(slot_size, config.size)
    }
}

impl<A: RawAllocator> RingIndexPool<A> {
    pub fn with_allocator(slot_size: usize, align: usize, capacity: usize, allocator: A) -> PoolResult<Self> {
        let region = RegionLayout::new(slot_size, align, capacity)?;
        let base = allocator.alloc(region.layout);

        // Safety: offsets come from the region layout we just allocated
        let (ring, bits) = unsafe {
            (
                NonNull::new_unchecked(base.as_ptr().add(region.free_offset) as *mut u32),
                NonNull::new_unchecked(base.as_ptr().add(region.bits_offset) as *mut u64),
            )
        };

        // Safety: the region holds `capacity` u32 entries and the bitmap words;
        // both are written before any slice is formed over them
        unsafe {
            for i in 0..region.capacity {
                ring.as_ptr().add(i).write(i as u32);
            }
            std::ptr::write_bytes(bits.as_ptr(), 0, words_for(region.capacity));
        }

        let pool = Self {
            slots: base,
            ring,
            bits,
            stride: region.stride,
            capacity: region.capacity,
            head: 0,
            tail: 0,
            count: region.capacity,
            layout: region.layout,
            allocator,
        };

        debug!(
            stride = pool.stride,
            capacity = pool.capacity,
            bytes = pool.layout.size(),
            "ring index pool created"
        );
        Ok(pool)
    }

    #[inline]
    fn ring_mut(&mut self) -> &mut [u32] {
        // Safety: region holds `capacity` u32 entries, exclusively ours
        unsafe { std::slice::from_raw_parts_mut(self.ring.as_ptr(), self.capacity) }
    }

    #[inline]
    fn bits_mut(&mut self) -> &mut [u64] {
        // Safety: region holds words_for(capacity) words, exclusively ours
        unsafe { std::slice::from_raw_parts_mut(self.bits.as_ptr(), words_for(self.capacity)) }
    }

    #[inline]
    fn bits(&self) -> &[u64] {
        // Safety: as above
        unsafe { std::slice::from_raw_parts(self.bits.as_ptr(), words_for(self.capacity)) }
    }

    /// Rent the longest-free slot, or `None` when every slot is out
    pub fn rent(&mut self) -> Option<NonNull<u8>> {
        if self.count == 0 {
            return None;
        }
        let head = self.head;
        let index = self.ring_mut()[head] as usize;
        self.head = (head + 1) % self.capacity;
        self.count -= 1;

        let was_clear = bitmap::set(self.bits_mut(), index);
        #[cfg(feature = "debug_checks")]
        assert!(was_clear, "slot {} queued as free is marked rented", index);
        #[cfg(not(feature = "debug_checks"))]
        debug_assert!(was_clear);

        // Safety: index < capacity
        Some(unsafe { NonNull::new_unchecked(self.slots.as_ptr().add(index * self.stride)) })
    }

    /// Queue a slot behind every other free slot
    pub fn release(&mut self, ptr: NonNull<u8>) -> PoolResult<()> {
        let index = self.index_of(ptr).map_err(report)?;
        if !bitmap::clear(self.bits_mut(), index) {
            return Err(report(PoolError::DuplicateReturn { index }));
        }

        let tail = self.tail;
        self.ring_mut()[tail] = index as u32;
        self.tail = (tail + 1) % self.capacity;
        self.count += 1;
        Ok(())
    }

    fn index_of(&self, ptr: NonNull<u8>) -> PoolResult<usize> {
        let address = ptr.as_ptr() as usize;
        let base = self.slots.as_ptr() as usize;
        let offset = address.wrapping_sub(base);

        if address < base || offset >= self.stride * self.capacity || offset % self.stride != 0 {
            return Err(PoolError::ForeignPointer { address });
        }
        Ok(offset / self.stride)
    }

    pub fn is_rented(&self, ptr: NonNull<u8>) -> bool {
        self.index_of(ptr)
            .map(|index| bitmap::test(self.bits(), index))
            .unwrap_or(false)
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.count
    }
}

impl<A: RawAllocator> PoolInfo for RingIndexPool<A> {
    fn stats(&self) -> PoolStats {
        PoolStats {
            unit_size: self.stride,
            slabs: 1,
            free_slabs: 0,
            max_free_slabs: 0,
            live: self.capacity - self.count,
            capacity: self.capacity,
        }
    }
}

impl<A: RawAllocator> SlabPool for RingIndexPool<A> {
    fn free_slabs(&self) -> usize {
        0
    }

    fn max_free_slabs(&self) -> usize {
        0
    }

    fn ensure_capacity(&mut self, slabs: usize) -> PoolResult<usize> {
        single_slab_capacity(slabs)
    }

    fn trim_excess_to(&mut self, _retain: usize) -> usize {
        0
    }
}

impl<A: RawAllocator> Drop for RingIndexPool<A> {
    fn drop(&mut self) {
        let live = self.capacity - self.count;
        if live > 0 {
            warn!(live, "ring index pool dropped with outstanding slots");
        }
        // Safety: the region came from this allocator with this layout
        unsafe { self.allocator.free(self.slots, self.layout) };
    }
}
