/*!
 * 64-Slot Slab Pool
 *
 * Growable fixed-size slot pool. Slabs hold exactly 64 slots so a slab's
 * occupancy is one `u64`; rent takes the first free bit via trailing-zero
 * count of the complement, O(1) inside a slab.
 *
 * Slab lifecycle mirrors `ArenaSlabPool`: a sentinel slab serves rents, full
 * slabs stay in the ring until they drain, and a drained non-sentinel slab is
 * retired to a bounded free list or released to the allocator. When the
 * sentinel is full the ring is scanned for a slab with room before a new one
 * is acquired.
 *
 * Payloads carry no metadata. Pointer returns find the owning slab through an
 * address-ordered map of slab bases; the `SlotId` handle API skips that lookup.
 */

use super::bitmap::first_free;
use super::raw::{RawAllocator, SystemAllocator};
use super::traits::{PoolInfo, SlabPool};
use super::types::{PoolStats, SlabId, SlotId};
use crate::core::config::PoolConfig;
use crate::core::errors::{PoolError, PoolResult};
use crate::core::limits::{CACHE_LINE_SIZE, MAX_SLABS, MIN_SLOT_ALIGN, MIN_SLOT_SIZE, SLOTS_PER_SLAB};
use crate::monitoring::span_pool_op;
use std::alloc::Layout;
use std::collections::BTreeMap;
use std::ptr::NonNull;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlabState {
    Active,
    Free,
    Vacant,
}

#[derive(Debug)]
struct Slab64 {
    block: Option<NonNull<u8>>,
    bitmap: u64,
    next: SlabId,
    prev: SlabId,
    state: SlabState,
}

impl Slab64 {
    #[inline]
    fn is_full(&self) -> bool {
        self.bitmap == u64::MAX
    }
}

/// Fixed-size slot pool growing in 64-slot slabs
pub struct FixedSlot64Pool<A: RawAllocator = SystemAllocator> {
    allocator: A,
    stride: usize,
    slab_layout: Layout,
    slabs: Vec<Slab64>,
    bases: BTreeMap<usize, SlabId>,
    sentinel: Option<SlabId>,
    active: usize,
    free_head: Option<SlabId>,
    free_count: usize,
    max_free_slabs: usize,
    vacant: Vec<SlabId>,
    live: usize,
}

// Safety: the pool exclusively owns every slab block it points to
unsafe impl<A: RawAllocator> Send for FixedSlot64Pool<A> {}

impl FixedSlot64Pool<SystemAllocator> {
    pub fn new(slot_size: usize, max_free_slabs: usize) -> PoolResult<Self> {
        Self::with_allocator(slot_size, MIN_SLOT_ALIGN, max_free_slabs, SystemAllocator)
    }

    pub fn with_align(slot_size: usize, align: usize, max_free_slabs: usize) -> PoolResult<Self> {
        Self::with_allocator(slot_size, align, max_free_slabs, SystemAllocator)
    }

    /// Slabs are always 64 slots, so only `config.max_free_slabs` is used
    pub fn from_config(slot_size: usize, config: &PoolConfig) -> PoolResult<Self> {
        Self::new(slot_size, config.max_free_slabs)
    }
}

impl<A: RawAllocator> FixedSlot64Pool<A> {
    pub fn with_allocator(slot_size: usize, align: usize, max_free_slabs: usize, allocator: A) -> PoolResult<Self> {
        if !align.is_power_of_two() {
            return Err(PoolError::invalid("align", align as i64, "must be a power of two"));
        }
        let slot_size = if slot_size < MIN_SLOT_SIZE {
            warn!(requested = slot_size, minimum = MIN_SLOT_SIZE, "slot size clamped");
            MIN_SLOT_SIZE
        } else {
            slot_size
        };

        let stride = slot_size
            .checked_next_multiple_of(align)
            .ok_or_else(|| PoolError::invalid("slot_size", slot_size as i64, "overflows when aligned"))?;
        let slab_bytes = stride
            .checked_mul(SLOTS_PER_SLAB)
            .ok_or_else(|| PoolError::invalid("slot_size", slot_size as i64, "slab size overflows"))?;
        let slab_layout = Layout::from_size_align(slab_bytes, align.max(CACHE_LINE_SIZE))
            .map_err(|_| PoolError::invalid("slot_size", slot_size as i64, "slab exceeds isize::MAX"))?;

        debug!(stride, max_free_slabs, "64-slot pool created");

        Ok(Self {
            allocator,
            stride,
            slab_layout,
            slabs: Vec::new(),
            bases: BTreeMap::new(),
            sentinel: None,
            active: 0,
            free_head: None,
            free_count: 0,
            max_free_slabs,
            vacant: Vec::new(),
            live: 0,
        })
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.stride
    }

    /// Slabs linked into the active ring
    #[inline]
    pub fn slabs(&self) -> usize {
        self.active
    }

    /// Rent a slot; `None` only if the slab table is exhausted
    #[inline]
    pub fn try_rent(&mut self) -> Option<NonNull<u8>> {
        self.try_rent_slot().map(|(_, ptr)| ptr)
    }

    /// Rent a slot and its handle
    pub fn try_rent_slot(&mut self) -> Option<(SlotId, NonNull<u8>)> {
        let id = match self.slab_with_room() {
            Some(id) => id,
            None => self.advance()?,
        };

        let slab = &mut self.slabs[id.index()];
        let block = slab.block?;
        let bit = first_free(slab.bitmap)?;
        slab.bitmap |= 1u64 << bit;
        self.live += 1;

        // Safety: bit < 64, so the slot lies inside the slab block
        let ptr = unsafe { NonNull::new_unchecked(block.as_ptr().add(bit as usize * self.stride)) };
        Some((SlotId::new(id, bit), ptr))
    }

    /// Address of a rented slot
    pub fn slot_ptr(&self, slot: SlotId) -> Option<NonNull<u8>> {
        let slab = self.slabs.get(slot.slab().index())?;
        if slab.state != SlabState::Active || slab.bitmap & (1u64 << slot.bit()) == 0 {
            return None;
        }
        let block = slab.block?;
        // Safety: bit < 64
        Some(unsafe { NonNull::new_unchecked(block.as_ptr().add(slot.bit() as usize * self.stride)) })
    }

    /// Return a slot by address
    ///
    /// Only address arithmetic is done on `ptr`; it is never dereferenced.
    pub fn release(&mut self, ptr: NonNull<u8>) -> PoolResult<()> {
        let slot = self.slot_of(ptr).map_err(report)?;
        self.release_slot(slot)
    }

    /// Return a slot by handle
    pub fn release_slot(&mut self, slot: SlotId) -> PoolResult<()> {
        let id = slot.slab();
        let mask = 1u64 << slot.bit();

        let slab = match self.slabs.get_mut(id.index()) {
            Some(slab) if slab.state != SlabState::Vacant => slab,
            _ => {
                return Err(report(PoolError::IndexOutOfRange {
                    index: slot.raw() as usize,
                    capacity: self.slabs.len() * SLOTS_PER_SLAB,
                }))
            }
        };

        // A retired slab has no rented slots left
        if slab.state == SlabState::Free || slab.bitmap & mask == 0 {
            return Err(report(PoolError::DuplicateReturn {
                index: slot.raw() as usize,
            }));
        }

        slab.bitmap &= !mask;
        let drained = slab.bitmap == 0;
        self.live -= 1;

        if drained && self.sentinel != Some(id) {
            self.retire(id);
        }
        Ok(())
    }

    /// True if `ptr` is a currently rented slot of this pool
    pub fn is_rented(&self, ptr: NonNull<u8>) -> bool {
        self.slot_of(ptr)
            .map(|slot| self.slot_ptr(slot).is_some())
            .unwrap_or(false)
    }

    fn slot_of(&self, ptr: NonNull<u8>) -> PoolResult<SlotId> {
        let address = ptr.as_ptr() as usize;
        let (&base, &id) = self
            .bases
            .range(..=address)
            .next_back()
            .ok_or(PoolError::ForeignPointer { address })?;

        let offset = address - base;
        if offset >= self.slab_layout.size() || offset % self.stride != 0 {
            return Err(PoolError::ForeignPointer { address });
        }
        Ok(SlotId::new(id, (offset / self.stride) as u32))
    }

    /// Sentinel if it has room, else the first ring slab that does
    fn slab_with_room(&mut self) -> Option<SlabId> {
        let start = self.sentinel?;
        let mut id = start;
        loop {
            if !self.slabs[id.index()].is_full() {
                self.sentinel = Some(id);
                return Some(id);
            }
            id = self.slabs[id.index()].next;
            if id == start {
                return None;
            }
        }
    }

    fn advance(&mut self) -> Option<SlabId> {
        let id = self.acquire()?;

        match self.sentinel {
            Some(current) => {
                let prev = self.slabs[current.index()].prev;
                self.slabs[id.index()].next = current;
                self.slabs[id.index()].prev = prev;
                self.slabs[prev.index()].next = id;
                self.slabs[current.index()].prev = id;
            }
            None => {
                let slab = &mut self.slabs[id.index()];
                slab.next = id;
                slab.prev = id;
            }
        }

        let slab = &mut self.slabs[id.index()];
        slab.state = SlabState::Active;
        slab.bitmap = 0;
        self.active += 1;
        self.sentinel = Some(id);
        Some(id)
    }

    fn acquire(&mut self) -> Option<SlabId> {
        if let Some(id) = self.free_head {
            let next = self.slabs[id.index()].next;
            self.free_head = if next == id { None } else { Some(next) };
            self.free_count -= 1;
            return Some(id);
        }
        self.allocate_slab()
    }

    fn allocate_slab(&mut self) -> Option<SlabId> {
        if self.vacant.is_empty() && self.slabs.len() >= MAX_SLABS {
            error!(slabs = self.slabs.len(), "64-slot pool slab table exhausted");
            return None;
        }

        let block = self.allocator.alloc(self.slab_layout);
        let id = match self.vacant.pop() {
            Some(id) => {
                let slab = &mut self.slabs[id.index()];
                slab.block = Some(block);
                slab.state = SlabState::Free;
                id
            }
            None => {
                let id = SlabId::from_index(self.slabs.len());
                self.slabs.push(Slab64 {
                    block: Some(block),
                    bitmap: 0,
                    next: id,
                    prev: id,
                    state: SlabState::Free,
                });
                id
            }
        };
        self.bases.insert(block.as_ptr() as usize, id);

        debug!(slab = %id, bytes = self.slab_layout.size(), "64-slot slab allocated");
        Some(id)
    }

    fn retire(&mut self, id: SlabId) {
        let (prev, next) = {
            let slab = &self.slabs[id.index()];
            (slab.prev, slab.next)
        };
        self.slabs[prev.index()].next = next;
        self.slabs[next.index()].prev = prev;
        self.active -= 1;

        if self.free_count < self.max_free_slabs {
            self.push_free(id);
            debug!(slab = %id, free_slabs = self.free_count, "64-slot slab retired to free list");
        } else {
            self.release_slab(id);
            debug!(slab = %id, "64-slot slab released, free list full");
        }
    }

    fn push_free(&mut self, id: SlabId) {
        let next = self.free_head.unwrap_or(id);
        let slab = &mut self.slabs[id.index()];
        slab.state = SlabState::Free;
        slab.bitmap = 0;
        slab.next = next;
        self.free_head = Some(id);
        self.free_count += 1;
    }

    fn release_slab(&mut self, id: SlabId) {
        let layout = self.slab_layout;
        let slab = &mut self.slabs[id.index()];
        if let Some(block) = slab.block.take() {
            self.bases.remove(&(block.as_ptr() as usize));
            // Safety: block was allocated by this allocator with slab_layout
            unsafe { self.allocator.free(block, layout) };
        }
        slab.state = SlabState::Vacant;
        slab.bitmap = 0;
        self.vacant.push(id);
    }
}

fn report(err: PoolError) -> PoolError {
    error!(error = %err, "64-slot pool protocol violation");
    err
}

impl<A: RawAllocator> PoolInfo for FixedSlot64Pool<A> {
    fn stats(&self) -> PoolStats {
        PoolStats {
            unit_size: self.stride,
            slabs: self.active,
            free_slabs: self.free_count,
            max_free_slabs: self.max_free_slabs,
            live: self.live,
            capacity: self.active * SLOTS_PER_SLAB,
        }
    }

    fn live(&self) -> usize {
        self.live
    }
}

impl<A: RawAllocator> SlabPool for FixedSlot64Pool<A> {
    fn free_slabs(&self) -> usize {
        self.free_count
    }

    fn max_free_slabs(&self) -> usize {
        self.max_free_slabs
    }

    /// Raises `max_free_slabs` to `slabs` if needed so the pre-warmed slabs
    /// are kept
    fn ensure_capacity(&mut self, slabs: usize) -> PoolResult<usize> {
        let span = span_pool_op("slot64", "ensure_capacity");
        let before = self.free_count;
        if slabs > self.max_free_slabs {
            self.max_free_slabs = slabs;
        }
        while self.free_count < slabs {
            let id = self.allocate_slab().ok_or(PoolError::CapacityExceeded {
                requested: slabs,
                capacity: self.free_count,
            })?;
            self.push_free(id);
        }
        span.record_slabs(self.free_count - before);
        Ok(self.free_count)
    }

    fn trim_excess_to(&mut self, retain: usize) -> usize {
        let span = span_pool_op("slot64", "trim_excess");
        let mut released = 0;
        while self.free_count > retain {
            match self.acquire() {
                Some(id) => self.release_slab(id),
                None => break,
            }
            released += 1;
        }
        if released > 0 {
            debug!(released, retained = self.free_count, "64-slot free list trimmed");
        }
        span.record_slabs(released);
        released
    }
}

impl<A: RawAllocator> Drop for FixedSlot64Pool<A> {
    fn drop(&mut self) {
        if self.live > 0 {
            warn!(live = self.live, "64-slot pool dropped with outstanding slots");
        }
        let layout = self.slab_layout;
        for slab in &mut self.slabs {
            if let Some(block) = slab.block.take() {
                // Safety: every block in the table came from this allocator
                unsafe { self.allocator.free(block, layout) };
            }
        }
    }
}
