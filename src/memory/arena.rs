/*!
 * Arena Slab Pool
 *
 * Variable-length allocations packed contiguously into fixed-capacity slabs.
 *
 * # Design
 *
 * One slab is "current" (the sentinel). Rent bump-allocates from it: a hidden
 * node header carrying the owning slab's handle, then the payload. When the
 * sentinel is full a slab is taken from the free list (or the allocator),
 * linked into the ring in front of the sentinel and becomes the new sentinel.
 *
 * Return reads the node header in O(1), decrements the owning slab's live
 * count and, when it hits zero on a non-sentinel slab, unlinks the slab and
 * retires it to the bounded free list. A retired slab that doesn't fit in
 * the free list goes straight back to the allocator.
 *
 * Slab metadata lives in a side table indexed by `SlabId`; ring and free
 * list links are table indices. Each entry carries a generation bumped on
 * retirement, so a header left over from a previous life of the slab is
 * rejected instead of corrupting the live count.
 *
 * Not thread-safe: wrap in a `TicketSpinLock` to share.
 */

use super::raw::{RawAllocator, SystemAllocator};
use super::traits::{PoolInfo, SlabPool};
use super::types::{PoolStats, SlabId};
use crate::core::config::PoolConfig;
use crate::core::errors::{PoolError, PoolResult};
use crate::core::limits::{CACHE_LINE_SIZE, MAX_SLABS, MIN_SLAB_SIZE, MIN_SLOT_ALIGN, NODE_HEADER_SIZE};
use crate::monitoring::span_pool_op;
use std::alloc::Layout;
use std::ptr::NonNull;
use tracing::{debug, error, warn};

const NODE_LIVE: u32 = 0x4c49_5645;
const NODE_FREED: u32 = 0x4652_4545;

/// Hidden header written in front of every allocation
#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct NodeHeader {
    slab: u32,
    generation: u32,
    state: u32,
    _reserved: u32,
}

const _: () = assert!(std::mem::size_of::<NodeHeader>() == NODE_HEADER_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlabState {
    Active,
    Free,
    Vacant,
}

#[derive(Debug)]
struct SlabMeta {
    block: Option<NonNull<u8>>,
    next: SlabId,
    prev: SlabId,
    live: usize,
    used: usize,
    generation: u32,
    state: SlabState,
}

/// Variable-length slab pool
pub struct ArenaSlabPool<A: RawAllocator = SystemAllocator> {
    allocator: A,
    slab_size: usize,
    slab_layout: Layout,
    slabs: Vec<SlabMeta>,
    sentinel: Option<SlabId>,
    active: usize,
    free_head: Option<SlabId>,
    free_count: usize,
    max_free_slabs: usize,
    vacant: Vec<SlabId>,
    live: usize,
}

// Safety: the pool exclusively owns every slab block it points to
unsafe impl<A: RawAllocator> Send for ArenaSlabPool<A> {}

impl ArenaSlabPool<SystemAllocator> {
    /// Create a pool of `slab_size`-byte slabs retaining up to
    /// `max_free_slabs` retired slabs
    pub fn new(slab_size: usize, max_free_slabs: usize) -> PoolResult<Self> {
        Self::with_allocator(slab_size, max_free_slabs, SystemAllocator)
    }

    pub fn from_config(config: &PoolConfig) -> PoolResult<Self> {
        Self::new(config.size, config.max_free_slabs)
    }
}

impl<A: RawAllocator> ArenaSlabPool<A> {
    /// Create a pool drawing slabs from `allocator`
    ///
    /// Slab sizes below `MIN_SLAB_SIZE` are clamped up; sizes are rounded to
    /// the slot alignment.
    pub fn with_allocator(slab_size: usize, max_free_slabs: usize, allocator: A) -> PoolResult<Self> {
        let slab_size = PoolConfig::new(slab_size, max_free_slabs)
            .clamped_size(MIN_SLAB_SIZE)
            .checked_next_multiple_of(MIN_SLOT_ALIGN)
            .ok_or_else(|| PoolError::invalid("slab_size", i64::MAX, "overflows when aligned"))?;

        let slab_layout = Layout::from_size_align(slab_size, CACHE_LINE_SIZE)
            .map_err(|_| PoolError::invalid("slab_size", slab_size as i64, "exceeds isize::MAX"))?;

        debug!(slab_size, max_free_slabs, "arena slab pool created");

        Ok(Self {
            allocator,
            slab_size,
            slab_layout,
            slabs: Vec::new(),
            sentinel: None,
            active: 0,
            free_head: None,
            free_count: 0,
            max_free_slabs,
            vacant: Vec::new(),
            live: 0,
        })
    }

    /// Payload bytes per slab
    #[inline]
    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    /// Largest single request this pool can satisfy
    #[inline]
    pub fn max_allocation(&self) -> usize {
        self.slab_size - NODE_HEADER_SIZE
    }

    /// Slabs linked into the active ring
    #[inline]
    pub fn slabs(&self) -> usize {
        self.active
    }

    /// Rent `length` contiguous bytes, 16-byte aligned
    ///
    /// Fails with `CapacityExceeded` when `length` plus the node header
    /// doesn't fit in one slab, even on an empty pool.
    pub fn rent(&mut self, length: usize) -> PoolResult<NonNull<u8>> {
        // A zero-length block still owns a byte, so its payload pointer never
        // lands on the slab's end
        let needed = length
            .max(1)
            .checked_add(NODE_HEADER_SIZE)
            .and_then(|n| n.checked_next_multiple_of(MIN_SLOT_ALIGN))
            .filter(|&n| n <= self.slab_size)
            .ok_or(PoolError::CapacityExceeded {
                requested: length,
                capacity: self.max_allocation(),
            })?;

        let id = match self.sentinel {
            Some(id) if self.meta(id).used + needed <= self.slab_size => id,
            _ => self.advance()?,
        };

        let meta = &mut self.slabs[id.index()];
        let block = match meta.block {
            Some(block) => block,
            None => unreachable!("active slab without memory"),
        };
        let offset = meta.used;
        meta.used += needed;
        meta.live += 1;
        let generation = meta.generation;
        self.live += 1;

        // Safety: offset + needed <= slab_size, so header and payload lie
        // inside the block; offsets are multiples of 16 so the header is aligned
        unsafe {
            let header = block.as_ptr().add(offset) as *mut NodeHeader;
            header.write(NodeHeader {
                slab: id.0,
                generation,
                state: NODE_LIVE,
                _reserved: 0,
            });
            Ok(NonNull::new_unchecked(block.as_ptr().add(offset + NODE_HEADER_SIZE)))
        }
    }

    /// Return a block rented from this pool
    ///
    /// Duplicate returns and pointers outside this pool's slabs are reported
    /// as protocol violations.
    ///
    /// # Safety
    ///
    /// The 16 bytes in front of `ptr` must be readable and writable: `ptr`
    /// must come from `rent` on an `ArenaSlabPool` whose slab is still
    /// allocated.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) -> PoolResult<()> {
        let address = ptr.as_ptr() as usize;
        let header_ptr = ptr.as_ptr().sub(NODE_HEADER_SIZE) as *mut NodeHeader;
        let header = header_ptr.read();

        let id = SlabId(header.slab);
        let meta = match self.slabs.get(id.index()) {
            Some(meta) => meta,
            None => return Err(self.violation(PoolError::ForeignPointer { address })),
        };

        let base = match (meta.state, meta.block) {
            (SlabState::Active | SlabState::Free, Some(block)) => block.as_ptr() as usize,
            _ => return Err(self.violation(PoolError::ForeignPointer { address })),
        };
        if address < base + NODE_HEADER_SIZE || address >= base + self.slab_size {
            return Err(self.violation(PoolError::ForeignPointer { address }));
        }

        // Retirement bumps the generation, so a header freed in the slab's
        // previous life is one generation behind
        let current = meta.generation == header.generation;
        let retired = meta.generation == header.generation.wrapping_add(1);
        match header.state {
            NODE_LIVE if current && meta.state == SlabState::Active && address <= base + meta.used => {}
            NODE_FREED if current || retired => {
                let index = address - base;
                return Err(self.violation(PoolError::DuplicateReturn { index }));
            }
            _ => return Err(self.violation(PoolError::ForeignPointer { address })),
        }

        (*header_ptr).state = NODE_FREED;
        self.live -= 1;

        let is_sentinel = self.sentinel == Some(id);
        let meta = self.meta_mut(id);
        meta.live -= 1;
        if meta.live == 0 {
            if is_sentinel {
                meta.used = 0;
            } else {
                self.retire(id);
            }
        }
        Ok(())
    }

    fn violation(&self, err: PoolError) -> PoolError {
        error!(error = %err, "arena slab pool protocol violation");
        err
    }

    #[inline]
    fn meta(&self, id: SlabId) -> &SlabMeta {
        &self.slabs[id.index()]
    }

    #[inline]
    fn meta_mut(&mut self, id: SlabId) -> &mut SlabMeta {
        &mut self.slabs[id.index()]
    }

    /// Make a fresh or recycled slab the sentinel
    fn advance(&mut self) -> PoolResult<SlabId> {
        let id = self.acquire()?;

        match self.sentinel {
            Some(current) => {
                let prev = self.meta(current).prev;
                self.meta_mut(id).next = current;
                self.meta_mut(id).prev = prev;
                self.meta_mut(prev).next = id;
                self.meta_mut(current).prev = id;
            }
            None => {
                let meta = self.meta_mut(id);
                meta.next = id;
                meta.prev = id;
            }
        }

        let meta = self.meta_mut(id);
        meta.state = SlabState::Active;
        meta.used = 0;
        meta.live = 0;
        self.active += 1;
        self.sentinel = Some(id);
        Ok(id)
    }

    /// Pop the free list, or allocate a new slab
    fn acquire(&mut self) -> PoolResult<SlabId> {
        if let Some(id) = self.free_head {
            let next = self.meta(id).next;
            self.free_head = if next == id { None } else { Some(next) };
            self.free_count -= 1;
            return Ok(id);
        }
        self.allocate_slab()
    }

    fn allocate_slab(&mut self) -> PoolResult<SlabId> {
        if self.vacant.is_empty() && self.slabs.len() >= MAX_SLABS {
            return Err(PoolError::CapacityExceeded {
                requested: self.slabs.len() + 1,
                capacity: MAX_SLABS,
            });
        }

        let block = self.allocator.alloc(self.slab_layout);
        let id = match self.vacant.pop() {
            Some(id) => {
                let meta = self.meta_mut(id);
                meta.block = Some(block);
                meta.state = SlabState::Free;
                id
            }
            None => {
                let id = SlabId::from_index(self.slabs.len());
                self.slabs.push(SlabMeta {
                    block: Some(block),
                    next: id,
                    prev: id,
                    live: 0,
                    used: 0,
                    generation: 0,
                    state: SlabState::Free,
                });
                id
            }
        };

        debug!(slab = %id, bytes = self.slab_size, "arena slab allocated");
        Ok(id)
    }

    /// Unlink an empty non-sentinel slab from the ring and retire it
    fn retire(&mut self, id: SlabId) {
        let (prev, next) = {
            let meta = self.meta(id);
            (meta.prev, meta.next)
        };
        self.meta_mut(prev).next = next;
        self.meta_mut(next).prev = prev;
        self.active -= 1;

        let meta = self.meta_mut(id);
        meta.generation = meta.generation.wrapping_add(1);
        meta.used = 0;

        if self.free_count < self.max_free_slabs {
            self.push_free(id);
            debug!(slab = %id, free_slabs = self.free_count, "arena slab retired to free list");
        } else {
            self.release_slab(id);
            debug!(slab = %id, "arena slab released, free list full");
        }
    }

    fn push_free(&mut self, id: SlabId) {
        let next = self.free_head.unwrap_or(id);
        let meta = self.meta_mut(id);
        meta.state = SlabState::Free;
        meta.next = next;
        self.free_head = Some(id);
        self.free_count += 1;
    }

    fn release_slab(&mut self, id: SlabId) {
        let layout = self.slab_layout;
        let meta = &mut self.slabs[id.index()];
        if let Some(block) = meta.block.take() {
            // Safety: block was allocated by this allocator with slab_layout
            unsafe { self.allocator.free(block, layout) };
        }
        meta.state = SlabState::Vacant;
        meta.generation = meta.generation.wrapping_add(1);
        self.vacant.push(id);
    }
}

impl<A: RawAllocator> PoolInfo for ArenaSlabPool<A> {
    fn stats(&self) -> PoolStats {
        PoolStats {
            unit_size: self.slab_size,
            slabs: self.active,
            free_slabs: self.free_count,
            max_free_slabs: self.max_free_slabs,
            live: self.live,
            capacity: self.active * self.slab_size,
        }
    }

    fn live(&self) -> usize {
        self.live
    }
}

impl<A: RawAllocator> SlabPool for ArenaSlabPool<A> {
    fn free_slabs(&self) -> usize {
        self.free_count
    }

    fn max_free_slabs(&self) -> usize {
        self.max_free_slabs
    }

    /// Raises `max_free_slabs` to `slabs` if needed so the pre-warmed slabs
    /// are kept
    fn ensure_capacity(&mut self, slabs: usize) -> PoolResult<usize> {
        let span = span_pool_op("arena", "ensure_capacity");
        let before = self.free_count;
        if slabs > self.max_free_slabs {
            self.max_free_slabs = slabs;
        }
        while self.free_count < slabs {
            let id = self.allocate_slab()?;
            self.push_free(id);
        }
        span.record_slabs(self.free_count - before);
        Ok(self.free_count)
    }

    fn trim_excess_to(&mut self, retain: usize) -> usize {
        let span = span_pool_op("arena", "trim_excess");
        let mut released = 0;
        while self.free_count > retain {
            let id = match self.acquire() {
                Ok(id) => id,
                Err(_) => break,
            };
            self.release_slab(id);
            released += 1;
        }
        if released > 0 {
            debug!(released, retained = self.free_count, "arena free list trimmed");
        }
        span.record_slabs(released);
        released
    }
}

impl<A: RawAllocator> Drop for ArenaSlabPool<A> {
    fn drop(&mut self) {
        if self.live > 0 {
            warn!(live = self.live, "arena slab pool dropped with outstanding allocations");
        }
        let layout = self.slab_layout;
        for meta in &mut self.slabs {
            if let Some(block) = meta.block.take() {
                // Safety: every block in the table came from this allocator
                unsafe { self.allocator.free(block, layout) };
            }
        }
    }
}
