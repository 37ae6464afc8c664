/*!
 * Fixed Slot Pool
 *
 * One slab of N equal-size slots. Free slots sit on a LIFO index stack, so
 * the most recently returned slot is handed out first (it's likely still in
 * cache). An occupancy bitmap runs alongside purely to reject duplicate and
 * mismatched returns.
 *
 * Slots, index stack and bitmap share a single region:
 *
 * ```text
 * [ slot 0 | slot 1 | ... | slot N-1 ][ u32 free indices × N ][ u64 bitmap ]
 * ```
 *
 * `FixedSlotPool` allocates that region from a `RawAllocator`.
 * `BorrowedSlotPool` carves it from a caller buffer (stack or arena memory)
 * and owns nothing.
 */

use super::bitmap::{self, words_for};
use super::raw::{RawAllocator, SystemAllocator};
use super::traits::{PoolInfo, SlabPool};
use super::types::PoolStats;
use crate::core::config::PoolConfig;
use crate::core::errors::{PoolError, PoolResult};
use crate::core::limits::{CACHE_LINE_SIZE, MIN_SLOT_ALIGN, MIN_SLOT_CAPACITY, MIN_SLOT_SIZE};
use std::alloc::Layout;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use tracing::{debug, error, warn};

/// Region layout for `capacity` slots of `stride` bytes
#[derive(Debug, Clone, Copy)]
pub(super) struct RegionLayout {
    pub(super) layout: Layout,
    pub(super) free_offset: usize,
    pub(super) bits_offset: usize,
    pub(super) stride: usize,
    pub(super) capacity: usize,
}

impl RegionLayout {
    pub(super) fn new(slot_size: usize, align: usize, capacity: usize) -> PoolResult<Self> {
        if !align.is_power_of_two() {
            return Err(PoolError::invalid("align", align as i64, "must be a power of two"));
        }

        let slot_size = if slot_size < MIN_SLOT_SIZE {
            warn!(requested = slot_size, minimum = MIN_SLOT_SIZE, "slot size clamped");
            MIN_SLOT_SIZE
        } else {
            slot_size
        };
        let capacity = PoolConfig::new(capacity, 0).clamped_size(MIN_SLOT_CAPACITY);
        if capacity > u32::MAX as usize {
            return Err(PoolError::invalid(
                "capacity",
                capacity as i64,
                "slot indices are 32-bit",
            ));
        }

        let stride = slot_size
            .checked_next_multiple_of(align)
            .ok_or_else(|| PoolError::invalid("slot_size", slot_size as i64, "overflows when aligned"))?;
        let overflow = |_| PoolError::invalid("capacity", capacity as i64, "region size overflows");

        let slots_bytes = stride
            .checked_mul(capacity)
            .ok_or(PoolError::invalid("capacity", capacity as i64, "region size overflows"))?;
        let slots = Layout::from_size_align(slots_bytes, align.max(CACHE_LINE_SIZE)).map_err(overflow)?;
        let (with_free, free_offset) = slots
            .extend(Layout::array::<u32>(capacity).map_err(overflow)?)
            .map_err(overflow)?;
        let (region, bits_offset) = with_free
            .extend(Layout::array::<u64>(words_for(capacity)).map_err(overflow)?)
            .map_err(overflow)?;

        Ok(Self {
            layout: region.pad_to_align(),
            free_offset,
            bits_offset,
            stride,
            capacity,
        })
    }
}

/// Slot bookkeeping over a region someone else owns
struct SlotTable {
    slots: NonNull<u8>,
    free: NonNull<u32>,
    bits: NonNull<u64>,
    stride: usize,
    capacity: usize,
    top: usize,
}

impl SlotTable {
    /// # Safety
    ///
    /// `base` must point to at least `region.layout.size()` writable bytes
    /// aligned to `region.layout.align()`, valid for the table's lifetime.
    unsafe fn init(base: NonNull<u8>, region: &RegionLayout) -> Self {
        let free = NonNull::new_unchecked(base.as_ptr().add(region.free_offset) as *mut u32);
        let bits = NonNull::new_unchecked(base.as_ptr().add(region.bits_offset) as *mut u64);

        let table = Self {
            slots: base,
            free,
            bits,
            stride: region.stride,
            capacity: region.capacity,
            top: region.capacity,
        };

        // Slot 0 sits on top of the stack so rents walk upward from the base
        let capacity = table.capacity;
        for i in 0..capacity {
            free.as_ptr().add(i).write((capacity - 1 - i) as u32);
        }
        std::ptr::write_bytes(bits.as_ptr(), 0, words_for(capacity));
        table
    }

    #[inline]
    fn free_mut(&mut self) -> &mut [u32] {
        // Safety: region holds `capacity` u32 entries, exclusively ours
        unsafe { std::slice::from_raw_parts_mut(self.free.as_ptr(), self.capacity) }
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

    #[inline]
    fn live(&self) -> usize {
        self.capacity - self.top
    }

    fn try_rent(&mut self) -> Option<NonNull<u8>> {
        if self.top == 0 {
            return None;
        }
        self.top -= 1;
        let top = self.top;
        let index = self.free_mut()[top] as usize;
        let was_clear = bitmap::set(self.bits_mut(), index);

        #[cfg(feature = "debug_checks")]
        assert!(was_clear, "slot {} on the free stack is marked rented", index);
        #[cfg(not(feature = "debug_checks"))]
        debug_assert!(was_clear);

        // Safety: index < capacity, so the slot lies inside the region
        Some(unsafe { NonNull::new_unchecked(self.slots.as_ptr().add(index * self.stride)) })
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

    fn release(&mut self, ptr: NonNull<u8>) -> PoolResult<()> {
        let index = self.index_of(ptr).map_err(report)?;
        if !bitmap::clear(self.bits_mut(), index) {
            return Err(report(PoolError::DuplicateReturn { index }));
        }

        #[cfg(feature = "debug_checks")]
        assert!(self.top < self.capacity, "free stack overflow");

        let top = self.top;
        self.free_mut()[top] = index as u32;
        self.top += 1;
        Ok(())
    }

    fn is_rented(&self, ptr: NonNull<u8>) -> bool {
        self.index_of(ptr)
            .map(|index| bitmap::test(self.bits(), index))
            .unwrap_or(false)
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            unit_size: self.stride,
            slabs: 1,
            free_slabs: 0,
            max_free_slabs: 0,
            live: self.live(),
            capacity: self.capacity,
        }
    }
}

pub(super) fn report(err: PoolError) -> PoolError {
    error!(error = %err, "slot pool protocol violation");
    err
}

/// Single-slab pools have no free list to warm; they accept up to one slab
pub(super) fn single_slab_capacity(slabs: usize) -> PoolResult<usize> {
    if slabs <= 1 {
        Ok(0)
    } else {
        Err(PoolError::CapacityExceeded {
            requested: slabs,
            capacity: 1,
        })
    }
}

/// Fixed-size slot pool over one allocator-backed slab
pub struct FixedSlotPool<A: RawAllocator = SystemAllocator> {
    table: SlotTable,
    layout: Layout,
    allocator: A,
}

// Safety: the pool exclusively owns its region
unsafe impl<A: RawAllocator> Send for FixedSlotPool<A> {}

impl FixedSlotPool<SystemAllocator> {
    /// `capacity` slots of `slot_size` bytes, 16-byte aligned
    pub fn new(slot_size: usize, capacity: usize) -> PoolResult<Self> {
        Self::with_allocator(slot_size, MIN_SLOT_ALIGN, capacity, SystemAllocator)
    }

    /// Slots aligned to `align` (a power of two)
    pub fn with_align(slot_size: usize, align: usize, capacity: usize) -> PoolResult<Self> {
        Self::with_allocator(slot_size, align, capacity, SystemAllocator)
    }

    /// `config.size` is the slot count; `max_free_slabs` is unused
    pub fn from_config(slot_size: usize, config: &PoolConfig) -> PoolResult<Self> {
        Self::new(slot_size, config.size)
    }
}

impl<A: RawAllocator> FixedSlotPool<A> {
    pub fn with_allocator(slot_size: usize, align: usize, capacity: usize, allocator: A) -> PoolResult<Self> {
        let region = RegionLayout::new(slot_size, align, capacity)?;
        let base = allocator.alloc(region.layout);
        // Safety: base was just allocated with region.layout
        let table = unsafe { SlotTable::init(base, &region) };

        debug!(
            stride = region.stride,
            capacity = region.capacity,
            bytes = region.layout.size(),
            "fixed slot pool created"
        );

        Ok(Self {
            table,
            layout: region.layout,
            allocator,
        })
    }

    /// Rent a slot, or `None` when every slot is out
    #[inline]
    pub fn try_rent(&mut self) -> Option<NonNull<u8>> {
        self.table.try_rent()
    }

    /// Return a slot
    ///
    /// Only address arithmetic is done on `ptr`; it is never dereferenced.
    #[inline]
    pub fn release(&mut self, ptr: NonNull<u8>) -> PoolResult<()> {
        self.table.release(ptr)
    }

    /// True if `ptr` is a slot of this pool that is currently rented
    pub fn is_rented(&self, ptr: NonNull<u8>) -> bool {
        self.table.is_rented(ptr)
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.table.stride
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.table.top
    }
}

impl<A: RawAllocator> PoolInfo for FixedSlotPool<A> {
    fn stats(&self) -> PoolStats {
        self.table.stats()
    }

    fn live(&self) -> usize {
        self.table.live()
    }
}

impl<A: RawAllocator> SlabPool for FixedSlotPool<A> {
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

impl<A: RawAllocator> Drop for FixedSlotPool<A> {
    fn drop(&mut self) {
        if self.table.live() > 0 {
            warn!(live = self.table.live(), "fixed slot pool dropped with outstanding slots");
        }
        // Safety: the region came from this allocator with this layout
        unsafe { self.allocator.free(self.table.slots, self.layout) };
    }
}

/// Fixed-size slot pool over a caller-supplied buffer
///
/// Structurally identical to `FixedSlotPool` but allocates nothing and frees
/// nothing; the buffer outlives the pool.
pub struct BorrowedSlotPool<'buf> {
    table: SlotTable,
    _buffer: PhantomData<&'buf mut [MaybeUninit<u8>]>,
}

// Safety: the pool holds the only borrow of its buffer
unsafe impl Send for BorrowedSlotPool<'_> {}

impl<'buf> BorrowedSlotPool<'buf> {
    /// Bytes a buffer needs for `capacity` 16-byte-aligned slots of `slot_size`
    pub fn required_bytes(slot_size: usize, capacity: usize) -> PoolResult<usize> {
        Self::required_bytes_aligned(slot_size, MIN_SLOT_ALIGN, capacity)
    }

    /// Includes worst-case alignment slack, so any buffer of this length works
    pub fn required_bytes_aligned(slot_size: usize, align: usize, capacity: usize) -> PoolResult<usize> {
        let region = RegionLayout::new(slot_size, align, capacity)?;
        region
            .layout
            .size()
            .checked_add(region.layout.align() - 1)
            .ok_or(PoolError::invalid("capacity", capacity as i64, "region size overflows"))
    }

    pub fn new(buffer: &'buf mut [MaybeUninit<u8>], slot_size: usize, capacity: usize) -> PoolResult<Self> {
        Self::with_align(buffer, slot_size, MIN_SLOT_ALIGN, capacity)
    }

    pub fn with_align(
        buffer: &'buf mut [MaybeUninit<u8>],
        slot_size: usize,
        align: usize,
        capacity: usize,
    ) -> PoolResult<Self> {
        let region = RegionLayout::new(slot_size, align, capacity)?;
        let offset = buffer.as_mut_ptr().align_offset(region.layout.align());
        let available = buffer.len().saturating_sub(offset);

        if offset == usize::MAX || available < region.layout.size() {
            return Err(PoolError::CapacityExceeded {
                requested: region.layout.size() + region.layout.align() - 1,
                capacity: buffer.len(),
            });
        }

        // Safety: offset + layout.size() <= buffer.len(), aligned by align_offset,
        // and the buffer is mutably borrowed for 'buf
        let table = unsafe {
            let base = NonNull::new_unchecked(buffer.as_mut_ptr().add(offset) as *mut u8);
            SlotTable::init(base, &region)
        };

        Ok(Self {
            table,
            _buffer: PhantomData,
        })
    }

    #[inline]
    pub fn try_rent(&mut self) -> Option<NonNull<u8>> {
        self.table.try_rent()
    }

    #[inline]
    pub fn release(&mut self, ptr: NonNull<u8>) -> PoolResult<()> {
        self.table.release(ptr)
    }

    pub fn is_rented(&self, ptr: NonNull<u8>) -> bool {
        self.table.is_rented(ptr)
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.table.stride
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.table.top
    }
}

impl PoolInfo for BorrowedSlotPool<'_> {
    fn stats(&self) -> PoolStats {
        self.table.stats()
    }

    fn live(&self) -> usize {
        self.table.live()
    }
}

impl SlabPool for BorrowedSlotPool<'_> {
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
