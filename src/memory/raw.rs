/*!
 * Raw Allocator Bridge
 *
 * The only place pools touch the platform heap. Every slab a pool owns comes
 * from a `RawAllocator` and goes back to the same one.
 */

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Source of slab memory
///
/// # Safety
///
/// Implementations must return blocks valid for `layout` that stay valid
/// until passed back to `free` with the same layout. Allocation failure must
/// not return: call `std::alloc::handle_alloc_error` or abort.
pub unsafe trait RawAllocator: Send + Sync {
    /// Allocate `layout.size()` bytes (non-zero) aligned to `layout.align()`
    fn alloc(&self, layout: Layout) -> NonNull<u8>;

    /// Allocate zero-filled memory
    fn alloc_zeroed(&self, layout: Layout) -> NonNull<u8>;

    /// Release a block
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc`/`alloc_zeroed` on this allocator with the
    /// same `layout`, and must not be freed twice.
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Pass-through to the global allocator
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

unsafe impl RawAllocator for SystemAllocator {
    #[inline]
    fn alloc(&self, layout: Layout) -> NonNull<u8> {
        debug_assert!(layout.size() > 0);
        // Safety: layout is non-zero sized (pools never request empty slabs)
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout))
    }

    #[inline]
    fn alloc_zeroed(&self, layout: Layout) -> NonNull<u8> {
        debug_assert!(layout.size() > 0);
        // Safety: as above
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout))
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}

#[derive(Debug, Default)]
struct Counters {
    allocs: AtomicUsize,
    frees: AtomicUsize,
    live_bytes: AtomicUsize,
}

/// Allocator wrapper that counts traffic to the inner allocator
///
/// Clones share counters, so a test can keep one handle while a pool owns
/// another.
#[derive(Debug, Clone)]
pub struct CountingAllocator<A: RawAllocator = SystemAllocator> {
    inner: A,
    counters: Arc<Counters>,
}

impl CountingAllocator<SystemAllocator> {
    pub fn new() -> Self {
        Self::wrap(SystemAllocator)
    }
}

impl Default for CountingAllocator<SystemAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: RawAllocator> CountingAllocator<A> {
    pub fn wrap(inner: A) -> Self {
        Self {
            inner,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Total successful allocations (zeroed included)
    pub fn allocs(&self) -> usize {
        self.counters.allocs.load(Ordering::Acquire)
    }

    /// Total frees
    pub fn frees(&self) -> usize {
        self.counters.frees.load(Ordering::Acquire)
    }

    /// Blocks currently held
    pub fn live_blocks(&self) -> usize {
        self.allocs().saturating_sub(self.frees())
    }

    /// Bytes currently held
    pub fn live_bytes(&self) -> usize {
        self.counters.live_bytes.load(Ordering::Acquire)
    }

    fn record_alloc(&self, layout: Layout) {
        self.counters.allocs.fetch_add(1, Ordering::AcqRel);
        self.counters
            .live_bytes
            .fetch_add(layout.size(), Ordering::AcqRel);
    }
}

unsafe impl<A: RawAllocator> RawAllocator for CountingAllocator<A> {
    fn alloc(&self, layout: Layout) -> NonNull<u8> {
        let ptr = self.inner.alloc(layout);
        self.record_alloc(layout);
        ptr
    }

    fn alloc_zeroed(&self, layout: Layout) -> NonNull<u8> {
        let ptr = self.inner.alloc_zeroed(layout);
        self.record_alloc(layout);
        ptr
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        self.inner.free(ptr, layout);
        self.counters.frees.fetch_add(1, Ordering::AcqRel);
        self.counters
            .live_bytes
            .fetch_sub(layout.size(), Ordering::AcqRel);
    }
}
