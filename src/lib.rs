/*!
 * Slabkit
 * Manually managed slab pools and spin-based synchronization primitives
 *
 * Callers rent memory explicitly and return it explicitly; nothing is
 * reclaimed behind their back. Pools pre-allocate coarse slabs, hand out
 * fine-grained slots, and recycle whole slabs through a bounded free list.
 */

pub mod core;
pub mod memory;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::{PoolError, PoolResult};
pub use crate::core::sync::{AdaptiveSpinWait, ConcurrentFixedBucket, LockFreeStack, TicketGuard, TicketSpinLock};
pub use crate::core::{PoolConfig, SpinConfig};
pub use memory::{
    ArenaSlabPool, BorrowedSlotPool, CountingAllocator, FixedSlot64Pool, FixedSlotPool, PoolInfo, PoolStats,
    RawAllocator, RingIndexPool, SlabId, SlabPool, SlotId, SystemAllocator,
};
pub use monitoring::init_tracing;
