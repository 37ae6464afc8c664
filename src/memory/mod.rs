/*!
 * Memory Module
 * Slab and slot pools over a raw allocator
 */

pub mod arena;
pub(crate) mod bitmap;
pub mod raw;
pub mod ring;
pub mod slot;
pub mod slot64;
pub mod traits;
pub mod types;

// Re-export for convenience
pub use arena::ArenaSlabPool;
pub use raw::{CountingAllocator, RawAllocator, SystemAllocator};
pub use ring::RingIndexPool;
pub use slot::{BorrowedSlotPool, FixedSlotPool};
pub use slot64::FixedSlot64Pool;
pub use traits::*;
pub use types::*;
