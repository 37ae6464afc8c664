/*!
 * Pool Types
 * Handles and statistics shared by the pool family
 */

use crate::core::limits::SLOTS_PER_SLAB;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a slab in a pool's slab table
///
/// Ring and free-list links are `SlabId`s rather than raw pointers, so a
/// slab can be unlinked or recycled in O(1) without aliasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlabId(pub(crate) u32);

impl SlabId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize);
        Self(index as u32)
    }
}

impl fmt::Display for SlabId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "slab#{}", self.0)
    }
}

/// Handle to one slot of a `FixedSlot64Pool`: slab index × 64 + bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub(crate) u32);

impl SlotId {
    #[inline]
    pub(crate) fn new(slab: SlabId, bit: u32) -> Self {
        debug_assert!((bit as usize) < SLOTS_PER_SLAB);
        Self(slab.0 * SLOTS_PER_SLAB as u32 + bit)
    }

    #[inline]
    pub fn slab(self) -> SlabId {
        SlabId(self.0 / SLOTS_PER_SLAB as u32)
    }

    #[inline]
    pub fn bit(self) -> u32 {
        self.0 % SLOTS_PER_SLAB as u32
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Pool statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Bytes per slot (slot pools) or slab payload bytes (arena pool)
    pub unit_size: usize,
    /// Slabs currently linked into the active ring
    pub slabs: usize,
    /// Retired slabs kept for reuse
    pub free_slabs: usize,
    /// Bound on `free_slabs`
    pub max_free_slabs: usize,
    /// Allocations or slots currently rented
    pub live: usize,
    /// Slots the active slabs can hold (arena pool: payload bytes)
    pub capacity: usize,
}

impl PoolStats {
    /// Fraction of active capacity in use
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.live as f64 / self.capacity as f64
        }
    }
}
