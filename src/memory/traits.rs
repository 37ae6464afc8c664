/*!
 * Pool Traits
 * Abstractions shared by every pool variant
 */

use super::types::PoolStats;
use crate::core::errors::PoolResult;

/// Statistics provider
pub trait PoolInfo {
    /// Snapshot of the pool's counters
    fn stats(&self) -> PoolStats;

    /// Allocations or slots currently rented
    fn live(&self) -> usize {
        self.stats().live
    }
}

/// Free-slab list management
///
/// These are the only operations that move memory between the free list and
/// the allocator outside normal rent/return traffic. They take `&mut self`,
/// so they cannot race a rent or return on the same pool.
pub trait SlabPool: PoolInfo {
    /// Retired slabs currently held for reuse
    fn free_slabs(&self) -> usize;

    /// Bound on retained slabs
    fn max_free_slabs(&self) -> usize;

    /// Pre-warm the free list so at least `slabs` slabs are ready
    ///
    /// Returns the free-slab count afterwards. Single-slab pools only accept
    /// `slabs <= 1`.
    fn ensure_capacity(&mut self, slabs: usize) -> PoolResult<usize>;

    /// Release retained slabs until at most `retain` remain
    ///
    /// Returns how many slabs went back to the allocator.
    fn trim_excess_to(&mut self, retain: usize) -> usize;

    /// Release every retained slab
    fn trim_excess(&mut self) -> usize {
        self.trim_excess_to(0)
    }
}
