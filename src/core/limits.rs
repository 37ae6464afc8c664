/*!
 * Pool and Synchronization Limits
 *
 * Centralized location for every tuning constant used by the pools and the
 * spin-based primitives. Grouped by domain.
 *
 * - Performance-critical constants are marked with [PERF]
 * - Constants that must match the backoff policy bit-for-bit are marked [POLICY]
 */

// =============================================================================
// MEMORY LAYOUT
// =============================================================================

/// Cache line size used for slab alignment and counter padding
/// [PERF] 64 bytes on x86-64, ARM64 and RISC-V
pub const CACHE_LINE_SIZE: usize = 64;

/// Default alignment of every rented slot or arena allocation
pub const MIN_SLOT_ALIGN: usize = 16;

/// Smallest slot size any slot pool hands out
/// Zero-sized requests are clamped up to this
pub const MIN_SLOT_SIZE: usize = 1;

/// Hidden per-allocation header in front of every arena block
/// Holds the owning slab handle; padded to keep payloads 16-byte aligned
pub const NODE_HEADER_SIZE: usize = 16;

/// Minimum arena slab payload (one header plus one aligned word)
pub const MIN_SLAB_SIZE: usize = NODE_HEADER_SIZE + MIN_SLOT_ALIGN;

/// Default arena slab payload (64KB)
pub const DEFAULT_SLAB_SIZE: usize = 64 * 1024;

/// Slots per FixedSlot64Pool slab, one bit each in a `u64` bitmap
pub const SLOTS_PER_SLAB: usize = 64;

/// Minimum slot count of a single-slab pool
pub const MIN_SLOT_CAPACITY: usize = 1;

/// Default bound on retained-but-unused slabs
pub const DEFAULT_MAX_FREE_SLABS: usize = 4;

/// Largest slab table a pool will address (`SlabId` is a `u32`)
pub const MAX_SLABS: usize = u32::MAX as usize / SLOTS_PER_SLAB;

// =============================================================================
// SPIN-WAIT POLICY
// =============================================================================

/// Iteration at which spinning stops and the waiter starts yielding
/// [POLICY]
pub const YIELD_THRESHOLD: u32 = 10;

/// In the yield phase, every Nth step is a `sleep(0)` instead of a yield
/// [POLICY]
pub const SLEEP0_EVERY_HOW_MANY_TIMES: u32 = 5;

/// Saturation point of the spin counter; it wraps back to `YIELD_THRESHOLD`
/// [POLICY]
pub const SPIN_COUNT_LIMIT: u32 = i32::MAX as u32;

/// Busy-spin exponent cap, so `1 << count` never overflows
pub const MAX_SPIN_SHIFT: u32 = 30;

/// Sleep duration once the caller's sleep threshold is crossed
pub const SLEEP1_MILLIS: u64 = 1;

// =============================================================================
// LOCK-FREE STACK
// =============================================================================

/// Upper bound (exclusive) of the randomized pop backoff batch
/// [PERF] Retries batch between 1 and 7 spins once the waiter yields
pub const POP_BACKOFF_MAX_YIELDS: u32 = 8;

/// Default node slabs retained by a stack's backing pool between trims
pub const STACK_NODE_FREE_SLABS: usize = usize::MAX;
