/*!
 * Synchronization Primitives
 *
 * Spin-based primitives for pool-backed concurrent structures. Nothing here
 * parks in the OS: every wait is spin, then yield, then (optionally)
 * sleep, driven by `AdaptiveSpinWait`.
 *
 * # Architecture
 *
 * Slab pools are not thread-safe. Concurrent structures stay lock-free only
 * at the linking layer and take a `TicketSpinLock` around every pool call.
 */

pub mod lockfree;
pub mod locks;
pub mod wait;

pub use lockfree::{ConcurrentFixedBucket, LockFreeStack};
pub use locks::{TicketGuard, TicketSpinLock};
pub use wait::{AdaptiveSpinWait, SpinStep};
