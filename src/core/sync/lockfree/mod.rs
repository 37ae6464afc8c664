/*!
 * Lock-Free Synchronization Primitives
 *
 * CAS-linked structures whose storage comes from the slab pools:
 * - Treiber stack over pooled nodes (node pool behind a ticket lock)
 * - Bounded concurrent index bucket with a recycling mailbox
 */

mod bucket;
mod stack;

// Re-export public API
pub use bucket::ConcurrentFixedBucket;
pub use stack::LockFreeStack;
