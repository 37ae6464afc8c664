/*!
 * Lock-Based Synchronization Primitives
 *
 * Spin locks built on the adaptive spin-wait:
 * - Ticket lock (strict FIFO, starvation-free)
 */

mod ticket;

// Re-export public API
pub use ticket::{TicketGuard, TicketSpinLock};
