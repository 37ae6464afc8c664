/*!
 * Wait Primitives
 *
 * The adaptive spin-wait backoff shared by every spinning primitive:
 * - Processor-scaled busy-spin for the first iterations
 * - Yield with periodic sleep(0) afterwards
 * - Optional 1ms sleeps past a configurable threshold
 */

mod spinwait;

// Re-export public API
pub use spinwait::{processor_count, step_for, AdaptiveSpinWait, SpinStep};
