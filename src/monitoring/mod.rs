/*!
 * Monitoring
 * Tracing subscriber setup and pool operation spans
 */

mod tracer;

pub use tracer::{init_tracing, span_pool_op, PoolSpan};
