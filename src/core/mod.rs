/*!
 * Core Module
 * Configuration, limits, error handling and synchronization primitives
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod sync;

// Re-export for convenience
pub use config::{PoolConfig, SpinConfig};
pub use errors::*;
