/*!
 * Pool and Spin Configuration
 *
 * Runtime configuration for pool sizing and the spin-wait backoff policy.
 * Both structs deserialize with serde and can be overridden from the
 * environment, so a deployment can retune thresholds without rebuilding.
 */

use super::errors::{PoolError, PoolResult};
use super::limits::{DEFAULT_MAX_FREE_SLABS, DEFAULT_SLAB_SIZE, SLEEP0_EVERY_HOW_MANY_TIMES, YIELD_THRESHOLD};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Spin-wait backoff configuration
///
/// The defaults reproduce the adaptive policy exactly: busy-spin below
/// iteration 10, then yield with a `sleep(0)` every 5th step, never sleeping
/// for 1ms unless a `sleep_threshold` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpinConfig {
    /// Iteration at which busy-spinning stops
    pub yield_threshold: u32,
    /// In the yield phase, every Nth step sleeps(0) instead of yielding
    pub sleep0_every: u32,
    /// Iteration count above which a step sleeps 1ms (None = never)
    pub sleep_threshold: Option<u32>,
    /// Busy-spin cap per step (None = half the available cores)
    pub max_spin_cycles: Option<u32>,
}

impl Default for SpinConfig {
    fn default() -> Self {
        Self {
            yield_threshold: YIELD_THRESHOLD,
            sleep0_every: SLEEP0_EVERY_HOW_MANY_TIMES,
            sleep_threshold: None,
            max_spin_cycles: None,
        }
    }
}

impl SpinConfig {
    /// Stay in the spin/yield phases forever (lowest wake latency)
    pub const fn low_latency() -> Self {
        Self {
            yield_threshold: YIELD_THRESHOLD,
            sleep0_every: SLEEP0_EVERY_HOW_MANY_TIMES,
            sleep_threshold: None,
            max_spin_cycles: None,
        }
    }

    /// Start sleeping 1ms after 20 iterations; for oversubscribed hosts
    pub const fn cooperative() -> Self {
        Self {
            yield_threshold: YIELD_THRESHOLD,
            sleep0_every: SLEEP0_EVERY_HOW_MANY_TIMES,
            sleep_threshold: Some(20),
            max_spin_cycles: None,
        }
    }

    /// Reject settings the backoff loop cannot run with
    pub fn validate(&self) -> PoolResult<()> {
        if self.sleep0_every == 0 {
            return Err(PoolError::invalid(
                "sleep0_every",
                0,
                "must be at least 1",
            ));
        }
        if self.max_spin_cycles == Some(0) {
            return Err(PoolError::invalid(
                "max_spin_cycles",
                0,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Sizing parameters shared by every pool variant
///
/// `size` is slots per slab (slot pools) or slab payload bytes (arena pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub size: usize,
    #[serde(default = "default_max_free_slabs")]
    pub max_free_slabs: usize,
}

fn default_max_free_slabs() -> usize {
    DEFAULT_MAX_FREE_SLABS
}

/// 64KB arena slabs, four retained
impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SLAB_SIZE, DEFAULT_MAX_FREE_SLABS)
    }
}

impl PoolConfig {
    pub const fn new(size: usize, max_free_slabs: usize) -> Self {
        Self {
            size,
            max_free_slabs,
        }
    }

    /// Read `<PREFIX>_SIZE` and `<PREFIX>_MAX_FREE_SLABS`, falling back to
    /// `defaults` for unset variables
    ///
    /// Negative or unparsable values are configuration errors.
    pub fn from_env(prefix: &str, defaults: PoolConfig) -> PoolResult<Self> {
        let size = read_env_size(&format!("{}_SIZE", prefix), "size")?.unwrap_or(defaults.size);
        let max_free_slabs = read_env_size(&format!("{}_MAX_FREE_SLABS", prefix), "max_free_slabs")?
            .unwrap_or(defaults.max_free_slabs);

        let config = Self {
            size,
            max_free_slabs,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject sizes no allocation could satisfy
    ///
    /// Zero is accepted; constructors clamp it to their minimum.
    pub fn validate(&self) -> PoolResult<()> {
        if self.size > isize::MAX as usize {
            return Err(PoolError::invalid(
                "size",
                i64::MAX,
                "exceeds isize::MAX",
            ));
        }
        Ok(())
    }

    /// Clamp `size` up to `minimum`, logging when the request was degenerate
    pub(crate) fn clamped_size(&self, minimum: usize) -> usize {
        if self.size < minimum {
            warn!(
                requested = self.size,
                minimum, "pool size below minimum, clamping"
            );
            minimum
        } else {
            self.size
        }
    }
}

fn read_env_size(key: &str, name: &'static str) -> PoolResult<Option<usize>> {
    let raw = match std::env::var(key) {
        Ok(raw) => raw,
        Err(_) => return Ok(None),
    };

    let parsed: i64 = raw
        .trim()
        .parse()
        .map_err(|_| PoolError::invalid(name, 0, "not an integer"))?;

    if parsed < 0 {
        return Err(PoolError::invalid(name, parsed, "must not be negative"));
    }

    usize::try_from(parsed)
        .map(Some)
        .map_err(|_| PoolError::invalid(name, parsed, "does not fit in usize"))
}
