/*!
 * Adaptive Spin-Wait
 *
 * Stateful backoff used by every spinning primitive in the crate. Each call
 * to `spin_once` advances an iteration counter and performs one step:
 *
 * 1. **Spin phase** (count < 10, multi-core only): `1 << count` spin-loop
 *    hints, capped at half the available cores
 * 2. **Yield phase**: `yield_now()`, with a `sleep(0)` every 5th step
 * 3. **Sleep phase** (only with a sleep threshold): 1ms sleep per step once
 *    the count reaches the threshold
 *
 * The counter wraps back to the yield threshold instead of overflowing, so a
 * long-lived waiter stays in the yield/sleep phases.
 */

use crate::core::config::SpinConfig;
use crate::core::limits::{MAX_SPIN_SHIFT, SLEEP1_MILLIS, SPIN_COUNT_LIMIT};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// One backoff step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinStep {
    /// Busy-spin this many `spin_loop` hints
    Spin(u32),
    /// Give up the time slice
    Yield,
    /// Zero-length sleep
    Sleep0,
    /// Sleep for 1ms
    Sleep1,
}

impl SpinStep {
    /// True unless the step keeps the thread on-CPU
    #[inline]
    pub fn is_yielding(self) -> bool {
        !matches!(self, Self::Spin(_))
    }

    fn perform(self) {
        match self {
            Self::Spin(cycles) => {
                for _ in 0..cycles {
                    std::hint::spin_loop();
                }
            }
            // std's sleep returns immediately for a zero duration
            Self::Yield | Self::Sleep0 => thread::yield_now(),
            Self::Sleep1 => thread::sleep(Duration::from_millis(SLEEP1_MILLIS)),
        }
    }
}

/// Available cores, sampled once per process
pub fn processor_count() -> u32 {
    static CORES: OnceLock<u32> = OnceLock::new();
    *CORES.get_or_init(|| {
        thread::available_parallelism()
            .map(|n| n.get().min(u32::MAX as usize) as u32)
            .unwrap_or(1)
    })
}

/// Backoff step for iteration `count` on a machine with `cores` cores
///
/// Pure; `AdaptiveSpinWait` feeds it the live core count.
pub fn step_for(count: u32, config: &SpinConfig, cores: u32) -> SpinStep {
    let single_core = cores <= 1;

    if count >= config.yield_threshold || single_core {
        if let Some(threshold) = config.sleep_threshold {
            if count >= threshold {
                return SpinStep::Sleep1;
            }
        }

        let yields_so_far = if count >= config.yield_threshold {
            count - config.yield_threshold
        } else {
            count
        };
        let period = config.sleep0_every.max(1);
        if yields_so_far % period == period - 1 {
            SpinStep::Sleep0
        } else {
            SpinStep::Yield
        }
    } else {
        let cap = config.max_spin_cycles.unwrap_or((cores / 2).max(1)).max(1);
        let scaled = 1u32 << count.min(MAX_SPIN_SHIFT);
        SpinStep::Spin(scaled.min(cap))
    }
}

/// Adaptive spin-then-yield-then-sleep backoff
///
/// Cheap to construct; create one per wait loop and drop it when the wait
/// ends.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveSpinWait {
    count: u32,
    config: SpinConfig,
    cores: u32,
}

impl Default for AdaptiveSpinWait {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveSpinWait {
    pub fn new() -> Self {
        Self::with_config(SpinConfig::default())
    }

    pub fn with_config(config: SpinConfig) -> Self {
        Self {
            count: 0,
            config,
            cores: processor_count(),
        }
    }

    /// Default policy with a 1ms-sleep threshold
    pub fn with_sleep_threshold(sleep_threshold: Option<u32>) -> Self {
        Self::with_config(SpinConfig {
            sleep_threshold,
            ..SpinConfig::default()
        })
    }

    /// Iterations performed since construction or the last `reset`
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn config(&self) -> &SpinConfig {
        &self.config
    }

    /// Step the next `spin_once` will take
    #[inline]
    pub fn next_step(&self) -> SpinStep {
        step_for(self.count, &self.config, self.cores)
    }

    /// True if the next `spin_once` gives up the CPU instead of busy-spinning
    #[inline]
    pub fn next_spin_will_yield(&self) -> bool {
        self.count >= self.config.yield_threshold || self.cores <= 1
    }

    /// Perform one backoff step
    #[inline]
    pub fn spin_once(&mut self) {
        let step = self.next_step();
        step.perform();
        self.advance();
    }

    /// One step, overriding the configured sleep threshold for this call
    pub fn spin_once_with(&mut self, sleep_threshold: Option<u32>) {
        let config = SpinConfig {
            sleep_threshold,
            ..self.config
        };
        step_for(self.count, &config, self.cores).perform();
        self.advance();
    }

    /// Spin until `condition` holds
    pub fn spin_until(&mut self, mut condition: impl FnMut() -> bool) {
        while !condition() {
            self.spin_once();
        }
    }

    /// Back to the spin phase
    #[inline]
    pub fn reset(&mut self) {
        self.count = 0;
    }

    #[inline]
    fn advance(&mut self) {
        self.count = if self.count >= SPIN_COUNT_LIMIT {
            self.config.yield_threshold
        } else {
            self.count + 1
        };
    }
}
