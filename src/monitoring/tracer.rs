/*!
 * Tracing Setup
 * Structured logging for pool and lock diagnostics using the tracing crate
 *
 * Library code only emits events; binaries, tests and benches opt in to a
 * subscriber through `init_tracing`.
 */

use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - SLABKIT_TRACE_JSON: Enable JSON output (default: false)
///
/// Returns false if a subscriber was already installed; calling it twice is
/// harmless.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("SLABKIT_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "pool tracing initialized");
    }
    installed
}

/// Timed span around a bulk pool operation (trim, warm-up, drain)
pub struct PoolSpan {
    span: tracing::Span,
    start: Instant,
}

impl PoolSpan {
    pub fn new(pool: &'static str, operation: &'static str) -> Self {
        let span = span!(
            Level::DEBUG,
            "pool_op",
            pool,
            operation,
            slabs = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    /// Record how many slabs the operation moved
    pub fn record_slabs(&self, slabs: usize) {
        self.span.record("slabs", slabs);
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PoolSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);

        if duration.as_millis() > 10 {
            warn!(duration_ms = duration.as_millis() as u64, slow = true, "slow pool operation");
        } else {
            debug!(duration_us = duration.as_micros() as u64, "pool operation completed");
        }
    }
}

/// Helper to create a pool span
#[inline]
pub fn span_pool_op(pool: &'static str, operation: &'static str) -> PoolSpan {
    PoolSpan::new(pool, operation)
}
