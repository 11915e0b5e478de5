//! Engine configuration.

use crate::error::{Error, ErrorContext};
use crate::Result;
use std::time::Duration;

/// Configuration for a [`crate::BatchEngine`].
///
/// All fields are fixed after construction; only the accepting flag (driven by
/// `start`/`stop`) changes at runtime.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Messages per batch before a size-triggered flush. `0` disables the size
    /// trigger entirely.
    pub max_batch_size: usize,
    /// Interval between timer-triggered flushes. `Duration::ZERO` disables the
    /// timer. With both triggers disabled, messages accumulate without bound
    /// until the engine is reconfigured.
    pub max_batch_time: Duration,
    /// Capacity, in batches, of the status history ring. Minimum 1.
    pub cache_lifespan: usize,
    /// When false, a message whose key is already queued or batched is declined.
    pub allow_duplicates: bool,
    /// Whether the engine accepts submissions (and arms its timer) immediately.
    pub accepting_at_start: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            max_batch_time: Duration::from_millis(10_000),
            cache_lifespan: 100,
            allow_duplicates: false,
            accepting_at_start: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_max_batch_time(mut self, time: Duration) -> Self {
        self.max_batch_time = time;
        self
    }

    pub fn with_cache_lifespan(mut self, lifespan: usize) -> Self {
        self.cache_lifespan = lifespan;
        self
    }

    pub fn with_allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    pub fn with_accepting_at_start(mut self, accepting: bool) -> Self {
        self.accepting_at_start = accepting;
        self
    }

    /// Validate numeric bounds. Negative values are unrepresentable here; the
    /// one reachable misconfiguration is a zero-capacity history ring.
    pub fn validate(&self) -> Result<()> {
        if self.cache_lifespan < 1 {
            return Err(Error::configuration_with_context(
                "cache_lifespan must be at least 1",
                ErrorContext::new()
                    .with_field_path("cache_lifespan")
                    .with_details(format!("got {}", self.cache_lifespan))
                    .with_source("config_validation"),
            ));
        }
        Ok(())
    }

    /// True when neither the size trigger nor the timer can fire.
    pub fn flush_disabled(&self) -> bool {
        self.max_batch_size == 0 && self.max_batch_time.is_zero()
    }
}
