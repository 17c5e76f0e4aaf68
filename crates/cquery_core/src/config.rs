//! Scheduler configuration.
//!
//! Every tunable of the scheduler lives here, so the cycle-delay policy and
//! the table bounds can be set from a config file instead of constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::time::duration_millis;

/// What the status log does once it holds `log_capacity` entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOverflow {
    /// Evict the oldest entry to make room
    #[default]
    DropOldest,
    /// Keep the existing entries and refuse the new one
    RejectNew,
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of registered transitions
    pub capacity: usize,
    /// Maximum number of distinct baskets one transition may bind
    pub max_streams: usize,
    /// First idle back-off; the sleep returns here after any cycle that fired
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    /// Multiplier applied to the sleep after every idle cycle
    pub delay_growth: f64,
    /// The sleep never exceeds `base_delay * delay_ceiling_factor`
    pub delay_ceiling_factor: u32,
    /// Number of entries kept by the status log
    pub log_capacity: usize,
    /// Status log overflow behaviour
    pub log_overflow: LogOverflow,
    /// Fire the enabled transitions of a cycle on scoped worker threads
    pub parallel_firing: bool,
    /// Name of the scheduler thread
    pub thread_name: String,
}

impl SchedulerConfig {
    /// Default transition capacity
    pub const DEFAULT_CAPACITY: usize = 64;
    /// Default per-transition stream binding limit
    pub const DEFAULT_MAX_STREAMS: usize = 64;
    /// Default status log capacity
    pub const DEFAULT_LOG_CAPACITY: usize = 1 << 16;

    /// Create a config with default values
    #[must_use]
    pub fn new() -> Self {
        Self {
            capacity: Self::DEFAULT_CAPACITY,
            max_streams: Self::DEFAULT_MAX_STREAMS,
            base_delay: Duration::from_millis(200),
            delay_growth: 1.2,
            delay_ceiling_factor: 20,
            log_capacity: Self::DEFAULT_LOG_CAPACITY,
            log_overflow: LogOverflow::DropOldest,
            parallel_firing: false,
            thread_name: "cquery-scheduler".to_string(),
        }
    }

    /// Parse from JSON, filling omitted fields with defaults
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or fails validation
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set transition capacity
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set per-transition stream limit
    #[must_use]
    pub fn with_max_streams(mut self, max_streams: usize) -> Self {
        self.max_streams = max_streams;
        self
    }

    /// Set base cycle delay
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set delay growth and ceiling
    #[must_use]
    pub fn with_delay_growth(mut self, growth: f64, ceiling_factor: u32) -> Self {
        self.delay_growth = growth;
        self.delay_ceiling_factor = ceiling_factor;
        self
    }

    /// Set status log capacity and overflow policy
    #[must_use]
    pub fn with_log(mut self, capacity: usize, overflow: LogOverflow) -> Self {
        self.log_capacity = capacity;
        self.log_overflow = overflow;
        self
    }

    /// Enable/disable parallel firing
    #[must_use]
    pub fn with_parallel_firing(mut self, parallel: bool) -> Self {
        self.parallel_firing = parallel;
        self
    }

    /// Largest sleep between cycles
    #[must_use]
    pub fn delay_ceiling(&self) -> Duration {
        self.base_delay.saturating_mul(self.delay_ceiling_factor)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error naming the first invalid field
    pub fn validate(&self) -> CoreResult<()> {
        if self.capacity == 0 {
            return Err(invalid("capacity", "must be at least 1"));
        }
        if self.max_streams == 0 {
            return Err(invalid("max_streams", "must be at least 1"));
        }
        if self.base_delay.is_zero() {
            return Err(invalid("base_delay", "must be positive"));
        }
        if !self.delay_growth.is_finite() || self.delay_growth < 1.0 {
            return Err(invalid("delay_growth", "must be a finite factor >= 1.0"));
        }
        if self.delay_ceiling_factor == 0 {
            return Err(invalid("delay_ceiling_factor", "must be at least 1"));
        }
        if self.log_capacity == 0 {
            return Err(invalid("log_capacity", "must be at least 1"));
        }
        if self.thread_name.is_empty() {
            return Err(invalid("thread_name", "must not be empty"));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(field: &str, reason: &str) -> CoreError {
    CoreError::Validation {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
