//! Adaptive cycle delay.
//!
//! The scheduler sleeps between idle cycles. Each idle cycle multiplies the
//! delay by the growth factor up to a ceiling; any cycle that fired a
//! transition resets it to the base delay.

use cquery_core::SchedulerConfig;
use std::time::Duration;

/// Back-off between idle scheduler cycles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleDelay {
    base: Duration,
    growth: f64,
    ceiling: Duration,
    current: Duration,
}

impl CycleDelay {
    /// Create a delay starting at `base`. A growth below 1 is treated as 1
    /// and a ceiling below `base` as `base`.
    #[must_use]
    pub fn new(base: Duration, growth: f64, ceiling: Duration) -> Self {
        let growth = if growth.is_finite() { growth.max(1.0) } else { 1.0 };
        Self {
            base,
            growth,
            ceiling: ceiling.max(base),
            current: base,
        }
    }

    /// Delay policy of a configuration
    #[must_use]
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.base_delay, config.delay_growth, config.delay_ceiling())
    }

    /// Delay to sleep after the next idle cycle
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Base delay
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Upper bound
    #[must_use]
    pub const fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Back off after an idle cycle
    pub fn grow(&mut self) {
        let next = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.growth)
            .unwrap_or(self.ceiling);
        self.current = next.min(self.ceiling);
    }

    /// Return to the base delay after a productive cycle
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

impl Default for CycleDelay {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}
