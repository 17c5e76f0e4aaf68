//! Scheduler metrics.
//!
//! Counters updated by the scheduler loop and the executor. A copy is handed
//! out by [`crate::Scheduler::metrics`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    /// Evaluation cycles run
    pub cycles: u64,
    /// Cycles that enabled nothing
    pub idle_cycles: u64,
    /// Plan runs completed, successful or not
    pub fires: u64,
    /// Plan runs that returned an error
    pub failures: u64,
    /// Enabled transitions that were gone or paused when their turn came
    pub skipped: u64,
    /// Time spent inside plan runs
    pub busy: Duration,
}

impl SchedulerMetrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an evaluation cycle and how many transitions it enabled
    pub fn record_cycle(&mut self, enabled: usize) {
        self.cycles += 1;
        if enabled == 0 {
            self.idle_cycles += 1;
        }
    }

    /// Record a plan run
    pub fn record_fire(&mut self, elapsed: Duration, failed: bool) {
        self.fires += 1;
        self.busy = self.busy.saturating_add(elapsed);
        if failed {
            self.failures += 1;
        }
    }

    /// Record a skipped firing
    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    /// Get success rate (0.0 - 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.fires == 0 {
            return 1.0;
        }
        (self.fires - self.failures) as f64 / self.fires as f64
    }

    /// Average time of one plan run
    #[must_use]
    pub fn mean_elapsed(&self) -> Duration {
        match u32::try_from(self.fires) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.busy / n,
            Err(_) => Duration::from_secs_f64(self.busy.as_secs_f64() / self.fires as f64),
        }
    }

    /// Reset metrics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let m = SchedulerMetrics::new();
        assert_eq!(m.fires, 0);
        assert_eq!(m.success_rate(), 1.0);
        assert_eq!(m.mean_elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_metrics_record() {
        let mut m = SchedulerMetrics::new();
        m.record_cycle(0);
        m.record_cycle(2);
        m.record_fire(Duration::from_millis(10), false);
        m.record_fire(Duration::from_millis(30), true);
        m.record_skip();

        assert_eq!(m.cycles, 2);
        assert_eq!(m.idle_cycles, 1);
        assert_eq!(m.fires, 2);
        assert_eq!(m.failures, 1);
        assert_eq!(m.skipped, 1);
        assert_eq!(m.success_rate(), 0.5);
        assert_eq!(m.mean_elapsed(), Duration::from_millis(20));
    }

    #[test]
    fn test_metrics_reset() {
        let mut m = SchedulerMetrics::new();
        m.record_fire(Duration::from_millis(1), true);
        m.reset();
        assert_eq!(m, SchedulerMetrics::default());
    }

    #[test]
    fn test_metrics_json() {
        let mut m = SchedulerMetrics::new();
        m.record_fire(Duration::from_millis(3), false);
        let json = serde_json::to_string(&m).unwrap();
        let back: SchedulerMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
