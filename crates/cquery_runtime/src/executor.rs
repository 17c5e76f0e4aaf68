//! Transition executor.
//!
//! Fires one enabled transition: marks it running, releases the table lock
//! for the duration of the plan run, then records the outcome on the
//! transition and appends a [`StatusEntry`] to the status log. A panicking
//! plan is recorded like a failing one, so the transition never stays
//! claimed.

use crate::monitor::SchedulerMetrics;
use crate::plan::{FiringContext, PlanError};
use crate::table::SharedTable;
use cquery_core::{CoreError, Timestamp, TransitionId, TransitionState};
use cquery_log::{Appended, StatusEntry, StatusLog};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What happened to one firing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// Transition was gone or no longer enabled
    Skipped,
    /// Plan ran without error
    Succeeded,
    /// Plan returned an error, now recorded on the transition
    Failed,
}

/// Result of [`Executor::fire_report`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireReport {
    /// Time spent in the plan run
    pub elapsed: Duration,
    /// Outcome
    pub outcome: FireOutcome,
}

impl FireReport {
    const SKIPPED: Self = Self {
        elapsed: Duration::ZERO,
        outcome: FireOutcome::Skipped,
    };

    /// True if the plan actually ran
    #[must_use]
    pub fn ran(&self) -> bool {
        self.outcome != FireOutcome::Skipped
    }
}

/// Runs transition plans
#[derive(Debug, Clone)]
pub struct Executor {
    table: Arc<SharedTable>,
    log: Arc<Mutex<StatusLog>>,
    metrics: Arc<Mutex<SchedulerMetrics>>,
}

impl Executor {
    /// Create an executor over shared scheduler state
    #[must_use]
    pub fn new(
        table: Arc<SharedTable>,
        log: Arc<Mutex<StatusLog>>,
        metrics: Arc<Mutex<SchedulerMetrics>>,
    ) -> Self {
        Self {
            table,
            log,
            metrics,
        }
    }

    /// Fire a transition and return the time spent in its plan. Never fails;
    /// a skipped transition takes zero time.
    pub fn fire(&self, id: TransitionId, now: Instant) -> Duration {
        self.fire_report(id, now).elapsed
    }

    /// Fire a transition and report the outcome. `now` is the time of the
    /// cycle that enabled it; the heartbeat interval counts from there.
    pub fn fire_report(&self, id: TransitionId, now: Instant) -> FireReport {
        let (plan, ctx) = {
            let mut table = self.table.lock();
            let Some(t) = table
                .get_mut(&id)
                .filter(|t| t.state() == TransitionState::Enabled)
            else {
                self.record_skip();
                return FireReport::SKIPPED;
            };
            t.state = TransitionState::Running;
            let ctx = FiringContext {
                key: t.key().clone(),
                bindings: t.bindings().to_vec(),
            };
            (t.plan().clone(), ctx)
        };

        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| plan.run(&ctx)))
            .unwrap_or_else(|payload| Err(PlanError::new(panic_message(payload.as_ref()))));
        let elapsed = started.elapsed();

        let failed = result.is_err();
        {
            let mut table = self.table.lock();
            if let Some(t) = table.get_mut(&id) {
                if let Err(err) = result {
                    let message = CoreError::Execution {
                        transition: ctx.key.to_string(),
                        message: err.to_string(),
                    }
                    .to_string();
                    warn!(
                        module = %ctx.key.module,
                        function = %ctx.key.function,
                        error = %message,
                        "continuous query failed"
                    );
                    t.error = Some(message);
                }
                t.cycles = t.cycles.consumed();
                t.last_fired = Some(now);
                let seen = Timestamp::now();
                t.seen = Some(seen);
                t.fire_count += 1;
                t.last_elapsed = elapsed;
                t.rearm();

                let entry = StatusEntry::new(seen, t.key(), elapsed).with_error(t.error.clone());
                let appended = self
                    .log
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .append(entry);
                match appended {
                    Ok(Appended::Rejected) => {
                        debug!(module = %ctx.key.module, function = %ctx.key.function, "status log full");
                    }
                    Ok(_) => {}
                    Err(err) => t.error = Some(err.to_string()),
                }
            }
        }
        self.table.notify_released();

        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_fire(elapsed, failed);
        debug!(
            module = %ctx.key.module,
            function = %ctx.key.function,
            elapsed_us = elapsed.as_micros() as u64,
            failed,
            "fired"
        );

        FireReport {
            elapsed,
            outcome: if failed {
                FireOutcome::Failed
            } else {
                FireOutcome::Succeeded
            },
        }
    }

    fn record_skip(&self) {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_skip();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    format!("plan panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::ActivationEvaluator;
    use crate::plan::{BasketRef, Plan};
    use crate::table::{Selector, TransitionTable};
    use crate::testing::{MemoryCatalog, ScriptedPlan};
    use crate::transition::CycleBudget;
    use cquery_core::{LogOverflow, TransitionKey};

    struct Fixture {
        table: Arc<SharedTable>,
        log: Arc<Mutex<StatusLog>>,
        executor: Executor,
    }

    fn fixture(log_capacity: usize, overflow: LogOverflow) -> Fixture {
        let table = Arc::new(SharedTable::new(TransitionTable::new(8, 8)));
        let log = Arc::new(Mutex::new(StatusLog::new(log_capacity, overflow)));
        let metrics = Arc::new(Mutex::new(SchedulerMetrics::new()));
        let executor = Executor::new(table.clone(), log.clone(), metrics);
        Fixture {
            table,
            log,
            executor,
        }
    }

    fn add(fx: &Fixture, f: &str, plan: Arc<ScriptedPlan>) -> TransitionId {
        let catalog = MemoryCatalog::new();
        let mut table = fx.table.lock();
        let plan: Arc<dyn Plan> = plan;
        let id = table.register(TransitionKey::new("cq", f), plan, &catalog).unwrap();
        table.get_mut(&id).unwrap().state = TransitionState::Enabled;
        id
    }

    #[test]
    fn test_fire_success() {
        let fx = fixture(16, LogOverflow::DropOldest);
        let plan = Arc::new(ScriptedPlan::new(vec![BasketRef::output("iot", "out")]));
        let id = add(&fx, "ok", plan.clone());
        fx.table
            .lock()
            .set_cycles(&Selector::All, CycleBudget::Remaining(2))
            .unwrap();

        let report = fx.executor.fire_report(id, Instant::now());
        assert_eq!(report.outcome, FireOutcome::Succeeded);
        assert_eq!(plan.runs(), 1);

        let table = fx.table.lock();
        let t = table.get(&id).unwrap();
        assert_eq!(t.state(), TransitionState::Waiting);
        assert_eq!(t.cycles(), CycleBudget::Remaining(1));
        assert_eq!(t.fire_count(), 1);
        assert!(t.last_fired().is_some());
        assert!(t.seen().is_some());

        let log = fx.log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.last().unwrap().function, "ok");
        assert_eq!(log.last().unwrap().error_text(), "");
    }

    #[test]
    fn test_heartbeat_counts_from_cycle_start() {
        let fx = fixture(16, LogOverflow::DropOldest);
        let plan = Arc::new(
            ScriptedPlan::new(vec![BasketRef::output("iot", "ticks")])
                .with_work(Duration::from_millis(80)),
        );
        let id = add(&fx, "tick", plan);
        fx.table
            .lock()
            .set_heartbeat(&Selector::All, Some(Duration::from_millis(100)))
            .unwrap();

        let t0 = Instant::now();
        let report = fx.executor.fire_report(id, t0);
        assert!(report.elapsed >= Duration::from_millis(80));
        assert_eq!(fx.table.lock().get(&id).unwrap().last_fired(), Some(t0));

        let catalog = MemoryCatalog::new();
        let mut eval = ActivationEvaluator::new();
        let mut table = fx.table.lock();
        assert!(eval
            .evaluate(&mut table, &catalog, t0 + Duration::from_millis(99))
            .is_empty());
        assert_eq!(
            eval.evaluate(&mut table, &catalog, t0 + Duration::from_millis(110)),
            vec![id]
        );
    }

    #[test]
    fn test_fire_failure_records_error() {
        let fx = fixture(16, LogOverflow::DropOldest);
        let plan = Arc::new(ScriptedPlan::new(vec![]).failing("division by zero"));
        let id = add(&fx, "bad", plan);

        let report = fx.executor.fire_report(id, Instant::now());
        assert_eq!(report.outcome, FireOutcome::Failed);
        assert!(report.ran());

        let table = fx.table.lock();
        let error = table.get(&id).unwrap().error().unwrap().to_string();
        assert!(error.contains("division by zero"));
        assert!(error.contains("cq.bad"));
        assert_eq!(fx.log.lock().unwrap().last().unwrap().error_text(), error);
    }

    #[test]
    fn test_fire_skips_not_enabled() {
        let fx = fixture(16, LogOverflow::DropOldest);
        let plan = Arc::new(ScriptedPlan::new(vec![]));
        let id = add(&fx, "idle", plan.clone());
        fx.table.lock().get_mut(&id).unwrap().state = TransitionState::Waiting;

        assert_eq!(fx.executor.fire(id, Instant::now()), Duration::ZERO);
        assert_eq!(plan.runs(), 0);
        assert!(fx.log.lock().unwrap().is_empty());

        let gone = TransitionKey::new("cq", "gone").id();
        let report = fx.executor.fire_report(gone, Instant::now());
        assert_eq!(report.outcome, FireOutcome::Skipped);
        assert!(!report.ran());
    }

    #[test]
    fn test_pause_during_fire_takes_effect_after() {
        let fx = fixture(16, LogOverflow::DropOldest);
        let id = add(&fx, "p", Arc::new(ScriptedPlan::new(vec![])));
        {
            let mut table = fx.table.lock();
            table.get_mut(&id).unwrap().state = TransitionState::Running;
            table.set_paused(&Selector::All).unwrap();
            table.get_mut(&id).unwrap().state = TransitionState::Enabled;
        }

        fx.executor.fire(id, Instant::now());
        assert_eq!(
            fx.table.lock().get(&id).unwrap().state(),
            TransitionState::Paused
        );
    }

    #[test]
    fn test_full_log_rejects_without_error() {
        let fx = fixture(1, LogOverflow::RejectNew);
        let first = add(&fx, "first", Arc::new(ScriptedPlan::new(vec![])));
        let second = add(&fx, "second", Arc::new(ScriptedPlan::new(vec![])));

        fx.executor.fire(first, Instant::now());
        fx.executor.fire(second, Instant::now());

        let table = fx.table.lock();
        assert!(table.get(&second).unwrap().error().is_none());
        assert_eq!(table.get(&second).unwrap().fire_count(), 1);
        let log = fx.log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.dropped(), 1);
        assert_eq!(log.last().unwrap().function, "first");
    }

    struct PanicPlan;

    impl Plan for PanicPlan {
        fn baskets(&self) -> Vec<BasketRef> {
            Vec::new()
        }

        fn run(&self, _ctx: &FiringContext) -> Result<(), PlanError> {
            panic!("bad row");
        }
    }

    #[test]
    fn test_panicking_plan_is_captured() {
        let fx = fixture(16, LogOverflow::DropOldest);
        let catalog = MemoryCatalog::new();
        let id = {
            let mut table = fx.table.lock();
            let id = table
                .register(TransitionKey::new("cq", "panic"), Arc::new(PanicPlan), &catalog)
                .unwrap();
            table.get_mut(&id).unwrap().state = TransitionState::Enabled;
            id
        };

        assert_eq!(fx.executor.fire_report(id, Instant::now()).outcome, FireOutcome::Failed);
        let table = fx.table.lock();
        let t = table.get(&id).unwrap();
        assert_eq!(t.state(), TransitionState::Waiting);
        assert!(t.error().unwrap().contains("bad row"));
    }
}
