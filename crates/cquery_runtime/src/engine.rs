//! Continuous query scheduler.
//!
//! [`Scheduler`] is the administrative face of the runtime. It owns the
//! transition table, the status log and the scheduler thread. The thread is
//! started lazily by the first [`Scheduler::resume`] or
//! [`Scheduler::set_heartbeat`] and exits on [`Scheduler::stop`] or once the
//! table is empty; a later resume starts a fresh one.
//!
//! One scheduler cycle evaluates the waiting transitions, fires the enabled
//! ones in table order (or side by side when parallel firing is on), and
//! sleeps with an adaptive back-off when nothing was enabled.
//!
//! Lock order is control, then table, then log or metrics. Plans run with
//! no scheduler lock held.

use crate::activation::ActivationEvaluator;
use crate::delay::CycleDelay;
use crate::executor::{Executor, FireReport};
use crate::monitor::SchedulerMetrics;
use crate::plan::{BasketCatalog, Compiler};
use crate::table::{PlaceRow, Selector, SharedTable, TransitionTable};
use crate::transition::CycleBudget;
use cquery_core::{
    BasketKey, CoreError, CoreResult, RunState, SchedulerConfig, TransitionId, TransitionKey,
};
use cquery_log::{status_to_json, write_json_lines, StatusEntry, StatusLog, StatusRow};
use std::fmt::Write as _;
use std::io::Write;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

struct Control {
    run_state: RunState,
    delay: CycleDelay,
}

struct Shared {
    config: SchedulerConfig,
    compiler: Arc<dyn Compiler>,
    catalog: Arc<dyn BasketCatalog>,
    table: Arc<SharedTable>,
    log: Arc<Mutex<StatusLog>>,
    metrics: Arc<Mutex<SchedulerMetrics>>,
    executor: Executor,
    control: Mutex<Control>,
    /// Interrupts the idle sleep
    wake: Condvar,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopping(&self) -> bool {
        self.control().run_state == RunState::Stopping
    }
}

/// Petri-net scheduler for continuous queries
pub struct Scheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler. No thread runs until the first resume.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid configuration
    pub fn new(
        config: SchedulerConfig,
        compiler: Arc<dyn Compiler>,
        catalog: Arc<dyn BasketCatalog>,
    ) -> CoreResult<Self> {
        config.validate()?;

        let table = Arc::new(SharedTable::new(TransitionTable::from_config(&config)));
        let log = Arc::new(Mutex::new(StatusLog::new(
            config.log_capacity,
            config.log_overflow,
        )));
        let metrics = Arc::new(Mutex::new(SchedulerMetrics::new()));
        let executor = Executor::new(table.clone(), log.clone(), metrics.clone());
        let control = Control {
            run_state: RunState::Init,
            delay: CycleDelay::from_config(&config),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                compiler,
                catalog,
                table,
                log,
                metrics,
                executor,
                control: Mutex::new(control),
                wake: Condvar::new(),
            }),
            thread: Mutex::new(None),
        })
    }

    /// Configuration in force
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Compile `schema.function` and add it as a paused transition
    ///
    /// # Errors
    ///
    /// Returns a compile error, `AlreadyExists`, `CapacityExceeded` or an
    /// analysis error; nothing is registered on error
    pub fn register(&self, schema: &str, function: &str) -> CoreResult<TransitionId> {
        let key = TransitionKey::new(schema, function);
        if self.shared.table.lock().locate(&key).is_some() {
            return Err(CoreError::AlreadyExists {
                kind: "Continuous query".to_string(),
                id: key.to_string(),
            });
        }

        let plan = self
            .shared
            .compiler
            .compile(schema, function)
            .map_err(|err| CoreError::Compile {
                schema: schema.to_string(),
                function: function.to_string(),
                reason: err.to_string(),
            })?;

        self.shared
            .table
            .lock()
            .register(key, plan, self.shared.catalog.as_ref())
    }

    /// Remove transitions, waiting for in-flight firings of them to finish.
    /// Returns the number removed. Must not be called from a plan.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown single key
    pub fn deregister(&self, selector: &Selector) -> CoreResult<usize> {
        let removed = match selector {
            Selector::One(key) => {
                self.shared.table.deregister(key)?;
                1
            }
            Selector::All => {
                let keys = self.shared.table.lock().keys();
                let mut removed = 0;
                for key in &keys {
                    match self.shared.table.deregister(key) {
                        Ok(_) => removed += 1,
                        Err(CoreError::NotFound { .. }) => {}
                        Err(err) => return Err(err),
                    }
                }
                removed
            }
        };
        self.shared.wake.notify_all();
        Ok(removed)
    }

    /// Make transitions eligible for firing and start the scheduler thread
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown single key, or an internal error if
    /// the thread cannot be spawned
    pub fn resume(&self, selector: &Selector) -> CoreResult<usize> {
        let changed = self.shared.table.lock().set_waiting(selector)?;
        self.ensure_started()?;
        Ok(changed)
    }

    /// Exclude transitions from firing. A transition in the middle of a
    /// firing pauses once it completes.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown single key
    pub fn pause(&self, selector: &Selector) -> CoreResult<usize> {
        self.shared.table.lock().set_paused(selector)
    }

    /// Limit the number of further firings
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown single key
    pub fn set_cycles(&self, selector: &Selector, cycles: CycleBudget) -> CoreResult<usize> {
        let changed = self.shared.table.lock().set_cycles(selector, cycles)?;
        self.shared.wake.notify_all();
        Ok(changed)
    }

    /// Set or clear the heartbeat and start the scheduler thread. Transitions
    /// with a windowed input keep no heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown single key, or an internal error if
    /// the thread cannot be spawned
    pub fn set_heartbeat(
        &self,
        selector: &Selector,
        heartbeat: Option<Duration>,
    ) -> CoreResult<usize> {
        let changed = self.shared.table.lock().set_heartbeat(selector, heartbeat)?;
        self.ensure_started()?;
        Ok(changed)
    }

    /// Set the window of every consumer of `schema.table`
    pub fn set_window(&self, schema: &str, table: &str, size: u64) -> usize {
        let changed = self
            .shared
            .table
            .lock()
            .set_window(&BasketKey::new(schema, table), size);
        self.shared.wake.notify_all();
        changed
    }

    /// Set the stride of every consumer of `schema.table`
    pub fn set_stride(&self, schema: &str, table: &str, size: u64) -> usize {
        self.shared
            .table
            .lock()
            .set_stride(&BasketKey::new(schema, table), size)
    }

    /// Record an error on a transition, blocking it from firing until it is
    /// registered anew
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is not registered
    pub fn set_error(&self, schema: &str, function: &str, message: &str) -> CoreResult<()> {
        self.shared
            .table
            .lock()
            .set_error(&TransitionKey::new(schema, function), message)
    }

    /// Id of a registered transition
    #[must_use]
    pub fn locate(&self, schema: &str, function: &str) -> Option<TransitionId> {
        self.shared
            .table
            .lock()
            .locate(&TransitionKey::new(schema, function))
    }

    /// Live status of every transition
    ///
    /// # Errors
    ///
    /// Returns `Allocation` if the rows cannot be allocated
    pub fn status(&self) -> CoreResult<Vec<StatusRow>> {
        self.shared.table.lock().status()
    }

    /// Firing history, oldest first
    ///
    /// # Errors
    ///
    /// Returns `Allocation` if the copy cannot be allocated
    pub fn log(&self) -> CoreResult<Vec<StatusEntry>> {
        self.shared
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Write the firing history as JSON lines; returns the number written
    ///
    /// # Errors
    ///
    /// Returns error if the history cannot be copied or written
    pub fn export_log<W: Write>(&self, writer: W) -> CoreResult<usize> {
        let entries = self.log()?;
        write_json_lines(writer, &entries)
    }

    /// Live status rows as a JSON array
    ///
    /// # Errors
    ///
    /// Returns `Allocation` if the rows cannot be copied, or a serialization
    /// error
    pub fn export_status(&self) -> CoreResult<String> {
        status_to_json(&self.status()?)
    }

    /// Baskets consumed by registered transitions
    #[must_use]
    pub fn input_places(&self) -> Vec<PlaceRow> {
        self.shared.table.lock().input_places()
    }

    /// Baskets produced by registered transitions
    #[must_use]
    pub fn output_places(&self) -> Vec<PlaceRow> {
        self.shared.table.lock().output_places()
    }

    /// Plan listing of one transition
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is not registered
    pub fn show(&self, schema: &str, function: &str) -> CoreResult<String> {
        let key = TransitionKey::new(schema, function);
        let table = self.shared.table.lock();
        let t = table
            .find(&key)
            .ok_or_else(|| CoreError::transition_not_found(&key))?;
        let mut out = String::new();
        let _ = writeln!(out, "#{} {}", key, t.id());
        for line in t.plan().describe().lines() {
            let _ = writeln!(out, "    {}", line);
        }
        Ok(out)
    }

    /// Diagnostic dump of scheduler and table state
    #[must_use]
    pub fn dump(&self) -> String {
        let control = self.shared.control();
        let mut out = format!(
            "#scheduler state={} delay={}ms\n",
            control.run_state,
            control.delay.current().as_millis()
        );
        let metrics = self.metrics();
        let _ = writeln!(
            out,
            "#metrics cycles={} fires={} failures={} skipped={} success={:.2}",
            metrics.cycles,
            metrics.fires,
            metrics.failures,
            metrics.skipped,
            metrics.success_rate()
        );
        out.push_str(&self.shared.table.lock().dump());
        out
    }

    /// Copy of the scheduler counters
    #[must_use]
    pub fn metrics(&self) -> SchedulerMetrics {
        self.shared
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Scheduler thread state
    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.shared.control().run_state
    }

    /// Stop the scheduler thread and wait for it to exit. The current firing
    /// completes; transitions enabled but not yet fired go back to waiting.
    pub fn stop(&self) {
        {
            let mut control = self.shared.control();
            if control.run_state.is_active() {
                control.run_state = RunState::Stopping;
            }
        }
        self.shared.wake.notify_all();

        let mut slot = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            if handle.thread().id() == thread::current().id() {
                // Called from a plan; the loop exits after this firing
                *slot = Some(handle);
                return;
            }
            let _ = handle.join();
        }
        drop(slot);

        let mut control = self.shared.control();
        if control.run_state != RunState::Init {
            control.run_state = RunState::Init;
            drop(control);
            self.shared.table.release_claims();
        }
    }

    fn ensure_started(&self) -> CoreResult<()> {
        let mut slot = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.control().run_state.is_active() {
            self.shared.wake.notify_all();
            return Ok(());
        }

        if let Some(old) = slot.take() {
            if old.thread().id() == thread::current().id() {
                *slot = Some(old);
                return Ok(());
            }
            let _ = old.join();
        }

        {
            let mut control = self.shared.control();
            control.run_state = RunState::Running;
            control.delay.reset();
        }

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(self.shared.config.thread_name.clone())
            .spawn(move || run_loop(&shared));
        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                info!(thread = %self.shared.config.thread_name, "scheduler started");
                Ok(())
            }
            Err(err) => {
                self.shared.control().run_state = RunState::Init;
                Err(CoreError::Internal {
                    message: format!("failed to spawn scheduler thread: {}", err),
                })
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("run_state", &self.run_state())
            .finish_non_exhaustive()
    }
}

/// Fire the transitions enabled by one cycle and count the plans that ran
fn fire_enabled(shared: &Shared, enabled: &[TransitionId], now: Instant) -> usize {
    if shared.config.parallel_firing && enabled.len() > 1 {
        return thread::scope(|scope| {
            let handles: Vec<_> = enabled
                .iter()
                .map(|&id| {
                    let executor = &shared.executor;
                    scope.spawn(move || executor.fire_report(id, now))
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| handle.join().ok())
                .filter(FireReport::ran)
                .count()
        });
    }

    let mut fired = 0;
    for &id in enabled {
        if shared.is_stopping() {
            break;
        }
        if shared.executor.fire_report(id, now).ran() {
            fired += 1;
        }
    }
    fired
}

fn run_loop(shared: &Shared) {
    let mut evaluator = ActivationEvaluator::new();

    loop {
        {
            let mut control = shared.control();
            if control.run_state == RunState::Stopping {
                control.run_state = RunState::Init;
                break;
            }
        }

        let now = Instant::now();
        let enabled = {
            let mut table = shared.table.lock();
            evaluator.evaluate(&mut table, shared.catalog.as_ref(), now)
        };
        shared
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_cycle(enabled.len());

        let fired = fire_enabled(shared, &enabled, now);
        shared.table.release_claims();

        let mut control = shared.control();
        debug!(
            enabled = enabled.len(),
            fired,
            delay_ms = control.delay.current().as_millis() as u64,
            "cycle"
        );
        if control.run_state == RunState::Stopping {
            control.run_state = RunState::Init;
            break;
        }
        if fired > 0 {
            control.run_state = RunState::Running;
            control.delay.reset();
            continue;
        }
        if shared.table.lock().is_empty() {
            control.run_state = RunState::Init;
            break;
        }

        control.run_state = RunState::Paused;
        let delay = control.delay.current();
        let (mut control, _) = shared
            .wake
            .wait_timeout(control, delay)
            .unwrap_or_else(PoisonError::into_inner);
        control.delay.grow();
    }

    info!("scheduler stopped");
}
