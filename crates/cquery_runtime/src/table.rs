//! Transition table.
//!
//! Bounded registry of transitions keyed by [`TransitionId`], kept in
//! registration order. Evaluation walks the table in that order, so removal
//! shifts later entries down instead of swapping.
//!
//! [`SharedTable`] wraps the table in the scheduler-wide lock together with
//! the condition variable that deregistration waits on while a transition is
//! running.

use crate::analysis::analyse;
use crate::plan::{BasketCatalog, Plan};
use crate::transition::{CycleBudget, StreamBinding, Transition};
use cquery_core::{
    BasketKey, CoreError, CoreResult, SchedulerConfig, TransitionId, TransitionKey,
    TransitionState,
};
use cquery_log::StatusRow;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// Addresses the transitions an administrative call applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Every registered transition
    All,
    /// A single transition; `NotFound` if absent
    One(TransitionKey),
}

impl Selector {
    /// Select `module.function`
    #[must_use]
    pub fn one(module: &str, function: &str) -> Self {
        Self::One(TransitionKey::new(module, function))
    }
}

impl From<TransitionKey> for Selector {
    fn from(key: TransitionKey) -> Self {
        Self::One(key)
    }
}

/// One row of the input or output place listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceRow {
    /// Basket schema
    pub schema: String,
    /// Basket table
    pub table: String,
    /// Transition module
    pub module: String,
    /// Transition function
    pub function: String,
}

/// Registry of transitions
#[derive(Debug)]
pub struct TransitionTable {
    entries: IndexMap<TransitionId, Transition>,
    capacity: usize,
    max_streams: usize,
}

impl TransitionTable {
    /// Create an empty table
    #[must_use]
    pub fn new(capacity: usize, max_streams: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity,
            max_streams,
        }
    }

    /// Create an empty table sized by the configuration
    #[must_use]
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.capacity, config.max_streams)
    }

    /// Analyse and insert a compiled plan. The new transition starts paused.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists`, `CapacityExceeded` or an analysis error; the
    /// table is unchanged in every error case
    pub fn register(
        &mut self,
        key: TransitionKey,
        plan: Arc<dyn Plan>,
        catalog: &dyn BasketCatalog,
    ) -> CoreResult<TransitionId> {
        if self.locate(&key).is_some() {
            return Err(CoreError::AlreadyExists {
                kind: "Continuous query".to_string(),
                id: key.to_string(),
            });
        }
        if self.entries.len() >= self.capacity {
            return Err(CoreError::CapacityExceeded {
                resource: "transition table".to_string(),
                limit: self.capacity as u64,
            });
        }

        let bindings = analyse(&key, plan.as_ref(), catalog, self.max_streams)?;
        let transition = Transition::new(key, plan, bindings);
        let id = transition.id();
        if let Some(existing) = self.entries.get(&id) {
            return Err(CoreError::Internal {
                message: format!(
                    "transition id {} of {} already held by {}",
                    id,
                    transition.key(),
                    existing.key()
                ),
            });
        }
        info!(
            module = %transition.key().module,
            function = %transition.key().function,
            streams = transition.bindings().len(),
            "registered continuous query"
        );
        self.entries.insert(id, transition);
        Ok(id)
    }

    /// Remove a transition, keeping the others in order
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is not registered
    pub fn remove(&mut self, key: &TransitionKey) -> CoreResult<Transition> {
        let id = self
            .locate(key)
            .ok_or_else(|| CoreError::transition_not_found(key))?;
        self.entries
            .shift_remove(&id)
            .ok_or_else(|| CoreError::transition_not_found(key))
    }

    /// Id of a registered transition, matching module and function exactly
    #[must_use]
    pub fn locate(&self, key: &TransitionKey) -> Option<TransitionId> {
        let id = key.id();
        self.entries
            .get(&id)
            .filter(|t| t.key() == key)
            .map(Transition::id)
    }

    /// Transition by key
    #[must_use]
    pub fn find(&self, key: &TransitionKey) -> Option<&Transition> {
        self.locate(key).and_then(|id| self.entries.get(&id))
    }

    /// Transition by id
    #[must_use]
    pub fn get(&self, id: &TransitionId) -> Option<&Transition> {
        self.entries.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &TransitionId) -> Option<&mut Transition> {
        self.entries.get_mut(id)
    }

    /// Transitions in table order
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.entries.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Transition> {
        self.entries.values_mut()
    }

    /// Keys in table order
    #[must_use]
    pub fn keys(&self) -> Vec<TransitionKey> {
        self.entries.values().map(|t| t.key().clone()).collect()
    }

    /// Number of transitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of transitions
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Apply `f` to the selected transitions, returning how many were touched
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if a single selected key is not registered
    pub fn apply(
        &mut self,
        selector: &Selector,
        mut f: impl FnMut(&mut Transition),
    ) -> CoreResult<usize> {
        match selector {
            Selector::All => {
                self.entries.values_mut().for_each(&mut f);
                Ok(self.entries.len())
            }
            Selector::One(key) => {
                let id = self
                    .locate(key)
                    .ok_or_else(|| CoreError::transition_not_found(key))?;
                if let Some(t) = self.entries.get_mut(&id) {
                    f(t);
                }
                Ok(1)
            }
        }
    }

    /// Exclude the selected transitions from evaluation
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown single key
    pub fn set_paused(&mut self, selector: &Selector) -> CoreResult<usize> {
        self.apply(selector, Transition::pause)
    }

    /// Make the selected transitions eligible for evaluation
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown single key
    pub fn set_waiting(&mut self, selector: &Selector) -> CoreResult<usize> {
        self.apply(selector, Transition::resume)
    }

    /// Set the firing budget
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown single key
    pub fn set_cycles(&mut self, selector: &Selector, cycles: CycleBudget) -> CoreResult<usize> {
        self.apply(selector, |t| t.cycles = cycles)
    }

    /// Set the heartbeat. Transitions with a windowed input keep no heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown single key
    pub fn set_heartbeat(
        &mut self,
        selector: &Selector,
        heartbeat: Option<Duration>,
    ) -> CoreResult<usize> {
        self.apply(selector, |t| {
            if t.set_heartbeat(heartbeat) != heartbeat {
                warn!(
                    module = %t.key().module,
                    function = %t.key().function,
                    "heartbeat disabled for windowed stream"
                );
            }
        })
    }

    /// Set the window of every input binding on `basket`; returns the number
    /// of bindings changed
    pub fn set_window(&mut self, basket: &BasketKey, window: u64) -> usize {
        self.update_inputs(basket, |b| b.window = window)
    }

    /// Set the stride of every input binding on `basket`
    pub fn set_stride(&mut self, basket: &BasketKey, stride: u64) -> usize {
        self.update_inputs(basket, |b| b.stride = stride)
    }

    fn update_inputs(
        &mut self,
        basket: &BasketKey,
        mut f: impl FnMut(&mut StreamBinding),
    ) -> usize {
        let mut changed = 0;
        for t in self.entries.values_mut() {
            for b in t.bindings.iter_mut() {
                if b.is_input() && &b.basket == basket {
                    f(b);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Record an error on a transition. An erroneous transition never fires.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is not registered
    pub fn set_error(&mut self, key: &TransitionKey, message: impl Into<String>) -> CoreResult<()> {
        let message = message.into();
        self.apply(&Selector::One(key.clone()), |t| t.error = Some(message.clone()))
            .map(|_| ())
    }

    /// Put transitions that were enabled but not fired back to waiting
    pub fn release_claims(&mut self) -> usize {
        let mut released = 0;
        for t in self.entries.values_mut() {
            if t.state == TransitionState::Enabled {
                t.rearm();
                released += 1;
            }
        }
        released
    }

    /// Live status, one row per transition
    ///
    /// # Errors
    ///
    /// Returns `Allocation` if the row buffer cannot be reserved
    pub fn status(&self) -> CoreResult<Vec<StatusRow>> {
        let mut rows = Vec::new();
        rows.try_reserve_exact(self.entries.len())
            .map_err(|_| CoreError::Allocation {
                resource: "status rows".to_string(),
            })?;
        rows.extend(self.entries.values().map(|t| StatusRow {
            seen: t.seen(),
            module: t.key().module.clone(),
            function: t.key().function.clone(),
            state: t.state(),
            error: t.error.clone(),
        }));
        Ok(rows)
    }

    /// Baskets consumed, as `(schema, table, module, function)`
    #[must_use]
    pub fn input_places(&self) -> Vec<PlaceRow> {
        self.places(true)
    }

    /// Baskets produced
    #[must_use]
    pub fn output_places(&self) -> Vec<PlaceRow> {
        self.places(false)
    }

    fn places(&self, inputs: bool) -> Vec<PlaceRow> {
        self.entries
            .values()
            .flat_map(|t| {
                t.bindings()
                    .iter()
                    .filter(move |b| b.is_input() == inputs)
                    .map(move |b| PlaceRow {
                        schema: b.basket.schema.clone(),
                        table: b.basket.table.clone(),
                        module: t.key().module.clone(),
                        function: t.key().function.clone(),
                    })
            })
            .collect()
    }

    /// Diagnostic listing of every transition and its bindings
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let claimed = self.iter().filter(|t| t.state().is_claimed()).count();
        let _ = writeln!(
            out,
            "#transitions count={} capacity={} claimed={}",
            self.entries.len(),
            self.capacity,
            claimed
        );
        for (i, t) in self.entries.values().enumerate() {
            let _ = writeln!(
                out,
                "[{}] {} {} state={} cycles={} heartbeat={} fired={} last={}us error={}",
                i,
                t.id(),
                t.key(),
                t.state(),
                t.cycles(),
                t.heartbeat()
                    .map_or_else(|| "-".to_string(), |h| format!("{}ms", h.as_millis())),
                t.fire_count(),
                t.last_elapsed().as_micros(),
                t.error().unwrap_or(""),
            );
            for b in t.bindings() {
                let _ = writeln!(
                    out,
                    "    {} {}({}) window={} stride={}",
                    b.direction, b.basket, b.column, b.window, b.stride
                );
            }
        }
        out
    }
}

/// Transition table behind the scheduler lock
#[derive(Debug)]
pub struct SharedTable {
    inner: Mutex<TransitionTable>,
    released: Condvar,
}

impl SharedTable {
    /// Wrap a table
    #[must_use]
    pub fn new(table: TransitionTable) -> Self {
        Self {
            inner: Mutex::new(table),
            released: Condvar::new(),
        }
    }

    /// Lock the table. Every critical section leaves the table consistent,
    /// so a poisoned lock is taken over as is.
    pub fn lock(&self) -> MutexGuard<'_, TransitionTable> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove a transition, waiting first for an in-flight firing of it to
    /// complete. An enabled but not yet running transition is removed at once
    /// and its firing skipped. Must not be called from the transition's own
    /// plan.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is not registered
    pub fn deregister(&self, key: &TransitionKey) -> CoreResult<Transition> {
        let mut table = self.lock();
        loop {
            let running = match table.find(key) {
                None => return Err(CoreError::transition_not_found(key)),
                Some(t) => t.state() == TransitionState::Running,
            };
            if !running {
                break;
            }
            table = self
                .released
                .wait(table)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let removed = table.remove(key)?;
        info!(module = %key.module, function = %key.function, "deregistered continuous query");
        Ok(removed)
    }

    /// Wake callers waiting in [`SharedTable::deregister`]
    pub fn notify_released(&self) {
        self.released.notify_all();
    }

    /// Release leftover claims and wake waiters
    pub fn release_claims(&self) -> usize {
        let released = self.lock().release_claims();
        self.notify_released();
        released
    }
}
