//! Activation evaluation.
//!
//! Decides, once per scheduler cycle, which waiting transitions fire. A
//! transition is enabled when it has no recorded error, budget left, a
//! trigger (heartbeat or input basket), an elapsed heartbeat, enough rows in
//! every input basket, and none of its baskets already claimed by an earlier
//! transition in the same pass. Enabled transitions are marked
//! [`TransitionState::Enabled`] and returned in table order, which is the
//! order they fire in.
//!
//! The whole pass runs with the transition table locked.

use crate::plan::BasketCatalog;
use crate::table::TransitionTable;
use crate::transition::Transition;
use cquery_core::{BasketKey, TransitionId, TransitionState};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, warn};

/// Outcome of evaluating one transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Fires this cycle
    Enabled,
    /// Captured error blocks firing
    Errored,
    /// Cycle budget is spent
    Exhausted,
    /// Neither heartbeat nor input basket
    NoTrigger,
    /// Heartbeat interval not yet elapsed
    HeartbeatPending,
    /// An input basket holds fewer rows than its window
    WindowUnfilled,
    /// An input basket vanished from the catalog
    MissingBasket,
    /// A basket is claimed by an earlier transition
    Conflict,
}

/// Per-cycle activation predicate
#[derive(Debug, Default)]
pub struct ActivationEvaluator {
    claimed: HashSet<BasketKey>,
}

impl ActivationEvaluator {
    /// Create an evaluator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one evaluation pass over the waiting transitions
    pub fn evaluate(
        &mut self,
        table: &mut TransitionTable,
        catalog: &dyn BasketCatalog,
        now: Instant,
    ) -> Vec<TransitionId> {
        self.claimed.clear();
        let mut enabled = Vec::new();

        for t in table.iter_mut() {
            if t.state() != TransitionState::Waiting {
                continue;
            }
            let verdict = self.judge(t, catalog, now);
            if verdict == Verdict::Enabled {
                t.state = TransitionState::Enabled;
                enabled.push(t.id());
            } else {
                debug!(
                    module = %t.key().module,
                    function = %t.key().function,
                    ?verdict,
                    "not enabled"
                );
            }
        }

        enabled
    }

    /// Baskets claimed by the last pass
    #[must_use]
    pub fn claimed(&self) -> &HashSet<BasketKey> {
        &self.claimed
    }

    fn judge(&mut self, t: &Transition, catalog: &dyn BasketCatalog, now: Instant) -> Verdict {
        if t.error().is_some() {
            return Verdict::Errored;
        }
        if !t.cycles().allows_fire() {
            return Verdict::Exhausted;
        }
        if !t.has_trigger() {
            return Verdict::NoTrigger;
        }

        if let (Some(heartbeat), Some(last)) = (t.heartbeat(), t.last_fired()) {
            if now.saturating_duration_since(last) < heartbeat {
                return Verdict::HeartbeatPending;
            }
        }

        for b in t.inputs() {
            match catalog.row_count(&b.basket) {
                Some(rows) if rows >= b.window => {}
                Some(_) => return Verdict::WindowUnfilled,
                None => {
                    warn!(
                        module = %t.key().module,
                        function = %t.key().function,
                        basket = %b.basket,
                        "basket vanished"
                    );
                    return Verdict::MissingBasket;
                }
            }
        }

        if t.bindings().iter().any(|b| self.claimed.contains(&b.basket)) {
            return Verdict::Conflict;
        }
        self.claimed
            .extend(t.bindings().iter().map(|b| b.basket.clone()));
        Verdict::Enabled
    }
}
