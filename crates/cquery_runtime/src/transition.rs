//! Transition nodes of the Petri net.
//!
//! A transition is one registered continuous query. Its stream bindings are
//! fixed by analysis at registration; afterwards only the numeric controls
//! (window, stride, heartbeat, cycles) and the run bookkeeping change.

use crate::plan::{Direction, Plan};
use cquery_core::{BasketKey, Timestamp, TransitionId, TransitionKey, TransitionState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of firings a transition may still perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleBudget {
    /// No limit
    #[default]
    Unbounded,
    /// This many firings left; zero disables the transition
    Remaining(u64),
}

impl CycleBudget {
    /// True if another firing is allowed
    #[must_use]
    pub const fn allows_fire(self) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Remaining(n) => n > 0,
        }
    }

    /// Budget after one firing
    #[must_use]
    pub const fn consumed(self) -> Self {
        match self {
            Self::Unbounded => Self::Unbounded,
            Self::Remaining(n) => Self::Remaining(n.saturating_sub(1)),
        }
    }
}

impl std::fmt::Display for CycleBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbounded => f.write_str("unbounded"),
            Self::Remaining(n) => write!(f, "{}", n),
        }
    }
}

/// Binding of a transition to one basket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBinding {
    /// Basket identity
    pub basket: BasketKey,
    /// Column used for occupancy checks
    pub column: String,
    /// Role of the basket
    pub direction: Direction,
    /// Rows required before the transition may fire (IN only)
    pub window: u64,
    /// Rows consumed per firing
    pub stride: u64,
}

impl StreamBinding {
    /// True for a consumed basket
    #[must_use]
    pub fn is_input(&self) -> bool {
        self.direction == Direction::In
    }
}

/// One registered continuous query
pub struct Transition {
    pub(crate) id: TransitionId,
    pub(crate) key: TransitionKey,
    pub(crate) plan: Arc<dyn Plan>,
    pub(crate) bindings: Vec<StreamBinding>,
    pub(crate) state: TransitionState,
    /// Set when a pause arrives while the plan is running
    pub(crate) pause_requested: bool,
    pub(crate) cycles: CycleBudget,
    pub(crate) heartbeat: Option<Duration>,
    pub(crate) last_fired: Option<Instant>,
    pub(crate) seen: Option<Timestamp>,
    pub(crate) error: Option<String>,
    pub(crate) fire_count: u64,
    pub(crate) last_elapsed: Duration,
}

impl Transition {
    /// Create a paused transition with the given, already analysed, bindings
    #[must_use]
    pub fn new(key: TransitionKey, plan: Arc<dyn Plan>, bindings: Vec<StreamBinding>) -> Self {
        Self {
            id: key.id(),
            key,
            plan,
            bindings,
            state: TransitionState::Paused,
            pause_requested: false,
            cycles: CycleBudget::Unbounded,
            heartbeat: None,
            last_fired: None,
            seen: None,
            error: None,
            fire_count: 0,
            last_elapsed: Duration::ZERO,
        }
    }

    /// Stable id
    #[must_use]
    pub const fn id(&self) -> TransitionId {
        self.id
    }

    /// Identity
    #[must_use]
    pub const fn key(&self) -> &TransitionKey {
        &self.key
    }

    /// Compiled plan
    #[must_use]
    pub fn plan(&self) -> &Arc<dyn Plan> {
        &self.plan
    }

    /// All stream bindings
    #[must_use]
    pub fn bindings(&self) -> &[StreamBinding] {
        &self.bindings
    }

    /// Consumed baskets
    pub fn inputs(&self) -> impl Iterator<Item = &StreamBinding> {
        self.bindings.iter().filter(|b| b.is_input())
    }

    /// True if the transition reads at least one basket
    #[must_use]
    pub fn has_input(&self) -> bool {
        self.inputs().next().is_some()
    }

    /// True if something can ever trigger the transition
    #[must_use]
    pub fn has_trigger(&self) -> bool {
        self.heartbeat.is_some() || self.has_input()
    }

    /// Lifecycle state
    #[must_use]
    pub const fn state(&self) -> TransitionState {
        self.state
    }

    /// Remaining firings
    #[must_use]
    pub const fn cycles(&self) -> CycleBudget {
        self.cycles
    }

    /// Heartbeat interval, `None` if unset
    #[must_use]
    pub const fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat
    }

    /// Monotonic time of the last firing
    #[must_use]
    pub const fn last_fired(&self) -> Option<Instant> {
        self.last_fired
    }

    /// Wall clock time of the last firing
    #[must_use]
    pub const fn seen(&self) -> Option<Timestamp> {
        self.seen
    }

    /// Captured error
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of firings so far
    #[must_use]
    pub const fn fire_count(&self) -> u64 {
        self.fire_count
    }

    /// Duration of the last plan run
    #[must_use]
    pub const fn last_elapsed(&self) -> Duration {
        self.last_elapsed
    }

    /// Exclude from evaluation. A running transition finishes its firing first.
    pub(crate) fn pause(&mut self) {
        match self.state {
            TransitionState::Running => self.pause_requested = true,
            _ => self.state = TransitionState::Paused,
        }
    }

    /// Make eligible for evaluation
    pub(crate) fn resume(&mut self) {
        match self.state {
            TransitionState::Paused => self.state = TransitionState::Waiting,
            TransitionState::Running => self.pause_requested = false,
            TransitionState::Waiting | TransitionState::Enabled => {}
        }
    }

    /// Set the heartbeat. Refused (reset to unset) when an input has a window,
    /// since a transition is triggered either by time or by data. Returns the
    /// heartbeat in force afterwards.
    pub(crate) fn set_heartbeat(&mut self, heartbeat: Option<Duration>) -> Option<Duration> {
        let windowed = self.inputs().any(|b| b.window > 0);
        self.heartbeat = if windowed { None } else { heartbeat };
        self.heartbeat
    }

    /// Hand back to evaluation after a firing or a released claim
    pub(crate) fn rearm(&mut self) {
        self.state = if self.pause_requested {
            TransitionState::Paused
        } else {
            TransitionState::Waiting
        };
        self.pause_requested = false;
    }
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("heartbeat", &self.heartbeat)
            .field("bindings", &self.bindings)
            .field("error", &self.error)
            .field("fire_count", &self.fire_count)
            .finish_non_exhaustive()
    }
}
