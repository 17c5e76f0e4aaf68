//! CQUERY Runtime
//!
//! Petri-net scheduler for continuous queries. Registered queries are
//! transitions; the stream tables they read and write are baskets (places).
//! A dedicated scheduler thread repeatedly evaluates which transitions may
//! fire, runs their plans, records each firing in the status log and backs
//! off when idle.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod activation;
pub mod analysis;
pub mod delay;
pub mod engine;
pub mod executor;
pub mod monitor;
pub mod plan;
pub mod table;
pub mod transition;

#[cfg(test)]
pub(crate) mod testing;

pub use activation::{ActivationEvaluator, Verdict};
pub use analysis::analyse;
pub use delay::CycleDelay;
pub use engine::Scheduler;
pub use executor::{Executor, FireOutcome, FireReport};
pub use monitor::SchedulerMetrics;
pub use plan::{
    BasketCatalog, BasketInfo, BasketRef, Compiler, Direction, FiringContext, Plan, PlanError,
};
pub use table::{PlaceRow, Selector, SharedTable, TransitionTable};
pub use transition::{CycleBudget, StreamBinding, Transition};
