//! CQUERY Core Types
//!
//! This crate contains pure types and logic with no I/O: the identities of
//! continuous queries and baskets, timestamps, the error taxonomy and the
//! scheduler configuration.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod id;
pub mod state;
pub mod time;

// Re-exports
pub use config::{LogOverflow, SchedulerConfig};
pub use error::{CoreError, CoreResult, ErrorClass};
pub use id::{BasketKey, TransitionId, TransitionKey};
pub use state::{RunState, TransitionState};
pub use time::Timestamp;
