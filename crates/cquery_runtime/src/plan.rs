//! Collaborator interfaces.
//!
//! The scheduler does not compile queries, store baskets or execute plans
//! itself. It talks to three collaborators:
//! - [`Compiler`] turns a registered procedure into a [`Plan`];
//! - [`BasketCatalog`] answers basket occupancy and window defaults;
//! - [`Plan`] runs one firing and lists the baskets it touches.
//!
//! Implementations must not call back into the scheduler's administrative
//! API from `compile`, `basket` or `register_basket`: those run while the
//! transition table is locked.

use crate::transition::StreamBinding;
use cquery_core::{BasketKey, TransitionKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Error reported by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PlanError(pub String);

impl PlanError {
    /// Create from any message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for PlanError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PlanError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Role of a basket for one transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Consumed by the transition; subject to the window check
    In,
    /// Produced by the transition
    Out,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::In => f.write_str("in"),
            Self::Out => f.write_str("out"),
        }
    }
}

/// A basket referenced by a compiled plan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BasketRef {
    /// Basket identity
    pub basket: BasketKey,
    /// How the plan uses it
    pub direction: Direction,
}

impl BasketRef {
    /// Basket read by the plan
    #[must_use]
    pub fn input(schema: &str, table: &str) -> Self {
        Self {
            basket: BasketKey::new(schema, table),
            direction: Direction::In,
        }
    }

    /// Basket written by the plan
    #[must_use]
    pub fn output(schema: &str, table: &str) -> Self {
        Self {
            basket: BasketKey::new(schema, table),
            direction: Direction::Out,
        }
    }
}

/// Current configuration and occupancy of a basket
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasketInfo {
    /// Rows currently held
    pub row_count: u64,
    /// Default window for consumers
    pub window: u64,
    /// Default stride for consumers
    pub stride: u64,
    /// Column names, in table order
    pub columns: Vec<String>,
}

/// What a plan sees when it fires
#[derive(Debug, Clone)]
pub struct FiringContext {
    /// Transition being fired
    pub key: TransitionKey,
    /// Its stream bindings, with the window/stride in force for this firing
    pub bindings: Vec<StreamBinding>,
}

/// Executable handle of one continuous query
pub trait Plan: Send + Sync {
    /// Baskets referenced by the plan, in plan order
    fn baskets(&self) -> Vec<BasketRef>;

    /// Execute one firing
    ///
    /// # Errors
    ///
    /// Returns error if the query failed; the scheduler captures it
    fn run(&self, ctx: &FiringContext) -> Result<(), PlanError>;

    /// Human-readable listing of the plan
    fn describe(&self) -> String {
        String::new()
    }
}

/// Turns a registered procedure into a plan
pub trait Compiler: Send + Sync {
    /// Compile `schema.function`
    ///
    /// # Errors
    ///
    /// Returns error if the procedure is unknown or does not compile
    fn compile(&self, schema: &str, function: &str) -> Result<Arc<dyn Plan>, PlanError>;
}

/// Basket storage layer, as seen by the scheduler
pub trait BasketCatalog: Send + Sync {
    /// Look up a basket
    fn basket(&self, key: &BasketKey) -> Option<BasketInfo>;

    /// Create the basket for an existing stream table
    ///
    /// # Errors
    ///
    /// Returns error if the stream table cannot back a basket
    fn register_basket(&self, key: &BasketKey) -> Result<BasketInfo, PlanError>;

    /// Rows currently held, `None` if the basket is unknown
    fn row_count(&self, key: &BasketKey) -> Option<u64> {
        self.basket(key).map(|info| info.row_count)
    }
}
