//! Core error types for CQUERY.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Broad failure class, used by callers that only care about the category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad administrative request; nothing changed
    Config,
    /// Stream binding failed during registration; registration rolled back
    Analysis,
    /// A plan run failed; captured on the transition, never thrown
    Execution,
    /// Buffer allocation failed
    Allocation,
    /// Unexpected runtime failure
    Internal,
}

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Already exists
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: String, id: String },

    /// Not found
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Capacity exceeded
    #[error("Capacity exceeded for {resource}: {limit}")]
    CapacityExceeded { resource: String, limit: u64 },

    /// Validation error
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// The compiler collaborator refused the procedure
    #[error("Could not compile {schema}.{function}: {reason}")]
    Compile {
        schema: String,
        function: String,
        reason: String,
    },

    /// Stream binding analysis failed
    #[error("Analysis of {transition} failed: {reason}")]
    Analysis { transition: String, reason: String },

    /// Plan execution failed
    #[error("Query {transition} failed: {message}")]
    Execution { transition: String, message: String },

    /// Allocation failure
    #[error("Allocation failed for {resource}")]
    Allocation { resource: String },

    /// Internal error (for unexpected errors)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl CoreError {
    /// Shorthand for an unknown transition
    #[must_use]
    pub fn transition_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind: "Continuous query".to_string(),
            id: id.to_string(),
        }
    }

    /// Failure class of this error
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyExists { .. }
            | Self::NotFound { .. }
            | Self::CapacityExceeded { .. }
            | Self::Validation { .. }
            | Self::Compile { .. } => ErrorClass::Config,
            Self::Analysis { .. } => ErrorClass::Analysis,
            Self::Execution { .. } => ErrorClass::Execution,
            Self::Allocation { .. } => ErrorClass::Allocation,
            Self::Internal { .. } => ErrorClass::Internal,
        }
    }
}

impl From<std::collections::TryReserveError> for CoreError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::Allocation {
            resource: "buffer".to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation {
            field: "json".to_string(),
            reason: err.to_string(),
        }
    }
}
