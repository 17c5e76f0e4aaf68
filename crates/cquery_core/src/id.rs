//! Identifiers for CQUERY entities.
//!
//! Transitions are addressed by their `(module, function)` pair. The
//! [`TransitionId`] is a name-based UUID derived from that pair, so the same
//! continuous query always maps to the same id across re-registrations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for transition ids (UUID v5 over `module.function`)
const TRANSITION_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

/// Identity of a registered continuous query: owning module plus function
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionKey {
    /// Module (schema) owning the procedure
    pub module: String,
    /// Procedure name
    pub function: String,
}

impl TransitionKey {
    /// Create a new key
    #[must_use]
    pub fn new(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
        }
    }

    /// Exact match on both fields
    #[must_use]
    pub fn matches(&self, module: &str, function: &str) -> bool {
        self.module == module && self.function == function
    }

    /// Derive the stable id for this key
    #[must_use]
    pub fn id(&self) -> TransitionId {
        TransitionId::from_key(self)
    }
}

impl std::fmt::Display for TransitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.module, self.function)
    }
}

/// Transition identifier - stable handle for a registered continuous query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionId(Uuid);

impl TransitionId {
    /// Derive from a transition key
    #[must_use]
    pub fn from_key(key: &TransitionKey) -> Self {
        // Length prefix on the module makes the encoding injective
        let mut name = Vec::with_capacity(8 + key.module.len() + key.function.len());
        name.extend_from_slice(&(key.module.len() as u64).to_be_bytes());
        name.extend_from_slice(key.module.as_bytes());
        name.extend_from_slice(key.function.as_bytes());
        Self(Uuid::new_v5(&TRANSITION_NAMESPACE, &name))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cq_{}", self.0)
    }
}

/// Identity of a basket (stream table): schema plus table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BasketKey {
    /// Schema holding the stream table
    pub schema: String,
    /// Stream table name
    pub table: String,
}

impl BasketKey {
    /// Create a new basket key
    #[must_use]
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for BasketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}
