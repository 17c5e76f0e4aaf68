//! Status log entries and live status rows.

use cquery_core::time::duration_micros;
use cquery_core::{Timestamp, TransitionKey, TransitionState};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One firing attempt, appended to the history after every fire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// Wall clock time of the firing
    pub timestamp: Timestamp,
    /// Module of the fired transition
    pub module: String,
    /// Function of the fired transition
    pub function: String,
    /// Time spent in the plan run
    #[serde(with = "duration_micros", rename = "elapsed_us")]
    pub elapsed: Duration,
    /// Error recorded on the transition after this firing
    pub error: Option<String>,
}

impl StatusEntry {
    /// Create an entry without error
    #[must_use]
    pub fn new(timestamp: Timestamp, key: &TransitionKey, elapsed: Duration) -> Self {
        Self {
            timestamp,
            module: key.module.clone(),
            function: key.function.clone(),
            elapsed,
            error: None,
        }
    }

    /// Attach an error
    #[must_use]
    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    /// Error text, empty when the firing left no error
    #[must_use]
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }

    /// True if this entry belongs to the given transition
    #[must_use]
    pub fn is_for(&self, key: &TransitionKey) -> bool {
        key.matches(&self.module, &self.function)
    }
}

/// Live view of one registered transition (not history)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    /// Wall clock time of the last firing, `None` if never fired
    pub seen: Option<Timestamp>,
    /// Module of the transition
    pub module: String,
    /// Function of the transition
    pub function: String,
    /// Current lifecycle state
    pub state: TransitionState,
    /// Captured error
    pub error: Option<String>,
}

impl StatusRow {
    /// Error text, empty when the transition has no error
    #[must_use]
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }

    /// True if this row describes the given transition
    #[must_use]
    pub fn is_for(&self, key: &TransitionKey) -> bool {
        key.matches(&self.module, &self.function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let key = TransitionKey::new("cq", "avg");
        let entry = StatusEntry::new(Timestamp::now(), &key, Duration::from_micros(42));
        assert!(entry.is_for(&key));
        assert_eq!(entry.error_text(), "");
    }

    #[test]
    fn test_entry_with_error() {
        let key = TransitionKey::new("cq", "avg");
        let entry = StatusEntry::new(Timestamp::now(), &key, Duration::ZERO)
            .with_error(Some("boom".to_string()));
        assert_eq!(entry.error_text(), "boom");
    }

    #[test]
    fn test_entry_json_shape() {
        let key = TransitionKey::new("cq", "avg");
        let ts = Timestamp::from_millis(0).unwrap();
        let entry = StatusEntry::new(ts, &key, Duration::from_micros(1500));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["elapsed_us"], 1500);
        assert_eq!(json["module"], "cq");
        assert!(json["error"].is_null());
    }

    #[test]
    fn test_row_error_text() {
        let row = StatusRow {
            seen: None,
            module: "cq".to_string(),
            function: "avg".to_string(),
            state: TransitionState::Paused,
            error: None,
        };
        assert_eq!(row.error_text(), "");
        assert!(row.is_for(&TransitionKey::new("cq", "avg")));
    }
}
