//! Lifecycle states of transitions and of the scheduler itself.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one transition
///
/// ```text
/// PAUSED ⇄ WAITING ─► ENABLED ─► RUNNING ─► WAITING (or PAUSED if paused mid-fire)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionState {
    /// Excluded from evaluation
    Paused,
    /// Eligible for evaluation
    Waiting,
    /// Selected to fire in the current cycle
    Enabled,
    /// Plan currently executing
    Running,
}

impl TransitionState {
    /// Name shown in status rows
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::Waiting => "waiting",
            Self::Enabled => "enabled",
            Self::Running => "running",
        }
    }

    /// True while the scheduler loop holds a claim on the transition
    #[must_use]
    pub const fn is_claimed(self) -> bool {
        matches!(self, Self::Enabled | Self::Running)
    }
}

impl std::fmt::Display for TransitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Run state of the scheduler loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No scheduler thread
    Init,
    /// Loop alive and firing
    Running,
    /// Loop alive, last cycle found nothing to fire
    Paused,
    /// Stop requested, loop exiting
    Stopping,
}

impl RunState {
    /// Name shown in dumps
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
        }
    }

    /// True while a loop thread exists and has not been asked to stop
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(TransitionState::Waiting.to_string(), "waiting");
        assert_eq!(RunState::Stopping.to_string(), "stopping");
    }

    #[test]
    fn test_claimed_states() {
        assert!(TransitionState::Enabled.is_claimed());
        assert!(TransitionState::Running.is_claimed());
        assert!(!TransitionState::Waiting.is_claimed());
        assert!(!TransitionState::Paused.is_claimed());
    }

    #[test]
    fn test_state_serde_lowercase() {
        let json = serde_json::to_string(&TransitionState::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
    }
}
