//! Bounded, append-only firing history.
//!
//! The log keeps at most `capacity` entries. What happens to the next entry
//! once it is full is decided by [`LogOverflow`]: evict the oldest, or reject
//! the newcomer. Either way the number of lost entries is counted.

use crate::entry::StatusEntry;
use cquery_core::{CoreError, CoreResult, LogOverflow};
use std::collections::VecDeque;

/// Outcome of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// Stored, nothing lost
    Stored,
    /// Stored after evicting the oldest entry
    Evicted,
    /// Not stored, log full
    Rejected,
}

/// Bounded firing history
#[derive(Debug, Clone)]
pub struct StatusLog {
    entries: VecDeque<StatusEntry>,
    capacity: usize,
    overflow: LogOverflow,
    appended: u64,
    dropped: u64,
}

impl StatusLog {
    /// Create an empty log. Storage is reserved on demand.
    #[must_use]
    pub fn new(capacity: usize, overflow: LogOverflow) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            overflow,
            appended: 0,
            dropped: 0,
        }
    }

    /// Append an entry
    ///
    /// # Errors
    ///
    /// Returns an allocation error if room for the entry cannot be reserved
    pub fn append(&mut self, entry: StatusEntry) -> CoreResult<Appended> {
        let outcome = if self.entries.len() < self.capacity {
            self.entries.try_reserve(1).map_err(|_| Self::alloc_error())?;
            self.entries.push_back(entry);
            Appended::Stored
        } else {
            match self.overflow {
                LogOverflow::DropOldest => {
                    self.entries.pop_front();
                    self.entries.push_back(entry);
                    self.dropped += 1;
                    Appended::Evicted
                }
                LogOverflow::RejectNew => {
                    self.dropped += 1;
                    Appended::Rejected
                }
            }
        };
        self.appended += 1;
        Ok(outcome)
    }

    /// Copy of all entries, oldest first
    ///
    /// # Errors
    ///
    /// Returns an allocation error if the copy cannot be allocated
    pub fn snapshot(&self) -> CoreResult<Vec<StatusEntry>> {
        let mut out = Vec::new();
        out.try_reserve_exact(self.entries.len())
            .map_err(|_| Self::alloc_error())?;
        out.extend(self.entries.iter().cloned());
        Ok(out)
    }

    /// Iterate entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter()
    }

    /// Most recent entry
    #[must_use]
    pub fn last(&self) -> Option<&StatusEntry> {
        self.entries.back()
    }

    /// Number of entries held
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entry is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries held
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow policy
    #[must_use]
    pub const fn overflow(&self) -> LogOverflow {
        self.overflow
    }

    /// Number of append calls since creation
    #[must_use]
    pub const fn total_appended(&self) -> u64 {
        self.appended
    }

    /// Number of entries lost to the capacity bound
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Drop all entries, keep counters
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn alloc_error() -> CoreError {
        CoreError::Allocation {
            resource: "status log".to_string(),
        }
    }
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new(
            cquery_core::SchedulerConfig::DEFAULT_LOG_CAPACITY,
            LogOverflow::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cquery_core::{Timestamp, TransitionKey};
    use proptest::prelude::*;
    use std::time::Duration;

    fn make_entry(function: &str) -> StatusEntry {
        StatusEntry::new(
            Timestamp::now(),
            &TransitionKey::new("cq", function),
            Duration::from_micros(10),
        )
    }

    #[test]
    fn test_append_until_full() {
        let mut log = StatusLog::new(2, LogOverflow::DropOldest);
        assert_eq!(log.append(make_entry("a")).unwrap(), Appended::Stored);
        assert_eq!(log.append(make_entry("b")).unwrap(), Appended::Stored);
        assert_eq!(log.len(), 2);
        assert_eq!(log.dropped(), 0);
    }

    #[test]
    fn test_drop_oldest() {
        let mut log = StatusLog::new(2, LogOverflow::DropOldest);
        log.append(make_entry("a")).unwrap();
        log.append(make_entry("b")).unwrap();
        assert_eq!(log.append(make_entry("c")).unwrap(), Appended::Evicted);

        let names: Vec<_> = log.iter().map(|e| e.function.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(log.dropped(), 1);
        assert_eq!(log.total_appended(), 3);
    }

    #[test]
    fn test_reject_new() {
        let mut log = StatusLog::new(2, LogOverflow::RejectNew);
        log.append(make_entry("a")).unwrap();
        log.append(make_entry("b")).unwrap();
        assert_eq!(log.append(make_entry("c")).unwrap(), Appended::Rejected);

        let names: Vec<_> = log.iter().map(|e| e.function.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(log.last().unwrap().function, "b");
    }

    #[test]
    fn test_snapshot_and_clear() {
        let mut log = StatusLog::new(4, LogOverflow::DropOldest);
        log.append(make_entry("a")).unwrap();
        let snapshot = log.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);

        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.total_appended(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let log = StatusLog::new(0, LogOverflow::RejectNew);
        assert_eq!(log.capacity(), 1);
    }

    proptest! {
        #[test]
        fn prop_log_never_exceeds_capacity(capacity in 1usize..16, appends in 0usize..64, drop_oldest in any::<bool>()) {
            let overflow = if drop_oldest { LogOverflow::DropOldest } else { LogOverflow::RejectNew };
            let mut log = StatusLog::new(capacity, overflow);
            for _ in 0..appends {
                log.append(make_entry("x")).unwrap();
            }
            prop_assert!(log.len() <= capacity);
            prop_assert_eq!(log.len() as u64 + log.dropped(), appends as u64);
        }
    }
}
