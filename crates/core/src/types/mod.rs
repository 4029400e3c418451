//! Mnema Core Types
//!
//! Shared type definitions for the execution core: worker identities and
//! task priority classes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global ID counter for generating unique identifiers
static GLOBAL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate next unique ID
#[inline]
fn next_id() -> u64 {
    GLOBAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Worker identifier
///
/// The pool assigns workers 0-based slot indices via [`WorkerId::from_raw`];
/// [`WorkerId::new`] hands out globally unique ids for callers that need
/// them outside a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Create new worker ID
    #[must_use]
    pub fn new() -> Self {
        Self(next_id())
    }

    /// Create worker ID from raw value
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Get raw ID value
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Task priority class
///
/// Queues are drained strictly in descending priority order; ordering within
/// one class is FIFO.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Low priority (batch and background operations)
    Low = 0,
    /// Medium priority (regular operations)
    Medium = 1,
    /// High priority (interactive queries)
    High = 2,
    /// Critical priority (consolidation deadlines, operator actions)
    Critical = 3,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    /// All priority classes, highest first
    pub const DESCENDING: [Self; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    /// Short label for logging and stats
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_uniqueness() {
        let a = WorkerId::new();
        let b = WorkerId::new();
        assert_ne!(a, b);

        let slot = WorkerId::from_raw(3);
        assert_eq!(slot.raw(), 3);
        assert_eq!(slot.to_string(), "worker-3");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert!(TaskPriority::Medium > TaskPriority::Low);
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
    }

    #[test]
    fn test_priority_descending_order() {
        let mut sorted = TaskPriority::DESCENDING.to_vec();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(sorted, TaskPriority::DESCENDING.to_vec());
    }
}
