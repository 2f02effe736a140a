//! Observability views over a store.

use serde::Serialize;

/// Row counts for one queue identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StoreCounts {
    pub fn total(&self) -> usize {
        self.pending + self.completed + self.failed
    }

    /// True when nothing is left to process.
    pub fn is_drained(&self) -> bool {
        self.pending == 0
    }
}

/// Call counters kept by the in-memory store.
///
/// `complete`/`fail`/`update` count calls, including ones later undone by a
/// savepoint rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub transactions: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub complete_calls: u64,
    pub fail_calls: u64,
    pub update_calls: u64,
}
