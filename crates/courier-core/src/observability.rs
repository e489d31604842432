use serde::{Deserialize, Serialize};

/// Snapshot of a worker pool's counters. All counts except `jobs` are in
/// task (message) units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCounts {
    /// Jobs accepted by the pool (a sequencer drain is one job).
    pub jobs: u64,
    pub executed: u64,
    pub faulted: u64,
    pub skipped: u64,
    pub cancelled: u64,
    pub rejected: u64,
}

impl PoolCounts {
    /// Tasks that reached a final outcome: ran, were skipped, were cancelled
    /// during shutdown, or were refused because the pool was closed.
    pub fn settled(&self) -> u64 {
        self.executed + self.skipped + self.cancelled + self.rejected
    }
}
