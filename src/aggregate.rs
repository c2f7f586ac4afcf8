// Batch Aggregator - in-memory counters for one ingestion run.
//
// Counts are commutative sums, so row order never affects the final totals.
// Net change is computed exactly once at finalization against the previous
// batch's stored active count, never by re-scanning history.

use crate::diff::Transition;

#[derive(Debug, Default)]
pub struct BatchAggregator {
    row_count: i64,
    active_count: i64,
    lost_count: i64,
}

/// Finalized counters for one batch, written to the batch row before commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTotals {
    pub row_count: i64,
    pub active_count: i64,
    pub net_change: i64,
    pub lost_count: i64,
}

impl BatchAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one persisted row. Skipped rows (missing external id) never
    /// reach this point and are excluded from all counters.
    pub fn record_row(&mut self, is_active: bool, transition: Transition) {
        self.row_count += 1;
        if is_active {
            self.active_count += 1;
        }
        if transition == Transition::Lost {
            self.lost_count += 1;
        }
    }

    pub fn row_count(&self) -> i64 {
        self.row_count
    }

    /// Compute the final totals. `previous_active_count` is the previous
    /// batch's stored active count, read once at batch start (0 when this is
    /// the first batch, making net change equal the active count).
    pub fn finalize(self, previous_active_count: i64) -> BatchTotals {
        BatchTotals {
            row_count: self.row_count,
            active_count: self.active_count,
            net_change: self.active_count - previous_active_count,
            lost_count: self.lost_count,
        }
    }
}
