//! Running cost totals for a session.

use helmsman_core::CostSink;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Aggregated spend across every provider call observed so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    /// Total cost in USD.
    pub total_cost_usd: f64,
    /// Total wall-clock time spent in provider calls, including retries.
    pub total_duration_ms: u64,
    /// Number of completed provider calls.
    pub llm_calls: u64,
}

/// In-process cost accounting sink.
#[derive(Debug, Default)]
pub struct CostTracker {
    totals: Mutex<CostSummary>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the totals.
    pub fn summary(&self) -> CostSummary {
        self.totals.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl CostSink for CostTracker {
    fn record(&self, cost_usd: f64, duration_ms: u64) {
        let mut totals = self.totals.lock().unwrap_or_else(|e| e.into_inner());
        totals.total_cost_usd += cost_usd;
        totals.total_duration_ms += duration_ms;
        totals.llm_calls += 1;
        tracing::debug!(
            cost_usd,
            duration_ms,
            total_cost_usd = totals.total_cost_usd,
            "Recorded provider call cost"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn accumulates_calls() {
        let tracker = CostTracker::new();
        tracker.record(0.01, 120);
        tracker.record(0.02, 80);

        let summary = tracker.summary();
        assert_eq!(summary.llm_calls, 2);
        assert_eq!(summary.total_duration_ms, 200);
        assert!((summary.total_cost_usd - 0.03).abs() < 1e-12);
    }

    #[test]
    fn usable_as_shared_sink() {
        let tracker = Arc::new(CostTracker::new());
        let sink: Arc<dyn CostSink> = tracker.clone();
        sink.record(1.5, 10);
        assert_eq!(tracker.summary().llm_calls, 1);
    }
}
