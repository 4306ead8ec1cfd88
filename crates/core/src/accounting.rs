//! Cost accounting sink.

/// Receives one observation per completed provider call.
pub trait CostSink: Send + Sync {
    fn record(&self, cost_usd: f64, duration_ms: u64);
}

/// A sink that drops every observation.
pub struct NoopCostSink;

impl CostSink for NoopCostSink {
    fn record(&self, _cost_usd: f64, _duration_ms: u64) {}
}
