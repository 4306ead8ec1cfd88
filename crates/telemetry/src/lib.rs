//! Cost accounting for helmsman.
//!
//! Provides a built-in model pricing table used to price each provider call
//! from its reported usage, and a `CostTracker` that implements the core
//! `CostSink` and keeps session totals.

pub mod cost;
pub mod pricing;

pub use cost::{CostSummary, CostTracker};
pub use pricing::{ModelPricing, PricingTable};
