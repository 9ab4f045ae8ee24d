//! LP health scoring.
//!
//! Every ExecutionReport feeds four exponentially weighted signals per LP
//! (fill rate, slippage, latency, reject rate) with a 5-minute half-life.
//! The composite score in [0,1] is the SOR's tie-breaker; LPs under the
//! degraded threshold are deprioritized entirely.

pub mod monitor;

pub use monitor::{HealthConfig, HealthMonitor, LpHealth, ReportOutcome};
