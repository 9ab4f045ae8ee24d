//! Prometheus metrics for the broker core.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. Registration only
//! fails on duplicate metric names, a fatal build error that should crash
//! at startup rather than fail silently. These panics only occur during
//! static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram,
    register_histogram_vec, register_int_gauge, register_int_gauge_vec, Counter, CounterVec,
    GaugeVec, Histogram, HistogramVec, IntGauge, IntGaugeVec,
};

// =============================================================================
// FIX sessions
// =============================================================================

/// FIX session state (1 = active, 0 = inactive).
/// Labels: lp_id, state (disconnected/connecting/logged_in/logging_out)
pub static FIX_SESSION_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "fxgate_fix_session_state",
        "FIX session state (1=active)",
        &["lp_id", "state"]
    )
    .unwrap()
});

/// Total FIX reconnection attempts.
pub static FIX_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fxgate_fix_reconnect_total",
        "Total FIX reconnection attempts",
        &["lp_id", "reason"]
    )
    .unwrap()
});

/// Total resend requests sent for inbound gaps.
pub static FIX_RESEND_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fxgate_fix_resend_requests_total",
        "Total ResendRequests sent",
        &["lp_id"]
    )
    .unwrap()
});

// =============================================================================
// Market data
// =============================================================================

/// Total ticks received from LPs.
pub static TICKS_RECEIVED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fxgate_ticks_received_total",
        "Total ticks received from LPs",
        &["lp_id"]
    )
    .unwrap()
});

/// Total aggregated ticks broadcast to WebSocket clients.
pub static TICKS_BROADCAST_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fxgate_ticks_broadcast_total",
        "Total ticks fanned out to clients"
    )
    .unwrap()
});

/// Total ticks suppressed by the hub throttle.
pub static TICKS_THROTTLED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fxgate_ticks_throttled_total",
        "Total ticks suppressed by throttling"
    )
    .unwrap()
});

/// Connected WebSocket clients.
pub static HUB_CLIENTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("fxgate_hub_clients", "Connected WebSocket clients").unwrap()
});

// =============================================================================
// Tick store
// =============================================================================

/// store() latency in microseconds.
pub static STORE_LATENCY_US: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "fxgate_store_latency_us",
        "Tick store hot-path latency in microseconds",
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0]
    )
    .unwrap()
});

/// Ticks lost to queue saturation or exhausted retries.
pub static STORE_TICKS_LOST_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fxgate_store_ticks_lost_total",
        "Ticks dropped by the durable path"
    )
    .unwrap()
});

/// Batches that exhausted their retries.
pub static STORE_BATCH_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "fxgate_store_batch_failures_total",
        "Durable write batches that exhausted retries"
    )
    .unwrap()
});

/// Depth of the durable write queue.
pub static STORE_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "fxgate_store_queue_depth",
        "Pending ticks in the durable write queue"
    )
    .unwrap()
});

// =============================================================================
// Orders
// =============================================================================

/// Order outcomes by terminal status.
pub static ORDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fxgate_orders_total",
        "Orders by terminal status",
        &["status"]
    )
    .unwrap()
});

/// Risk gate rejections by reason.
pub static RISK_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fxgate_risk_rejected_total",
        "Pre-trade risk rejections by reason",
        &["reason"]
    )
    .unwrap()
});

/// Routing decisions by action.
pub static ROUTING_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fxgate_routing_decisions_total",
        "SOR decisions by action",
        &["action"]
    )
    .unwrap()
});

/// Order send-to-report latency in milliseconds.
pub static ORDER_ROUNDTRIP_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fxgate_order_roundtrip_ms",
        "NewOrderSingle to first ExecutionReport latency",
        &["lp_id"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// LP health scores.
pub static LP_HEALTH_SCORE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "fxgate_lp_health_score",
        "Composite LP health score in [0,1]",
        &["lp_id"]
    )
    .unwrap()
});

/// Kill switch state (1 = engaged). Label: scope (global or account id).
pub static KILL_SWITCH_ENGAGED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "fxgate_kill_switch_engaged",
        "Kill switch state (1=engaged)",
        &["scope"]
    )
    .unwrap()
});

/// Gather all registered metrics in the text exposition format.
pub fn gather_metrics() -> crate::TelemetryResult<String> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_gather() {
        TICKS_RECEIVED_TOTAL.with_label_values(&["LP_A"]).inc();
        TICKS_BROADCAST_TOTAL.inc();
        STORE_QUEUE_DEPTH.set(42);

        let text = gather_metrics().unwrap();
        assert!(text.contains("fxgate_ticks_received_total"));
        assert!(text.contains("fxgate_store_queue_depth"));
    }
}
