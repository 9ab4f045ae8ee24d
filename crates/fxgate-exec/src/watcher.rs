//! Order timeout watcher.
//!
//! Periodically sweeps the live order set: warns on slow orders, sends
//! OrderCancelRequests for stuck ones, and flags unanswered
//! reconciliations for operator review.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::ExecutionEngine;

/// Run the watcher until shutdown.
pub async fn run_watcher(engine: Arc<ExecutionEngine>, shutdown: CancellationToken) {
    let interval = Duration::from_millis(engine.config().watch_interval_ms);
    info!(interval_ms = interval.as_millis(), "Order watcher started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => {
                debug!("Order watcher stopping");
                return;
            }
        }

        for order_id in engine.scan_timeouts() {
            warn!(%order_id, "Order stuck in sent, auto-cancelling");
            match engine.cancel(&order_id).await {
                Ok(outcome) => debug!(%order_id, ?outcome, "Auto-cancel issued"),
                Err(e) => warn!(%order_id, ?e, "Auto-cancel failed"),
            }
        }
    }
}
