//! Background durable writer.
//!
//! Drains the bounded tick queue in batches of up to `batch_size`, or
//! whatever arrived within `flush_interval`, whichever comes first. Each
//! batch is grouped by (symbol, date) so one append touches exactly one
//! storage unit. Transient busy errors retry with 10/20/40ms backoff
//! (±25% jitter); a batch that exhausts its retries is counted lost, not
//! re-queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fxgate_core::Tick;
use fxgate_telemetry::metrics;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::TickBackend;
use crate::error::StoreResult;

const RETRY_DELAYS_MS: [u64; 3] = [10, 20, 40];
const CONSECUTIVE_ERROR_ALERT: u64 = 100;

/// Writer loss-accounting counters.
#[derive(Debug, Default)]
pub struct WriterStats {
    pub ticks_written: AtomicU64,
    pub ticks_lost: AtomicU64,
    pub batch_failures: AtomicU64,
    pub consecutive_errors: AtomicU64,
}

impl WriterStats {
    pub fn ticks_written(&self) -> u64 {
        self.ticks_written.load(Ordering::Relaxed)
    }

    pub fn ticks_lost(&self) -> u64 {
        self.ticks_lost.load(Ordering::Relaxed)
    }

    pub fn batch_failures(&self) -> u64 {
        self.batch_failures.load(Ordering::Relaxed)
    }

    pub fn consecutive_errors(&self) -> u64 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    /// Record a drop on the enqueue side (queue saturated).
    pub fn record_enqueue_drop(&self) {
        self.ticks_lost.fetch_add(1, Ordering::Relaxed);
        metrics::STORE_TICKS_LOST_TOTAL.inc();
    }
}

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            flush_interval_ms: 30_000,
        }
    }
}

/// UTC date partition a tick belongs to.
pub fn tick_date(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string()
}

/// Run the durable writer until the queue closes or shutdown fires.
///
/// On shutdown the queue is drained completely and a final durability
/// barrier is issued before returning.
pub async fn run_writer(
    mut rx: mpsc::Receiver<Tick>,
    backend: Arc<dyn TickBackend>,
    config: WriterConfig,
    stats: Arc<WriterStats>,
    shutdown: CancellationToken,
) {
    info!(
        backend = backend.name(),
        batch_size = config.batch_size,
        flush_interval_ms = config.flush_interval_ms,
        "Durable tick writer started"
    );

    let flush_interval = Duration::from_millis(config.flush_interval_ms);
    let mut batch: Vec<Tick> = Vec::with_capacity(config.batch_size);

    loop {
        let deadline = tokio::time::Instant::now() + flush_interval;
        let mut flush_due = false;

        // Fill the batch until full, flush deadline, or shutdown.
        while batch.len() < config.batch_size {
            tokio::select! {
                tick = rx.recv() => {
                    match tick {
                        Some(tick) => batch.push(tick),
                        None => {
                            // Producers gone: final flush below.
                            write_batch(&*backend, &mut batch, &stats).await;
                            finalize(&*backend);
                            info!("Durable tick writer finished (queue closed)");
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    flush_due = true;
                    break;
                }
                _ = shutdown.cancelled() => {
                    drain_and_finalize(&mut rx, &*backend, &mut batch, &stats).await;
                    return;
                }
            }
        }

        write_batch(&*backend, &mut batch, &stats).await;
        if flush_due {
            // At most one fsync per flush interval.
            if let Err(e) = backend.barrier() {
                warn!(?e, "Durability barrier failed");
            }
        }
        metrics::STORE_QUEUE_DEPTH.set(rx.len() as i64);
    }
}

/// Drain everything still queued, write it, and issue the final barrier.
async fn drain_and_finalize(
    rx: &mut mpsc::Receiver<Tick>,
    backend: &dyn TickBackend,
    batch: &mut Vec<Tick>,
    stats: &WriterStats,
) {
    rx.close();
    while let Ok(tick) = rx.try_recv() {
        batch.push(tick);
    }
    info!(pending = batch.len(), "Draining tick writer for shutdown");
    write_batch(backend, batch, stats).await;
    finalize(backend);
}

fn finalize(backend: &dyn TickBackend) {
    match backend.barrier() {
        Ok(()) => info!("Final durability barrier complete"),
        Err(e) => error!(?e, "Final durability barrier failed"),
    }
}

/// Group the batch by (symbol, date) and write each group with retries.
async fn write_batch(backend: &dyn TickBackend, batch: &mut Vec<Tick>, stats: &WriterStats) {
    if batch.is_empty() {
        return;
    }

    let mut groups: HashMap<(fxgate_core::Symbol, String), Vec<Tick>> = HashMap::new();
    for tick in batch.drain(..) {
        let date = tick_date(tick.ts_ms);
        groups
            .entry((tick.symbol.clone(), date))
            .or_default()
            .push(tick);
    }

    for ((symbol, date), ticks) in groups {
        match append_with_retry(backend, &symbol, &date, &ticks).await {
            Ok(()) => {
                stats.consecutive_errors.store(0, Ordering::Relaxed);
                stats
                    .ticks_written
                    .fetch_add(ticks.len() as u64, Ordering::Relaxed);
                debug!(%symbol, date, n = ticks.len(), "Batch written");
            }
            Err(e) => {
                stats
                    .ticks_lost
                    .fetch_add(ticks.len() as u64, Ordering::Relaxed);
                stats.batch_failures.fetch_add(1, Ordering::Relaxed);
                let consecutive = stats.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::STORE_TICKS_LOST_TOTAL.inc_by(ticks.len() as f64);
                metrics::STORE_BATCH_FAILURES_TOTAL.inc();
                warn!(%symbol, date, n = ticks.len(), ?e, "Batch lost after retries");
                if consecutive >= CONSECUTIVE_ERROR_ALERT {
                    error!(
                        consecutive,
                        "Storage degraded: consecutive batch failures at alert threshold"
                    );
                }
            }
        }
    }
}

async fn append_with_retry(
    backend: &dyn TickBackend,
    symbol: &fxgate_core::Symbol,
    date: &str,
    ticks: &[Tick],
) -> StoreResult<()> {
    let mut last_err = None;
    for (attempt, base_delay) in RETRY_DELAYS_MS.iter().enumerate() {
        match backend.append(symbol, date, ticks) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => {
                let delay = jittered(*base_delay);
                debug!(
                    attempt = attempt + 1,
                    delay_ms = delay,
                    "Transient storage error, backing off"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    // One final attempt after the last backoff.
    match backend.append(symbol, date, ticks) {
        Ok(()) => Ok(()),
        Err(e) => Err(if e.is_transient() {
            last_err.unwrap_or(e)
        } else {
            e
        }),
    }
}

/// Apply ±25% jitter to a backoff delay without a PRNG dependency.
fn jittered(base_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let span = base_ms / 2; // jitter window: [-25%, +25%]
    if span == 0 {
        return base_ms;
    }
    base_ms - span / 2 + (nanos % span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::JsonlBackend;
    use fxgate_core::{LpId, Price, Symbol};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn tick(ts: i64) -> Tick {
        Tick::new(
            Symbol::parse("EURUSD").unwrap(),
            Price::new(dec!(1.0850)),
            Price::new(dec!(1.0852)),
            ts,
            LpId::from("LP_A"),
        )
    }

    #[test]
    fn test_tick_date_partitions_by_utc_day() {
        // 2026-08-01T00:00:00Z
        assert_eq!(tick_date(1_785_542_400_000), "2026-08-01");
        assert_eq!(tick_date(1_785_542_400_000 - 1), "2026-07-31");
    }

    #[test]
    fn test_jitter_within_bounds() {
        for _ in 0..100 {
            let d = jittered(40);
            assert!((30..=50).contains(&d), "jitter {d} outside ±25%");
        }
    }

    #[tokio::test]
    async fn test_writer_drains_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn TickBackend> = Arc::new(JsonlBackend::new(dir.path()));
        let stats = Arc::new(WriterStats::default());
        let (tx, rx) = mpsc::channel(10_000);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run_writer(
            rx,
            Arc::clone(&backend),
            WriterConfig {
                batch_size: 500,
                flush_interval_ms: 60_000,
            },
            Arc::clone(&stats),
            shutdown.clone(),
        ));

        let base = 1_785_542_400_000i64; // 2026-08-01 UTC
        for i in 0..1_000 {
            tx.send(tick(base + i)).await.unwrap();
        }
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(stats.ticks_written(), 1_000);
        assert_eq!(stats.ticks_lost(), 0);

        let rows = backend
            .read_range(&Symbol::parse("EURUSD").unwrap(), "2026-08-01", 0, 2_000)
            .unwrap();
        assert_eq!(rows.len(), 1_000);
        // Ingestion order preserved, no duplication.
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.ts_ms, base + i as i64);
        }
    }

    /// Backend that stays busy a fixed number of times before accepting.
    struct FlakyBackend {
        inner: JsonlBackend,
        busy_left: Mutex<u32>,
    }

    impl TickBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn append(
            &self,
            symbol: &Symbol,
            date: &str,
            ticks: &[Tick],
        ) -> crate::StoreResult<()> {
            let mut left = self.busy_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(crate::StoreError::Busy("simulated".to_string()));
            }
            self.inner.append(symbol, date, ticks)
        }

        fn read_range(
            &self,
            symbol: &Symbol,
            date: &str,
            offset: usize,
            limit: usize,
        ) -> crate::StoreResult<Vec<Tick>> {
            self.inner.read_range(symbol, date, offset, limit)
        }

        fn barrier(&self) -> crate::StoreResult<()> {
            self.inner.barrier()
        }

        fn rotate_out(&self, date: &str) -> crate::StoreResult<()> {
            self.inner.rotate_out(date)
        }
    }

    #[tokio::test]
    async fn test_transient_busy_retried_to_success() {
        let dir = TempDir::new().unwrap();
        let backend = FlakyBackend {
            inner: JsonlBackend::new(dir.path()),
            busy_left: Mutex::new(2),
        };
        let sym = Symbol::parse("EURUSD").unwrap();
        let result = append_with_retry(&backend, &sym, "2026-08-01", &[tick(1)]).await;
        assert!(result.is_ok());
        assert_eq!(backend.read_range(&sym, "2026-08-01", 0, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_lose_batch() {
        let dir = TempDir::new().unwrap();
        let backend = FlakyBackend {
            inner: JsonlBackend::new(dir.path()),
            busy_left: Mutex::new(100),
        };
        let sym = Symbol::parse("EURUSD").unwrap();
        let result = append_with_retry(&backend, &sym, "2026-08-01", &[tick(1)]).await;
        assert!(result.is_err());
    }
}
