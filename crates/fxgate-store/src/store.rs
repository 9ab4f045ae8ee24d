//! The tick store façade.
//!
//! `store()` is the hot path: a ring write plus a non-blocking offer to
//! the durable queue. It never blocks the caller; a saturated queue is
//! counted, not waited on. Reads come from the ring (`get_recent`) or
//! from durable storage (`get_range`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use dashmap::DashMap;
use fxgate_core::{Symbol, Tick};
use fxgate_telemetry::metrics;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{open_backend, BackendMode, TickBackend};
use crate::error::{StoreError, StoreResult};
use crate::ring::TickRing;
use crate::writer::{run_writer, WriterConfig, WriterStats};

pub const MAX_OFFSET: i64 = 1_000_000;
pub const MAX_LIMIT: i64 = 50_000;

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding per-date tick storage.
    pub base_dir: PathBuf,
    #[serde(default)]
    pub backend: BackendMode,
    /// Per-symbol ring capacity.
    #[serde(default = "default_ring_cap")]
    pub ring_cap: usize,
    /// Durable write queue capacity.
    #[serde(default = "default_queue_cap")]
    pub queue_cap: usize,
    /// Maximum ticks per durable batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Flush interval (one fsync per interval at most).
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Files older than this become compression candidates.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_ring_cap() -> usize {
    50_000
}

fn default_queue_cap() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    500
}

fn default_flush_interval_ms() -> u64 {
    30_000
}

fn default_retention_days() -> u32 {
    7
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data/ticks"),
            backend: BackendMode::default(),
            ring_cap: default_ring_cap(),
            queue_cap: default_queue_cap(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            retention_days: default_retention_days(),
        }
    }
}

/// Lossless tick capture with bounded memory.
pub struct TickStore {
    rings: DashMap<Symbol, Arc<TickRing>>,
    ring_cap: usize,
    queue_tx: mpsc::Sender<Tick>,
    backend: Arc<dyn TickBackend>,
    stats: Arc<WriterStats>,
    base_dir: PathBuf,
    retention_days: u32,
}

impl TickStore {
    /// Open the store and spawn the writer and rotation workers.
    ///
    /// The returned join handle completes once the writer has drained and
    /// issued its final durability barrier after `shutdown` fires.
    pub fn open(
        config: StoreConfig,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let backend = open_backend(config.backend, &config.base_dir);
        let stats = Arc::new(WriterStats::default());
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_cap);

        let writer_handle = tokio::spawn(run_writer(
            queue_rx,
            Arc::clone(&backend),
            WriterConfig {
                batch_size: config.batch_size,
                flush_interval_ms: config.flush_interval_ms,
            },
            Arc::clone(&stats),
            shutdown.clone(),
        ));

        tokio::spawn(run_rotation(Arc::clone(&backend), shutdown));

        let store = Arc::new(Self {
            rings: DashMap::new(),
            ring_cap: config.ring_cap,
            queue_tx,
            backend,
            stats,
            base_dir: config.base_dir,
            retention_days: config.retention_days,
        });
        (store, writer_handle)
    }

    fn ring_for(&self, symbol: &Symbol) -> Arc<TickRing> {
        self.rings
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(TickRing::new(self.ring_cap)))
            .clone()
    }

    /// Hot path: O(1), never blocks.
    ///
    /// Queue saturation drops the durable copy for *this* tick, logs, and
    /// counts the loss; the ring copy is always taken.
    pub fn store(&self, tick: Tick) {
        let started = Instant::now();

        self.ring_for(&tick.symbol).push(tick.clone());

        if let Err(e) = self.queue_tx.try_send(tick) {
            self.stats.record_enqueue_drop();
            warn!(?e, "Tick write queue saturated, durable copy dropped");
        }

        metrics::STORE_LATENCY_US.observe(started.elapsed().as_micros() as f64);
    }

    /// Up to `n` most recent ticks for a symbol, newest first.
    pub fn get_recent(&self, symbol: &Symbol, n: usize) -> Vec<Tick> {
        match self.rings.get(symbol) {
            Some(ring) => ring.recent(n),
            None => Vec::new(),
        }
    }

    /// Read from durable storage with boundary validation.
    ///
    /// - `symbol` must match `[A-Z0-9]{1,20}`; anything else is rejected.
    /// - `offset` outside `[0, 1e6]` clamps to 0.
    /// - `limit` of 0 returns the empty set; otherwise clamps to
    ///   `[1, 50_000]`.
    pub fn get_range(
        &self,
        symbol: &str,
        date: &str,
        offset: i64,
        limit: i64,
    ) -> StoreResult<Vec<Tick>> {
        let symbol =
            Symbol::parse(symbol).map_err(|e| StoreError::InvalidSymbol(e.to_string()))?;
        if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            return Err(StoreError::InvalidDate(date.to_string()));
        }

        if limit == 0 {
            return Ok(Vec::new());
        }
        let offset = if (0..=MAX_OFFSET).contains(&offset) {
            offset
        } else {
            0
        };
        let limit = limit.clamp(1, MAX_LIMIT);

        self.backend
            .read_range(&symbol, date, offset as usize, limit as usize)
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Close out one date's storage (CLI `rotate --date`).
    pub fn rotate(&self, date: &str) -> StoreResult<()> {
        if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            return Err(StoreError::InvalidDate(date.to_string()));
        }
        self.backend.barrier()?;
        self.backend.rotate_out(date)
    }

    /// Storage files older than the retention window, eligible for the
    /// external compressor (which must take the advisory lock itself).
    pub fn compression_candidates(&self, older_than_days: u32) -> StoreResult<Vec<PathBuf>> {
        let cutoff = (Utc::now() - ChronoDuration::days(i64::from(older_than_days)))
            .format("%Y-%m-%d")
            .to_string();
        let mut candidates = Vec::new();
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(candidates),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // Directory per date (JSONL) or ticks_<date>.db (SQLite).
            let date_part = name
                .strip_prefix("ticks_")
                .and_then(|s| s.strip_suffix(".db"))
                .unwrap_or(&name);
            if date_part < cutoff.as_str() && NaiveDate::parse_from_str(date_part, "%Y-%m-%d").is_ok()
            {
                candidates.push(entry.path());
            }
        }
        candidates.sort();
        Ok(candidates)
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }
}

/// Daily rotation at 00:00 UTC: barrier, close yesterday, next day's
/// storage opens lazily on first write.
async fn run_rotation(backend: Arc<dyn TickBackend>, shutdown: CancellationToken) {
    loop {
        let now = Utc::now();
        let next_midnight = (now + ChronoDuration::days(1))
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("valid midnight")
            .and_utc();
        let sleep_for = (next_midnight - now)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1));

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = shutdown.cancelled() => return,
        }

        let closing = (Utc::now() - ChronoDuration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        info!(date = %closing, "Daily rotation");
        if let Err(e) = backend.barrier() {
            warn!(?e, "Rotation barrier failed");
        }
        if let Err(e) = backend.rotate_out(&closing) {
            warn!(?e, date = %closing, "Rotation close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxgate_core::{LpId, Price};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            base_dir: dir.path().to_path_buf(),
            backend: BackendMode::Sqlite,
            ring_cap: 8,
            queue_cap: 10_000,
            batch_size: 100,
            flush_interval_ms: 50,
            retention_days: 7,
        }
    }

    fn tick(ts: i64) -> Tick {
        Tick::new(
            Symbol::parse("EURUSD").unwrap(),
            Price::new(dec!(1.0850)),
            Price::new(dec!(1.0852)),
            ts,
            LpId::from("LP_A"),
        )
    }

    #[tokio::test]
    async fn test_store_and_get_recent() {
        let dir = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let (store, writer) = TickStore::open(config(&dir), shutdown.clone());

        for ts in 1..=20 {
            store.store(tick(ts));
        }
        let recent = store.get_recent(&Symbol::parse("EURUSD").unwrap(), 5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].ts_ms, 20);

        // Ring capacity 8: older entries overwritten.
        let all = store.get_recent(&Symbol::parse("EURUSD").unwrap(), 100);
        assert_eq!(all.len(), 8);
        assert_eq!(all.last().unwrap().ts_ms, 13);

        shutdown.cancel();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_durability_through_shutdown() {
        let dir = TempDir::new().unwrap();
        let base = 1_785_542_400_000i64; // 2026-08-01 UTC
        {
            let shutdown = CancellationToken::new();
            let (store, writer) = TickStore::open(config(&dir), shutdown.clone());
            for i in 0..500 {
                store.store(tick(base + i));
            }
            shutdown.cancel();
            writer.await.unwrap();
        }

        // Fresh store over the same directory sees every tick, in order,
        // exactly once.
        let shutdown = CancellationToken::new();
        let (store, writer) = TickStore::open(config(&dir), shutdown.clone());
        let rows = store
            .get_range("EURUSD", "2026-08-01", 0, 50_000)
            .unwrap();
        assert_eq!(rows.len(), 500);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.ts_ms, base + i as i64);
        }
        shutdown.cancel();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_get_range_boundaries() {
        let dir = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let (store, writer) = TickStore::open(config(&dir), shutdown.clone());

        // Path traversal is rejected outright.
        assert!(matches!(
            store.get_range("../etc", "2026-08-01", 0, 10),
            Err(StoreError::InvalidSymbol(_))
        ));
        assert!(matches!(
            store.get_range("EURUSD", "not-a-date", 0, 10),
            Err(StoreError::InvalidDate(_))
        ));

        // limit=0 -> empty set without touching the backend.
        assert!(store
            .get_range("EURUSD", "2026-08-01", 0, 0)
            .unwrap()
            .is_empty());

        // Out-of-range values clamp instead of erroring.
        assert!(store
            .get_range("EURUSD", "2026-08-01", MAX_OFFSET + 1, 10)
            .unwrap()
            .is_empty());
        assert!(store
            .get_range("EURUSD", "2026-08-01", 0, MAX_LIMIT + 1)
            .unwrap()
            .is_empty());

        shutdown.cancel();
        writer.await.unwrap();
    }
}
