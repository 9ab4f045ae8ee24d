//! Durable tick backends.
//!
//! One interface, three modes:
//! - `append_json`: one JSON Lines file per (symbol, date). Each line is a
//!   complete JSON object, so partial corruption only affects that line.
//! - `sqlite`: one database per date, WAL mode, pool of 5 connections,
//!   5s busy timeout, transactional batch inserts.
//! - `dual`: writes both, for migration validation. SQLite is
//!   authoritative for error accounting.
//!
//! Active files carry an exclusive advisory lock so an external compressor
//! cannot rewrite a file that is still being appended to.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fxgate_core::{Symbol, Tick};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// Which durable backend(s) to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    AppendJson,
    #[default]
    Sqlite,
    Dual,
}

/// A durable tick sink plus its read path.
///
/// `append` receives batches already grouped by (symbol, date): one call
/// touches exactly one underlying storage unit.
pub trait TickBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn append(&self, symbol: &Symbol, date: &str, ticks: &[Tick]) -> StoreResult<()>;

    fn read_range(
        &self,
        symbol: &Symbol,
        date: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Tick>>;

    /// Full durability barrier: flush + fsync / WAL checkpoint for every
    /// open unit.
    fn barrier(&self) -> StoreResult<()>;

    /// Close everything open for `date` after a barrier (daily rotation).
    fn rotate_out(&self, date: &str) -> StoreResult<()>;
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> StoreResult<()> {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return Err(StoreError::Busy("advisory lock held elsewhere".to_string()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> StoreResult<()> {
    Ok(())
}

// ============================================================================
// JSON Lines backend
// ============================================================================

struct OpenJsonl {
    writer: BufWriter<File>,
    records_written: usize,
}

/// One `.jsonl` file per (symbol, date) under `base_dir/<date>/`.
pub struct JsonlBackend {
    base_dir: PathBuf,
    open: Mutex<HashMap<(String, String), OpenJsonl>>,
}

impl JsonlBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            open: Mutex::new(HashMap::new()),
        }
    }

    fn file_path(&self, symbol: &Symbol, date: &str) -> PathBuf {
        self.base_dir.join(date).join(format!("{symbol}.jsonl"))
    }

    fn open_writer(&self, symbol: &Symbol, date: &str) -> StoreResult<OpenJsonl> {
        let path = self.file_path(symbol, date);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        try_lock_exclusive(&file)?;
        info!(path = %path.display(), "Opened tick JSONL (append mode)");
        Ok(OpenJsonl {
            writer: BufWriter::new(file),
            records_written: 0,
        })
    }
}

impl TickBackend for JsonlBackend {
    fn name(&self) -> &'static str {
        "append_json"
    }

    fn append(&self, symbol: &Symbol, date: &str, ticks: &[Tick]) -> StoreResult<()> {
        let mut open = self.open.lock();
        let key = (symbol.as_str().to_string(), date.to_string());
        if !open.contains_key(&key) {
            let writer = self.open_writer(symbol, date)?;
            open.insert(key.clone(), writer);
        }
        let entry = open.get_mut(&key).expect("just inserted");

        for tick in ticks {
            let json = serde_json::to_string(tick)?;
            writeln!(entry.writer, "{json}")?;
        }
        entry.writer.flush()?;
        entry.records_written += ticks.len();

        debug!(
            symbol = %symbol,
            date,
            records = ticks.len(),
            "Appended tick batch to JSONL"
        );
        Ok(())
    }

    fn read_range(
        &self,
        symbol: &Symbol,
        date: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Tick>> {
        // Make buffered writes visible before reading.
        {
            let mut open = self.open.lock();
            let key = (symbol.as_str().to_string(), date.to_string());
            if let Some(entry) = open.get_mut(&key) {
                entry.writer.flush()?;
            }
        }

        let path = self.file_path(symbol, date);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut out = Vec::with_capacity(limit.min(4096));
        for line in reader.lines().skip(offset).take(limit) {
            let line = line?;
            match serde_json::from_str::<Tick>(&line) {
                Ok(tick) => out.push(tick),
                // A torn trailing line only loses itself.
                Err(e) => warn!(date, %symbol, ?e, "Skipping unparseable tick line"),
            }
        }
        Ok(out)
    }

    fn barrier(&self) -> StoreResult<()> {
        let mut open = self.open.lock();
        for entry in open.values_mut() {
            entry.writer.flush()?;
            entry.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    fn rotate_out(&self, date: &str) -> StoreResult<()> {
        let mut open = self.open.lock();
        let keys: Vec<(String, String)> = open
            .keys()
            .filter(|(_, d)| d == date)
            .cloned()
            .collect();
        for key in keys {
            if let Some(mut entry) = open.remove(&key) {
                entry.writer.flush()?;
                entry.writer.get_ref().sync_data()?;
                info!(
                    symbol = %key.0,
                    date,
                    records = entry.records_written,
                    "Closed tick JSONL"
                );
            }
        }
        Ok(())
    }
}

// ============================================================================
// SQLite backend
// ============================================================================

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS ticks (
    symbol TEXT NOT NULL,
    bid TEXT NOT NULL,
    ask TEXT NOT NULL,
    spread TEXT NOT NULL,
    ts_ms INTEGER NOT NULL,
    lp_id TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ticks_symbol_ts
    ON ticks(symbol, ts_ms);
"#;

const POOL_SIZE: usize = 5;
const BUSY_TIMEOUT_MS: u64 = 5_000;

struct ConnPool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ConnPool {
    fn open(path: &Path) -> StoreResult<Self> {
        let mut conns = Vec::with_capacity(POOL_SIZE);
        for i in 0..POOL_SIZE {
            let conn = Connection::open(path)?;
            conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
            if i == 0 {
                conn.execute_batch(SCHEMA_SQL)?;
            } else {
                conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
            }
            conns.push(Mutex::new(conn));
        }
        Ok(Self {
            conns,
            next: AtomicUsize::new(0),
        })
    }

    /// Round-robin over the pool; blocks on the chosen connection.
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        let mut conn = self.conns[idx].lock();
        f(&mut conn)
    }
}

/// One SQLite database per date under `base_dir/ticks_<date>.db`.
pub struct SqliteBackend {
    base_dir: PathBuf,
    pools: Mutex<HashMap<String, Arc<ConnPool>>>,
}

impl SqliteBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn db_path(&self, date: &str) -> PathBuf {
        self.base_dir.join(format!("ticks_{date}.db"))
    }

    fn pool_for(&self, date: &str) -> StoreResult<Arc<ConnPool>> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(date) {
            return Ok(Arc::clone(pool));
        }
        std::fs::create_dir_all(&self.base_dir)?;
        let pool = Arc::new(ConnPool::open(&self.db_path(date))?);
        info!(date, path = %self.db_path(date).display(), "Opened tick database");
        pools.insert(date.to_string(), Arc::clone(&pool));
        Ok(pool)
    }
}

impl TickBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn append(&self, symbol: &Symbol, date: &str, ticks: &[Tick]) -> StoreResult<()> {
        let pool = self.pool_for(date)?;
        pool.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO ticks (symbol, bid, ask, spread, ts_ms, lp_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for tick in ticks {
                    stmt.execute(params![
                        symbol.as_str(),
                        tick.bid.to_string(),
                        tick.ask.to_string(),
                        tick.spread.to_string(),
                        tick.ts_ms,
                        tick.lp_id.as_str(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;

        debug!(
            symbol = %symbol,
            date,
            records = ticks.len(),
            "Inserted tick batch into SQLite"
        );
        Ok(())
    }

    fn read_range(
        &self,
        symbol: &Symbol,
        date: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Tick>> {
        if !self.db_path(date).exists() {
            return Ok(Vec::new());
        }
        let pool = self.pool_for(date)?;
        pool.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT symbol, bid, ask, ts_ms, lp_id FROM ticks
                 WHERE symbol = ?1
                 ORDER BY ts_ms ASC, rowid ASC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(
                params![symbol.as_str(), limit as i64, offset as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )?;

            let mut out = Vec::with_capacity(limit.min(4096));
            for row in rows {
                let (sym, bid, ask, ts_ms, lp_id) = row.map_err(StoreError::from)?;
                let symbol = Symbol::parse(&sym)
                    .map_err(|e| StoreError::InvalidSymbol(e.to_string()))?;
                let bid = bid
                    .parse()
                    .map_err(|_| StoreError::InvalidSymbol("bad bid".to_string()))?;
                let ask = ask
                    .parse()
                    .map_err(|_| StoreError::InvalidSymbol("bad ask".to_string()))?;
                out.push(Tick::new(
                    symbol,
                    bid,
                    ask,
                    ts_ms,
                    fxgate_core::LpId::new(lp_id),
                ));
            }
            Ok(out)
        })
    }

    fn barrier(&self) -> StoreResult<()> {
        let pools: Vec<Arc<ConnPool>> = self.pools.lock().values().cloned().collect();
        for pool in pools {
            pool.with_conn(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })?;
        }
        Ok(())
    }

    fn rotate_out(&self, date: &str) -> StoreResult<()> {
        let pool = self.pools.lock().remove(date);
        if let Some(pool) = pool {
            pool.with_conn(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })?;
            info!(date, "Closed tick database");
        }
        Ok(())
    }
}

// ============================================================================
// Dual backend
// ============================================================================

/// Writes both backends; SQLite is authoritative for loss accounting, a
/// JSONL failure in dual mode is logged but does not fail the batch.
pub struct DualBackend {
    sqlite: SqliteBackend,
    jsonl: JsonlBackend,
}

impl DualBackend {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base = base_dir.as_ref();
        Self {
            sqlite: SqliteBackend::new(base),
            jsonl: JsonlBackend::new(base),
        }
    }
}

impl TickBackend for DualBackend {
    fn name(&self) -> &'static str {
        "dual"
    }

    fn append(&self, symbol: &Symbol, date: &str, ticks: &[Tick]) -> StoreResult<()> {
        self.sqlite.append(symbol, date, ticks)?;
        if let Err(e) = self.jsonl.append(symbol, date, ticks) {
            warn!(?e, %symbol, date, "Dual mode: JSONL mirror append failed");
        }
        Ok(())
    }

    fn read_range(
        &self,
        symbol: &Symbol,
        date: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Tick>> {
        self.sqlite.read_range(symbol, date, offset, limit)
    }

    fn barrier(&self) -> StoreResult<()> {
        self.sqlite.barrier()?;
        if let Err(e) = self.jsonl.barrier() {
            warn!(?e, "Dual mode: JSONL mirror barrier failed");
        }
        Ok(())
    }

    fn rotate_out(&self, date: &str) -> StoreResult<()> {
        self.sqlite.rotate_out(date)?;
        if let Err(e) = self.jsonl.rotate_out(date) {
            warn!(?e, date, "Dual mode: JSONL mirror rotation failed");
        }
        Ok(())
    }
}

/// Construct the backend for a mode.
pub fn open_backend(mode: BackendMode, base_dir: impl AsRef<Path>) -> Arc<dyn TickBackend> {
    match mode {
        BackendMode::AppendJson => Arc::new(JsonlBackend::new(base_dir.as_ref())),
        BackendMode::Sqlite => Arc::new(SqliteBackend::new(base_dir.as_ref())),
        BackendMode::Dual => Arc::new(DualBackend::new(base_dir)),
    }
}
