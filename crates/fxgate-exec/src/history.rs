//! Order history sink.
//!
//! Terminal orders are appended to a daily JSON Lines file and dropped
//! from the live map; the live engine only ever holds working orders.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::Utc;
use fxgate_core::Order;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{ExecError, ExecResult};

struct ActiveFile {
    writer: BufWriter<std::fs::File>,
    date: String,
}

/// Append-only order history, one file per UTC day.
pub struct OrderHistory {
    base_dir: PathBuf,
    active: Mutex<Option<ActiveFile>>,
}

impl OrderHistory {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        if let Err(e) = std::fs::create_dir_all(&base_dir) {
            warn!(?e, dir = %base_dir.display(), "Failed to create history directory");
        }
        Self {
            base_dir,
            active: Mutex::new(None),
        }
    }

    pub fn append(&self, order: &Order) -> ExecResult<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut active = self.active.lock();

        if active.as_ref().map(|f| f.date != today).unwrap_or(false) {
            *active = None;
        }
        if active.is_none() {
            let path = self.base_dir.join(format!("orders_{today}.jsonl"));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(ExecError::History)?;
            *active = Some(ActiveFile {
                writer: BufWriter::new(file),
                date: today,
            });
        }

        let file = active.as_mut().expect("active file present");
        let json = serde_json::to_string(order)
            .map_err(|e| ExecError::History(std::io::Error::other(e)))?;
        writeln!(file.writer, "{json}").map_err(ExecError::History)?;
        file.writer.flush().map_err(ExecError::History)?;
        Ok(())
    }
}
