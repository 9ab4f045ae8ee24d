//! Routing audit trail.
//!
//! Every routing decision, including its inputs, is appended to a daily
//! JSON Lines file. Each line is independent; a torn write loses only
//! itself.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::RouterResult;

struct ActiveWriter {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Append-only JSON Lines audit log, one file per day.
pub struct AuditTrail {
    base_dir: PathBuf,
    active: Mutex<Option<ActiveWriter>>,
}

impl AuditTrail {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        if let Err(e) = std::fs::create_dir_all(&base_dir) {
            warn!(?e, dir = %base_dir.display(), "Failed to create audit directory");
        }
        Self {
            base_dir,
            active: Mutex::new(None),
        }
    }

    /// Append one record; rotates the file when the UTC date changes.
    pub fn append<T: Serialize>(&self, record: &T) -> RouterResult<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut active = self.active.lock();

        let needs_rotation = active.as_ref().map(|w| w.date != today).unwrap_or(false);
        if needs_rotation {
            self.close_active(&mut active);
        }

        if active.is_none() {
            let path = self.base_dir.join(format!("routing_{today}.jsonl"));
            info!(path = %path.display(), "Opening routing audit file (append mode)");
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            *active = Some(ActiveWriter {
                writer: BufWriter::new(file),
                date: today,
                records_written: 0,
            });
        }

        let writer = active.as_mut().expect("active writer present");
        let json = serde_json::to_string(record)?;
        writeln!(writer.writer, "{json}")?;
        writer.writer.flush()?;
        writer.records_written += 1;
        Ok(())
    }

    fn close_active(&self, active: &mut Option<ActiveWriter>) {
        if let Some(mut writer) = active.take() {
            if let Err(e) = writer.writer.flush() {
                warn!(?e, "Failed to flush audit writer on rotation");
            }
            info!(
                date = %writer.date,
                records = writer.records_written,
                "Closed routing audit file"
            );
        }
    }
}

impl Drop for AuditTrail {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        self.close_active(&mut active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;

    #[derive(Serialize)]
    struct Record {
        audit_id: String,
        note: &'static str,
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let trail = AuditTrail::new(dir.path());
        for i in 0..3 {
            trail
                .append(&Record {
                    audit_id: format!("a-{i}"),
                    note: "routed",
                })
                .unwrap();
        }
        drop(trail);

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);

        let file = File::open(entries[0].path()).unwrap();
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .filter_map(|l| l.ok())
            .collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("a-0"));
    }
}
