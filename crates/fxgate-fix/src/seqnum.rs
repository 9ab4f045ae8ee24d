//! Durable FIX sequence numbers.
//!
//! Seqnums survive restarts; session state does not. The outbound number
//! is persisted *before* the bytes reach the socket, so the number on disk
//! is always >= anything the counterparty can have observed.

use crate::error::{FixError, FixResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct SeqNums {
    /// Next inbound seqnum we expect.
    next_in: u64,
    /// Next outbound seqnum we will stamp.
    next_out: u64,
}

impl Default for SeqNums {
    fn default() -> Self {
        Self {
            next_in: 1,
            next_out: 1,
        }
    }
}

/// Durable per-session seqnum store, one JSON file per session id.
pub struct SeqNumStore {
    path: PathBuf,
    inner: Mutex<SeqNums>,
}

impl SeqNumStore {
    /// Open (or create) the store for `session_id` under `dir`.
    pub fn open(dir: impl AsRef<Path>, session_id: &str) -> FixResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{session_id}.json"));

        let nums = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| FixError::SeqStore(format!("corrupt seqnum file: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SeqNums::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            session_id,
            next_in = nums.next_in,
            next_out = nums.next_out,
            "Loaded seqnum store"
        );

        Ok(Self {
            path,
            inner: Mutex::new(nums),
        })
    }

    /// Next inbound seqnum we expect from the counterparty.
    pub fn next_in(&self) -> u64 {
        self.inner.lock().next_in
    }

    /// Next outbound seqnum (not yet reserved).
    pub fn next_out(&self) -> u64 {
        self.inner.lock().next_out
    }

    /// Record that inbound `seq` was processed; expectation becomes seq+1.
    pub fn advance_in(&self, seq: u64) -> FixResult<()> {
        let mut guard = self.inner.lock();
        guard.next_in = seq + 1;
        self.persist(&guard)
    }

    /// Force the inbound expectation (SequenceReset 35=4).
    pub fn set_next_in(&self, next: u64) -> FixResult<()> {
        let mut guard = self.inner.lock();
        guard.next_in = next;
        self.persist(&guard)
    }

    /// Reserve the next outbound seqnum. The incremented value hits disk
    /// before this returns, so callers may safely put it on the wire.
    pub fn reserve_out(&self) -> FixResult<u64> {
        let mut guard = self.inner.lock();
        let seq = guard.next_out;
        guard.next_out = seq + 1;
        self.persist(&guard)?;
        Ok(seq)
    }

    /// Reset both directions to 1 (counterparty requested 141=Y).
    pub fn reset(&self) -> FixResult<()> {
        let mut guard = self.inner.lock();
        *guard = SeqNums::default();
        debug!(path = %self.path.display(), "Seqnums reset to 1/1");
        self.persist(&guard)
    }

    /// Atomic write: temp file in the same directory, then rename.
    fn persist(&self, nums: &SeqNums) -> FixResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(nums)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
