//! Tick storage.
//!
//! The hot path is lossless and non-blocking: every tick lands in a
//! per-symbol ring buffer and is offered to a bounded queue drained by a
//! background writer. The writer batches ticks into per-(symbol, date)
//! storage units behind one backend interface with three modes: JSON
//! Lines, SQLite (WAL), or both for migration validation.

pub mod backend;
pub mod error;
pub mod ring;
pub mod store;
pub mod writer;

pub use backend::{
    open_backend, BackendMode, DualBackend, JsonlBackend, SqliteBackend, TickBackend,
};
pub use error::{StoreError, StoreResult};
pub use ring::TickRing;
pub use store::{StoreConfig, TickStore};
pub use writer::{tick_date, WriterStats};
