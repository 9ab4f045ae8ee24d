//! Quote aggregation.
//!
//! Merges per-LP ticks into a best-bid/best-ask snapshot per symbol and
//! emits a canonical tick whenever the best pair changes.

pub mod aggregator;
pub mod error;

pub use aggregator::QuoteBook;
pub use error::{FeedError, FeedResult};
