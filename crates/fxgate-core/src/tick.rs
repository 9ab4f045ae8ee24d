//! Market data types: ticks and per-symbol quote snapshots.

use crate::{LpId, Price, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A per-LP quote entry older than this is excluded from best-price
/// selection (but retained so a late update can resurrect the LP).
pub const QUOTE_STALE_MS: i64 = 5_000;

/// One quote observation for one symbol from one LP.
///
/// Immutable after creation. `ts_ms` is the timestamp carried in the LP's
/// FIX message, not local receive time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: Symbol,
    pub bid: Price,
    pub ask: Price,
    pub spread: Price,
    pub ts_ms: i64,
    pub lp_id: LpId,
}

impl Tick {
    /// Create a tick; spread is derived as `ask - bid`.
    pub fn new(symbol: Symbol, bid: Price, ask: Price, ts_ms: i64, lp_id: LpId) -> Self {
        Self {
            symbol,
            bid,
            ask,
            spread: ask - bid,
            ts_ms,
            lp_id,
        }
    }

    /// Mid price, used by the volatility circuit breaker.
    pub fn mid(&self) -> Price {
        Price::new((self.bid.inner() + self.ask.inner()) / rust_decimal::Decimal::TWO)
    }

    /// A tick with a crossed or empty book is not usable for routing.
    pub fn is_valid(&self) -> bool {
        self.bid.is_positive() && self.ask.is_positive() && self.bid < self.ask
    }
}

/// Latest quote from a single LP within a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LpQuote {
    pub bid: Price,
    pub ask: Price,
    pub ts_ms: i64,
}

impl LpQuote {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms - self.ts_ms <= QUOTE_STALE_MS
    }
}

/// Aggregated best bid/ask across LPs for one symbol.
///
/// Mutable only by the quote aggregator; everyone else receives it by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub symbol: Symbol,
    pub best_bid: Option<Price>,
    pub best_bid_lp: Option<LpId>,
    pub best_ask: Option<Price>,
    pub best_ask_lp: Option<LpId>,
    pub per_lp: HashMap<LpId, LpQuote>,
}

impl QuoteSnapshot {
    pub fn empty(symbol: Symbol) -> Self {
        Self {
            symbol,
            best_bid: None,
            best_bid_lp: None,
            best_ask: None,
            best_ask_lp: None,
            per_lp: HashMap::new(),
        }
    }

    /// True when at least one fresh LP quotes both sides.
    pub fn has_liquidity(&self) -> bool {
        self.best_bid.is_some() && self.best_ask.is_some()
    }

    /// Fresh per-LP entries at `now_ms`, for SOR candidate selection.
    pub fn fresh_lps(&self, now_ms: i64) -> impl Iterator<Item = (&LpId, &LpQuote)> {
        self.per_lp.iter().filter(move |(_, q)| q.is_fresh(now_ms))
    }
}
