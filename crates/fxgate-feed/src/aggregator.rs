//! Per-symbol quote book.
//!
//! Each LP contributes its latest quote; the book tracks the best bid
//! (highest) and best ask (lowest) over the fresh entries. Stale entries
//! are excluded from selection but kept in the map so a late update can
//! resurrect the LP without losing its prior price.

use chrono::Utc;
use dashmap::DashMap;
use fxgate_core::{LpId, LpQuote, Price, QuoteSnapshot, Symbol, Tick};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

struct SymbolBook {
    snapshot: QuoteSnapshot,
}

impl SymbolBook {
    fn new(symbol: Symbol) -> Self {
        Self {
            snapshot: QuoteSnapshot::empty(symbol),
        }
    }

    /// Recompute best bid/ask over fresh entries.
    ///
    /// Tie-break on equal price: earlier `ts_ms` wins; on equal `ts_ms`,
    /// lexically lower lp_id.
    fn recompute(&mut self, now_ms: i64) {
        let mut best_bid: Option<(Price, i64, &LpId)> = None;
        let mut best_ask: Option<(Price, i64, &LpId)> = None;

        for (lp, quote) in &self.snapshot.per_lp {
            if !quote.is_fresh(now_ms) {
                continue;
            }
            let bid_key = (quote.bid, quote.ts_ms, lp);
            best_bid = Some(match best_bid {
                None => bid_key,
                Some(cur) if better_bid(bid_key, cur) => bid_key,
                Some(cur) => cur,
            });
            let ask_key = (quote.ask, quote.ts_ms, lp);
            best_ask = Some(match best_ask {
                None => ask_key,
                Some(cur) if better_ask(ask_key, cur) => ask_key,
                Some(cur) => cur,
            });
        }

        match best_bid {
            Some((px, _, lp)) => {
                self.snapshot.best_bid = Some(px);
                self.snapshot.best_bid_lp = Some(lp.clone());
            }
            None => {
                self.snapshot.best_bid = None;
                self.snapshot.best_bid_lp = None;
            }
        }
        match best_ask {
            Some((px, _, lp)) => {
                self.snapshot.best_ask = Some(px);
                self.snapshot.best_ask_lp = Some(lp.clone());
            }
            None => {
                self.snapshot.best_ask = None;
                self.snapshot.best_ask_lp = None;
            }
        }
    }
}

/// Higher bid wins; earlier timestamp breaks ties, then lower lp_id.
fn better_bid(candidate: (Price, i64, &LpId), current: (Price, i64, &LpId)) -> bool {
    candidate.0 > current.0
        || (candidate.0 == current.0
            && (candidate.1 < current.1 || (candidate.1 == current.1 && candidate.2 < current.2)))
}

/// Lower ask wins; earlier timestamp breaks ties, then lower lp_id.
fn better_ask(candidate: (Price, i64, &LpId), current: (Price, i64, &LpId)) -> bool {
    candidate.0 < current.0
        || (candidate.0 == current.0
            && (candidate.1 < current.1 || (candidate.1 == current.1 && candidate.2 < current.2)))
}

type BookEntry = Arc<RwLock<SymbolBook>>;

/// Aggregated quote books, one per symbol.
pub struct QuoteBook {
    books: DashMap<Symbol, BookEntry>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
        }
    }

    fn get_or_create(&self, symbol: &Symbol) -> BookEntry {
        self.books
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(RwLock::new(SymbolBook::new(symbol.clone()))))
            .clone()
    }

    /// Ingest one per-LP tick.
    ///
    /// Returns the canonical aggregated tick when `(best_bid, best_ask)`
    /// changed, carrying `lp_id = best_bid_lp`.
    pub fn ingest(&self, tick: &Tick) -> Option<Tick> {
        self.ingest_at(tick, Utc::now().timestamp_millis())
    }

    /// Ingest with an explicit clock (staleness reference).
    pub fn ingest_at(&self, tick: &Tick, now_ms: i64) -> Option<Tick> {
        if !tick.is_valid() {
            warn!(symbol = %tick.symbol, lp_id = %tick.lp_id, "Dropping crossed or empty tick");
            return None;
        }

        let entry = self.get_or_create(&tick.symbol);
        let mut book = entry.write();

        let prev = (book.snapshot.best_bid, book.snapshot.best_ask);

        book.snapshot.per_lp.insert(
            tick.lp_id.clone(),
            LpQuote {
                bid: tick.bid,
                ask: tick.ask,
                ts_ms: tick.ts_ms,
            },
        );
        book.recompute(now_ms);

        let best = (book.snapshot.best_bid, book.snapshot.best_ask);
        if best == prev {
            return None;
        }

        let (Some(bid), Some(ask)) = best else {
            return None;
        };
        let lp = book
            .snapshot
            .best_bid_lp
            .clone()
            .unwrap_or_else(|| tick.lp_id.clone());
        debug!(
            symbol = %tick.symbol,
            %bid,
            %ask,
            best_lp = %lp,
            "Best pair changed"
        );
        Some(Tick::new(tick.symbol.clone(), bid, ask, tick.ts_ms, lp))
    }

    /// Current snapshot for a symbol, by value.
    pub fn snapshot(&self, symbol: &Symbol) -> Option<QuoteSnapshot> {
        self.books.get(symbol).map(|e| e.read().snapshot.clone())
    }

    /// All symbols with at least one quote.
    pub fn symbols(&self) -> Vec<Symbol> {
        self.books.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for QuoteBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxgate_core::QUOTE_STALE_MS;
    use rust_decimal_macros::dec;

    fn sym() -> Symbol {
        Symbol::parse("EURUSD").unwrap()
    }

    fn tick(lp: &str, bid: &str, ask: &str, ts: i64) -> Tick {
        Tick::new(
            sym(),
            bid.parse().unwrap(),
            ask.parse().unwrap(),
            ts,
            LpId::from(lp),
        )
    }

    #[test]
    fn test_single_lp_sets_best() {
        let book = QuoteBook::new();
        let out = book.ingest_at(&tick("LP_A", "1.0850", "1.0852", 1_000), 1_000);
        let out = out.unwrap();
        assert_eq!(out.bid, Price::new(dec!(1.0850)));
        assert_eq!(out.ask, Price::new(dec!(1.0852)));
        assert_eq!(out.lp_id, LpId::from("LP_A"));
    }

    #[test]
    fn test_best_across_lps() {
        let book = QuoteBook::new();
        book.ingest_at(&tick("LP_A", "1.0850", "1.0852", 1_000), 1_000);
        let out = book
            .ingest_at(&tick("LP_B", "1.0851", "1.0853", 1_001), 1_001)
            .unwrap();

        // Best bid from LP_B (higher), best ask stays LP_A (lower).
        assert_eq!(out.bid, Price::new(dec!(1.0851)));
        assert_eq!(out.ask, Price::new(dec!(1.0852)));
        assert_eq!(out.lp_id, LpId::from("LP_B"));

        let snapshot = book.snapshot(&sym()).unwrap();
        assert_eq!(snapshot.best_bid_lp, Some(LpId::from("LP_B")));
        assert_eq!(snapshot.best_ask_lp, Some(LpId::from("LP_A")));
    }

    #[test]
    fn test_unchanged_best_emits_nothing() {
        let book = QuoteBook::new();
        book.ingest_at(&tick("LP_A", "1.0850", "1.0852", 1_000), 1_000);
        // Worse quote from LP_B: best pair unchanged.
        let out = book.ingest_at(&tick("LP_B", "1.0849", "1.0853", 1_001), 1_001);
        assert!(out.is_none());
    }

    #[test]
    fn test_tie_breaks_earlier_ts_then_lexical() {
        let book = QuoteBook::new();
        book.ingest_at(&tick("LP_B", "1.0850", "1.0852", 1_000), 1_000);
        book.ingest_at(&tick("LP_A", "1.0850", "1.0852", 2_000), 2_000);

        // Same prices: LP_B quoted earlier, so it keeps the top spot.
        let snapshot = book.snapshot(&sym()).unwrap();
        assert_eq!(snapshot.best_bid_lp, Some(LpId::from("LP_B")));

        // Same price, same ts: lexically lower lp wins.
        let book = QuoteBook::new();
        book.ingest_at(&tick("LP_B", "1.0850", "1.0852", 1_000), 1_000);
        book.ingest_at(&tick("LP_A", "1.0850", "1.0852", 1_000), 1_000);
        let snapshot = book.snapshot(&sym()).unwrap();
        assert_eq!(snapshot.best_bid_lp, Some(LpId::from("LP_A")));
    }

    #[test]
    fn test_stale_lp_excluded_but_retained() {
        let book = QuoteBook::new();
        book.ingest_at(&tick("LP_A", "1.0860", "1.0862", 1_000), 1_000);
        book.ingest_at(&tick("LP_B", "1.0850", "1.0852", 1_500), 1_500);

        // Advance past LP_A staleness; LP_B update forces a recompute.
        let later = 1_000 + QUOTE_STALE_MS + 1;
        let out = book
            .ingest_at(&tick("LP_B", "1.0851", "1.0853", later), later)
            .unwrap();
        assert_eq!(out.bid, Price::new(dec!(1.0851)));
        assert_eq!(out.lp_id, LpId::from("LP_B"));

        // LP_A entry still present in the map.
        let snapshot = book.snapshot(&sym()).unwrap();
        assert!(snapshot.per_lp.contains_key(&LpId::from("LP_A")));

        // A fresh LP_A quote resurrects it on top.
        let out = book
            .ingest_at(&tick("LP_A", "1.0860", "1.0862", later + 10), later + 10)
            .unwrap();
        assert_eq!(out.bid, Price::new(dec!(1.0860)));
        assert_eq!(out.lp_id, LpId::from("LP_A"));
    }

    #[test]
    fn test_crossed_tick_rejected() {
        let book = QuoteBook::new();
        assert!(book
            .ingest_at(&tick("LP_A", "1.0853", "1.0852", 1_000), 1_000)
            .is_none());
        assert!(book.snapshot(&sym()).is_none());
    }
}
