//! Per-symbol exposure: net and gross quantities, updated on every fill,
//! read by the risk gate and by clients for pre-trade preview.

use dashmap::DashMap;
use fxgate_core::{OrderSide, Qty, Symbol};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Exposure snapshot for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exposure {
    pub net_qty: Qty,
    pub gross_qty: Qty,
    pub limit: Qty,
    pub breach_count: u64,
}

impl Exposure {
    fn new(limit: Qty) -> Self {
        Self {
            net_qty: Qty::ZERO,
            gross_qty: Qty::ZERO,
            limit,
            breach_count: 0,
        }
    }
}

/// Tracks exposure per symbol plus reserved (in-flight) quantities.
pub struct ExposureTracker {
    per_symbol: DashMap<Symbol, RwLock<Exposure>>,
    /// Quantity reserved by accepted-but-unfilled orders.
    reserved: DashMap<Symbol, RwLock<Qty>>,
    default_limit: Qty,
}

impl ExposureTracker {
    pub fn new(default_limit: Qty) -> Self {
        Self {
            per_symbol: DashMap::new(),
            reserved: DashMap::new(),
            default_limit,
        }
    }

    /// Apply a fill immediately.
    pub fn apply_fill(&self, symbol: &Symbol, side: OrderSide, qty: Qty) {
        let entry = self
            .per_symbol
            .entry(symbol.clone())
            .or_insert_with(|| RwLock::new(Exposure::new(self.default_limit)));
        let mut exposure = entry.write();
        let signed = qty.inner() * Decimal::from(side.sign());
        exposure.net_qty = Qty::new(exposure.net_qty.inner() + signed);
        exposure.gross_qty = exposure.gross_qty + qty;
        if exposure.net_qty.abs() > exposure.limit {
            exposure.breach_count += 1;
            warn!(
                %symbol,
                net = %exposure.net_qty,
                limit = %exposure.limit,
                breaches = exposure.breach_count,
                "Exposure limit breached"
            );
        }
    }

    /// Reserve quantity for an order the gate has accepted.
    pub fn reserve(&self, symbol: &Symbol, qty: Qty) {
        let entry = self
            .reserved
            .entry(symbol.clone())
            .or_insert_with(|| RwLock::new(Qty::ZERO));
        let mut reserved = entry.write();
        *reserved = *reserved + qty;
    }

    /// Release a reservation (order rejected, canceled, or its fills have
    /// been applied).
    pub fn release(&self, symbol: &Symbol, qty: Qty) {
        if let Some(entry) = self.reserved.get(symbol) {
            let mut reserved = entry.write();
            let next = reserved.inner() - qty.inner();
            *reserved = Qty::new(next.max(Decimal::ZERO));
        }
    }

    pub fn reserved_qty(&self, symbol: &Symbol) -> Qty {
        self.reserved
            .get(symbol)
            .map(|e| *e.read())
            .unwrap_or(Qty::ZERO)
    }

    /// Exposure for one symbol (zeroes if never traded).
    pub fn exposure(&self, symbol: &Symbol) -> Exposure {
        self.per_symbol
            .get(symbol)
            .map(|e| e.read().clone())
            .unwrap_or_else(|| Exposure::new(self.default_limit))
    }

    /// Would a fill of `qty` on `side` push |net| past the symbol limit,
    /// counting outstanding reservations against the headroom?
    pub fn would_breach_symbol(&self, symbol: &Symbol, side: OrderSide, qty: Qty) -> bool {
        let exposure = self.exposure(symbol);
        let reserved = self.reserved_qty(symbol);
        let projected = exposure.net_qty.inner() + qty.inner() * Decimal::from(side.sign());
        projected.abs() + reserved.inner() > exposure.limit.inner()
    }

    /// Totals across all symbols: (sum |net|, sum gross).
    pub fn totals(&self) -> (Qty, Qty) {
        let mut net = Decimal::ZERO;
        let mut gross = Decimal::ZERO;
        for entry in self.per_symbol.iter() {
            let exposure = entry.read();
            net += exposure.net_qty.inner().abs();
            gross += exposure.gross_qty.inner();
        }
        (Qty::new(net), Qty::new(gross))
    }

    /// All tracked symbols with their exposure, for the status API.
    pub fn all(&self) -> Vec<(Symbol, Exposure)> {
        self.per_symbol
            .iter()
            .map(|e| (e.key().clone(), e.value().read().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sym() -> Symbol {
        Symbol::parse("EURUSD").unwrap()
    }

    fn tracker() -> ExposureTracker {
        ExposureTracker::new(Qty::new(dec!(10)))
    }

    #[test]
    fn test_fills_accumulate_net_and_gross() {
        let t = tracker();
        t.apply_fill(&sym(), OrderSide::Buy, Qty::new(dec!(2)));
        t.apply_fill(&sym(), OrderSide::Sell, Qty::new(dec!(0.5)));

        let e = t.exposure(&sym());
        assert_eq!(e.net_qty, Qty::new(dec!(1.5)));
        assert_eq!(e.gross_qty, Qty::new(dec!(2.5)));
        assert_eq!(e.breach_count, 0);
    }

    #[test]
    fn test_breach_counted() {
        let t = tracker();
        t.apply_fill(&sym(), OrderSide::Buy, Qty::new(dec!(11)));
        assert_eq!(t.exposure(&sym()).breach_count, 1);
    }

    #[test]
    fn test_would_breach_projection() {
        let t = tracker();
        t.apply_fill(&sym(), OrderSide::Buy, Qty::new(dec!(8)));
        assert!(!t.would_breach_symbol(&sym(), OrderSide::Buy, Qty::new(dec!(2))));
        assert!(t.would_breach_symbol(&sym(), OrderSide::Buy, Qty::new(dec!(3))));
        // Selling reduces |net|.
        assert!(!t.would_breach_symbol(&sym(), OrderSide::Sell, Qty::new(dec!(3))));
    }

    #[test]
    fn test_reservations_count_against_headroom() {
        let t = tracker();
        t.reserve(&sym(), Qty::new(dec!(9)));
        assert!(t.would_breach_symbol(&sym(), OrderSide::Buy, Qty::new(dec!(2))));
        t.release(&sym(), Qty::new(dec!(9)));
        assert!(!t.would_breach_symbol(&sym(), OrderSide::Buy, Qty::new(dec!(2))));
    }

    #[test]
    fn test_release_floors_at_zero() {
        let t = tracker();
        t.release(&sym(), Qty::new(dec!(5)));
        assert_eq!(t.reserved_qty(&sym()), Qty::ZERO);
    }

    #[test]
    fn test_totals() {
        let t = tracker();
        let other = Symbol::parse("GBPUSD").unwrap();
        t.apply_fill(&sym(), OrderSide::Buy, Qty::new(dec!(2)));
        t.apply_fill(&other, OrderSide::Sell, Qty::new(dec!(3)));
        let (net, gross) = t.totals();
        assert_eq!(net, Qty::new(dec!(5)));
        assert_eq!(gross, Qty::new(dec!(5)));
    }
}
