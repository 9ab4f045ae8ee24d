//! Market-data subscription tracking.
//!
//! Remembers the desired symbol set so it can be replayed after re-logon,
//! and tracks in-flight SecurityDefinitionRequests so the follow-up
//! MarketDataRequest goes out either on response or on the best-effort
//! timeout.

use fxgate_core::Symbol;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;

/// One pending SecurityDefinitionRequest.
#[derive(Debug, Clone)]
struct PendingSecDef {
    symbol: Symbol,
    requested_at: Instant,
}

/// Subscription manager for one FIX session.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    /// Desired subscriptions, replayed after every logon.
    symbols: RwLock<Vec<Symbol>>,
    /// SecurityDefinitionRequests awaiting a response, keyed by req id.
    pending: RwLock<HashMap<String, PendingSecDef>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol to the desired set. Returns false if already present.
    pub fn add(&self, symbol: Symbol) -> bool {
        let mut symbols = self.symbols.write();
        if symbols.contains(&symbol) {
            return false;
        }
        symbols.push(symbol);
        true
    }

    /// Snapshot of the desired subscription list.
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.read().clone()
    }

    pub fn record_secdef_request(&self, req_id: String, symbol: Symbol) {
        self.pending.write().insert(
            req_id,
            PendingSecDef {
                symbol,
                requested_at: Instant::now(),
            },
        );
    }

    /// Resolve a SecurityDefinition response; returns the symbol it was for.
    pub fn resolve_secdef(&self, req_id: &str) -> Option<Symbol> {
        self.pending.write().remove(req_id).map(|p| p.symbol)
    }

    /// Drain pending requests older than `timeout_ms` (best-effort path:
    /// proceed to MarketDataRequest without the definition).
    pub fn expire_pending(&self, timeout_ms: u64) -> Vec<Symbol> {
        let mut pending = self.pending.write();
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.requested_at.elapsed().as_millis() as u64 >= timeout_ms)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| pending.remove(&id).map(|p| p.symbol))
            .collect()
    }

    /// Drop in-flight requests (called on disconnect; the replay after
    /// re-logon starts the flow over).
    pub fn clear_pending(&self) {
        self.pending.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn test_add_dedupes() {
        let subs = SubscriptionManager::new();
        assert!(subs.add(sym("EURUSD")));
        assert!(!subs.add(sym("EURUSD")));
        assert_eq!(subs.symbols().len(), 1);
    }

    #[test]
    fn test_secdef_resolution() {
        let subs = SubscriptionManager::new();
        subs.record_secdef_request("req-1".to_string(), sym("EURUSD"));
        assert_eq!(subs.resolve_secdef("req-1"), Some(sym("EURUSD")));
        assert_eq!(subs.resolve_secdef("req-1"), None);
    }

    #[test]
    fn test_expire_pending_immediate_threshold() {
        let subs = SubscriptionManager::new();
        subs.record_secdef_request("req-1".to_string(), sym("GBPUSD"));
        // Zero timeout expires everything outstanding.
        let expired = subs.expire_pending(0);
        assert_eq!(expired, vec![sym("GBPUSD")]);
        assert!(subs.expire_pending(0).is_empty());
    }
}
