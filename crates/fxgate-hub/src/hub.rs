//! The tick fan-out hub.
//!
//! `last_price` is updated on *every* broadcast regardless of
//! suppression, so a newly subscribed client always starts from the most
//! recent tick. Fan-out sends are non-blocking: a client whose queue is
//! full loses this update and stays connected.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use fxgate_core::{Symbol, Tick};
use fxgate_risk::DisabledSymbols;
use fxgate_telemetry::metrics;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Per-client outbound queue.
    #[serde(default = "default_client_queue")]
    pub client_queue: usize,
    /// Hub broadcast channel (feed -> hub worker).
    #[serde(default = "default_broadcast_queue")]
    pub broadcast_queue: usize,
    /// Counter report cadence.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_client_queue() -> usize {
    1_024
}

fn default_broadcast_queue() -> usize {
    4_096
}

fn default_stats_interval_secs() -> u64 {
    60
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_queue: default_client_queue(),
            broadcast_queue: default_broadcast_queue(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub ticks_received: u64,
    pub ticks_broadcast: u64,
    pub ticks_throttled: u64,
    pub clients: usize,
}

/// Outbound tick frame.
#[derive(Serialize)]
struct TickFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    symbol: &'a str,
    bid: &'a Decimal,
    ask: &'a Decimal,
    spread: &'a Decimal,
    ts: i64,
    lp: &'a str,
}

impl<'a> TickFrame<'a> {
    fn from_tick(tick: &'a Tick) -> Self {
        Self {
            kind: "tick",
            symbol: tick.symbol.as_str(),
            bid: &tick.bid.0,
            ask: &tick.ask.0,
            spread: &tick.spread.0,
            ts: tick.ts_ms,
            lp: tick.lp_id.as_str(),
        }
    }
}

struct ClientEntry {
    subject: String,
    subscriptions: RwLock<HashSet<Symbol>>,
    tx: mpsc::Sender<String>,
}

/// Bid move below this fraction of the previous bid is noise.
const SUPPRESS_REL_DELTA: Decimal = Decimal::from_parts(1, 0, 0, false, 6); // 1e-6

/// The hub.
pub struct TickHub {
    config: HubConfig,
    last_price: RwLock<HashMap<Symbol, Tick>>,
    disabled: Arc<DisabledSymbols>,
    clients: DashMap<u64, ClientEntry>,
    next_id: AtomicU64,
    ticks_received: AtomicU64,
    ticks_broadcast: AtomicU64,
    ticks_throttled: AtomicU64,
}

impl TickHub {
    pub fn new(config: HubConfig, disabled: Arc<DisabledSymbols>) -> Self {
        Self {
            config,
            last_price: RwLock::new(HashMap::new()),
            disabled,
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
            ticks_received: AtomicU64::new(0),
            ticks_broadcast: AtomicU64::new(0),
            ticks_throttled: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn disabled(&self) -> &Arc<DisabledSymbols> {
        &self.disabled
    }

    /// Register an authenticated client; returns its id and the outbound
    /// frame queue.
    pub fn register(&self, subject: String) -> (u64, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.client_queue);
        self.clients.insert(
            id,
            ClientEntry {
                subject,
                subscriptions: RwLock::new(HashSet::new()),
                tx,
            },
        );
        metrics::HUB_CLIENTS.set(self.clients.len() as i64);
        info!(client_id = id, clients = self.clients.len(), "Client registered");
        (id, rx)
    }

    /// Drop a client and its buffers. Safe under concurrent broadcast:
    /// in-flight sends fail quietly on the closed channel.
    pub fn unregister(&self, client_id: u64) {
        if self.clients.remove(&client_id).is_some() {
            metrics::HUB_CLIENTS.set(self.clients.len() as i64);
            info!(client_id, clients = self.clients.len(), "Client unregistered");
        }
    }

    /// Add symbols to a client's subscription set and immediately offer
    /// the latest known tick for each (non-blocking).
    pub fn subscribe(&self, client_id: u64, symbols: Vec<Symbol>) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        let mut fresh = Vec::new();
        {
            let mut subscriptions = client.subscriptions.write();
            for symbol in symbols {
                if subscriptions.insert(symbol.clone()) {
                    fresh.push(symbol);
                }
            }
        }

        let last_price = self.last_price.read();
        for symbol in fresh {
            if let Some(tick) = last_price.get(&symbol) {
                if let Ok(frame) = serde_json::to_string(&TickFrame::from_tick(tick)) {
                    let _ = client.tx.try_send(frame);
                }
            }
        }
        debug!(client_id, "Subscriptions updated");
    }

    /// Latest known tick for a symbol.
    pub fn last_price(&self, symbol: &Symbol) -> Option<Tick> {
        self.last_price.read().get(symbol).cloned()
    }

    /// Accept one aggregated tick: cache it, then conditionally fan out.
    pub fn broadcast(&self, tick: &Tick) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);

        // The cache is updated before the throttle decision, on every
        // tick, so replay never serves anything stale.
        let prev = {
            let mut last_price = self.last_price.write();
            last_price.insert(tick.symbol.clone(), tick.clone())
        };

        let suppressed = if self.disabled.contains(&tick.symbol) {
            true
        } else {
            match prev {
                Some(prev_tick) => match tick.bid.rel_diff(prev_tick.bid) {
                    Some(delta) => delta < SUPPRESS_REL_DELTA,
                    None => false,
                },
                None => false,
            }
        };

        if suppressed {
            self.ticks_throttled.fetch_add(1, Ordering::Relaxed);
            metrics::TICKS_THROTTLED_TOTAL.inc();
            return;
        }

        // Serialize once, offer to every subscriber.
        let frame = match serde_json::to_string(&TickFrame::from_tick(tick)) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(?e, "Tick serialization failed");
                return;
            }
        };
        for client in self.clients.iter() {
            if client.subscriptions.read().contains(&tick.symbol) {
                // Full queue: this client misses this update.
                let _ = client.tx.try_send(frame.clone());
            }
        }
        self.ticks_broadcast.fetch_add(1, Ordering::Relaxed);
        metrics::TICKS_BROADCAST_TOTAL.inc();
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            ticks_broadcast: self.ticks_broadcast.load(Ordering::Relaxed),
            ticks_throttled: self.ticks_throttled.load(Ordering::Relaxed),
            clients: self.clients.len(),
        }
    }

    pub fn client_subject(&self, client_id: u64) -> Option<String> {
        self.clients.get(&client_id).map(|c| c.subject.clone())
    }
}

/// Log hub counters on a fixed cadence.
pub async fn run_stats_reporter(hub: Arc<TickHub>, shutdown: CancellationToken) {
    let interval = std::time::Duration::from_secs(hub.config.stats_interval_secs);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => return,
        }
        let stats = hub.stats();
        info!(
            ticks_received = stats.ticks_received,
            ticks_broadcast = stats.ticks_broadcast,
            ticks_throttled = stats.ticks_throttled,
            clients = stats.clients,
            "Hub counters"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxgate_core::LpId;
    use rust_decimal_macros::dec;

    fn sym() -> Symbol {
        Symbol::parse("EURUSD").unwrap()
    }

    fn tick(bid: Decimal, ts: i64) -> Tick {
        Tick::new(
            sym(),
            fxgate_core::Price::new(bid),
            fxgate_core::Price::new(bid + dec!(0.0002)),
            ts,
            LpId::from("LP_A"),
        )
    }

    fn hub() -> TickHub {
        TickHub::new(HubConfig::default(), Arc::new(DisabledSymbols::new()))
    }

    #[tokio::test]
    async fn test_throttle_sequence() {
        let hub = hub();
        let (client, mut rx) = hub.register("c1".to_string());
        hub.subscribe(client, vec![sym()]);

        // The spec sequence: #1 and #4 broadcast, #2 and #3 suppressed.
        hub.broadcast(&tick(dec!(1.08500), 1));
        hub.broadcast(&tick(dec!(1.08500001), 2));
        hub.broadcast(&tick(dec!(1.08500002), 3));
        hub.broadcast(&tick(dec!(1.08510), 4));

        let first = rx.try_recv().unwrap();
        assert!(first.contains("1.08500"));
        let second = rx.try_recv().unwrap();
        assert!(second.contains("1.08510"));
        assert!(rx.try_recv().is_err());

        let stats = hub.stats();
        assert_eq!(stats.ticks_received, 4);
        assert_eq!(stats.ticks_broadcast, 2);
        assert_eq!(stats.ticks_throttled, 2);
    }

    #[tokio::test]
    async fn test_last_price_updated_even_when_suppressed() {
        let hub = hub();
        hub.broadcast(&tick(dec!(1.08500), 1));
        hub.broadcast(&tick(dec!(1.08500001), 2));

        // Cache holds the suppressed tick.
        assert_eq!(hub.last_price(&sym()).unwrap().ts_ms, 2);
    }

    #[tokio::test]
    async fn test_new_subscriber_gets_replay() {
        let hub = hub();
        hub.broadcast(&tick(dec!(1.08500), 1));

        let (client, mut rx) = hub.register("c1".to_string());
        hub.subscribe(client, vec![sym()]);
        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("\"type\":\"tick\""));
        assert!(frame.contains("EURUSD"));
    }

    #[tokio::test]
    async fn test_disabled_symbol_always_suppressed() {
        let hub = hub();
        let (client, mut rx) = hub.register("c1".to_string());
        hub.subscribe(client, vec![sym()]);

        hub.disabled.disable(sym());
        hub.broadcast(&tick(dec!(1.08500), 1));
        hub.broadcast(&tick(dec!(1.09500), 2));
        assert!(rx.try_recv().is_err());

        // Cache still advances for when it is re-enabled.
        assert_eq!(hub.last_price(&sym()).unwrap().ts_ms, 2);
    }

    #[tokio::test]
    async fn test_full_client_queue_drops_not_blocks() {
        let hub = TickHub::new(
            HubConfig {
                client_queue: 1,
                ..Default::default()
            },
            Arc::new(DisabledSymbols::new()),
        );
        let (client, mut rx) = hub.register("slow".to_string());
        hub.subscribe(client, vec![sym()]);

        hub.broadcast(&tick(dec!(1.08500), 1));
        hub.broadcast(&tick(dec!(1.08600), 2));
        hub.broadcast(&tick(dec!(1.08700), 3));

        // Only the first made it; the client is still registered.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.stats().clients, 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_client_gets_nothing() {
        let hub = hub();
        let (_client, mut rx) = hub.register("idle".to_string());
        hub.broadcast(&tick(dec!(1.08500), 1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_under_broadcast() {
        let hub = hub();
        let (client, rx) = hub.register("c1".to_string());
        hub.subscribe(client, vec![sym()]);
        drop(rx);
        hub.unregister(client);

        // No panic, no stuck state.
        hub.broadcast(&tick(dec!(1.08500), 1));
        assert_eq!(hub.stats().clients, 0);
    }
}
