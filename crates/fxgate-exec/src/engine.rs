//! The execution engine.
//!
//! # Order path (strict)
//!
//! 1. Risk gate — a failure rejects before the SOR is ever consulted.
//! 2. SOR decision — reject / internalize / route / split.
//! 3. FIX leg — NewOrderSingle to the selected LP, `pending -> sent`.
//! 4. ExecutionReports — matched by client order id; duplicates by
//!    exec_id advance nothing; `cum_qty` never decreases.
//!
//! Terminal orders move to the history file; the live map holds working
//! orders plus a terminal-status index for late cancels.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use fxgate_core::{
    AccountId, AccountProfile, LpId, Order, OrderSide, OrderStatus, OrderType, Price, Qty,
    QuoteSnapshot, Symbol, TimeInForce,
};
use fxgate_feed::QuoteBook;
use fxgate_fix::messages::{ExecutionReport, NewOrderSingle, OrderCancelRequest, OrderStatusRequest};
use fxgate_fix::SessionHandle;
use fxgate_health::{HealthMonitor, ReportOutcome};
use fxgate_risk::RiskGate;
use fxgate_router::{Decision, InternalLeg, RoutedLeg, SmartOrderRouter};
use fxgate_store::TickStore;
use fxgate_telemetry::metrics;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ExecError, ExecResult};
use crate::history::OrderHistory;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Warn when an order sits in `sent` this long.
    #[serde(default = "default_sent_warn_secs")]
    pub sent_warn_secs: u64,
    /// Auto-cancel when an order sits in `sent` this long.
    #[serde(default = "default_sent_cancel_secs")]
    pub sent_cancel_secs: u64,
    /// Per-order wait for an OrderStatusRequest answer after reconnect.
    #[serde(default = "default_reconcile_timeout_secs")]
    pub reconcile_timeout_secs: u64,
    /// Timeout-watcher cadence.
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
}

fn default_sent_warn_secs() -> u64 {
    30
}

fn default_sent_cancel_secs() -> u64 {
    60
}

fn default_reconcile_timeout_secs() -> u64 {
    5
}

fn default_watch_interval_ms() -> u64 {
    1_000
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            sent_warn_secs: default_sent_warn_secs(),
            sent_cancel_secs: default_sent_cancel_secs(),
            reconcile_timeout_secs: default_reconcile_timeout_secs(),
            watch_interval_ms: default_watch_interval_ms(),
        }
    }
}

/// An order as submitted by the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_id: String,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub qty: Qty,
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub tif: TimeInForce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub px: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_px: Option<Price>,
}

fn default_order_type() -> OrderType {
    OrderType::Market
}

/// Result of a `place`.
#[derive(Debug, Clone)]
pub enum PlaceOutcome {
    Accepted {
        order: Order,
        audit_id: String,
    },
    RiskRejected {
        order: Order,
        reason: &'static str,
    },
    RoutingRejected {
        order: Order,
        rule_id: Option<i64>,
        causes: Vec<String>,
    },
}

/// Result of a `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// OrderCancelRequest sent; the order stays live until the LP
    /// confirms.
    Requested,
    /// The order had already fully filled.
    TooLate,
    /// The order was already canceled or rejected.
    AlreadyTerminal,
    Unknown,
}

/// Events surfaced to the hub and downstream consumers.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    OrderUpdated(Order),
    /// B-book leg of a decision, for downstream book treatment.
    InternalizedLeg {
        order_id: String,
        account_id: AccountId,
        symbol: Symbol,
        side: OrderSide,
        qty: Qty,
        reference_px: Option<Price>,
    },
    /// Reconciliation got no answer; an operator has to look.
    OperatorReview {
        order_id: String,
        note: String,
    },
}

struct Tracked {
    order: Order,
    /// Price the routing decision was made on, for slippage scoring.
    quoted_px: Option<Price>,
    /// Quantity on the wire (equals order qty unless partially hedged).
    wire_qty: Qty,
    /// Internally filled (B-book leg) quantity.
    internal_qty: Qty,
    /// Cumulative wire fill reported so far.
    wire_cum: Qty,
    exec_ids: HashSet<String>,
    sent_mono: Option<Instant>,
    warned_slow: bool,
    cancel_sent: bool,
    reconcile_deadline: Option<Instant>,
    flagged_review: bool,
}

/// The execution engine. One per process.
pub struct ExecutionEngine {
    config: ExecConfig,
    risk: Arc<RiskGate>,
    router: Arc<SmartOrderRouter>,
    ticks: Arc<TickStore>,
    quotes: Arc<QuoteBook>,
    health: Arc<HealthMonitor>,
    sessions: DashMap<LpId, SessionHandle>,
    profiles: DashMap<AccountId, AccountProfile>,
    orders: DashMap<String, RwLock<Tracked>>,
    terminal: DashMap<String, OrderStatus>,
    history: OrderHistory,
    event_tx: mpsc::Sender<ExecEvent>,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecConfig,
        risk: Arc<RiskGate>,
        router: Arc<SmartOrderRouter>,
        ticks: Arc<TickStore>,
        quotes: Arc<QuoteBook>,
        health: Arc<HealthMonitor>,
        history: OrderHistory,
        event_tx: mpsc::Sender<ExecEvent>,
    ) -> Self {
        Self {
            config,
            risk,
            router,
            ticks,
            quotes,
            health,
            sessions: DashMap::new(),
            profiles: DashMap::new(),
            orders: DashMap::new(),
            terminal: DashMap::new(),
            history,
            event_tx,
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn register_session(&self, handle: SessionHandle) {
        self.sessions.insert(handle.lp_id().clone(), handle);
    }

    pub fn register_profile(&self, profile: AccountProfile) {
        self.profiles.insert(profile.account_id.clone(), profile);
    }

    /// Trading profile for an account; unknown accounts get the retail
    /// default with zero toxicity.
    pub fn profile_for(&self, account: &AccountId) -> AccountProfile {
        self.profiles
            .get(account)
            .map(|p| p.clone())
            .unwrap_or_else(|| AccountProfile::new(account.clone(), "retail", 0.0))
    }

    /// Live order snapshot.
    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).map(|t| t.read().order.clone())
    }

    /// All live orders, for the status API.
    pub fn live_orders(&self) -> Vec<Order> {
        self.orders.iter().map(|t| t.read().order.clone()).collect()
    }

    // ------------------------------------------------------------------
    // Place
    // ------------------------------------------------------------------

    /// Run an order through risk, routing and onto the wire.
    pub async fn place(&self, request: OrderRequest) -> ExecResult<PlaceOutcome> {
        let mut order = Order::new(
            fxgate_core::ClientId::new(request.client_id),
            request.account_id,
            request.symbol,
            request.side,
            request.qty,
            request.order_type,
            request.tif,
            request.px,
            request.stop_px,
        );

        // 1. Risk gate, before the SOR is touched.
        let recent = self.ticks.get_recent(&order.symbol, 32);
        if let Err(rejection) = self.risk.check(&order, &recent) {
            self.finalize(&mut order, OrderStatus::Rejected);
            return Ok(PlaceOutcome::RiskRejected {
                order,
                reason: rejection.reason,
            });
        }

        // 2. Routing.
        let profile = self.profile_for(&order.account_id);
        let snapshot = self
            .quotes
            .snapshot(&order.symbol)
            .unwrap_or_else(|| QuoteSnapshot::empty(order.symbol.clone()));
        let outcome = self.router.decide(&order, &profile, &snapshot)?;
        let audit_id = outcome.audit_id;

        match outcome.decision {
            Decision::Reject { rule_id, causes } => {
                self.finalize(&mut order, OrderStatus::Rejected);
                Ok(PlaceOutcome::RoutingRejected {
                    order,
                    rule_id,
                    causes,
                })
            }
            Decision::Bbook { leg, .. } => {
                self.fill_internal(&mut order, &leg);
                self.risk.record_trade(&order.account_id);
                self.risk.position_opened(&order.account_id);
                self.finalize(&mut order, OrderStatus::Filled);
                Ok(PlaceOutcome::Accepted { order, audit_id })
            }
            Decision::Abook { leg, .. } => {
                self.send_wire(order, leg, Qty::ZERO, None, audit_id).await
            }
            Decision::PartialHedge { abook, bbook, .. } => {
                let internal = bbook.qty;
                self.send_wire(order, abook, internal, Some(bbook), audit_id)
                    .await
            }
        }
    }

    /// Internal (B-book) fill at the decision's reference price.
    fn fill_internal(&self, order: &mut Order, leg: &InternalLeg) {
        order.filled_qty = order.filled_qty + leg.qty;
        if order.avg_px.is_none() {
            order.avg_px = leg.reference_px;
        }
        self.risk
            .exposure()
            .apply_fill(&order.symbol, order.side, leg.qty);
        let _ = self.event_tx.try_send(ExecEvent::InternalizedLeg {
            order_id: order.id.to_string(),
            account_id: order.account_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: leg.qty,
            reference_px: leg.reference_px,
        });
    }

    /// Put the A-book leg on the wire and start tracking.
    async fn send_wire(
        &self,
        mut order: Order,
        leg: RoutedLeg,
        internal_qty: Qty,
        internal_leg: Option<InternalLeg>,
        audit_id: String,
    ) -> ExecResult<PlaceOutcome> {
        let Some(session) = self.sessions.get(&leg.lp_id).map(|s| s.clone()) else {
            warn!(order_id = %order.id, lp_id = %leg.lp_id, "No session for selected LP");
            self.finalize(&mut order, OrderStatus::Rejected);
            return Ok(PlaceOutcome::RoutingRejected {
                order,
                rule_id: None,
                causes: vec!["no_session".to_string()],
            });
        };

        order.selected_lp = Some(leg.lp_id.clone());
        if let Some(internal) = &internal_leg {
            self.fill_internal(&mut order, internal);
        }

        self.risk.exposure().reserve(&order.symbol, leg.qty);
        self.risk.record_trade(&order.account_id);

        // The wire message carries the hedged quantity, not the total.
        let mut wire_order = order.clone();
        wire_order.qty = leg.qty;
        let msg = NewOrderSingle::build(&wire_order);

        if let Err(e) = session.send(msg).await {
            warn!(order_id = %order.id, ?e, "FIX send failed, rejecting order");
            self.risk.exposure().release(&order.symbol, leg.qty);
            self.finalize(&mut order, OrderStatus::Rejected);
            return Ok(PlaceOutcome::RoutingRejected {
                order,
                rule_id: None,
                causes: vec!["session_unavailable".to_string()],
            });
        }

        order.status = OrderStatus::Sent;
        order.sent_at = Some(Utc::now().timestamp_millis());
        info!(
            order_id = %order.id,
            lp_id = %leg.lp_id,
            qty = %leg.qty,
            px = %leg.px,
            "Order sent"
        );

        let tracked = Tracked {
            order: order.clone(),
            quoted_px: Some(leg.px),
            wire_qty: leg.qty,
            internal_qty,
            wire_cum: Qty::ZERO,
            exec_ids: HashSet::new(),
            sent_mono: Some(Instant::now()),
            warned_slow: false,
            cancel_sent: false,
            reconcile_deadline: None,
            flagged_review: false,
        };
        self.orders
            .insert(order.id.to_string(), RwLock::new(tracked));
        self.emit_update(&order);

        Ok(PlaceOutcome::Accepted { order, audit_id })
    }

    fn finalize(&self, order: &mut Order, status: OrderStatus) {
        order.status = status;
        order.finalized_at = Some(Utc::now().timestamp_millis());
        let label = status.to_string();
        metrics::ORDERS_TOTAL
            .with_label_values(&[label.as_str()])
            .inc();
        self.terminal.insert(order.id.to_string(), status);
        if let Err(e) = self.history.append(order) {
            warn!(order_id = %order.id, ?e, "Order history write failed");
        }
        self.emit_update(order);
    }

    fn emit_update(&self, order: &Order) {
        let _ = self.event_tx.try_send(ExecEvent::OrderUpdated(order.clone()));
    }

    // ------------------------------------------------------------------
    // ExecutionReports
    // ------------------------------------------------------------------

    /// Apply one inbound ExecutionReport.
    ///
    /// Unknown order ids are logged and dropped; they never synthesize
    /// state.
    pub fn on_execution_report(&self, lp_id: &LpId, report: &ExecutionReport) {
        // Cancel confirmations carry the cancel's ClOrdID; map back.
        let key = report
            .cl_ord_id
            .strip_suffix("_cxl")
            .unwrap_or(&report.cl_ord_id);

        let Some(entry) = self.orders.get(key) else {
            warn!(
                cl_ord_id = %report.cl_ord_id,
                exec_id = %report.exec_id,
                lp_id = %lp_id,
                "Unsolicited ExecutionReport dropped"
            );
            return;
        };
        let mut tracked = entry.write();

        // Duplicates advance nothing.
        if !tracked.exec_ids.insert(report.exec_id.clone()) {
            debug!(
                order_id = %tracked.order.id,
                exec_id = %report.exec_id,
                "Duplicate ExecutionReport ignored"
            );
            return;
        }
        tracked.reconcile_deadline = None;

        let latency_ms = tracked
            .order
            .sent_at
            .map(|sent| (report.ts_ms - sent).max(0) as f64)
            .unwrap_or(0.0);
        if tracked.wire_cum.is_zero() && tracked.exec_ids.len() == 1 {
            metrics::ORDER_ROUNDTRIP_MS
                .with_label_values(&[lp_id.as_str()])
                .observe(latency_ms);
        }

        let Some(reported_status) = report.ord_status else {
            debug!(order_id = %tracked.order.id, "Status-neutral report");
            return;
        };

        match reported_status {
            OrderStatus::Sent => {
                // Plain acknowledgement.
                debug!(order_id = %tracked.order.id, "Order acknowledged");
            }
            OrderStatus::Partial | OrderStatus::Filled => {
                self.apply_fill_report(&mut tracked, lp_id, report, latency_ms, reported_status);
            }
            OrderStatus::Canceled => {
                let remaining = tracked.wire_qty - tracked.wire_cum;
                self.risk
                    .exposure()
                    .release(&tracked.order.symbol, remaining);
                self.health
                    .record(lp_id, ReportOutcome::Cancel { latency_ms });
                self.transition(&mut tracked, OrderStatus::Canceled);
            }
            OrderStatus::Rejected => {
                // A rejected order releases its reserved risk budget.
                let remaining = tracked.wire_qty - tracked.wire_cum;
                self.risk
                    .exposure()
                    .release(&tracked.order.symbol, remaining);
                self.health
                    .record(lp_id, ReportOutcome::Reject { latency_ms });
                self.transition(&mut tracked, OrderStatus::Rejected);
            }
            OrderStatus::Pending => {}
        }
    }

    fn apply_fill_report(
        &self,
        tracked: &mut Tracked,
        lp_id: &LpId,
        report: &ExecutionReport,
        latency_ms: f64,
        reported_status: OrderStatus,
    ) {
        let new_cum = report.cum_qty;
        if new_cum < tracked.wire_cum {
            // A gap-filled report trying to rewind; monotonicity wins.
            warn!(
                order_id = %tracked.order.id,
                reported = %new_cum,
                current = %tracked.wire_cum,
                "Retrograde cum_qty ignored"
            );
            return;
        }
        let delta = new_cum - tracked.wire_cum;
        tracked.wire_cum = new_cum;

        if delta.is_positive() {
            self.risk
                .exposure()
                .apply_fill(&tracked.order.symbol, tracked.order.side, delta);
            self.risk.exposure().release(&tracked.order.symbol, delta);

            let slippage_pips = match (report.last_px.or(report.avg_px), tracked.quoted_px) {
                (Some(fill), Some(quoted)) => {
                    fill.pips_from(quoted).abs().to_string().parse().unwrap_or(0.0)
                }
                _ => 0.0,
            };
            self.health.record(
                lp_id,
                ReportOutcome::Fill {
                    slippage_pips,
                    latency_ms,
                },
            );
        }

        let order = &mut tracked.order;
        let total = tracked.internal_qty + tracked.wire_cum;
        order.filled_qty = if total > order.qty { order.qty } else { total };
        if let Some(avg_px) = report.avg_px {
            order.avg_px = Some(avg_px);
        }

        let wire_done = reported_status == OrderStatus::Filled
            || tracked.wire_cum >= tracked.wire_qty;
        if wire_done && order.filled_qty >= order.qty {
            self.risk.position_opened(&order.account_id);
            self.transition(tracked, OrderStatus::Filled);
        } else {
            self.transition(tracked, OrderStatus::Partial);
        }
    }

    /// Advance the order's status if the state machine permits it.
    fn transition(&self, tracked: &mut Tracked, next: OrderStatus) {
        let current = tracked.order.status;
        if !current.can_transition_to(next) {
            if current != next {
                warn!(
                    order_id = %tracked.order.id,
                    from = %current,
                    to = %next,
                    "Illegal status transition ignored"
                );
            }
            return;
        }
        tracked.order.status = next;
        debug!(order_id = %tracked.order.id, from = %current, to = %next, "Order status");
        if next.is_terminal() {
            self.finalize(&mut tracked.order, next);
        } else {
            self.emit_update(&tracked.order);
        }
    }

    // ------------------------------------------------------------------
    // Cancel
    // ------------------------------------------------------------------

    /// Request cancellation. The order only becomes `canceled` on the
    /// LP's confirming ExecutionReport.
    pub async fn cancel(&self, order_id: &str) -> ExecResult<CancelOutcome> {
        if let Some(status) = self.terminal.get(order_id).map(|s| *s) {
            return Ok(match status {
                OrderStatus::Filled => CancelOutcome::TooLate,
                _ => CancelOutcome::AlreadyTerminal,
            });
        }

        let Some(entry) = self.orders.get(order_id) else {
            return Ok(CancelOutcome::Unknown);
        };

        let (order, already_sent) = {
            let tracked = entry.read();
            if tracked.order.status.is_terminal() {
                return Ok(match tracked.order.status {
                    OrderStatus::Filled => CancelOutcome::TooLate,
                    _ => CancelOutcome::AlreadyTerminal,
                });
            }
            (tracked.order.clone(), tracked.cancel_sent)
        };
        drop(entry);

        if already_sent {
            return Ok(CancelOutcome::Requested);
        }

        let lp_id = order
            .selected_lp
            .clone()
            .ok_or_else(|| ExecError::NoSession("order has no LP".to_string()))?;
        let session = self
            .sessions
            .get(&lp_id)
            .map(|s| s.clone())
            .ok_or_else(|| ExecError::NoSession(lp_id.to_string()))?;

        session.send(OrderCancelRequest::build(&order)).await?;
        if let Some(entry) = self.orders.get(order_id) {
            entry.write().cancel_sent = true;
        }
        info!(order_id = %order.id, lp_id = %lp_id, "Cancel requested");
        Ok(CancelOutcome::Requested)
    }

    // ------------------------------------------------------------------
    // Timeouts and reconciliation
    // ------------------------------------------------------------------

    /// One watcher pass: slow-order warnings, auto-cancel, reconcile
    /// deadlines. Returns order ids that need an auto-cancel.
    pub fn scan_timeouts(&self) -> Vec<String> {
        let warn_after = std::time::Duration::from_secs(self.config.sent_warn_secs);
        let cancel_after = std::time::Duration::from_secs(self.config.sent_cancel_secs);
        let mut to_cancel = Vec::new();

        for entry in self.orders.iter() {
            let mut tracked = entry.value().write();
            if tracked.order.status.is_terminal() {
                continue;
            }

            if let Some(deadline) = tracked.reconcile_deadline {
                if Instant::now() >= deadline && !tracked.flagged_review {
                    tracked.flagged_review = true;
                    tracked.reconcile_deadline = None;
                    warn!(
                        order_id = %tracked.order.id,
                        "Reconciliation unanswered, flagging for operator review"
                    );
                    let _ = self.event_tx.try_send(ExecEvent::OperatorReview {
                        order_id: tracked.order.id.to_string(),
                        note: "no ExecutionReport after reconnect reconciliation".to_string(),
                    });
                }
            }

            let Some(sent) = tracked.sent_mono else {
                continue;
            };
            let age = sent.elapsed();
            if age >= cancel_after && !tracked.cancel_sent {
                to_cancel.push(tracked.order.id.to_string());
            } else if age >= warn_after && !tracked.warned_slow {
                tracked.warned_slow = true;
                warn!(
                    order_id = %tracked.order.id,
                    age_secs = age.as_secs(),
                    "Order slow to fill"
                );
            }
        }
        to_cancel
    }

    /// After session recovery, ask the LP where every non-terminal order
    /// stands. Orders with no answer stay `sent` and get flagged by the
    /// watcher.
    pub async fn reconcile(&self, lp_id: &LpId) -> ExecResult<u32> {
        let session = self
            .sessions
            .get(lp_id)
            .map(|s| s.clone())
            .ok_or_else(|| ExecError::NoSession(lp_id.to_string()))?;
        self.health.on_reconnect(lp_id);

        let pending: Vec<Order> = self
            .orders
            .iter()
            .filter_map(|entry| {
                let tracked = entry.read();
                (!tracked.order.status.is_terminal()
                    && tracked.order.selected_lp.as_ref() == Some(lp_id))
                .then(|| tracked.order.clone())
            })
            .collect();

        let deadline = Instant::now()
            + std::time::Duration::from_secs(self.config.reconcile_timeout_secs);
        let mut sent = 0;
        for order in pending {
            session.send(OrderStatusRequest::build(&order)).await?;
            if let Some(entry) = self.orders.get(order.id.as_str()) {
                entry.write().reconcile_deadline = Some(deadline);
            }
            sent += 1;
        }
        info!(lp_id = %lp_id, orders = sent, "Reconnect reconciliation started");
        Ok(sent)
    }
}
