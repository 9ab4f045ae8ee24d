//! Routing decision logic.
//!
//! # Decision order (strict)
//!
//! 1. First matching active rule (ascending priority) binds the action.
//! 2. `reject`      -> Reject with the rule id.
//! 3. `bbook`       -> Internalize, no LP.
//! 4. `abook`       -> best fresh, non-degraded LP by side; tiebreak
//!                     health score, then p50 latency.
//! 5. `partial_hedge` -> step 4 for the hedge fraction, remainder B-book.
//!
//! No matching rule defaults to unrestricted A-book.

use std::sync::Arc;

use chrono::Utc;
use fxgate_core::{
    AccountProfile, LpId, Order, OrderSide, Price, Qty, QuoteSnapshot, RuleAction,
};
use fxgate_health::HealthMonitor;
use fxgate_rules::RuleStore;
use fxgate_telemetry::metrics;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::error::RouterResult;

/// A-book leg of a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedLeg {
    pub lp_id: LpId,
    pub qty: Qty,
    /// Quoted price the selection was made on.
    pub px: Price,
    pub reason: String,
}

/// Internalized (B-book) leg of a decision.
///
/// Carries the reference price at decision time; P&L treatment of the
/// book is downstream's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalLeg {
    pub qty: Qty,
    pub reference_px: Option<Price>,
    pub reason: String,
}

/// Routing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    Reject {
        rule_id: Option<i64>,
        causes: Vec<String>,
    },
    Bbook {
        rule_id: i64,
        leg: InternalLeg,
    },
    Abook {
        rule_id: Option<i64>,
        leg: RoutedLeg,
    },
    PartialHedge {
        rule_id: i64,
        abook: RoutedLeg,
        bbook: InternalLeg,
    },
}

impl Decision {
    pub fn action_label(&self) -> &'static str {
        match self {
            Self::Reject { .. } => "reject",
            Self::Bbook { .. } => "bbook",
            Self::Abook { .. } => "abook",
            Self::PartialHedge { .. } => "partial_hedge",
        }
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, Self::Reject { .. })
    }
}

/// A committed decision with its audit trail id.
#[derive(Debug, Clone)]
pub struct RoutingOutcome {
    pub audit_id: String,
    pub decision: Decision,
}

#[derive(Serialize)]
struct AuditRecord<'a> {
    audit_id: &'a str,
    ts_ms: i64,
    order_id: &'a str,
    account_id: &'a str,
    symbol: &'a str,
    side: OrderSide,
    qty: Qty,
    best_bid: Option<Price>,
    best_ask: Option<Price>,
    fresh_lps: Vec<&'a str>,
    decision: &'a Decision,
}

/// The Smart Order Router.
pub struct SmartOrderRouter {
    rules: Arc<RuleStore>,
    health: Arc<HealthMonitor>,
    audit: AuditTrail,
}

impl SmartOrderRouter {
    pub fn new(rules: Arc<RuleStore>, health: Arc<HealthMonitor>, audit: AuditTrail) -> Self {
        Self {
            rules,
            health,
            audit,
        }
    }

    /// Decide and commit: the decision (with inputs) lands on the audit
    /// trail and the returned id is stable for the caller.
    pub fn decide(
        &self,
        order: &Order,
        profile: &AccountProfile,
        snapshot: &QuoteSnapshot,
    ) -> RouterResult<RoutingOutcome> {
        let now_ms = Utc::now().timestamp_millis();
        let decision = self.evaluate(order, profile, snapshot, now_ms);
        metrics::ROUTING_DECISIONS_TOTAL
            .with_label_values(&[decision.action_label()])
            .inc();

        let audit_id = Uuid::new_v4().to_string();
        let record = AuditRecord {
            audit_id: &audit_id,
            ts_ms: now_ms,
            order_id: order.id.as_str(),
            account_id: order.account_id.as_str(),
            symbol: order.symbol.as_str(),
            side: order.side,
            qty: order.qty,
            best_bid: snapshot.best_bid,
            best_ask: snapshot.best_ask,
            fresh_lps: snapshot
                .fresh_lps(now_ms)
                .map(|(lp, _)| lp.as_str())
                .collect(),
            decision: &decision,
        };
        self.audit.append(&record)?;

        Ok(RoutingOutcome { audit_id, decision })
    }

    /// Identical decision path with no side effects, for UI display.
    pub fn preview(
        &self,
        order: &Order,
        profile: &AccountProfile,
        snapshot: &QuoteSnapshot,
    ) -> Decision {
        self.evaluate(order, profile, snapshot, Utc::now().timestamp_millis())
    }

    fn evaluate(
        &self,
        order: &Order,
        profile: &AccountProfile,
        snapshot: &QuoteSnapshot,
        now_ms: i64,
    ) -> Decision {
        let rules = self.rules.snapshot();
        let matched = rules
            .iter()
            .find(|rule| rule.filters.matches(order, profile));

        let (action, rule_id, target_lp, hedge_pct) = match matched {
            Some(rule) => (
                rule.action,
                Some(rule.id),
                rule.target_lp.clone(),
                rule.hedge_pct,
            ),
            // No rule bound: pass through unrestricted.
            None => (RuleAction::Abook, None, None, None),
        };
        debug!(
            order_id = %order.id,
            ?rule_id,
            action = ?action,
            "Routing rule bound"
        );

        match action {
            RuleAction::Reject => Decision::Reject {
                rule_id,
                causes: vec!["rule_reject".to_string()],
            },
            RuleAction::Bbook => Decision::Bbook {
                rule_id: rule_id.expect("bbook only binds via a rule"),
                leg: InternalLeg {
                    qty: order.qty,
                    reference_px: reference_price(order.side, snapshot),
                    reason: "rule_bbook".to_string(),
                },
            },
            RuleAction::Abook => {
                match self.select_lp(order.side, snapshot, target_lp.as_ref(), now_ms) {
                    Ok((lp_id, px)) => Decision::Abook {
                        rule_id,
                        leg: RoutedLeg {
                            lp_id,
                            qty: order.qty,
                            px,
                            reason: if rule_id.is_some() {
                                "rule_abook".to_string()
                            } else {
                                "default_abook".to_string()
                            },
                        },
                    },
                    Err(causes) => Decision::Reject { rule_id, causes },
                }
            }
            RuleAction::PartialHedge => {
                let pct = hedge_pct.unwrap_or(Decimal::ONE);
                let hedge_qty = Qty::new(order.qty.inner() * pct);
                let keep_qty = order.qty - hedge_qty;
                match self.select_lp(order.side, snapshot, target_lp.as_ref(), now_ms) {
                    Ok((lp_id, px)) => Decision::PartialHedge {
                        rule_id: rule_id.expect("partial_hedge only binds via a rule"),
                        abook: RoutedLeg {
                            lp_id,
                            qty: hedge_qty,
                            px,
                            reason: format!("hedge_{pct}"),
                        },
                        bbook: InternalLeg {
                            qty: keep_qty,
                            reference_px: reference_price(order.side, snapshot),
                            reason: "hedge_remainder".to_string(),
                        },
                    },
                    Err(causes) => Decision::Reject { rule_id, causes },
                }
            }
        }
    }

    /// Pick the best LP for the side among fresh, non-degraded quotes.
    ///
    /// buy: lowest ask; sell: highest bid. Tiebreak: higher health score,
    /// then lower p50 latency.
    fn select_lp(
        &self,
        side: OrderSide,
        snapshot: &QuoteSnapshot,
        target_lp: Option<&LpId>,
        now_ms: i64,
    ) -> Result<(LpId, Price), Vec<String>> {
        let mut causes = Vec::new();
        let mut best: Option<(LpId, Price, f64, f64)> = None;

        for (lp_id, quote) in &snapshot.per_lp {
            if !quote.is_fresh(now_ms) {
                causes.push(format!("{lp_id}:stale"));
                continue;
            }
            if let Some(target) = target_lp {
                if lp_id != target {
                    causes.push(format!("{lp_id}:not_target"));
                    continue;
                }
            }
            if self.health.is_degraded(lp_id) {
                causes.push(format!("{lp_id}:degraded"));
                continue;
            }

            let px = match side {
                OrderSide::Buy => quote.ask,
                OrderSide::Sell => quote.bid,
            };
            let score = self.health.score(lp_id);
            let latency = self.health.p50_latency_ms(lp_id);

            let candidate_wins = match &best {
                None => true,
                Some((_, best_px, best_score, best_latency)) => {
                    let price_better = match side {
                        OrderSide::Buy => px < *best_px,
                        OrderSide::Sell => px > *best_px,
                    };
                    price_better
                        || (px == *best_px
                            && (score > *best_score
                                || (score == *best_score && latency < *best_latency)))
                }
            };
            if candidate_wins {
                best = Some((lp_id.clone(), px, score, latency));
            }
        }

        match best {
            Some((lp_id, px, _, _)) => Ok((lp_id, px)),
            None => {
                causes.insert(0, "no_liquidity".to_string());
                Err(causes)
            }
        }
    }
}

/// Price the client would trade at right now, for B-book reference.
fn reference_price(side: OrderSide, snapshot: &QuoteSnapshot) -> Option<Price> {
    match side {
        OrderSide::Buy => snapshot.best_ask,
        OrderSide::Sell => snapshot.best_bid,
    }
}
