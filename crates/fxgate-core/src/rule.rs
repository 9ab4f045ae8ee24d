//! Routing-rule model: filters, actions and the conflict predicate.

use crate::{AccountId, AccountProfile, LpId, Order, Qty, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What a matching rule does with an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Pass through to an LP.
    Abook,
    /// Internalize against the broker's book.
    Bbook,
    /// Route `hedge_pct` to an LP, internalize the rest.
    PartialHedge,
    /// Reject outright.
    Reject,
}

/// Filter dimensions of a routing rule.
///
/// An unset dimension matches everything; a set dimension must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accounts: Option<Vec<AccountId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<Symbol>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_qty: Option<Qty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_qty: Option<Qty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_toxicity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_toxicity: Option<f64>,
}

impl RuleFilters {
    /// Whether the filters match `(order, profile)`.
    pub fn matches(&self, order: &Order, profile: &AccountProfile) -> bool {
        if let Some(accounts) = &self.accounts {
            if !accounts.contains(&order.account_id) {
                return false;
            }
        }
        if let Some(groups) = &self.groups {
            if !groups.iter().any(|g| g == &profile.group) {
                return false;
            }
        }
        if let Some(symbols) = &self.symbols {
            if !symbols.contains(&order.symbol) {
                return false;
            }
        }
        if let Some(min) = self.min_qty {
            if order.qty < min {
                return false;
            }
        }
        if let Some(max) = self.max_qty {
            if order.qty > max {
                return false;
            }
        }
        if let Some(min) = self.min_toxicity {
            if profile.toxicity < min {
                return false;
            }
        }
        if let Some(max) = self.max_toxicity {
            if profile.toxicity > max {
                return false;
            }
        }
        true
    }

    /// Whether two filter sets intersect on every populated dimension.
    ///
    /// A dimension populated in only one rule (or neither) is unconstrained
    /// there, so it overlaps by definition.
    pub fn intersects(&self, other: &RuleFilters) -> bool {
        fn lists_overlap<T: PartialEq>(a: &Option<Vec<T>>, b: &Option<Vec<T>>) -> bool {
            match (a, b) {
                (Some(xs), Some(ys)) => xs.iter().any(|x| ys.contains(x)),
                _ => true,
            }
        }

        fn ranges_overlap<T: PartialOrd + Copy>(
            a_min: Option<T>,
            a_max: Option<T>,
            b_min: Option<T>,
            b_max: Option<T>,
        ) -> bool {
            let low_ok = match (a_min, b_max) {
                (Some(lo), Some(hi)) => lo <= hi,
                _ => true,
            };
            let high_ok = match (b_min, a_max) {
                (Some(lo), Some(hi)) => lo <= hi,
                _ => true,
            };
            low_ok && high_ok
        }

        lists_overlap(&self.accounts, &other.accounts)
            && lists_overlap(&self.groups, &other.groups)
            && lists_overlap(&self.symbols, &other.symbols)
            && ranges_overlap(self.min_qty, self.max_qty, other.min_qty, other.max_qty)
            && ranges_overlap(
                self.min_toxicity,
                self.max_toxicity,
                other.min_toxicity,
                other.max_toxicity,
            )
    }
}

/// A routing rule. Lower `priority` binds first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: i64,
    pub priority: i32,
    pub filters: RuleFilters,
    pub action: RuleAction,
    /// Restrict A-book selection to this LP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_lp: Option<LpId>,
    /// Fraction in (0,1] routed to the LP under `partial_hedge`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hedge_pct: Option<Decimal>,
    pub active: bool,
}

impl RoutingRule {
    /// Conflict test: overlapping filters plus a contradictory outcome.
    ///
    /// Inactive rules never conflict.
    pub fn conflicts_with(&self, other: &RoutingRule) -> bool {
        if !self.active || !other.active {
            return false;
        }
        if !self.filters.intersects(&other.filters) {
            return false;
        }
        if self.action != other.action {
            return true;
        }
        // Same action: only diverging A-book targets contradict.
        self.action == RuleAction::Abook
            && self.target_lp.is_some()
            && other.target_lp.is_some()
            && self.target_lp != other.target_lp
    }
}
