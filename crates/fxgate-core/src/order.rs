//! Order types and the order lifecycle state machine.

use crate::{AccountId, ClientId, LpId, Price, Qty, Symbol};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell (for exposure calculations).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "market"),
            Self::Limit => write!(f, "limit"),
            Self::Stop => write!(f, "stop"),
            Self::StopLimit => write!(f, "stop_limit"),
        }
    }
}

/// Time-in-force for orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-til-cancelled.
    #[serde(rename = "Gtc")]
    GoodTilCancelled,
    /// Immediate-or-cancel (the default for market orders).
    #[default]
    #[serde(rename = "Ioc")]
    ImmediateOrCancel,
    /// Fill-or-kill.
    #[serde(rename = "Fok")]
    FillOrKill,
    /// Valid for the trading day.
    #[serde(rename = "Day")]
    Day,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GoodTilCancelled => write!(f, "Gtc"),
            Self::ImmediateOrCancel => write!(f, "Ioc"),
            Self::FillOrKill => write!(f, "Fok"),
            Self::Day => write!(f, "Day"),
        }
    }
}

/// Status of an order in its lifecycle.
///
/// The only legal paths are
/// `pending -> sent -> (partial)* -> {filled, rejected, canceled}`,
/// with `sent -> rejected` and `sent -> canceled` permitted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted by the engine but not yet on the wire.
    #[default]
    Pending,
    /// NewOrderSingle handed to the FIX session.
    Sent,
    /// At least one partial fill applied.
    Partial,
    /// Completely filled.
    Filled,
    /// Rejected by risk, routing or the LP.
    Rejected,
    /// Canceled, confirmed by the LP.
    Canceled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Rejected | Self::Canceled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine permits a transition to `next`.
    ///
    /// Self-transitions on `Partial` are allowed (repeated partial fills).
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Rejected)
                | (Sent, Partial)
                | (Sent, Filled)
                | (Sent, Rejected)
                | (Sent, Canceled)
                | (Partial, Partial)
                | (Partial, Filled)
                | (Partial, Canceled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::Partial => write!(f, "partial"),
            Self::Filled => write!(f, "filled"),
            Self::Rejected => write!(f, "rejected"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Client order ID, unique for the lifetime of the engine.
///
/// Every order gets a fresh id at creation; the id is also the FIX
/// ClOrdID (tag 11), which is how ExecutionReports find their order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Format: `ord_{timestamp_ms}_{uuid_short}`.
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("ord_{ts}_{uuid_short}"))
    }

    /// Create from an existing string (for parsing inbound reports).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientOrderId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl AsRef<str> for ClientOrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A client order, owned by the execution engine for its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: ClientOrderId,
    pub client_id: ClientId,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub qty: Qty,
    pub order_type: OrderType,
    pub tif: TimeInForce,
    /// Limit price (limit / stop-limit orders).
    pub px: Option<Price>,
    /// Stop trigger price (stop / stop-limit orders).
    pub stop_px: Option<Price>,
    pub status: OrderStatus,
    pub filled_qty: Qty,
    pub avg_px: Option<Price>,
    /// LP the order was routed to; None for internalized orders.
    pub selected_lp: Option<LpId>,
    pub created_at: i64,
    pub sent_at: Option<i64>,
    pub finalized_at: Option<i64>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_id: ClientId,
        account_id: AccountId,
        symbol: Symbol,
        side: OrderSide,
        qty: Qty,
        order_type: OrderType,
        tif: TimeInForce,
        px: Option<Price>,
        stop_px: Option<Price>,
    ) -> Self {
        Self {
            id: ClientOrderId::new(),
            client_id,
            account_id,
            symbol,
            side,
            qty,
            order_type,
            tif,
            px,
            stop_px,
            status: OrderStatus::Pending,
            filled_qty: Qty::ZERO,
            avg_px: None,
            selected_lp: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            sent_at: None,
            finalized_at: None,
        }
    }

    pub fn remaining_qty(&self) -> Qty {
        self.qty - self.filled_qty
    }

    pub fn is_filled(&self) -> bool {
        self.filled_qty >= self.qty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_order() -> Order {
        Order::new(
            ClientId::new("c1"),
            AccountId::from("demo-1"),
            Symbol::parse("EURUSD").unwrap(),
            OrderSide::Buy,
            Qty::new(dec!(1.0)),
            OrderType::Market,
            TimeInForce::ImmediateOrCancel,
            None,
            None,
        )
    }

    #[test]
    fn test_client_order_id_unique() {
        assert_ne!(ClientOrderId::new(), ClientOrderId::new());
    }

    #[test]
    fn test_client_order_id_format() {
        assert!(ClientOrderId::new().as_str().starts_with("ord_"));
    }

    #[test]
    fn test_status_machine_paths() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Partial));
        assert!(Partial.can_transition_to(Partial));
        assert!(Partial.can_transition_to(Filled));
        assert!(Sent.can_transition_to(Rejected));
        assert!(Sent.can_transition_to(Canceled));

        assert!(!Pending.can_transition_to(Filled));
        assert!(!Filled.can_transition_to(Canceled));
        assert!(!Rejected.can_transition_to(Sent));
        assert!(!Canceled.can_transition_to(Partial));
    }

    #[test]
    fn test_terminal_predicates() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Pending.is_active());
        assert!(OrderStatus::Partial.is_active());
    }

    #[test]
    fn test_remaining_qty() {
        let mut order = sample_order();
        order.filled_qty = Qty::new(dec!(0.4));
        assert_eq!(order.remaining_qty(), Qty::new(dec!(0.6)));
        assert!(!order.is_filled());
    }

    #[test]
    fn test_side_sign() {
        assert_eq!(OrderSide::Buy.sign(), 1);
        assert_eq!(OrderSide::Sell.sign(), -1);
    }
}
