//! Typed FIX 4.4 messages for the subset this core speaks.
//!
//! Outbound construction goes through the builder functions; inbound
//! messages are lifted from `RawMessage` into the `FixMessage` enum.
//! Unknown message types are surfaced as `Unhandled` and logged by the
//! session, never dropped silently into state.

use crate::codec::{tags, RawMessage};
use crate::error::{FixError, FixResult};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use fxgate_core::{LpId, Order, OrderSide, OrderStatus, OrderType, Price, Qty, Symbol, TimeInForce};

/// FIX message types exchanged with LPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Logon,
    Logout,
    Heartbeat,
    TestRequest,
    ResendRequest,
    Reject,
    SequenceReset,
    SecurityDefinitionRequest,
    SecurityDefinition,
    MarketDataRequest,
    MarketDataSnapshot,
    MarketDataRequestReject,
    NewOrderSingle,
    OrderCancelRequest,
    OrderStatusRequest,
    ExecutionReport,
    BusinessMessageReject,
}

impl MsgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logon => "A",
            Self::Logout => "5",
            Self::Heartbeat => "0",
            Self::TestRequest => "1",
            Self::ResendRequest => "2",
            Self::Reject => "3",
            Self::SequenceReset => "4",
            Self::SecurityDefinitionRequest => "c",
            Self::SecurityDefinition => "d",
            Self::MarketDataRequest => "V",
            Self::MarketDataSnapshot => "W",
            Self::MarketDataRequestReject => "Y",
            Self::NewOrderSingle => "D",
            Self::OrderCancelRequest => "F",
            Self::OrderStatusRequest => "H",
            Self::ExecutionReport => "8",
            Self::BusinessMessageReject => "j",
        }
    }
}

/// Market data entry side (tag 269).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdEntryType {
    Bid,
    Offer,
}

impl MdEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bid => "0",
            Self::Offer => "1",
        }
    }
}

/// Execution type (tag 150), as reported by the LP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecType {
    New,
    PartialFill,
    Fill,
    Canceled,
    Rejected,
    OrderStatus,
    Other(char),
}

impl ExecType {
    fn from_code(code: &str) -> Self {
        match code {
            "0" => Self::New,
            "1" => Self::PartialFill,
            "2" | "F" => Self::Fill,
            "4" => Self::Canceled,
            "8" => Self::Rejected,
            "I" => Self::OrderStatus,
            other => Self::Other(other.chars().next().unwrap_or('?')),
        }
    }
}

/// Inbound ExecutionReport (35=8), already lifted to engine vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub cl_ord_id: String,
    pub exec_id: String,
    pub exec_type: ExecType,
    /// Mapped OrdStatus (tag 39); None for statuses that advance nothing
    /// (pending-new, pending-cancel, ...).
    pub ord_status: Option<OrderStatus>,
    pub symbol: Option<Symbol>,
    pub cum_qty: Qty,
    pub leaves_qty: Option<Qty>,
    pub avg_px: Option<Price>,
    pub last_px: Option<Price>,
    pub last_qty: Option<Qty>,
    pub text: Option<String>,
    pub ts_ms: i64,
}

fn map_ord_status(code: &str) -> Option<OrderStatus> {
    match code {
        "0" => Some(OrderStatus::Sent),
        "1" => Some(OrderStatus::Partial),
        "2" => Some(OrderStatus::Filled),
        "4" => Some(OrderStatus::Canceled),
        "8" => Some(OrderStatus::Rejected),
        _ => None,
    }
}

/// Inbound MarketDataSnapshotFullRefresh (35=W).
#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataSnapshot {
    pub symbol: Symbol,
    pub bid: Option<Price>,
    pub ask: Option<Price>,
    /// Timestamp from the LP's message (tag 52), not local time.
    pub ts_ms: i64,
}

impl MarketDataSnapshot {
    /// Build a tick when both sides are present; one-sided refreshes are
    /// not usable by the aggregator.
    pub fn into_tick(self, lp_id: LpId) -> Option<fxgate_core::Tick> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some(fxgate_core::Tick::new(
                self.symbol,
                bid,
                ask,
                self.ts_ms,
                lp_id,
            )),
            _ => None,
        }
    }
}

/// A typed inbound FIX message.
#[derive(Debug, Clone, PartialEq)]
pub enum FixMessage {
    Logon {
        heart_bt_int: u32,
        reset: bool,
    },
    Logout {
        text: Option<String>,
    },
    Heartbeat {
        test_req_id: Option<String>,
    },
    TestRequest {
        test_req_id: String,
    },
    ResendRequest {
        begin: u64,
        end: u64,
    },
    SequenceReset {
        new_seq: u64,
        gap_fill: bool,
    },
    Reject {
        ref_seq: Option<u64>,
        text: Option<String>,
    },
    BusinessReject {
        ref_id: Option<String>,
        reason: Option<String>,
        text: Option<String>,
    },
    SecurityDefinition {
        req_id: Option<String>,
        symbol: Option<Symbol>,
    },
    MarketData(MarketDataSnapshot),
    MarketDataReject {
        req_id: String,
        text: Option<String>,
    },
    Execution(ExecutionReport),
    Unhandled {
        msg_type: String,
    },
}

impl FixMessage {
    /// Lift a raw message into the typed enum.
    pub fn from_raw(raw: &RawMessage) -> FixResult<Self> {
        let mt = raw.msg_type()?;
        let msg = match mt {
            "A" => Self::Logon {
                heart_bt_int: raw
                    .get(tags::HEART_BT_INT)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
                reset: raw.get(tags::RESET_SEQ_NUM_FLAG) == Some("Y"),
            },
            "5" => Self::Logout {
                text: raw.get(tags::TEXT).map(str::to_string),
            },
            "0" => Self::Heartbeat {
                test_req_id: raw.get(tags::TEST_REQ_ID).map(str::to_string),
            },
            "1" => Self::TestRequest {
                test_req_id: raw.require(tags::TEST_REQ_ID)?.to_string(),
            },
            "2" => Self::ResendRequest {
                begin: parse_u64(raw.require(tags::BEGIN_SEQ_NO)?)?,
                end: parse_u64(raw.require(tags::END_SEQ_NO)?)?,
            },
            "4" => Self::SequenceReset {
                new_seq: parse_u64(raw.require(tags::NEW_SEQ_NO)?)?,
                gap_fill: raw.get(tags::GAP_FILL_FLAG) == Some("Y"),
            },
            "3" => Self::Reject {
                ref_seq: raw.get(tags::REF_SEQ_NUM).and_then(|v| v.parse().ok()),
                text: raw.get(tags::TEXT).map(str::to_string),
            },
            "j" => Self::BusinessReject {
                ref_id: raw.get(tags::BUSINESS_REJECT_REF_ID).map(str::to_string),
                reason: raw.get(tags::BUSINESS_REJECT_REASON).map(str::to_string),
                text: raw.get(tags::TEXT).map(str::to_string),
            },
            "d" => Self::SecurityDefinition {
                req_id: raw.get(tags::SECURITY_REQ_ID).map(str::to_string),
                symbol: raw.get(tags::SYMBOL).and_then(|s| Symbol::parse(s).ok()),
            },
            "W" => Self::MarketData(parse_market_data(raw)?),
            "Y" => Self::MarketDataReject {
                req_id: raw.require(tags::MD_REQ_ID)?.to_string(),
                text: raw.get(tags::TEXT).map(str::to_string),
            },
            "8" => Self::Execution(parse_execution_report(raw)?),
            other => Self::Unhandled {
                msg_type: other.to_string(),
            },
        };
        Ok(msg)
    }
}

fn parse_u64(s: &str) -> FixResult<u64> {
    s.parse()
        .map_err(|_| FixError::Malformed(format!("non-numeric value: {s}")))
}

fn parse_price(s: &str) -> FixResult<Price> {
    s.parse()
        .map_err(|_| FixError::Malformed(format!("bad price: {s}")))
}

fn parse_qty(s: &str) -> FixResult<Qty> {
    s.parse()
        .map_err(|_| FixError::Malformed(format!("bad qty: {s}")))
}

fn parse_market_data(raw: &RawMessage) -> FixResult<MarketDataSnapshot> {
    let symbol = Symbol::parse(raw.require(tags::SYMBOL)?)
        .map_err(|e| FixError::Malformed(e.to_string()))?;
    let ts_ms = raw
        .get(tags::SENDING_TIME)
        .and_then(parse_fix_timestamp)
        .unwrap_or_else(|| Utc::now().timestamp_millis());

    // 268/269/270 repeating group: entry types and prices pair up
    // positionally.
    let entry_types = raw.get_all(tags::MD_ENTRY_TYPE);
    let entry_pxs = raw.get_all(tags::MD_ENTRY_PX);

    let mut bid = None;
    let mut ask = None;
    for (ty, px) in entry_types.iter().zip(entry_pxs.iter()) {
        let price = parse_price(px)?;
        match *ty {
            "0" => bid = Some(price),
            "1" => ask = Some(price),
            _ => {}
        }
    }

    Ok(MarketDataSnapshot {
        symbol,
        bid,
        ask,
        ts_ms,
    })
}

fn parse_execution_report(raw: &RawMessage) -> FixResult<ExecutionReport> {
    Ok(ExecutionReport {
        cl_ord_id: raw.require(tags::CL_ORD_ID)?.to_string(),
        exec_id: raw.require(tags::EXEC_ID)?.to_string(),
        exec_type: raw
            .get(tags::EXEC_TYPE)
            .map(ExecType::from_code)
            .unwrap_or(ExecType::Other('?')),
        ord_status: raw.get(tags::ORD_STATUS).and_then(map_ord_status),
        symbol: raw.get(tags::SYMBOL).and_then(|s| Symbol::parse(s).ok()),
        cum_qty: raw.get(tags::CUM_QTY).map(parse_qty).transpose()?.unwrap_or(Qty::ZERO),
        leaves_qty: raw.get(tags::LEAVES_QTY).map(parse_qty).transpose()?,
        avg_px: raw.get(tags::AVG_PX).map(parse_price).transpose()?,
        last_px: raw.get(tags::LAST_PX).map(parse_price).transpose()?,
        last_qty: raw.get(tags::LAST_QTY).map(parse_qty).transpose()?,
        text: raw.get(tags::TEXT).map(str::to_string),
        ts_ms: raw
            .get(tags::TRANSACT_TIME)
            .or_else(|| raw.get(tags::SENDING_TIME))
            .and_then(parse_fix_timestamp)
            .unwrap_or_else(|| Utc::now().timestamp_millis()),
    })
}

/// Format a UTC timestamp as FIX `YYYYMMDD-HH:MM:SS.sss`.
pub fn format_fix_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%d-%H:%M:%S%.3f").to_string()
}

/// Parse a FIX UTCTimestamp (with or without millis) into epoch millis.
pub fn parse_fix_timestamp(s: &str) -> Option<i64> {
    let fmt = if s.len() > 17 {
        "%Y%m%d-%H:%M:%S%.3f"
    } else {
        "%Y%m%d-%H:%M:%S"
    };
    NaiveDateTime::parse_from_str(s, fmt)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

// ============================================================================
// Outbound builders
// ============================================================================

/// Logon (35=A). `reset` requests both sides restart at seqnum 1.
pub fn logon(heartbeat_secs: u32, reset: bool) -> RawMessage {
    let mut msg = RawMessage::new(MsgType::Logon.as_str());
    msg.push(tags::ENCRYPT_METHOD, "0")
        .push(tags::HEART_BT_INT, heartbeat_secs.to_string());
    if reset {
        msg.push(tags::RESET_SEQ_NUM_FLAG, "Y");
    }
    msg
}

/// Logout (35=5).
pub fn logout(text: Option<&str>) -> RawMessage {
    let mut msg = RawMessage::new(MsgType::Logout.as_str());
    if let Some(text) = text {
        msg.push(tags::TEXT, text);
    }
    msg
}

/// Heartbeat (35=0), echoing a TestReqID when answering a TestRequest.
pub fn heartbeat(test_req_id: Option<&str>) -> RawMessage {
    let mut msg = RawMessage::new(MsgType::Heartbeat.as_str());
    if let Some(id) = test_req_id {
        msg.push(tags::TEST_REQ_ID, id);
    }
    msg
}

/// TestRequest (35=1).
pub fn test_request(test_req_id: &str) -> RawMessage {
    let mut msg = RawMessage::new(MsgType::TestRequest.as_str());
    msg.push(tags::TEST_REQ_ID, test_req_id);
    msg
}

/// ResendRequest (35=2) for the inbound gap `[begin, end]`.
pub fn resend_request(begin: u64, end: u64) -> RawMessage {
    let mut msg = RawMessage::new(MsgType::ResendRequest.as_str());
    msg.push(tags::BEGIN_SEQ_NO, begin.to_string())
        .push(tags::END_SEQ_NO, end.to_string());
    msg
}

/// SequenceReset-GapFill (35=4). Answers a counterparty ResendRequest;
/// we never replay application messages.
pub fn sequence_reset_gap_fill(new_seq: u64) -> RawMessage {
    let mut msg = RawMessage::new(MsgType::SequenceReset.as_str());
    msg.push(tags::GAP_FILL_FLAG, "Y")
        .push(tags::NEW_SEQ_NO, new_seq.to_string());
    msg
}

/// SecurityDefinitionRequest (35=c) preceding a market-data subscription.
pub fn security_definition_request(req_id: &str, symbol: &Symbol) -> RawMessage {
    let mut msg = RawMessage::new(MsgType::SecurityDefinitionRequest.as_str());
    msg.push(tags::SECURITY_REQ_ID, req_id)
        .push(tags::SECURITY_REQUEST_TYPE, "0")
        .push(tags::SYMBOL, symbol.as_str())
        .push(tags::SECURITY_TYPE, "FXSPOT")
        .push(tags::PRODUCT, "4");
    msg
}

/// MarketDataRequest (35=V) subscribing to top-of-book for one symbol.
pub fn market_data_request(
    req_id: &str,
    symbol: &Symbol,
    exchange_id: &str,
    quote_ccy: &str,
) -> RawMessage {
    let mut msg = RawMessage::new(MsgType::MarketDataRequest.as_str());
    msg.push(tags::MD_REQ_ID, req_id)
        .push(tags::SUBSCRIPTION_REQUEST_TYPE, "1")
        .push(tags::MARKET_DEPTH, "0")
        .push(tags::NO_MD_ENTRY_TYPES, "2")
        .push(tags::MD_ENTRY_TYPE, MdEntryType::Bid.as_str())
        .push(tags::MD_ENTRY_TYPE, MdEntryType::Offer.as_str())
        .push(tags::NO_RELATED_SYM, "1")
        .push(tags::SYMBOL, symbol.as_str())
        .push(tags::PRODUCT, "4")
        .push(tags::SECURITY_TYPE, "FXSPOT")
        .push(tags::SECURITY_EXCHANGE, exchange_id)
        .push(tags::CURRENCY, quote_ccy);
    msg
}

fn fix_side(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "1",
        OrderSide::Sell => "2",
    }
}

fn fix_ord_type(ty: OrderType) -> &'static str {
    match ty {
        OrderType::Market => "1",
        OrderType::Limit => "2",
        OrderType::Stop => "3",
        OrderType::StopLimit => "4",
    }
}

fn fix_tif(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Day => "0",
        TimeInForce::GoodTilCancelled => "1",
        TimeInForce::ImmediateOrCancel => "3",
        TimeInForce::FillOrKill => "4",
    }
}

/// NewOrderSingle (35=D) for a routed order.
pub struct NewOrderSingle;

impl NewOrderSingle {
    pub fn build(order: &Order) -> RawMessage {
        let mut msg = RawMessage::new(MsgType::NewOrderSingle.as_str());
        msg.push(tags::CL_ORD_ID, order.id.as_str())
            .push(tags::SYMBOL, order.symbol.as_str())
            .push(tags::SIDE, fix_side(order.side))
            .push(tags::TRANSACT_TIME, format_fix_timestamp(Utc::now()))
            .push(tags::ORDER_QTY, order.qty.to_string())
            .push(tags::ORD_TYPE, fix_ord_type(order.order_type))
            .push(tags::TIME_IN_FORCE, fix_tif(order.tif));
        if let Some(px) = order.px {
            msg.push(tags::PRICE, px.to_string());
        }
        if let Some(stop_px) = order.stop_px {
            msg.push(tags::STOP_PX, stop_px.to_string());
        }
        msg
    }
}

/// OrderCancelRequest (35=F).
pub struct OrderCancelRequest;

impl OrderCancelRequest {
    pub fn build(order: &Order) -> RawMessage {
        let mut msg = RawMessage::new(MsgType::OrderCancelRequest.as_str());
        msg.push(tags::ORIG_CL_ORD_ID, order.id.as_str())
            .push(tags::CL_ORD_ID, format!("{}_cxl", order.id))
            .push(tags::SYMBOL, order.symbol.as_str())
            .push(tags::SIDE, fix_side(order.side))
            .push(tags::TRANSACT_TIME, format_fix_timestamp(Utc::now()));
        msg
    }
}

/// OrderStatusRequest (35=H) for reconnect reconciliation.
pub struct OrderStatusRequest;

impl OrderStatusRequest {
    pub fn build(order: &Order) -> RawMessage {
        let mut msg = RawMessage::new(MsgType::OrderStatusRequest.as_str());
        msg.push(tags::CL_ORD_ID, order.id.as_str())
            .push(tags::SYMBOL, order.symbol.as_str())
            .push(tags::SIDE, fix_side(order.side));
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxgate_core::{AccountId, ClientId};
    use rust_decimal_macros::dec;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn raw_roundtrip(msg: &RawMessage) -> RawMessage {
        RawMessage::parse(&msg.serialize()).unwrap()
    }

    #[test]
    fn test_market_data_request_required_tags() {
        let msg = market_data_request("req-1", &sym("EURUSD"), "XOFF", "USD");
        let raw = raw_roundtrip(&msg);
        assert_eq!(raw.get(tags::SUBSCRIPTION_REQUEST_TYPE), Some("1"));
        assert_eq!(raw.get(tags::MARKET_DEPTH), Some("0"));
        assert_eq!(raw.get_all(tags::MD_ENTRY_TYPE), vec!["0", "1"]);
        assert_eq!(raw.get(tags::NO_RELATED_SYM), Some("1"));
        assert_eq!(raw.get(tags::PRODUCT), Some("4"));
        assert_eq!(raw.get(tags::SECURITY_TYPE), Some("FXSPOT"));
        assert_eq!(raw.get(tags::SECURITY_EXCHANGE), Some("XOFF"));
        assert_eq!(raw.get(tags::CURRENCY), Some("USD"));
    }

    #[test]
    fn test_market_data_snapshot_to_tick() {
        let mut raw = RawMessage::new("W");
        raw.push(tags::MSG_SEQ_NUM, "5")
            .push(tags::SENDING_TIME, "20260801-12:00:00.250")
            .push(tags::SYMBOL, "EURUSD")
            .push(tags::NO_MD_ENTRIES, "2")
            .push(tags::MD_ENTRY_TYPE, "0")
            .push(tags::MD_ENTRY_PX, "1.0850")
            .push(tags::MD_ENTRY_TYPE, "1")
            .push(tags::MD_ENTRY_PX, "1.0852");

        let parsed = FixMessage::from_raw(&raw_roundtrip(&raw)).unwrap();
        let FixMessage::MarketData(snapshot) = parsed else {
            panic!("expected market data");
        };
        let tick = snapshot.into_tick(LpId::from("LP_A")).unwrap();
        assert_eq!(tick.bid, Price::new(dec!(1.0850)));
        assert_eq!(tick.ask, Price::new(dec!(1.0852)));
        assert_eq!(tick.spread, Price::new(dec!(0.0002)));
        assert_eq!(
            tick.ts_ms,
            parse_fix_timestamp("20260801-12:00:00.250").unwrap()
        );
    }

    #[test]
    fn test_one_sided_snapshot_yields_no_tick() {
        let snapshot = MarketDataSnapshot {
            symbol: sym("EURUSD"),
            bid: Some(Price::new(dec!(1.0850))),
            ask: None,
            ts_ms: 0,
        };
        assert!(snapshot.into_tick(LpId::from("LP_A")).is_none());
    }

    #[test]
    fn test_execution_report_parse() {
        let mut raw = RawMessage::new("8");
        raw.push(tags::MSG_SEQ_NUM, "9")
            .push(tags::CL_ORD_ID, "ord_1_abc")
            .push(tags::EXEC_ID, "exec-77")
            .push(tags::EXEC_TYPE, "1")
            .push(tags::ORD_STATUS, "1")
            .push(tags::SYMBOL, "EURUSD")
            .push(tags::CUM_QTY, "0.4")
            .push(tags::LEAVES_QTY, "0.6")
            .push(tags::AVG_PX, "1.0852")
            .push(tags::LAST_PX, "1.0852")
            .push(tags::LAST_QTY, "0.4");

        let parsed = FixMessage::from_raw(&raw_roundtrip(&raw)).unwrap();
        let FixMessage::Execution(er) = parsed else {
            panic!("expected execution report");
        };
        assert_eq!(er.cl_ord_id, "ord_1_abc");
        assert_eq!(er.exec_type, ExecType::PartialFill);
        assert_eq!(er.ord_status, Some(OrderStatus::Partial));
        assert_eq!(er.cum_qty, Qty::new(dec!(0.4)));
    }

    #[test]
    fn test_new_order_single_roundtrip() {
        let order = Order::new(
            ClientId::new("c1"),
            AccountId::from("demo-1"),
            sym("EURUSD"),
            OrderSide::Buy,
            Qty::new(dec!(1.0)),
            OrderType::Limit,
            TimeInForce::GoodTilCancelled,
            Some(Price::new(dec!(1.0851))),
            None,
        );
        let raw = raw_roundtrip(&NewOrderSingle::build(&order));
        assert_eq!(raw.msg_type().unwrap(), "D");
        assert_eq!(raw.get(tags::CL_ORD_ID), Some(order.id.as_str()));
        assert_eq!(raw.get(tags::SIDE), Some("1"));
        assert_eq!(raw.get(tags::ORD_TYPE), Some("2"));
        assert_eq!(raw.get(tags::TIME_IN_FORCE), Some("1"));
        assert_eq!(raw.get(tags::PRICE), Some("1.0851"));
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let ms = parse_fix_timestamp("20260801-09:30:01.500").unwrap();
        let dt = Utc.timestamp_millis_opt(ms).unwrap();
        assert_eq!(format_fix_timestamp(dt), "20260801-09:30:01.500");
    }

    #[test]
    fn test_unknown_msg_type_unhandled() {
        let mut raw = RawMessage::new("B");
        raw.push(tags::MSG_SEQ_NUM, "3");
        let parsed = FixMessage::from_raw(&raw_roundtrip(&raw)).unwrap();
        assert_eq!(
            parsed,
            FixMessage::Unhandled {
                msg_type: "B".to_string()
            }
        );
    }
}
