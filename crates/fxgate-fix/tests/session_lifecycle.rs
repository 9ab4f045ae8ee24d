//! Session lifecycle tests against a scripted counterparty.
//!
//! The counterparty end of a `tokio::io::duplex` pair plays the LP:
//! it answers the logon, pushes market data (including out-of-order
//! sequence numbers) and confirms logout.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fxgate_core::LpId;
use fxgate_fix::codec::{tags, FixDecoder, RawMessage};
use fxgate_fix::transport::QueueDialer;
use fxgate_fix::{FixSession, SessionConfig, SessionEvent};

/// Scripted LP side of the wire.
struct ScriptedLp {
    stream: DuplexStream,
    decoder: FixDecoder,
    out_seq: u64,
    buf: Vec<u8>,
}

impl ScriptedLp {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            decoder: FixDecoder::new(),
            out_seq: 1,
            buf: vec![0u8; 8192],
        }
    }

    /// Read frames until one with the wanted MsgType arrives.
    async fn expect(&mut self, msg_type: &str) -> RawMessage {
        loop {
            if let Some(raw) = self.decoder.next_message().unwrap() {
                if raw.msg_type().unwrap() == msg_type {
                    return raw;
                }
                continue;
            }
            let n = tokio::time::timeout(
                Duration::from_secs(5),
                self.stream.read(&mut self.buf),
            )
            .await
            .expect("timed out waiting for frame")
            .unwrap();
            assert!(n > 0, "session closed while waiting for {msg_type}");
            self.decoder.extend(&self.buf[..n]);
        }
    }

    /// Send a message with the LP-side header, at an explicit seqnum.
    async fn send_at(&mut self, mut body: RawMessage, seq: u64) {
        let mut fields = vec![(
            tags::MSG_TYPE,
            body.get(tags::MSG_TYPE).unwrap().to_string(),
        )];
        fields.push((tags::MSG_SEQ_NUM, seq.to_string()));
        fields.push((tags::SENDER_COMP_ID, "LP_A".to_string()));
        fields.push((tags::TARGET_COMP_ID, "FXGATE".to_string()));
        fields.push((tags::SENDING_TIME, "20260801-12:00:00.000".to_string()));
        for (tag, value) in body.fields() {
            if *tag != tags::MSG_TYPE {
                fields.push((*tag, value.clone()));
            }
        }
        body = RawMessage::from_fields(fields);
        self.stream.write_all(&body.serialize()).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Send at the next in-order seqnum.
    async fn send(&mut self, body: RawMessage) {
        let seq = self.out_seq;
        self.out_seq += 1;
        self.send_at(body, seq).await;
    }

    fn logon() -> RawMessage {
        let mut msg = RawMessage::new("A");
        msg.push(tags::ENCRYPT_METHOD, "0")
            .push(tags::HEART_BT_INT, "30");
        msg
    }

    fn market_data(symbol: &str, bid: &str, ask: &str) -> RawMessage {
        let mut msg = RawMessage::new("W");
        msg.push(tags::SYMBOL, symbol)
            .push(tags::NO_MD_ENTRIES, "2")
            .push(tags::MD_ENTRY_TYPE, "0")
            .push(tags::MD_ENTRY_PX, bid)
            .push(tags::MD_ENTRY_TYPE, "1")
            .push(tags::MD_ENTRY_PX, ask);
        msg
    }
}

struct Harness {
    lp: ScriptedLp,
    events: mpsc::Receiver<SessionEvent>,
    shutdown: CancellationToken,
    session_task: tokio::task::JoinHandle<fxgate_fix::FixResult<()>>,
    handle: fxgate_fix::SessionHandle,
    _seq_dir: tempfile::TempDir,
}

async fn start_session() -> Harness {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let dialer = Arc::new(QueueDialer::new());
    dialer.push(near);

    let (event_tx, events) = mpsc::channel(256);
    let seq_dir = tempfile::TempDir::new().unwrap();
    let config = SessionConfig {
        lp_id: LpId::from("LP_A"),
        sender_comp_id: "FXGATE".to_string(),
        target_comp_id: "LP_A".to_string(),
        ..Default::default()
    };
    let (session, handle) =
        FixSession::new(config, dialer, seq_dir.path(), event_tx).unwrap();

    let shutdown = CancellationToken::new();
    let session_task = tokio::spawn(session.run(shutdown.clone()));

    let mut lp = ScriptedLp::new(far);
    // Complete the logon round-trip.
    let logon = lp.expect("A").await;
    assert_eq!(logon.get(tags::MSG_SEQ_NUM), Some("1"));
    lp.send(ScriptedLp::logon()).await;

    Harness {
        lp,
        events,
        shutdown,
        session_task,
        handle,
        _seq_dir: seq_dir,
    }
}

async fn next_tick(events: &mut mpsc::Receiver<SessionEvent>) -> fxgate_core::Tick {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if let SessionEvent::Tick(tick) = event {
            return tick;
        }
    }
}

#[tokio::test]
async fn logon_and_tick_delivery() {
    let mut h = start_session().await;

    h.lp.send(ScriptedLp::market_data("EURUSD", "1.0850", "1.0852"))
        .await;

    let tick = next_tick(&mut h.events).await;
    assert_eq!(tick.symbol.as_str(), "EURUSD");
    assert_eq!(tick.lp_id, LpId::from("LP_A"));
    assert_eq!(tick.bid.to_string(), "1.0850");
    assert_eq!(tick.ask.to_string(), "1.0852");

    h.shutdown.cancel();
    let _ = h.session_task.await;
}

#[tokio::test]
async fn gap_triggers_single_resend_request() {
    let mut h = start_session().await;

    // LP logon consumed seq 1; the session now expects 2. Send seq 3.
    h.lp.send_at(ScriptedLp::market_data("EURUSD", "1.0851", "1.0853"), 3)
        .await;

    // Exactly one ResendRequest covering [2, 2].
    let resend = h.lp.expect("2").await;
    assert_eq!(resend.get(tags::BEGIN_SEQ_NO), Some("2"));
    assert_eq!(resend.get(tags::END_SEQ_NO), Some("2"));

    // Deliver the missing message; both ticks then flow in order.
    h.lp.send_at(ScriptedLp::market_data("EURUSD", "1.0850", "1.0852"), 2)
        .await;

    let first = next_tick(&mut h.events).await;
    let second = next_tick(&mut h.events).await;
    assert_eq!(first.bid.to_string(), "1.0850");
    assert_eq!(second.bid.to_string(), "1.0851");

    h.shutdown.cancel();
    let _ = h.session_task.await;
}

#[tokio::test]
async fn graceful_stop_sends_logout() {
    let mut h = start_session().await;

    h.handle.stop().await.unwrap();

    let logout = h.lp.expect("5").await;
    assert_eq!(logout.msg_type().unwrap(), "5");

    // Confirm the logout; the session run loop should finish cleanly.
    h.lp.send(RawMessage::new("5")).await;
    let result = tokio::time::timeout(Duration::from_secs(5), h.session_task)
        .await
        .expect("session did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn subscribe_sends_security_definition_then_market_data_request() {
    let mut h = start_session().await;

    h.handle
        .subscribe(fxgate_core::Symbol::parse("EURUSD").unwrap())
        .await
        .unwrap();

    let secdef = h.lp.expect("c").await;
    assert_eq!(secdef.get(tags::SYMBOL), Some("EURUSD"));
    assert_eq!(secdef.get(tags::SECURITY_REQUEST_TYPE), Some("0"));
    assert_eq!(secdef.get(tags::SECURITY_TYPE), Some("FXSPOT"));
    let req_id = secdef.get(tags::SECURITY_REQ_ID).unwrap().to_string();

    // Answer the definition; the MarketDataRequest must follow.
    let mut response = RawMessage::new("d");
    response
        .push(tags::SECURITY_REQ_ID, req_id)
        .push(tags::SYMBOL, "EURUSD");
    h.lp.send(response).await;

    let mdr = h.lp.expect("V").await;
    assert_eq!(mdr.get(tags::SYMBOL), Some("EURUSD"));
    assert_eq!(mdr.get(tags::SUBSCRIPTION_REQUEST_TYPE), Some("1"));
    assert_eq!(mdr.get(tags::MARKET_DEPTH), Some("0"));
    assert_eq!(mdr.get_all(tags::MD_ENTRY_TYPE), vec!["0", "1"]);

    h.shutdown.cancel();
    let _ = h.session_task.await;
}
