//! FIX session lifecycle.
//!
//! One logical session per LP. The session owns the socket, enforces
//! sequence discipline, answers admin messages, and surfaces application
//! messages as `SessionEvent`s on a bounded channel.
//!
//! Reconnection: any read/write error or heartbeat timeout after a
//! successful initial logon tears the connection down and redials with
//! exponential backoff (base 1s, cap 30s). A logon failure on the *first*
//! connect is surfaced to the caller and not retried.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fxgate_core::{LpId, Symbol, Tick};
use fxgate_telemetry::metrics;

use crate::codec::{tags, FixDecoder, RawMessage};
use crate::error::{FixError, FixResult};
use crate::heartbeat::HeartbeatManager;
use crate::messages::{self, ExecutionReport, FixMessage, MsgType};
use crate::seqnum::SeqNumStore;
use crate::subscription::SubscriptionManager;
use crate::transport::{Dialer, SessionStream};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub lp_id: LpId,
    pub sender_comp_id: String,
    pub target_comp_id: String,
    /// Heartbeat interval (tag 108). Default 30s.
    pub heartbeat_interval_secs: u32,
    /// Logon round-trip timeout.
    pub logon_timeout_ms: u64,
    /// Best-effort SecurityDefinition wait.
    pub secdef_timeout_ms: u64,
    /// Unresolved inbound gap forces re-logon after this long.
    pub gap_fill_timeout_ms: u64,
    /// Base delay for reconnect backoff.
    pub reconnect_base_delay_ms: u64,
    /// Cap for reconnect backoff.
    pub reconnect_max_delay_ms: u64,
    /// Logout grace period before the socket is closed.
    pub logout_grace_ms: u64,
    /// Exchange id for tag 207 on MarketDataRequest.
    pub exchange_id: String,
    /// Quote currency for tag 15 on MarketDataRequest.
    pub quote_ccy: String,
    /// Request seqnum reset at logon (141=Y).
    pub reset_seq_on_logon: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lp_id: LpId::from("LP"),
            sender_comp_id: "FXGATE".to_string(),
            target_comp_id: "LP".to_string(),
            heartbeat_interval_secs: 30,
            logon_timeout_ms: 10_000,
            secdef_timeout_ms: 2_000,
            gap_fill_timeout_ms: 10_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            logout_grace_ms: 5_000,
            exchange_id: "XOFF".to_string(),
            quote_ccy: "USD".to_string(),
            reset_seq_on_logon: false,
        }
    }
}

/// Session state. Never persisted; seqnums are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    LoggedIn,
    LoggingOut,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::LoggedIn => "logged_in",
            Self::LoggingOut => "logging_out",
        }
    }
}

/// Application-level events surfaced by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Tick(Tick),
    Execution {
        lp_id: LpId,
        report: ExecutionReport,
    },
    Reject {
        lp_id: LpId,
        ref_seq: Option<u64>,
        text: Option<String>,
    },
    BusinessReject {
        lp_id: LpId,
        ref_id: Option<String>,
        text: Option<String>,
    },
    StateChange {
        lp_id: LpId,
        state: SessionState,
    },
}

/// Commands accepted by a running session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Serialize, stamp a seqnum and write an application message.
    Send(RawMessage),
    /// Subscribe to market data for a symbol.
    Subscribe(Symbol),
    /// Graceful logout and stop.
    Stop,
}

/// Cheap cloneable handle for talking to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    lp_id: LpId,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Handle backed by a bare channel, not a running session. For test
    /// harnesses and tools that want to observe outbound commands.
    pub fn detached(lp_id: LpId) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        (Self { lp_id, cmd_tx }, cmd_rx)
    }

    pub fn lp_id(&self) -> &LpId {
        &self.lp_id
    }

    /// Queue an application message. Blocks only until the session accepts
    /// the command; never drops.
    pub async fn send(&self, msg: RawMessage) -> FixResult<()> {
        self.cmd_tx
            .send(SessionCommand::Send(msg))
            .await
            .map_err(|_| FixError::ShuttingDown)
    }

    pub async fn subscribe(&self, symbol: Symbol) -> FixResult<()> {
        self.cmd_tx
            .send(SessionCommand::Subscribe(symbol))
            .await
            .map_err(|_| FixError::ShuttingDown)
    }

    pub async fn stop(&self) -> FixResult<()> {
        self.cmd_tx
            .send(SessionCommand::Stop)
            .await
            .map_err(|_| FixError::ShuttingDown)
    }
}

/// Why a connection ended.
enum ConnExit {
    /// Deliberate stop; do not reconnect.
    Stopped,
    /// Connection dropped; reconnect with backoff.
    Dropped(FixError),
}

/// Per-connection inbound gap state.
struct GapState {
    begin: u64,
    end: u64,
    since: Instant,
    queued: BTreeMap<u64, RawMessage>,
}

/// Outcome of processing one inbound frame.
enum FrameSignal {
    None,
    LogonAck,
    Exit(ConnExit),
}

/// A FIX session. Create with [`FixSession::new`], then drive with
/// [`FixSession::run`] on its own task.
pub struct FixSession {
    config: SessionConfig,
    dialer: Arc<dyn Dialer>,
    seqnums: Arc<SeqNumStore>,
    subscriptions: Arc<SubscriptionManager>,
    heartbeat: HeartbeatManager,
    state: Arc<RwLock<SessionState>>,
    event_tx: mpsc::Sender<SessionEvent>,
    cmd_rx: Option<mpsc::Receiver<SessionCommand>>,
}

impl FixSession {
    /// Create a session and its handle. `seq_dir` holds the durable
    /// seqnum files, keyed by `lp_id`.
    pub fn new(
        config: SessionConfig,
        dialer: Arc<dyn Dialer>,
        seq_dir: impl AsRef<std::path::Path>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> FixResult<(Self, SessionHandle)> {
        let seqnums = Arc::new(SeqNumStore::open(seq_dir, config.lp_id.as_str())?);
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let heartbeat = HeartbeatManager::new(config.heartbeat_interval_secs);
        let handle = SessionHandle {
            lp_id: config.lp_id.clone(),
            cmd_tx,
        };
        Ok((
            Self {
                config,
                dialer,
                seqnums,
                subscriptions: Arc::new(SubscriptionManager::new()),
                heartbeat,
                state: Arc::new(RwLock::new(SessionState::Disconnected)),
                event_tx,
                cmd_rx: Some(cmd_rx),
            },
            handle,
        ))
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn subscriptions(&self) -> Arc<SubscriptionManager> {
        Arc::clone(&self.subscriptions)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
        for s in [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::LoggedIn,
            SessionState::LoggingOut,
        ] {
            metrics::FIX_SESSION_STATE
                .with_label_values(&[self.config.lp_id.as_str(), s.as_str()])
                .set(if s == state { 1.0 } else { 0.0 });
        }
        let _ = self.event_tx.try_send(SessionEvent::StateChange {
            lp_id: self.config.lp_id.clone(),
            state,
        });
    }

    /// Run the session until stopped or cancelled.
    ///
    /// The first connect must complete a Logon round-trip; failure is
    /// returned as `LogonFailed` without retry. Later drops reconnect
    /// with exponential backoff and replay the subscription list.
    pub async fn run(mut self, shutdown: CancellationToken) -> FixResult<()> {
        let mut cmd_rx = self.cmd_rx.take().expect("run called twice");
        let mut first_connect = true;
        let mut attempt = 0u32;

        loop {
            if shutdown.is_cancelled() {
                self.set_state(SessionState::Disconnected);
                return Ok(());
            }

            self.set_state(SessionState::Connecting);
            let result = self.run_connection(&mut cmd_rx, &shutdown).await;
            self.subscriptions.clear_pending();
            self.set_state(SessionState::Disconnected);

            match result {
                Ok(ConnExit::Stopped) => {
                    info!(lp_id = %self.config.lp_id, "FIX session stopped");
                    return Ok(());
                }
                Ok(ConnExit::Dropped(reason)) => {
                    warn!(lp_id = %self.config.lp_id, %reason, "FIX connection dropped");
                    metrics::FIX_RECONNECT_TOTAL
                        .with_label_values(&[self.config.lp_id.as_str(), "dropped"])
                        .inc();
                }
                Err(e) => {
                    if first_connect {
                        error!(lp_id = %self.config.lp_id, ?e, "Initial logon failed");
                        return Err(FixError::LogonFailed(e.to_string()));
                    }
                    warn!(lp_id = %self.config.lp_id, ?e, "FIX connection error");
                    metrics::FIX_RECONNECT_TOTAL
                        .with_label_values(&[self.config.lp_id.as_str(), "error"])
                        .inc();
                }
            }
            first_connect = false;

            attempt += 1;
            let delay = self.backoff_delay(attempt);
            warn!(
                lp_id = %self.config.lp_id,
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    self.set_state(SessionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    async fn run_connection(
        &self,
        cmd_rx: &mut mpsc::Receiver<SessionCommand>,
        shutdown: &CancellationToken,
    ) -> FixResult<ConnExit> {
        let stream = self.dialer.dial().await?;
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut decoder = FixDecoder::new();
        let mut gap: Option<GapState> = None;

        // Logon round-trip, bounded by the logon timeout. A reset request
        // (141=Y) rewinds both directions before the logon is stamped.
        if self.config.reset_seq_on_logon {
            self.seqnums.reset()?;
        }
        self.send_msg(
            &mut writer,
            messages::logon(
                self.config.heartbeat_interval_secs,
                self.config.reset_seq_on_logon,
            ),
        )
        .await?;

        let logon_deadline = Instant::now() + Duration::from_millis(self.config.logon_timeout_ms);
        let mut buf = vec![0u8; 8192];
        'logon: loop {
            let remaining = logon_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FixError::LogonFailed("logon timed out".to_string()));
            }
            let n = tokio::time::timeout(remaining, reader.read(&mut buf))
                .await
                .map_err(|_| FixError::LogonFailed("logon timed out".to_string()))??;
            if n == 0 {
                return Err(FixError::LogonFailed(
                    "connection closed during logon".to_string(),
                ));
            }
            decoder.extend(&buf[..n]);
            while let Some(raw) = decoder.next_message()? {
                match self.process_frame(&raw, &mut writer, &mut gap).await? {
                    FrameSignal::LogonAck => break 'logon,
                    FrameSignal::Exit(exit) => return Ok(exit),
                    FrameSignal::None => {}
                }
            }
        }

        info!(lp_id = %self.config.lp_id, "FIX logon complete");
        self.heartbeat.reset();
        self.set_state(SessionState::LoggedIn);

        // Replay the desired subscription list.
        for symbol in self.subscriptions.symbols() {
            self.begin_subscribe(&mut writer, &symbol).await?;
        }

        let mut logout_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.set_state(SessionState::LoggingOut);
                    let _ = self.send_msg(&mut writer, messages::logout(None)).await;
                    let _ = self.await_logout(&mut reader, &mut decoder).await;
                    return Ok(ConnExit::Stopped);
                }

                n = reader.read(&mut buf) => {
                    let n = n?;
                    if n == 0 {
                        return Ok(ConnExit::Dropped(FixError::ConnectionClosed(
                            "peer closed".to_string(),
                        )));
                    }
                    decoder.extend(&buf[..n]);
                    while let Some(raw) = decoder.next_message()? {
                        match self.process_frame(&raw, &mut writer, &mut gap).await? {
                            FrameSignal::Exit(exit) => return Ok(exit),
                            _ => {}
                        }
                    }
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Send(msg)) => {
                            self.send_msg(&mut writer, msg).await?;
                        }
                        Some(SessionCommand::Subscribe(symbol)) => {
                            if self.subscriptions.add(symbol.clone()) {
                                self.begin_subscribe(&mut writer, &symbol).await?;
                            }
                        }
                        Some(SessionCommand::Stop) => {
                            self.set_state(SessionState::LoggingOut);
                            self.send_msg(&mut writer, messages::logout(None)).await?;
                            logout_deadline = Some(
                                Instant::now()
                                    + Duration::from_millis(self.config.logout_grace_ms),
                            );
                        }
                        None => {
                            // All handles dropped: treat as stop.
                            let _ = self.send_msg(&mut writer, messages::logout(None)).await;
                            return Ok(ConnExit::Stopped);
                        }
                    }
                }

                _ = self.heartbeat.wait_for_check() => {
                    if let Some(deadline) = logout_deadline {
                        if Instant::now() >= deadline {
                            debug!(lp_id = %self.config.lp_id, "Logout grace expired");
                            return Ok(ConnExit::Stopped);
                        }
                    }

                    if self.heartbeat.is_timed_out() {
                        return Ok(ConnExit::Dropped(FixError::HeartbeatTimeout));
                    }

                    if let Some(g) = &gap {
                        if g.since.elapsed().as_millis() as u64 >= self.config.gap_fill_timeout_ms {
                            return Ok(ConnExit::Dropped(FixError::GapFillTimeout {
                                begin: g.begin,
                                end: g.end,
                            }));
                        }
                    }

                    if self.heartbeat.test_request_due() {
                        let id = Uuid::new_v4().to_string();
                        self.send_msg(&mut writer, messages::test_request(&id)).await?;
                        self.heartbeat.record_test_request(id);
                    } else if self.heartbeat.heartbeat_due() {
                        self.send_msg(&mut writer, messages::heartbeat(None)).await?;
                    }

                    // Best-effort SecurityDefinition wait expired: proceed.
                    for symbol in self.subscriptions.expire_pending(self.config.secdef_timeout_ms) {
                        debug!(
                            lp_id = %self.config.lp_id,
                            %symbol,
                            "SecurityDefinition wait expired, requesting market data anyway"
                        );
                        self.send_market_data_request(&mut writer, &symbol).await?;
                    }
                }
            }
        }
    }

    /// Drain the socket briefly after sending Logout, looking for the
    /// confirming Logout. Best effort.
    async fn await_logout(
        &self,
        reader: &mut tokio::io::ReadHalf<Box<dyn SessionStream>>,
        decoder: &mut FixDecoder,
    ) -> FixResult<()> {
        let deadline = Duration::from_millis(self.config.logout_grace_ms);
        let mut buf = vec![0u8; 4096];
        let result = tokio::time::timeout(deadline, async {
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    return Ok::<(), FixError>(());
                }
                decoder.extend(&buf[..n]);
                while let Some(raw) = decoder.next_message()? {
                    if raw.msg_type()? == MsgType::Logout.as_str() {
                        return Ok(());
                    }
                }
            }
        })
        .await;
        match result {
            Ok(r) => r,
            Err(_) => Ok(()), // grace expired
        }
    }

    /// Serialize and write a message: header stamped, seqnum persisted
    /// before the bytes leave.
    async fn send_msg(
        &self,
        writer: &mut WriteHalf<Box<dyn SessionStream>>,
        msg: RawMessage,
    ) -> FixResult<()> {
        let seq = self.seqnums.reserve_out()?;
        let stamped = self.stamp_header(&msg, seq);
        writer.write_all(&stamped.serialize()).await?;
        writer.flush().await?;
        self.heartbeat.record_sent();
        Ok(())
    }

    /// Rebuild the message with the session header up front:
    /// 35, 34, 49, 56, 52, then the application body.
    fn stamp_header(&self, msg: &RawMessage, seq: u64) -> RawMessage {
        let mut fields: Vec<(u32, String)> = Vec::with_capacity(msg.fields().len() + 4);
        let msg_type = msg.get(tags::MSG_TYPE).unwrap_or_default().to_string();
        fields.push((tags::MSG_TYPE, msg_type));
        fields.push((tags::MSG_SEQ_NUM, seq.to_string()));
        fields.push((tags::SENDER_COMP_ID, self.config.sender_comp_id.clone()));
        fields.push((tags::TARGET_COMP_ID, self.config.target_comp_id.clone()));
        fields.push((
            tags::SENDING_TIME,
            messages::format_fix_timestamp(chrono::Utc::now()),
        ));
        for (tag, value) in msg.fields() {
            if *tag != tags::MSG_TYPE {
                fields.push((*tag, value.clone()));
            }
        }
        RawMessage::from_fields(fields)
    }

    /// Start the subscribe flow: SecurityDefinitionRequest first, the
    /// MarketDataRequest follows on response or timeout.
    async fn begin_subscribe(
        &self,
        writer: &mut WriteHalf<Box<dyn SessionStream>>,
        symbol: &Symbol,
    ) -> FixResult<()> {
        let req_id = Uuid::new_v4().to_string();
        self.subscriptions
            .record_secdef_request(req_id.clone(), symbol.clone());
        self.send_msg(
            writer,
            messages::security_definition_request(&req_id, symbol),
        )
        .await
    }

    async fn send_market_data_request(
        &self,
        writer: &mut WriteHalf<Box<dyn SessionStream>>,
        symbol: &Symbol,
    ) -> FixResult<()> {
        let req_id = Uuid::new_v4().to_string();
        self.send_msg(
            writer,
            messages::market_data_request(
                &req_id,
                symbol,
                &self.config.exchange_id,
                &self.config.quote_ccy,
            ),
        )
        .await
    }

    /// Sequence-check one inbound frame, then apply it (and any queued
    /// messages it unblocks).
    async fn process_frame(
        &self,
        raw: &RawMessage,
        writer: &mut WriteHalf<Box<dyn SessionStream>>,
        gap: &mut Option<GapState>,
    ) -> FixResult<FrameSignal> {
        self.heartbeat.record_received();

        // SequenceReset bypasses the normal ordering check.
        if raw.msg_type()? == MsgType::SequenceReset.as_str() {
            if let FixMessage::SequenceReset { new_seq, .. } = FixMessage::from_raw(raw)? {
                debug!(lp_id = %self.config.lp_id, new_seq, "SequenceReset");
                self.seqnums.set_next_in(new_seq)?;
                if let Some(g) = gap.take() {
                    // Reset may have jumped past the gap; requeue leftovers.
                    return self.drain_queued(g.queued, writer, gap).await;
                }
            }
            return Ok(FrameSignal::None);
        }

        let seq = raw.seq_num()?;
        let expected = self.seqnums.next_in();

        if seq < expected {
            if raw.poss_dup() {
                debug!(lp_id = %self.config.lp_id, seq, expected, "Dropping PossDup replay");
                return Ok(FrameSignal::None);
            }
            // Counterparty regressed without PossDup: fatal session error.
            return Ok(FrameSignal::Exit(ConnExit::Dropped(
                FixError::SequenceRegression { expected, got: seq },
            )));
        }

        if seq > expected {
            match gap {
                Some(g) => {
                    g.queued.insert(seq, raw.clone());
                }
                None => {
                    warn!(
                        lp_id = %self.config.lp_id,
                        expected,
                        got = seq,
                        "Inbound gap, requesting resend"
                    );
                    self.send_msg(writer, messages::resend_request(expected, seq - 1))
                        .await?;
                    metrics::FIX_RESEND_REQUESTS_TOTAL
                        .with_label_values(&[self.config.lp_id.as_str()])
                        .inc();
                    let mut queued = BTreeMap::new();
                    queued.insert(seq, raw.clone());
                    *gap = Some(GapState {
                        begin: expected,
                        end: seq - 1,
                        since: Instant::now(),
                        queued,
                    });
                }
            }
            return Ok(FrameSignal::None);
        }

        // seq == expected
        self.seqnums.advance_in(seq)?;
        let signal = self.apply_message(raw, writer).await?;
        if !matches!(signal, FrameSignal::None) {
            return Ok(signal);
        }

        // The gap may now be closed; drain queued messages in order.
        if let Some(g) = gap.take() {
            return self.drain_queued(g.queued, writer, gap).await;
        }
        Ok(FrameSignal::None)
    }

    async fn drain_queued(
        &self,
        mut queued: BTreeMap<u64, RawMessage>,
        writer: &mut WriteHalf<Box<dyn SessionStream>>,
        gap: &mut Option<GapState>,
    ) -> FixResult<FrameSignal> {
        loop {
            let expected = self.seqnums.next_in();
            match queued.remove(&expected) {
                Some(raw) => {
                    self.seqnums.advance_in(expected)?;
                    let signal = self.apply_message(&raw, writer).await?;
                    if !matches!(signal, FrameSignal::None) {
                        return Ok(signal);
                    }
                }
                None => break,
            }
        }
        if !queued.is_empty() {
            // Still holes ahead; keep waiting on the existing resend.
            let (&first, _) = queued.iter().next().expect("non-empty");
            *gap = Some(GapState {
                begin: self.seqnums.next_in(),
                end: first - 1,
                since: Instant::now(),
                queued,
            });
        }
        Ok(FrameSignal::None)
    }

    /// Apply an in-sequence message.
    async fn apply_message(
        &self,
        raw: &RawMessage,
        writer: &mut WriteHalf<Box<dyn SessionStream>>,
    ) -> FixResult<FrameSignal> {
        let msg = FixMessage::from_raw(raw)?;
        match msg {
            FixMessage::Logon { heart_bt_int, .. } => {
                debug!(lp_id = %self.config.lp_id, heart_bt_int, "Logon acknowledged");
                return Ok(FrameSignal::LogonAck);
            }
            FixMessage::Logout { text } => {
                let stopped = self.state() == SessionState::LoggingOut;
                info!(lp_id = %self.config.lp_id, ?text, solicited = stopped, "Logout received");
                return Ok(FrameSignal::Exit(if stopped {
                    ConnExit::Stopped
                } else {
                    ConnExit::Dropped(FixError::ConnectionClosed(
                        "counterparty logout".to_string(),
                    ))
                }));
            }
            FixMessage::Heartbeat { .. } => {}
            FixMessage::TestRequest { test_req_id } => {
                self.send_msg(writer, messages::heartbeat(Some(&test_req_id)))
                    .await?;
            }
            FixMessage::ResendRequest { begin, end } => {
                // We never replay application messages: gap-fill forward.
                debug!(lp_id = %self.config.lp_id, begin, end, "Peer resend request, gap filling");
                let next = self.seqnums.next_out();
                self.send_msg(writer, messages::sequence_reset_gap_fill(next))
                    .await?;
            }
            FixMessage::SequenceReset { .. } => {
                // Handled before the sequence check.
            }
            FixMessage::Reject { ref_seq, text } => {
                warn!(lp_id = %self.config.lp_id, ?ref_seq, ?text, "Session-level reject");
                let _ = self.event_tx.try_send(SessionEvent::Reject {
                    lp_id: self.config.lp_id.clone(),
                    ref_seq,
                    text,
                });
            }
            FixMessage::BusinessReject { ref_id, text, .. } => {
                warn!(lp_id = %self.config.lp_id, ?ref_id, ?text, "Business-level reject");
                let _ = self.event_tx.try_send(SessionEvent::BusinessReject {
                    lp_id: self.config.lp_id.clone(),
                    ref_id,
                    text,
                });
            }
            FixMessage::SecurityDefinition { req_id, .. } => {
                if let Some(symbol) = req_id.and_then(|id| self.subscriptions.resolve_secdef(&id)) {
                    self.send_market_data_request(writer, &symbol).await?;
                }
            }
            FixMessage::MarketData(snapshot) => {
                if let Some(tick) = snapshot.into_tick(self.config.lp_id.clone()) {
                    metrics::TICKS_RECEIVED_TOTAL
                        .with_label_values(&[self.config.lp_id.as_str()])
                        .inc();
                    if self.event_tx.send(SessionEvent::Tick(tick)).await.is_err() {
                        warn!(lp_id = %self.config.lp_id, "Event receiver dropped");
                    }
                }
            }
            FixMessage::MarketDataReject { req_id, text } => {
                warn!(lp_id = %self.config.lp_id, %req_id, ?text, "MarketDataRequest rejected");
            }
            FixMessage::Execution(report) => {
                if self
                    .event_tx
                    .send(SessionEvent::Execution {
                        lp_id: self.config.lp_id.clone(),
                        report,
                    })
                    .await
                    .is_err()
                {
                    warn!(lp_id = %self.config.lp_id, "Event receiver dropped");
                }
            }
            FixMessage::Unhandled { msg_type } => {
                debug!(lp_id = %self.config.lp_id, %msg_type, "Unhandled message type");
            }
        }
        Ok(FrameSignal::None)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_base_delay_ms;
        let max = self.config.reconnect_max_delay_ms;

        // attempt=1 -> base, attempt=2 -> 2*base, ...
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = base.saturating_mul(1u64 << exponent).min(max);

        Duration::from_millis(delay + rand_jitter())
    }
}

/// Random jitter (0-1000ms) without a PRNG dependency.
fn rand_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.logon_timeout_ms, 10_000);
        assert_eq!(config.reconnect_base_delay_ms, 1_000);
        assert_eq!(config.reconnect_max_delay_ms, 30_000);
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let dialer = Arc::new(crate::transport::QueueDialer::new());
        let (event_tx, _event_rx) = mpsc::channel(16);
        let dir = tempfile::TempDir::new().unwrap();
        let (session, _handle) = FixSession::new(
            SessionConfig::default(),
            dialer,
            dir.path(),
            event_tx,
        )
        .unwrap();

        let d1 = session.backoff_delay(1).as_millis() as u64;
        let d3 = session.backoff_delay(3).as_millis() as u64;
        let d10 = session.backoff_delay(10).as_millis() as u64;

        assert!((1_000..2_100).contains(&d1));
        assert!((4_000..5_100).contains(&d3));
        // Capped at 30s plus jitter.
        assert!(d10 <= 31_000);
    }
}
