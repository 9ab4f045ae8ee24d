//! Application wiring and lifecycle.
//!
//! Market data: FIX sessions -> tick store (always) -> aggregator -> hub
//! (throttled). Orders: API -> risk -> rules -> router -> engine -> FIX.
//!
//! Shutdown order: stop accepting orders, quiesce FIX sessions (Logout),
//! drain the tick writer behind a final durability barrier, close the
//! hub, exit.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fxgate_core::{AccountId, AccountProfile, LpId, Symbol};
use fxgate_exec::{run_watcher, ExecEvent, ExecutionEngine, OrderHistory};
use fxgate_feed::QuoteBook;
use fxgate_fix::{
    Dialer, FixSession, SessionConfig, SessionEvent, SessionHandle, SessionState, TcpDialer,
};
use fxgate_fix::transport::Socks5Proxy;
use fxgate_health::HealthMonitor;
use fxgate_hub::{
    run_server, run_stats_reporter, AllowAllValidator, AppState, JwtValidator, RateLimiter,
    TickHub, TokenValidator,
};
use fxgate_risk::{DisabledSymbols, ExposureTracker, RiskGate, SessionCalendar};
use fxgate_router::{AuditTrail, SmartOrderRouter};
use fxgate_rules::RuleStore;
use fxgate_store::TickStore;

use crate::config::AppConfig;

/// The wired application.
pub struct Application {
    config: AppConfig,
    state: AppState,
    session_events: mpsc::Receiver<SessionEvent>,
    session_event_tx: mpsc::Sender<SessionEvent>,
    exec_events: mpsc::Receiver<ExecEvent>,
    writer_handle: JoinHandle<()>,
    store_token: CancellationToken,
}

impl Application {
    /// Build every component. Requires a running tokio runtime (the
    /// store spawns its writer here).
    pub fn new(config: AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

        let store_token = CancellationToken::new();
        let (store, writer_handle) = TickStore::open(config.store.clone(), store_token.clone());

        let disabled = Arc::new(DisabledSymbols::new());
        let hub = Arc::new(TickHub::new(config.hub.clone(), Arc::clone(&disabled)));
        let quotes = Arc::new(QuoteBook::new());
        let rules = Arc::new(
            RuleStore::open(config.rules_db_path()).context("opening routing-rule store")?,
        );
        let health = Arc::new(HealthMonitor::new(config.health.clone()));
        let router = Arc::new(SmartOrderRouter::new(
            Arc::clone(&rules),
            Arc::clone(&health),
            AuditTrail::new(config.audit_dir()),
        ));
        let risk = Arc::new(RiskGate::new(
            config.risk.clone(),
            SessionCalendar::new(config.calendar.clone()),
            Arc::new(ExposureTracker::new(config.risk.max_position_per_symbol)),
            Arc::clone(&disabled),
        ));

        let (exec_event_tx, exec_events) = mpsc::channel(1_024);
        let engine = Arc::new(ExecutionEngine::new(
            config.exec.clone(),
            Arc::clone(&risk),
            Arc::clone(&router),
            Arc::clone(&store),
            Arc::clone(&quotes),
            Arc::clone(&health),
            OrderHistory::new(config.history_dir()),
            exec_event_tx,
        ));

        for account in &config.accounts {
            engine.register_profile(AccountProfile::new(
                AccountId::new(account.id.clone()),
                account.group.clone(),
                account.toxicity,
            ));
        }

        let validator: Arc<dyn TokenValidator> = match &config.jwt_secret {
            Some(secret) => Arc::new(JwtValidator::new(secret)),
            None => {
                warn!("No jwt_secret configured; accepting any token (dev mode)");
                Arc::new(AllowAllValidator)
            }
        };

        let state = AppState {
            hub,
            store,
            quotes,
            rules,
            router,
            engine,
            health,
            risk,
            validator,
            limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
        };

        let (session_event_tx, session_events) = mpsc::channel(config.hub.broadcast_queue);

        Ok(Self {
            config,
            state,
            session_events,
            session_event_tx,
            exec_events,
            writer_handle,
            store_token,
        })
    }

    /// Run until SIGINT/SIGTERM, then shut down in order.
    pub async fn run(mut self) -> Result<()> {
        let server_token = CancellationToken::new();
        let session_token = CancellationToken::new();
        let misc_token = CancellationToken::new();

        // FIX sessions, one task each.
        let mut session_tasks = Vec::new();
        for lp in &self.config.lps {
            let session_config = SessionConfig {
                lp_id: LpId::new(lp.id.clone()),
                sender_comp_id: lp.sender_comp_id.clone(),
                target_comp_id: lp.target_comp_id.clone(),
                heartbeat_interval_secs: lp.heartbeat_interval_secs,
                exchange_id: lp.exchange_id.clone(),
                quote_ccy: lp.quote_ccy.clone(),
                reset_seq_on_logon: lp.reset_seq_on_logon,
                ..Default::default()
            };
            let proxy = lp.socks5_proxy.as_ref().and_then(|addr| {
                let (host, port) = addr.rsplit_once(':')?;
                Some(Socks5Proxy {
                    host: host.to_string(),
                    port: port.parse().ok()?,
                })
            });
            let dialer: Arc<dyn Dialer> =
                Arc::new(TcpDialer::new(lp.host.clone(), lp.port, proxy));

            let (session, handle) = FixSession::new(
                session_config,
                dialer,
                self.config.seq_dir(),
                self.session_event_tx.clone(),
            )
            .context("creating FIX session")?;
            self.state.engine.register_session(handle.clone());

            let token = session_token.clone();
            let lp_id = lp.id.clone();
            session_tasks.push(tokio::spawn(async move {
                if let Err(e) = session.run(token).await {
                    error!(lp_id = %lp_id, ?e, "FIX session terminated");
                }
            }));

            self.subscribe_all(&handle).await;
        }

        // Hub server, order watcher, counter reporter.
        let server = tokio::spawn(run_server(
            self.state.clone(),
            self.config.server.clone(),
            server_token.clone(),
        ));
        let watcher = tokio::spawn(run_watcher(
            Arc::clone(&self.state.engine),
            misc_token.clone(),
        ));
        let reporter = tokio::spawn(run_stats_reporter(
            Arc::clone(&self.state.hub),
            misc_token.clone(),
        ));

        info!(
            lps = self.config.lps.len(),
            symbols = self.config.symbols.len(),
            port = self.config.server.port,
            "fxgate running"
        );

        // Main event loop.
        let mut logged_in_before: std::collections::HashSet<LpId> = Default::default();
        loop {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("Shutdown signal received");
                    break;
                }

                event = self.session_events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_session_event(event, &mut logged_in_before).await;
                }

                event = self.exec_events.recv() => {
                    let Some(event) = event else { break };
                    handle_exec_event(event);
                }
            }
        }

        // 1. Stop accepting new orders and connections.
        server_token.cancel();
        let _ = server.await;

        // 2. Quiesce FIX sessions (Logout + close).
        session_token.cancel();
        for task in session_tasks {
            let _ = task.await;
        }

        // 3. Drain the tick writer behind a final durability barrier.
        self.store_token.cancel();
        let _ = self.writer_handle.await;

        // 4. Close the hub workers and exit.
        misc_token.cancel();
        let _ = watcher.await;
        let _ = reporter.await;

        info!("Shutdown complete");
        Ok(())
    }

    async fn subscribe_all(&self, handle: &SessionHandle) {
        for symbol in &self.config.symbols {
            match Symbol::parse(symbol) {
                Ok(symbol) => {
                    if let Err(e) = handle.subscribe(symbol).await {
                        warn!(lp_id = %handle.lp_id(), ?e, "Subscribe queueing failed");
                    }
                }
                Err(e) => warn!(symbol, ?e, "Skipping invalid symbol"),
            }
        }
    }

    async fn handle_session_event(
        &self,
        event: SessionEvent,
        logged_in_before: &mut std::collections::HashSet<LpId>,
    ) {
        match event {
            SessionEvent::Tick(tick) => {
                // The store sees every LP tick before any throttling; the
                // hub only sees aggregated best-price changes.
                self.state.store.store(tick.clone());
                if let Some(aggregated) = self.state.quotes.ingest(&tick) {
                    self.state.hub.broadcast(&aggregated);
                }
            }
            SessionEvent::Execution { lp_id, report } => {
                self.state.engine.on_execution_report(&lp_id, &report);
            }
            SessionEvent::StateChange { lp_id, state } => {
                debug!(lp_id = %lp_id, state = state.as_str(), "Session state");
                if state == SessionState::LoggedIn {
                    if logged_in_before.contains(&lp_id) {
                        // Recovered session: ask where our orders stand.
                        if let Err(e) = self.state.engine.reconcile(&lp_id).await {
                            warn!(lp_id = %lp_id, ?e, "Reconnect reconciliation failed");
                        }
                    } else {
                        logged_in_before.insert(lp_id);
                    }
                }
            }
            SessionEvent::Reject { lp_id, ref_seq, text } => {
                warn!(lp_id = %lp_id, ?ref_seq, ?text, "Session reject surfaced");
            }
            SessionEvent::BusinessReject { lp_id, ref_id, text } => {
                warn!(lp_id = %lp_id, ?ref_id, ?text, "Business reject surfaced");
            }
        }
    }
}

fn handle_exec_event(event: ExecEvent) {
    match event {
        ExecEvent::OrderUpdated(order) => {
            debug!(order_id = %order.id, status = %order.status, "Order update");
        }
        ExecEvent::InternalizedLeg {
            order_id,
            symbol,
            qty,
            reference_px,
            ..
        } => {
            info!(
                %order_id,
                %symbol,
                %qty,
                ?reference_px,
                "Internalized leg for downstream book treatment"
            );
        }
        ExecEvent::OperatorReview { order_id, note } => {
            error!(%order_id, note, "Order flagged for operator review");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
