//! End-to-end hub tests: real axum server, real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use fxgate_core::{LpId, Price, Qty, Symbol, Tick};
use fxgate_exec::{ExecConfig, ExecutionEngine, OrderHistory};
use fxgate_feed::QuoteBook;
use fxgate_health::{HealthConfig, HealthMonitor};
use fxgate_hub::{
    create_router, AllowAllValidator, AppState, HubConfig, RateLimiter,
    RateLimiterConfig, TickHub,
};
use fxgate_risk::{
    DisabledSymbols, ExposureTracker, RiskConfig, RiskGate, SessionCalendar,
    SessionCalendarConfig,
};
use fxgate_router::{AuditTrail, SmartOrderRouter};
use fxgate_rules::RuleStore;
use fxgate_store::{BackendMode, StoreConfig, TickStore};
use rust_decimal_macros::dec;

fn sym() -> Symbol {
    Symbol::parse("EURUSD").unwrap()
}

struct TestServer {
    addr: std::net::SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
    _dirs: Vec<tempfile::TempDir>,
}

async fn start_server() -> TestServer {
    let store_dir = tempfile::TempDir::new().unwrap();
    let audit_dir = tempfile::TempDir::new().unwrap();
    let history_dir = tempfile::TempDir::new().unwrap();

    let shutdown = CancellationToken::new();
    let (store, _writer) = TickStore::open(
        StoreConfig {
            base_dir: store_dir.path().to_path_buf(),
            backend: BackendMode::AppendJson,
            ..Default::default()
        },
        shutdown.clone(),
    );

    let disabled = Arc::new(DisabledSymbols::new());
    let hub = Arc::new(TickHub::new(HubConfig::default(), Arc::clone(&disabled)));
    let quotes = Arc::new(QuoteBook::new());
    let rules = Arc::new(RuleStore::open_in_memory().unwrap());
    let health = Arc::new(HealthMonitor::new(HealthConfig::default()));
    let router = Arc::new(SmartOrderRouter::new(
        Arc::clone(&rules),
        Arc::clone(&health),
        AuditTrail::new(audit_dir.path()),
    ));
    let risk = Arc::new(RiskGate::new(
        RiskConfig::default(),
        SessionCalendar::new(SessionCalendarConfig {
            always_open: true,
            ..Default::default()
        }),
        Arc::new(ExposureTracker::new(Qty::new(dec!(100)))),
        disabled,
    ));
    let (event_tx, _event_rx) = mpsc::channel(256);
    let engine = Arc::new(ExecutionEngine::new(
        ExecConfig::default(),
        Arc::clone(&risk),
        Arc::clone(&router),
        Arc::clone(&store),
        Arc::clone(&quotes),
        Arc::clone(&health),
        OrderHistory::new(history_dir.path()),
        event_tx,
    ));

    let state = AppState {
        hub,
        store,
        quotes,
        rules,
        router,
        engine,
        health,
        risk,
        validator: Arc::new(AllowAllValidator),
        limiter: Arc::new(RateLimiter::new(RateLimiterConfig::default())),
    };

    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
            .unwrap();
    });

    TestServer {
        addr,
        state,
        shutdown,
        _dirs: vec![store_dir, audit_dir, history_dir],
    }
}

fn tick(bid: &str, ts: i64) -> Tick {
    let bid: Price = bid.parse().unwrap();
    Tick::new(
        sym(),
        bid,
        Price::new(bid.inner() + rust_decimal_macros::dec!(0.0002)),
        ts,
        LpId::from("LP_A"),
    )
}

#[tokio::test]
async fn ws_subscribe_receives_broadcasts_and_replay() {
    let server = start_server().await;

    // Seed the last-price cache before the client connects.
    server.state.hub.broadcast(&tick("1.08500", 1));

    let url = format!("ws://{}/ws?token=client-1", server.addr);
    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    socket
        .send(Message::Text(
            r#"{"type":"subscribe","symbols":["EURUSD"]}"#.into(),
        ))
        .await
        .unwrap();

    // Replay of the cached tick arrives first.
    let replay = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = replay.into_text().unwrap();
    assert!(text.contains("\"type\":\"tick\""));
    assert!(text.contains("1.08500"));

    // A fresh (unsuppressed) tick fans out live.
    server.state.hub.broadcast(&tick("1.08510", 2));
    let live = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(live.into_text().unwrap().contains("1.08510"));

    // Ping answers pong.
    socket
        .send(Message::Text(r#"{"type":"ping"}"#.into()))
        .await
        .unwrap();
    let pong = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(pong.into_text().unwrap().contains("pong"));

    server.shutdown.cancel();
}

#[tokio::test]
async fn ws_missing_token_closed_with_1008() {
    let server = start_server().await;
    let url = format!("ws://{}/ws", server.addr);
    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Close(Some(close)) => {
            assert_eq!(u16::from(close.code), 1008);
        }
        other => panic!("expected close frame, got {other:?}"),
    }
    server.shutdown.cancel();
}

#[tokio::test]
async fn history_endpoint_validates_and_serves() {
    let server = start_server().await;
    let base = format!("http://{}", server.addr);
    let client = HttpClient::new(server.addr);

    // Path traversal rejected with the structured 400.
    let (status, headers, body) = client
        .get("/api/history/ticks?symbol=..%2Fetc&date=2026-08-01")
        .await;
    assert_eq!(status, 400);
    assert!(body.contains("validation_invalid"));
    // Rate-limit headers ride on every /api response.
    assert!(headers.contains("x-ratelimit-limit"));
    assert!(headers.contains("x-ratelimit-remaining"));
    assert!(headers.contains("x-ratelimit-reset"));

    let (status, _, body) = client
        .get("/api/history/ticks?symbol=EURUSD&date=2026-08-01&limit=10")
        .await;
    assert_eq!(status, 200, "body: {body} base: {base}");

    server.shutdown.cancel();
}

#[tokio::test]
async fn rule_crud_conflict_409() {
    let server = start_server().await;
    let client = HttpClient::new(server.addr);

    let rule = serde_json::json!({
        "priority": 10,
        "filters": {"symbols": ["EURUSD"]},
        "action": "abook",
    });
    let (status, _, body) = client.post_json("/api/routing/rules", &rule.to_string()).await;
    assert_eq!(status, 201, "body: {body}");

    let conflicting = serde_json::json!({
        "priority": 20,
        "filters": {"symbols": ["EURUSD"]},
        "action": "bbook",
    });
    let (status, _, body) = client
        .post_json("/api/routing/rules", &conflicting.to_string())
        .await;
    assert_eq!(status, 409, "body: {body}");
    assert!(body.contains("rule_conflict"));
    assert!(body.contains("conflicting_id"));

    server.shutdown.cancel();
}

#[tokio::test]
async fn rate_limiter_answers_429() {
    let server = start_server().await;
    // Tight limiter for this test.
    let state = AppState {
        limiter: Arc::new(RateLimiter::new(RateLimiterConfig {
            capacity: 2,
            refill_per_sec: 0.001,
        })),
        ..server.state.clone()
    };
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = server.shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .unwrap();
    });
    let client = HttpClient::new(addr);

    let path = "/api/history/ticks?symbol=EURUSD&date=2026-08-01";
    assert_eq!(client.get(path).await.0, 200);
    assert_eq!(client.get(path).await.0, 200);
    let (status, headers, body) = client.get(path).await;
    assert_eq!(status, 429, "body: {body}");
    assert!(headers.contains("retry-after"));
    assert!(body.contains("rate_limited"));

    server.shutdown.cancel();
}

/// Minimal HTTP/1.1 client over a raw TCP socket; enough for the tests
/// without pulling an HTTP client crate into the workspace.
struct HttpClient {
    addr: std::net::SocketAddr,
}

impl HttpClient {
    fn new(addr: std::net::SocketAddr) -> Self {
        Self { addr }
    }

    async fn request(&self, request: String) -> (u16, String, String) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let text = String::from_utf8_lossy(&response).into_owned();

        let status: u16 = text
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let (head, body) = text.split_once("\r\n\r\n").unwrap_or((text.as_str(), ""));
        (status, head.to_lowercase(), body.to_string())
    }

    async fn get(&self, path: &str) -> (u16, String, String) {
        self.request(format!(
            "GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n"
        ))
        .await
    }

    async fn post_json(&self, path: &str, body: &str) -> (u16, String, String) {
        self.request(format!(
            "POST {path} HTTP/1.1\r\nHost: test\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ))
        .await
    }
}
