use std::env;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::protocol::Message;

use standard_lib::engine_core::api_traits::{
    AuthCredentials, CredentialProvider, HistoricalRequest, PlanTier,
};
use standard_lib::market_data::base_data::Interval;

use crate::client::api_base::TvApiClient;
use crate::client::credentials::StaticTokenProvider;
use crate::client::frame::encode_frame;
use crate::client::server_models::TvClientConfig;

// ── Mock protocol server ────────────────────────────────────────────

/// How one accepted connection behaves.
#[derive(Clone)]
enum ConnPlan {
    /// Answer `set_auth_token` with a protocol_error packet.
    RejectAuth,
    /// Answer `create_series` with these pre-encoded frames.
    ServeSeries(Vec<String>),
}

struct MockServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<(usize, String)>>>,
}

impl MockServer {
    async fn spawn(plans: Arc<dyn Fn(usize) -> ConnPlan + Send + Sync>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        let conn_counter = connections.clone();
        let received_log = received.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let idx = conn_counter.fetch_add(1, Ordering::SeqCst);
                let plan = plans(idx);
                tokio::spawn(Self::handle_conn(stream, idx, plan, received_log.clone()));
            }
        });

        Self {
            addr,
            connections,
            received,
        }
    }

    async fn handle_conn(
        stream: tokio::net::TcpStream,
        idx: usize,
        plan: ConnPlan,
        received: Arc<Mutex<Vec<(usize, String)>>>,
    ) {
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let (mut write, mut read) = ws.split();
        while let Some(Ok(msg)) = read.next().await {
            let Message::Text(text) = msg else { continue };
            received.lock().unwrap().push((idx, text.clone()));
            match &plan {
                ConnPlan::RejectAuth => {
                    if text.contains("set_auth_token") {
                        let frame =
                            encode_frame("protocol_error", &json!(["invalid token"])).unwrap();
                        let _ = write.send(Message::Text(frame)).await;
                    }
                }
                ConnPlan::ServeSeries(frames) => {
                    if text.contains("create_series") {
                        for frame in frames {
                            let _ = write.send(Message::Text(frame.clone())).await;
                        }
                    }
                }
            }
        }
    }

    fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn messages_for(&self, idx: usize) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _)| *i == idx)
            .map(|(_, t)| t.clone())
            .collect()
    }

    fn config(&self) -> TvClientConfig {
        TvClientConfig {
            ws_url: format!("ws://{}", self.addr),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(2),
            auth_read_timeout: Duration::from_millis(250),
            streaming_deadline: Some(Duration::from_secs(5)),
        }
    }
}

// ── Frame builders ─────────────────────────────────────────────────

fn day_ts(day: u32) -> i64 {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap().timestamp()
}

/// A timescale_update frame holding `count` daily bars starting at Jan
/// `from_day` 2024.
fn daily_bars_frame(from_day: u32, count: u32) -> String {
    let entries: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            json!({
                "i": i,
                "v": [day_ts(from_day + i), 10.0 + f64::from(i), 12.0, 9.0, 11.0, 100.0]
            })
        })
        .collect();
    encode_frame("timescale_update", &json!(["cs_srv", {"s1": {"s": entries}}])).unwrap()
}

fn series_completed_frame() -> String {
    encode_frame("series_completed", &json!(["cs_srv", "s1"])).unwrap()
}

fn symbol_error_frame() -> String {
    encode_frame("symbol_error", &json!(["cs_srv", "symbol_1"])).unwrap()
}

fn good_chunk(from_day: u32, count: u32) -> ConnPlan {
    ConnPlan::ServeSeries(vec![daily_bars_frame(from_day, count), series_completed_frame()])
}

fn empty_chunk() -> ConnPlan {
    ConnPlan::ServeSeries(vec![series_completed_frame()])
}

async fn static_client(server: &MockServer) -> TvApiClient {
    let provider = Arc::new(StaticTokenProvider::new("good-token", PlanTier::Free));
    TvApiClient::new(provider, server.config()).await
}

fn range_request(chunk_days: i64) -> HistoricalRequest {
    let mut req = HistoricalRequest::new("ES", "CME_MINI", Interval::Daily).with_range(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
    );
    req.chunk_days = Some(chunk_days);
    req.sleep_seconds = 0;
    req
}

// ── Scenario tests ─────────────────────────────────────────────────

#[tokio::test]
async fn n_bars_mode_returns_ascending_series() {
    let server = MockServer::spawn(Arc::new(|_| good_chunk(1, 10))).await;
    let client = static_client(&server).await;

    let req = HistoricalRequest::new("ES", "CME_MINI", Interval::Daily).with_n_bars(10);
    let series = client.get_hist(&req).await.unwrap();

    assert_eq!(series.symbol, "CME_MINI:ES");
    assert_eq!(series.len(), 10);
    assert!(series.bars().windows(2).all(|w| w[0].time < w[1].time));
    assert!(!series.has_open_interest());
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn range_mode_recovers_chunk_on_third_attempt() {
    // Three 10-day chunks; chunk 2 is empty on attempts 1 and 2.
    let server = MockServer::spawn(Arc::new(|idx| match idx {
        0 => good_chunk(1, 10),   // chunk 1
        1 | 2 => empty_chunk(),   // chunk 2, attempts 1-2
        3 => good_chunk(11, 10),  // chunk 2, attempt 3
        _ => good_chunk(21, 10),  // chunk 3
    }))
    .await;
    let client = static_client(&server).await;

    let series = client.get_hist(&range_request(10)).await.unwrap();

    assert_eq!(series.len(), 30);
    let times: Vec<i64> = series.bars().iter().map(|b| b.time.timestamp()).collect();
    let mut sorted = times.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(times, sorted, "series must be ascending with no duplicates");
    assert_eq!(server.connection_count(), 5);
}

#[tokio::test]
async fn range_mode_stops_after_three_consecutive_failed_chunks() {
    // Six 5-day chunks; chunk 1 succeeds, everything after is empty.
    let server = MockServer::spawn(Arc::new(|idx| match idx {
        0 => good_chunk(1, 5),
        _ => empty_chunk(),
    }))
    .await;
    let client = static_client(&server).await;

    let series = client.get_hist(&range_request(5)).await.unwrap();

    // Only chunk 1 data survives; no error is raised.
    assert_eq!(series.len(), 5);
    // 1 good chunk + 3 failed chunks x 3 attempts, then the early stop.
    assert_eq!(server.connection_count(), 10);
}

#[tokio::test]
async fn symbol_error_is_not_retried() {
    let server =
        MockServer::spawn(Arc::new(|_| ConnPlan::ServeSeries(vec![symbol_error_frame()]))).await;
    let client = static_client(&server).await;

    // n_bars mode: one session, empty result, no retry.
    let req = HistoricalRequest::new("BOGUS", "NOWHERE", Interval::Daily);
    let series = client.get_hist(&req).await.unwrap();
    assert!(series.is_empty());
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn range_mode_symbol_error_skips_chunk_retries() {
    let server =
        MockServer::spawn(Arc::new(|_| ConnPlan::ServeSeries(vec![symbol_error_frame()]))).await;
    let client = static_client(&server).await;

    let series = client.get_hist(&range_request(5)).await.unwrap();

    assert!(series.is_empty());
    // One connection per chunk (no per-chunk retries), early stop after 3.
    assert_eq!(server.connection_count(), 3);
}

struct RecoveringProvider {
    recover_calls: AtomicUsize,
}

#[async_trait::async_trait]
impl CredentialProvider for RecoveringProvider {
    async fn obtain(&self) -> anyhow::Result<AuthCredentials> {
        Ok(AuthCredentials::new("expired-token", PlanTier::Free))
    }

    async fn recover(&self) -> Option<AuthCredentials> {
        self.recover_calls.fetch_add(1, Ordering::SeqCst);
        Some(AuthCredentials::new("fresh-token", PlanTier::Pro))
    }
}

#[tokio::test]
async fn auth_rejection_recovers_once_with_fresh_session() {
    let server = MockServer::spawn(Arc::new(|idx| match idx {
        0 => ConnPlan::RejectAuth,
        _ => good_chunk(1, 10),
    }))
    .await;
    let provider = Arc::new(RecoveringProvider {
        recover_calls: AtomicUsize::new(0),
    });
    let client = TvApiClient::new(provider.clone(), server.config()).await;

    let req = HistoricalRequest::new("ES", "CME_MINI", Interval::Daily).with_n_bars(10);
    let series = client.get_hist(&req).await.unwrap();

    assert_eq!(series.len(), 10, "second session must succeed without caller involvement");
    assert_eq!(provider.recover_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_count(), 2);

    // The replacement token went out on the second connection.
    let second = server.messages_for(1).join("\n");
    assert!(second.contains("fresh-token"));
    // The rejected connection never reached the resolving phase.
    let first = server.messages_for(0).join("\n");
    assert!(!first.contains("chart_create_session"));
}

struct UnrecoverableProvider;

#[async_trait::async_trait]
impl CredentialProvider for UnrecoverableProvider {
    async fn obtain(&self) -> anyhow::Result<AuthCredentials> {
        Ok(AuthCredentials::new("expired-token", PlanTier::Free))
    }
}

#[tokio::test]
async fn failed_recovery_poisons_the_engine() {
    let server = MockServer::spawn(Arc::new(|_| ConnPlan::RejectAuth)).await;
    let client = TvApiClient::new(Arc::new(UnrecoverableProvider), server.config()).await;

    let req = HistoricalRequest::new("ES", "CME_MINI", Interval::Daily);
    let series = client.get_hist(&req).await.unwrap();
    assert!(series.is_empty());
    assert_eq!(server.connection_count(), 1);

    // Poisoned: later calls short-circuit without touching the network.
    let series = client.get_hist(&req).await.unwrap();
    assert!(series.is_empty());
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn invalid_inputs_are_the_only_errors() {
    let server = MockServer::spawn(Arc::new(|_| good_chunk(1, 1))).await;
    let client = static_client(&server).await;

    // start >= end
    let req = HistoricalRequest::new("ES", "CME_MINI", Interval::Daily).with_range(
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    );
    assert!(client.get_hist(&req).await.is_err());

    // contract 0
    let req = HistoricalRequest::new("ES", "CME_MINI", Interval::Daily).with_contract(0);
    assert!(client.get_hist(&req).await.is_err());
    // Input validation happens before any connection is made.
    assert_eq!(server.connection_count(), 0);
}

// ── Live integration tests (need real credentials) ─────────────────

#[allow(dead_code)]
async fn live_client() -> TvApiClient {
    dotenvy::dotenv().ok();
    let token = env::var("TV_TOKEN").expect("Missing TV_TOKEN");
    let plan = PlanTier::from_plan_str(&env::var("TV_PLAN").unwrap_or_default());
    let provider = Arc::new(StaticTokenProvider::new(token, plan));
    TvApiClient::new(provider, TvClientConfig::default()).await
}

#[tokio::test]
#[ignore] // don't run on `cargo test` unless explicitly requested
async fn test_live_daily_n_bars() {
    let client = live_client().await;
    let req = HistoricalRequest::new("ES", "CME_MINI", Interval::Daily)
        .with_n_bars(10)
        .with_contract(1);
    let series = client.get_hist(&req).await.unwrap();
    println!("got {} bars for {}", series.len(), series.symbol);
    assert!(!series.is_empty());
}

#[tokio::test]
#[ignore] // don't run on `cargo test` unless explicitly requested
async fn test_live_range_chunked() {
    let client = live_client().await;
    let end = Utc::now();
    let req = HistoricalRequest::new("ES", "CME_MINI", Interval::Daily)
        .with_contract(1)
        .with_range(end - chrono::Duration::days(365 * 3), end);
    let series = client.get_hist(&req).await.unwrap();
    println!("got {} bars for {}", series.len(), series.symbol);
    assert!(!series.is_empty());
}

#[tokio::test]
#[ignore] // don't run on `cargo test` unless explicitly requested
async fn test_live_security_info() {
    let client = live_client().await;
    let info = client.get_security_info("ZC", "CBOT", Some(1)).await.unwrap();
    println!("security info for {}: {:?}", info.symbol, info.fields.keys());
    assert_eq!(info.symbol, "CBOT:ZC1!");
    assert!(!info.is_empty());
}
