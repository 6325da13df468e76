//! Admin API integration tests
//!
//! Tests for /healthz, /readyz, /livez, /stats, /missed, /metrics endpoints
//!
//! Run with: cargo test --test admin_api -- --test-threads=1

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

/// Port allocator for tests
static PORT: AtomicU16 = AtomicU16::new(19300);

fn next_port() -> u16 {
    PORT.fetch_add(1, Ordering::SeqCst)
}

/// Health response
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Readiness response
#[derive(Debug, Deserialize)]
struct ReadinessResponse {
    ready: bool,
    dependencies: Vec<DependencyStatus>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct DependencyStatus {
    name: String,
    healthy: bool,
    message: Option<String>,
}

/// Stats response
#[derive(Debug, Deserialize)]
struct StatsResponse {
    uptime_seconds: u64,
    connections: ConnectionStats,
    records: RecordStats,
}

#[derive(Debug, Deserialize)]
struct ConnectionStats {
    active: u64,
    total: u64,
}

#[derive(Debug, Deserialize)]
struct RecordStats {
    received: u64,
    parsed: u64,
    rejected: u64,
    missed_calls: u64,
}

#[derive(Debug, Deserialize)]
struct MissedResponse {
    stored: usize,
    calls: Vec<serde_json::Value>,
}

/// Parse a 27-field missed call for the given queue.
fn missed_call(queue: u32, connection_id: u64) -> cdrd::store::MissedCall {
    let line = (0..cdrd::record::RECORD_WIDTH)
        .map(|i| match i {
            0 => queue.to_string(),
            3..=5 => "2024/01/15 17:00:00".to_string(),
            6 => "00:00:42".to_string(),
            14 => "ABANDON".to_string(),
            _ => format!("{}", i),
        })
        .collect::<Vec<_>>()
        .join(",");
    let record = cdrd::record::RecordParser::default().parse(&line).unwrap().record;
    cdrd::store::MissedCall::new(record, "switch", connection_id, "10.0.0.9:4000".parse().unwrap())
}

/// Test fixture that starts the admin server on a unique port
struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    admin_state: Arc<cdrd::telemetry::AdminState>,
    base_url: String,
}

impl TestServer {
    async fn start() -> Self {
        use cdrd::telemetry::{Metrics, MetricsConfig};

        let port = next_port();
        let config = MetricsConfig {
            address: format!("127.0.0.1:{}", port).parse().unwrap(),
        };

        let metrics = Metrics::new(&config).unwrap();
        let admin_state = metrics.admin_state();

        let handle = tokio::spawn(async move {
            let _ = metrics.serve().await;
        });

        // Wait for server to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            handle,
            admin_state,
            base_url: format!("http://127.0.0.1:{}", port),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn test_healthz_returns_healthy() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(server.url("/healthz"))
        .send()
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::OK);

    let body: HealthResponse = resp.json().await.expect("invalid json");
    assert_eq!(body.status, "healthy");
    assert!(!body.version.is_empty());
}

#[tokio::test]
async fn test_livez_returns_ok() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(server.url("/livez"))
        .send()
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_readyz_follows_listener_health() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    server.admin_state.register_dependency("listener:switch");

    let resp = client
        .get(server.url("/readyz"))
        .send()
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: ReadinessResponse = resp.json().await.expect("invalid json");
    assert!(!body.ready);
    assert_eq!(body.dependencies.len(), 1);
    assert_eq!(body.dependencies[0].name, "listener:switch");
    assert!(!body.dependencies[0].healthy);

    server.admin_state.set_dependency_health("listener:switch", true);

    let resp = client
        .get(server.url("/readyz"))
        .send()
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    let body: ReadinessResponse = resp.json().await.expect("invalid json");
    assert!(body.ready);
}

#[tokio::test]
async fn test_stats_reflect_ingest_counters() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let state = &server.admin_state;
    state.inc_connections();
    state.inc_received();
    state.inc_received();
    state.inc_parsed();
    state.inc_rejected();
    state.inc_missed();

    let resp = client
        .get(server.url("/stats"))
        .send()
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::OK);

    let body: StatsResponse = resp.json().await.expect("invalid json");
    assert!(body.uptime_seconds < 60);
    assert_eq!(body.connections.active, 1);
    assert_eq!(body.connections.total, 1);
    assert_eq!(body.records.received, 2);
    assert_eq!(body.records.parsed, 1);
    assert_eq!(body.records.rejected, 1);
    assert_eq!(body.records.missed_calls, 1);
}

#[tokio::test]
async fn test_missed_without_memory_writer_is_not_found() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(server.url("/missed"))
        .send()
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missed_lists_stored_calls() {
    use cdrd::store::{MemoryWriter, MissedCallWriter};

    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let memory = Arc::new(MemoryWriter::new("memory-0", 100));
    memory.write(&missed_call(4100, 1)).await.unwrap();
    memory.write(&missed_call(4200, 2)).await.unwrap();
    memory.write(&missed_call(4100, 3)).await.unwrap();
    server.admin_state.attach_missed_call_log(memory);

    let resp = client
        .get(server.url("/missed?queue=4100"))
        .send()
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);

    let body: MissedResponse = resp.json().await.expect("invalid json");
    assert_eq!(body.stored, 3);
    assert_eq!(body.calls.len(), 2);
    assert_eq!(body.calls[0]["connection_id"], 3);
    assert_eq!(body.calls[0]["record"]["queue_id"], 4100);
    assert_eq!(body.calls[0]["record"]["time_3"], "2024/01/15 12:00:00");

    let resp = client
        .get(server.url("/missed?limit=1"))
        .send()
        .await
        .expect("request failed");
    let body: MissedResponse = resp.json().await.expect("invalid json");
    assert_eq!(body.calls.len(), 1);
    assert_eq!(body.calls[0]["record"]["queue_id"], 4100);

    let resp = client
        .get(server.url("/missed?since=2999-01-01T00:00:00Z"))
        .send()
        .await
        .expect("request failed");
    let body: MissedResponse = resp.json().await.expect("invalid json");
    assert!(body.calls.is_empty());
}

#[tokio::test]
async fn test_metrics_returns_prometheus_format() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(server.url("/metrics"))
        .send()
        .await
        .expect("request failed");

    assert_eq!(resp.status(), StatusCode::OK);

    let body = resp.text().await.expect("body");
    assert!(body.contains("cdr_") || body.is_empty() || body.contains("# HELP") || body.contains("# TYPE"));
}
