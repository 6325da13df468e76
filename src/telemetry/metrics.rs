use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use opentelemetry::metrics::MeterProvider;
use opentelemetry_prometheus::exporter;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Instant;
use tracing::{info, warn};

use crate::store::{MemoryWriter, MissedCall, MissedCallQuery};

/// Metrics configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// HTTP endpoint address
    pub address: SocketAddr,
}

/// Dependency status for readiness checks
#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub name: String,
    pub healthy: bool,
    pub message: Option<String>,
}

/// Admin state for health/stats endpoints
#[derive(Debug)]
pub struct AdminState {
    start_time: Instant,
    healthy: AtomicBool,
    ready: AtomicBool,
    active_connections: AtomicU64,
    total_connections: AtomicU64,
    records_received: AtomicU64,
    records_parsed: AtomicU64,
    records_rejected: AtomicU64,
    missed_calls: AtomicU64,
    /// Component health, keyed by name
    dependency_health: RwLock<HashMap<String, bool>>,
    /// Components that must be healthy for readiness
    required: RwLock<Vec<String>>,
    /// Memory writer behind `/missed`
    missed_call_log: OnceLock<Arc<MemoryWriter>>,
}

impl AdminState {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            healthy: AtomicBool::new(true),
            ready: AtomicBool::new(true),
            active_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            records_received: AtomicU64::new(0),
            records_parsed: AtomicU64::new(0),
            records_rejected: AtomicU64::new(0),
            missed_calls: AtomicU64::new(0),
            dependency_health: RwLock::new(HashMap::new()),
            required: RwLock::new(Vec::new()),
            missed_call_log: OnceLock::new(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn inc_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_parsed(&self) {
        self.records_parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_missed(&self) {
        self.missed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_received(&self) -> u64 {
        self.records_received.load(Ordering::Relaxed)
    }

    pub fn records_parsed(&self) -> u64 {
        self.records_parsed.load(Ordering::Relaxed)
    }

    pub fn records_rejected(&self) -> u64 {
        self.records_rejected.load(Ordering::Relaxed)
    }

    pub fn missed_calls(&self) -> u64 {
        self.missed_calls.load(Ordering::Relaxed)
    }

    /// Serve stored missed calls from this writer on `/missed`. Only the first one sticks.
    pub fn attach_missed_call_log(&self, writer: Arc<MemoryWriter>) {
        if self.missed_call_log.set(writer).is_err() {
            warn!("missed-call log already attached");
        }
    }

    pub fn missed_call_log(&self) -> Option<&Arc<MemoryWriter>> {
        self.missed_call_log.get()
    }

    /// Register a component that must be healthy before the service is ready.
    /// It starts out unhealthy.
    pub fn register_dependency(&self, name: &str) {
        if let Ok(mut required) = self.required.write() {
            if !required.iter().any(|r| r == name) {
                required.push(name.to_string());
            }
        }
        if let Ok(mut health) = self.dependency_health.write() {
            health.entry(name.to_string()).or_insert(false);
        }
        self.update_readiness();
    }

    /// Update component health
    pub fn set_dependency_health(&self, name: &str, healthy: bool) {
        if let Ok(mut health) = self.dependency_health.write() {
            health.insert(name.to_string(), healthy);
        }
        self.update_readiness();
    }

    fn update_readiness(&self) {
        let (Ok(required), Ok(health)) = (self.required.read(), self.dependency_health.read())
        else {
            self.ready.store(false, Ordering::Relaxed);
            return;
        };

        let all_healthy = required
            .iter()
            .all(|name| health.get(name).copied().unwrap_or(false));
        self.ready.store(all_healthy, Ordering::Relaxed);
    }

    /// Dependency status for the readiness response
    pub fn dependency_status(&self) -> Vec<DependencyStatus> {
        let (Ok(required), Ok(health)) = (self.required.read(), self.dependency_health.read())
        else {
            return Vec::new();
        };

        required
            .iter()
            .map(|name| {
                let healthy = health.get(name).copied().unwrap_or(false);
                DependencyStatus {
                    name: name.clone(),
                    healthy,
                    message: if healthy {
                        None
                    } else {
                        Some("not accepting connections".to_string())
                    },
                }
            })
            .collect()
    }
}

impl Default for AdminState {
    fn default() -> Self {
        Self::new()
    }
}

/// OTEL Metrics with Prometheus exporter
pub struct Metrics {
    registry: Registry,
    meter_provider: SdkMeterProvider,
    address: SocketAddr,
    admin_state: Arc<AdminState>,
}

impl Metrics {
    /// Create metrics with OTEL → Prometheus pipeline and register the recording
    /// instruments.
    pub fn new(config: &MetricsConfig) -> Result<Arc<Self>> {
        let registry = Registry::new();

        let exporter = exporter().with_registry(registry.clone()).build()?;

        let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

        opentelemetry::global::set_meter_provider(meter_provider.clone());
        counters::init(&meter_provider.meter("cdrd"));

        info!(
            address = %config.address,
            "OTEL metrics configured with Prometheus exporter"
        );

        Ok(Arc::new(Self {
            registry,
            meter_provider,
            address: config.address,
            admin_state: Arc::new(AdminState::new()),
        }))
    }

    /// Get admin state for updating stats from other components
    pub fn admin_state(&self) -> Arc<AdminState> {
        self.admin_state.clone()
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!(error = %e, "failed to encode metrics");
            return String::new();
        }

        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Start the metrics HTTP server
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let metrics = self.clone();
        let admin_state = self.admin_state.clone();

        let app = Router::new()
            .route(
                "/metrics",
                get(move || {
                    let m = metrics.clone();
                    async move { m.render() }
                }),
            )
            .route("/healthz", get(healthz_handler))
            .route("/livez", get(livez_handler))
            .route("/readyz", get(readyz_handler))
            .route("/stats", get(stats_handler))
            .route("/missed", get(missed_handler))
            .with_state(admin_state);

        let listener = tokio::net::TcpListener::bind(self.address).await?;

        info!(address = %self.address, "metrics server started");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

// ============================================================================
// Admin API Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    dependencies: Vec<DependencyStatus>,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    uptime_seconds: u64,
    connections: ConnectionStats,
    records: RecordStats,
}

#[derive(Debug, Serialize)]
struct ConnectionStats {
    active: u64,
    total: u64,
}

#[derive(Debug, Serialize)]
struct RecordStats {
    received: u64,
    parsed: u64,
    rejected: u64,
    missed_calls: u64,
}

#[derive(Debug, Serialize)]
struct MissedResponse {
    stored: usize,
    calls: Vec<MissedCall>,
}

// ============================================================================
// Admin API Handlers
// ============================================================================

async fn healthz_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let healthy = state.is_healthy();
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    if healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

async fn livez_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let response = ReadinessResponse {
        ready: state.is_ready(),
        dependencies: state.dependency_status(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

async fn stats_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let response = StatsResponse {
        uptime_seconds: state.uptime_secs(),
        connections: ConnectionStats {
            active: state.active_connections(),
            total: state.total_connections(),
        },
        records: RecordStats {
            received: state.records_received(),
            parsed: state.records_parsed(),
            rejected: state.records_rejected(),
            missed_calls: state.missed_calls(),
        },
    };
    Json(response)
}

async fn missed_handler(
    State(state): State<Arc<AdminState>>,
    Query(query): Query<MissedCallQuery>,
) -> Response {
    let Some(log) = state.missed_call_log() else {
        return (StatusCode::NOT_FOUND, "no memory writer configured").into_response();
    };

    let response = MissedResponse {
        stored: log.count(),
        calls: log.query(&query),
    };
    Json(response).into_response()
}

impl Drop for Metrics {
    fn drop(&mut self) {
        if let Err(e) = self.meter_provider.shutdown() {
            warn!(error = %e, "failed to shutdown meter provider");
        }
    }
}

/// CDR ingest metrics with cdr_* prefix.
///
/// Every recording function is a no-op until [`init`] has run, so library code and
/// tests can call them without a meter provider.
pub mod counters {
    use opentelemetry::metrics::{Counter, Gauge};
    use opentelemetry::KeyValue;
    use std::sync::OnceLock;

    // ============================================================================
    // LISTENER METRICS
    // ============================================================================

    static LISTENER_CONNECTIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static LISTENER_UP: OnceLock<Gauge<i64>> = OnceLock::new();

    // ============================================================================
    // RECORD METRICS
    // ============================================================================

    static RECORDS_RECEIVED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static RECORDS_PARSED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static RECORDS_REJECTED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static FIELD_WARNINGS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static DECISIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();

    // ============================================================================
    // STORE METRICS
    // ============================================================================

    static MISSED_CALLS_STORED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static SINK_DROPPED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    static WRITER_ERRORS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();

    // ============================================================================
    // SERVER METRICS
    // ============================================================================

    static SERVER_INFO: OnceLock<Gauge<i64>> = OnceLock::new();

    pub fn init(meter: &opentelemetry::metrics::Meter) {
        let _ = LISTENER_CONNECTIONS_TOTAL.set(
            meter
                .u64_counter("cdr_listener_connections_total")
                .with_description("Switch connections by listener and status")
                .build(),
        );
        let _ = LISTENER_UP.set(
            meter
                .i64_gauge("cdr_listener_up")
                .with_description("1 while the listener accepts connections")
                .build(),
        );
        let _ = RECORDS_RECEIVED_TOTAL.set(
            meter
                .u64_counter("cdr_records_received_total")
                .with_description("Raw records read from the switch")
                .build(),
        );
        let _ = RECORDS_PARSED_TOTAL.set(
            meter
                .u64_counter("cdr_records_parsed_total")
                .with_description("Records parsed into typed cells")
                .build(),
        );
        let _ = RECORDS_REJECTED_TOTAL.set(
            meter
                .u64_counter("cdr_records_rejected_total")
                .with_description("Records rejected by reason")
                .build(),
        );
        let _ = FIELD_WARNINGS_TOTAL.set(
            meter
                .u64_counter("cdr_field_warnings_total")
                .with_description("Fields replaced by a fallback value")
                .build(),
        );
        let _ = DECISIONS_TOTAL.set(
            meter
                .u64_counter("cdr_decisions_total")
                .with_description("Classification outcomes")
                .build(),
        );
        let _ = MISSED_CALLS_STORED_TOTAL.set(
            meter
                .u64_counter("cdr_missed_calls_stored_total")
                .with_description("Missed calls written, per writer")
                .build(),
        );
        let _ = SINK_DROPPED_TOTAL.set(
            meter
                .u64_counter("cdr_sink_dropped_total")
                .with_description("Missed calls dropped before reaching a writer")
                .build(),
        );
        let _ = WRITER_ERRORS_TOTAL.set(
            meter
                .u64_counter("cdr_writer_errors_total")
                .with_description("Writer failures")
                .build(),
        );
        let _ = SERVER_INFO.set(
            meter
                .i64_gauge("cdr_server_info")
                .with_description("Server version information")
                .build(),
        );

        if let Some(g) = SERVER_INFO.get() {
            g.record(1, &[KeyValue::new("version", env!("CARGO_PKG_VERSION"))]);
        }
    }

    // ============================================================================
    // LISTENER RECORDING FUNCTIONS
    // ============================================================================

    pub fn listener_started(listener: &str) {
        if let Some(g) = LISTENER_UP.get() {
            g.record(1, &[kv("listener", listener)]);
        }
    }

    pub fn listener_stopped(listener: &str) {
        if let Some(g) = LISTENER_UP.get() {
            g.record(0, &[kv("listener", listener)]);
        }
    }

    pub fn listener_accept_error(listener: &str) {
        if let Some(c) = LISTENER_CONNECTIONS_TOTAL.get() {
            c.add(1, &[kv("listener", listener), kv("status", "error")]);
        }
    }

    pub fn connection_accepted(listener: &str) {
        if let Some(c) = LISTENER_CONNECTIONS_TOTAL.get() {
            c.add(1, &[kv("listener", listener), kv("status", "accepted")]);
        }
    }

    /// `outcome` is how the connection ended: peer_closed, reset, error, aborted
    pub fn connection_closed(listener: &str, outcome: &str) {
        if let Some(c) = LISTENER_CONNECTIONS_TOTAL.get() {
            c.add(
                1,
                &[kv("listener", listener), kv("status", "closed"), kv("outcome", outcome)],
            );
        }
    }

    // ============================================================================
    // RECORD RECORDING FUNCTIONS
    // ============================================================================

    pub fn record_received(listener: &str) {
        if let Some(c) = RECORDS_RECEIVED_TOTAL.get() {
            c.add(1, &[kv("listener", listener)]);
        }
    }

    pub fn record_parsed(listener: &str) {
        if let Some(c) = RECORDS_PARSED_TOTAL.get() {
            c.add(1, &[kv("listener", listener)]);
        }
    }

    pub fn record_rejected(listener: &str, reason: &str) {
        if let Some(c) = RECORDS_REJECTED_TOTAL.get() {
            c.add(1, &[kv("listener", listener), kv("reason", reason)]);
        }
    }

    pub fn field_warning(field: &str, kind: &str) {
        if let Some(c) = FIELD_WARNINGS_TOTAL.get() {
            c.add(1, &[kv("field", field), kv("kind", kind)]);
        }
    }

    pub fn decision(listener: &str, decision: &str) {
        if let Some(c) = DECISIONS_TOTAL.get() {
            c.add(1, &[kv("listener", listener), kv("decision", decision)]);
        }
    }

    // ============================================================================
    // STORE RECORDING FUNCTIONS
    // ============================================================================

    pub fn missed_call_stored(writer: &str) {
        if let Some(c) = MISSED_CALLS_STORED_TOTAL.get() {
            c.add(1, &[kv("writer", writer)]);
        }
    }

    pub fn sink_dropped(reason: &str) {
        if let Some(c) = SINK_DROPPED_TOTAL.get() {
            c.add(1, &[kv("reason", reason)]);
        }
    }

    pub fn writer_error(writer: &str) {
        if let Some(c) = WRITER_ERRORS_TOTAL.get() {
            c.add(1, &[kv("writer", writer)]);
        }
    }

    #[inline]
    fn kv(key: &'static str, value: &str) -> KeyValue {
        KeyValue::new(key, value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_state_connections() {
        let state = AdminState::new();
        state.inc_connections();
        state.inc_connections();
        state.dec_connections();

        assert_eq!(state.active_connections(), 1);
        assert_eq!(state.total_connections(), 2);
    }

    #[test]
    fn test_missed_call_log_attaches_once() {
        let state = AdminState::new();
        assert!(state.missed_call_log().is_none());

        state.attach_missed_call_log(Arc::new(MemoryWriter::new("memory-0", 10)));
        state.attach_missed_call_log(Arc::new(MemoryWriter::new("memory-1", 10)));

        let log = state.missed_call_log().unwrap();
        assert_eq!(crate::store::MissedCallWriter::name(log.as_ref()), "memory-0");
    }

    #[test]
    fn test_readiness_follows_dependencies() {
        let state = AdminState::new();
        assert!(state.is_ready());

        state.register_dependency("listener:switch");
        assert!(!state.is_ready());
        assert_eq!(state.dependency_status().len(), 1);

        state.set_dependency_health("listener:switch", true);
        assert!(state.is_ready());
        assert!(state.dependency_status()[0].message.is_none());

        state.set_dependency_health("listener:switch", false);
        assert!(!state.is_ready());
    }

    #[test]
    fn test_counters_noop_without_init() {
        counters::record_received("switch");
        counters::decision("switch", "missed");
        counters::sink_dropped("full");
    }
}
