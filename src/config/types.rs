use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::record::{
    Classifier, ConverterError, TimestampConverter, DEFAULT_EXCLUDED_QUEUE,
    DEFAULT_TIMESTAMP_FORMAT,
};
use crate::store::OutputFormat;

/// Root configuration for cdrd
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Switch-facing listener
    pub listener: ListenerConfig,

    /// Field normalization settings
    #[serde(default)]
    pub normalize: NormalizeConfig,

    /// Missed-call classification settings
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Missed-call storage
    #[serde(default)]
    pub store: StoreConfig,

    /// Admin API configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Logging and tracing
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Listener name (for logging/metrics)
    #[serde(default = "default_listener_name")]
    pub name: String,

    /// Bind host; empty means all interfaces
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Accept backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Bytes requested per read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// How records are delimited on the wire
    #[serde(default)]
    pub framing: Framing,

    /// Longest accepted line (line framing only)
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,
}

impl ListenerConfig {
    /// Address string handed to the resolver.
    pub fn bind_address(&self) -> String {
        let host = self.host.trim();
        if host.is_empty() {
            format!("0.0.0.0:{}", self.port)
        } else if host.contains(':') && !host.starts_with('[') {
            // Bare IPv6 literal
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

fn default_listener_name() -> String {
    "switch".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_backlog() -> u32 {
    128
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_max_record_bytes() -> usize {
    8192
}

/// Record framing on the wire
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// One read is one record
    #[default]
    Chunk,
    /// Newline-delimited records
    Line,
}

/// Timestamp normalization settings
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizeConfig {
    /// Zone the switch reports in
    #[serde(default = "default_source_timezone")]
    pub source_timezone: String,

    /// Zone records are stored in
    #[serde(default = "default_target_timezone")]
    pub target_timezone: String,

    /// strftime format of timestamps, both in and out
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

impl NormalizeConfig {
    /// Build the timestamp converter.
    pub fn converter(&self) -> Result<TimestampConverter, ConverterError> {
        TimestampConverter::new(
            &self.source_timezone,
            &self.target_timezone,
            &self.timestamp_format,
        )
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            source_timezone: default_source_timezone(),
            target_timezone: default_target_timezone(),
            timestamp_format: default_timestamp_format(),
        }
    }
}

fn default_source_timezone() -> String {
    "UTC".to_string()
}

fn default_target_timezone() -> String {
    "US/Eastern".to_string()
}

fn default_timestamp_format() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

/// Classifier settings
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Queue codes never reported as missed
    #[serde(default = "default_excluded_queues")]
    pub excluded_queues: Vec<String>,
}

impl ClassifierConfig {
    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.excluded_queues.iter().cloned())
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            excluded_queues: default_excluded_queues(),
        }
    }
}

fn default_excluded_queues() -> Vec<String> {
    vec![DEFAULT_EXCLUDED_QUEUE.to_string()]
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Pending missed calls held before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How often buffered writers are flushed
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Writers every missed call is sent to
    #[serde(default = "default_writers")]
    pub writers: Vec<WriterConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            flush_interval: default_flush_interval(),
            writers: default_writers(),
        }
    }
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_writers() -> Vec<WriterConfig> {
    vec![WriterConfig::Memory(MemoryWriterConfig::default())]
}

/// Writer backend
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WriterConfig {
    File(FileWriterConfig),
    Memory(MemoryWriterConfig),
}

/// File writer settings
#[derive(Debug, Clone, Deserialize)]
pub struct FileWriterConfig {
    /// Directory the files are written to
    pub path: PathBuf,

    /// Output format
    #[serde(default)]
    pub format: OutputFormat,

    /// Start a new file every day
    #[serde(default = "default_true")]
    pub rotate_daily: bool,
}

/// Memory writer settings
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryWriterConfig {
    /// Ring buffer size
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for MemoryWriterConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

fn default_max_records() -> usize {
    10_000
}

/// Admin API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Serve the admin API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API address
    #[serde(default = "default_admin_address")]
    pub address: SocketAddr,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_admin_address(),
        }
    }
}

fn default_admin_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_true() -> bool {
    true
}

/// Telemetry settings
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Log level (RUST_LOG overrides)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable structured JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// OTLP endpoint for distributed tracing
    pub otlp_endpoint: Option<String>,

    /// Trace sample rate (0.0 - 1.0)
    #[serde(default = "default_sample_rate")]
    pub trace_sample_rate: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            otlp_endpoint: None,
            trace_sample_rate: default_sample_rate(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

/// Humantime serde support module
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
