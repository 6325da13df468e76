use anyhow::{Context, Result};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::listener::{Listener, SessionContext};
use crate::record::RecordParser;
use crate::store;
use crate::telemetry::{AdminState, Metrics, MetricsConfig};

/// How long shutdown waits for the writers to drain and flush.
const STORE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Main cdrd server
///
/// Components:
/// - Listener: accepts switch connections, one session task each
/// - Missed-call sink: background processor feeding the configured writers
/// - Metrics server: Prometheus and health endpoints on the admin port
pub struct Server {
    config: Arc<Config>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Run the server until a shutdown signal or a fatal listener error
    pub async fn run(self) -> Result<()> {
        let config = &self.config;

        info!(
            listener = %config.listener.name,
            address = %config.listener.bind_address(),
            writers = config.store.writers.len(),
            "starting cdrd server"
        );

        // Admin API; stats are still collected when it is disabled
        let (stats, metrics_handle) = if config.admin.enabled {
            let metrics = Metrics::new(&MetricsConfig {
                address: config.admin.address,
            })?;
            let stats = metrics.admin_state();

            let handle = tokio::spawn(async move {
                if let Err(e) = metrics.serve().await {
                    error!(error = %e, "metrics server failed");
                }
            });
            (stats, Some(handle))
        } else {
            (Arc::new(AdminState::new()), None)
        };

        let readiness = format!("listener:{}", config.listener.name);
        stats.register_dependency(&readiness);

        // Missed-call sink
        let writer_set =
            store::create_writers(&config.store).context("failed to create writers")?;
        if let Some(memory) = writer_set.memory {
            stats.attach_missed_call_log(memory);
        }
        let (sink, processor) = store::start(
            writer_set.writers,
            config.store.queue_capacity,
            config.store.flush_interval,
        );

        let converter = config
            .normalize
            .converter()
            .context("invalid normalize section")?;
        let classifier = config.classifier.classifier();
        info!(
            source_tz = %converter.source(),
            target_tz = %converter.target(),
            format = converter.format(),
            excluded_queues = ?classifier.excluded_queues(),
            "record pipeline configured"
        );

        let context = Arc::new(SessionContext::new(
            &config.listener,
            RecordParser::new(converter),
            classifier,
            sink,
            stats.clone(),
        ));

        let listener = Listener::bind(&config.listener, context).await?;
        let registry = listener.registry();
        stats.set_dependency_health(&readiness, true);

        info!(
            address = %listener.local_addr(),
            admin = config.admin.enabled,
            admin_address = %config.admin.address,
            "cdrd server started"
        );

        let outcome = tokio::select! {
            result = listener.run() => result.map_err(anyhow::Error::from),
            signal = wait_for_shutdown() => {
                info!("shutdown signal received");
                signal.context("failed to install signal handlers")
            }
        };

        stats.set_dependency_health(&readiness, false);

        // Releases the listening socket and the listener's sink handle
        drop(listener);

        let aborted = registry.abort_all().await;
        info!(aborted, "connection handlers aborted");

        // The processor finishes once the aborted sessions have dropped their sink handles
        match tokio::time::timeout(STORE_DRAIN_TIMEOUT, processor).await {
            Ok(Ok(())) => info!("missed-call writers flushed"),
            Ok(Err(e)) => error!(error = %e, "missed-call processor failed"),
            Err(_) => warn!(
                timeout_secs = STORE_DRAIN_TIMEOUT.as_secs(),
                "timed out waiting for missed-call writers"
            ),
        }

        if let Some(handle) = metrics_handle {
            handle.abort();
        }

        crate::telemetry::shutdown_tracing();

        info!("cdrd server stopped");

        outcome
    }
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() -> io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("received SIGINT (Ctrl+C)");
            }
            _ = terminate.recv() => {
                info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
