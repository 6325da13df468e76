//! Missed-call persistence.
//!
//! Connection tasks hand missed calls to a [`MissedCallSink`] without waiting. A single
//! processor task drains the queue into every configured [`MissedCallWriter`]:
//! - [`MemoryWriter`]: bounded in-memory ring, for development and tests
//! - [`FileWriter`]: JSON lines or CSV files with daily rotation
//!
//! Delivery is fire-and-forget: a full queue or a failing writer is logged and the call is
//! dropped.

mod factory;
mod types;
mod writer;

pub use factory::{create_writers, WriterSet};
pub use types::{MissedCall, MissedCallQuery, DEFAULT_QUERY_LIMIT};
pub use writer::{FileWriter, MemoryWriter, MissedCallWriter, OutputFormat, WriterError};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::telemetry::counters;

/// Handle for submitting missed calls.
#[derive(Debug, Clone)]
pub struct MissedCallSink {
    tx: mpsc::Sender<MissedCall>,
}

impl MissedCallSink {
    /// Submit without blocking. Returns `false` when the call was dropped.
    pub fn submit(&self, call: MissedCall) -> bool {
        match self.tx.try_send(call) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(call)) => {
                error!(
                    queue = ?call.queue_id(),
                    connection = call.connection_id,
                    "missed-call queue full, dropping record"
                );
                counters::sink_dropped("full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(call)) => {
                error!(
                    queue = ?call.queue_id(),
                    connection = call.connection_id,
                    "missed-call processor stopped, dropping record"
                );
                counters::sink_dropped("closed");
                false
            }
        }
    }
}

/// Processor that writes queued calls to the configured writers.
pub struct SinkProcessor {
    rx: mpsc::Receiver<MissedCall>,
    writers: Vec<Arc<dyn MissedCallWriter>>,
    flush_interval: Duration,
}

impl SinkProcessor {
    pub fn new(
        rx: mpsc::Receiver<MissedCall>,
        writers: Vec<Arc<dyn MissedCallWriter>>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            rx,
            writers,
            flush_interval,
        }
    }

    /// Run until every sink handle is dropped, then flush.
    pub async fn run(mut self) {
        info!(writers = self.writers.len(), "missed-call processor started");

        let mut flush_tick = tokio::time::interval(self.flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.rx.recv() => {
                    let Some(call) = received else {
                        break;
                    };
                    self.write(&call).await;
                }
                _ = flush_tick.tick() => {
                    self.flush().await;
                }
            }
        }

        self.flush().await;
        info!("missed-call processor stopped");
    }

    async fn write(&self, call: &MissedCall) {
        debug!(
            queue = ?call.queue_id(),
            connection = call.connection_id,
            "storing missed call"
        );

        for writer in &self.writers {
            match writer.write(call).await {
                Ok(()) => counters::missed_call_stored(writer.name()),
                Err(e) => {
                    error!(
                        writer = writer.name(),
                        error = %e,
                        "failed to write missed call"
                    );
                    counters::writer_error(writer.name());
                }
            }
        }
    }

    async fn flush(&self) {
        for writer in &self.writers {
            if let Err(e) = writer.flush().await {
                error!(writer = writer.name(), error = %e, "failed to flush writer");
                counters::writer_error(writer.name());
            }
        }
    }
}

/// Start the missed-call subsystem.
///
/// The returned join handle completes once every sink clone is dropped and the writers
/// have been flushed.
pub fn start(
    writers: Vec<Arc<dyn MissedCallWriter>>,
    capacity: usize,
    flush_interval: Duration,
) -> (MissedCallSink, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let processor = SinkProcessor::new(rx, writers, flush_interval);
    let handle = tokio::spawn(processor.run());

    (MissedCallSink { tx }, handle)
}
