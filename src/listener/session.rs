//! Per-connection CDR session.
//!
//! A session owns one switch connection: it reads records until the peer goes away,
//! parses and classifies each one, and hands missed calls to the sink. Record-level
//! problems never end the session; only stream errors do.

use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::config::{Framing, ListenerConfig};
use crate::record::{Classifier, RecordParser};
use crate::store::{MissedCall, MissedCallSink};
use crate::telemetry::{counters, AdminState};

use super::connection::{ConnectionId, ConnectionState};

/// Session error types. Each one ends the connection.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("record is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("line exceeds {max} bytes")]
    LineTooLong { max: usize },
}

impl SessionError {
    /// The peer dropped the connection (reset, broken pipe, aborted).
    pub fn is_disconnect(&self) -> bool {
        match self {
            SessionError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    /// Short label for metrics.
    pub fn outcome(&self) -> &'static str {
        if self.is_disconnect() {
            "reset"
        } else {
            "error"
        }
    }
}

/// Everything a session needs besides its stream. Shared by all sessions of a listener.
#[derive(Debug)]
pub struct SessionContext {
    listener: String,
    framing: Framing,
    read_buffer_size: usize,
    max_record_bytes: usize,
    parser: RecordParser,
    classifier: Classifier,
    sink: MissedCallSink,
    stats: Arc<AdminState>,
}

impl SessionContext {
    pub fn new(
        config: &ListenerConfig,
        parser: RecordParser,
        classifier: Classifier,
        sink: MissedCallSink,
        stats: Arc<AdminState>,
    ) -> Self {
        Self {
            listener: config.name.clone(),
            framing: config.framing,
            read_buffer_size: config.read_buffer_size.max(1),
            max_record_bytes: config.max_record_bytes,
            parser,
            classifier,
            sink,
            stats,
        }
    }

    /// Listener name.
    pub fn listener(&self) -> &str {
        &self.listener
    }

    /// Shared connection and record stats.
    pub fn stats(&self) -> &Arc<AdminState> {
        &self.stats
    }
}

/// Per-connection counters, reported when the session closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub records: u64,
    pub rejected: u64,
    pub missed: u64,
}

/// CDR session handler.
pub struct CdrSession<S> {
    stream: S,
    dispatcher: Dispatcher,
}

/// Record handling, kept apart from the stream so a framed reader can borrow the
/// stream while records are dispatched.
struct Dispatcher {
    id: ConnectionId,
    peer: SocketAddr,
    state: ConnectionState,
    context: Arc<SessionContext>,
    summary: SessionSummary,
}

impl<S> CdrSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new session for an accepted stream.
    pub fn new(id: ConnectionId, peer: SocketAddr, stream: S, context: Arc<SessionContext>) -> Self {
        Self {
            stream,
            dispatcher: Dispatcher {
                id,
                peer,
                state: ConnectionState::Open,
                context,
                summary: SessionSummary::default(),
            },
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.dispatcher.state
    }

    /// Run the session until the peer disconnects or the stream fails.
    ///
    /// The stream is shut down and dropped on every path. `Ok` means the peer closed the
    /// connection.
    pub async fn run(mut self) -> Result<SessionSummary, SessionError> {
        self.dispatcher.transition(ConnectionState::Reading);

        let result = match self.dispatcher.context.framing {
            Framing::Chunk => self.read_chunks().await,
            Framing::Line => self.read_lines().await,
        };

        self.dispatcher.transition(ConnectionState::Closing);

        let listener = self.dispatcher.context.listener().to_string();
        match &result {
            Ok(()) => {
                info!("peer closed connection");
                counters::connection_closed(&listener, "peer_closed");
            }
            Err(e) if e.is_disconnect() => {
                warn!(error = %e, "connection dropped by peer");
                counters::connection_closed(&listener, e.outcome());
            }
            Err(e) => {
                error!(error = %e, "unexpected connection error");
                counters::connection_closed(&listener, e.outcome());
            }
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "stream shutdown failed");
        }

        let CdrSession { stream, mut dispatcher } = self;
        drop(stream);
        dispatcher.transition(ConnectionState::Closed);

        let summary = dispatcher.summary;
        info!(
            records = summary.records,
            rejected = summary.rejected,
            missed = summary.missed,
            "closed connection"
        );

        result.map(|()| summary)
    }

    /// One read is one record.
    async fn read_chunks(&mut self) -> Result<(), SessionError> {
        let mut buf = vec![0u8; self.dispatcher.context.read_buffer_size];

        loop {
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }

            let text = std::str::from_utf8(&buf[..n])?;
            self.dispatcher.dispatch(text.trim());
        }
    }

    /// Newline-delimited records. Blank lines are skipped.
    async fn read_lines(&mut self) -> Result<(), SessionError> {
        let max = self.dispatcher.context.max_record_bytes;
        let mut lines = FramedRead::new(&mut self.stream, LinesCodec::new_with_max_length(max));

        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| match e {
                LinesCodecError::MaxLineLengthExceeded => SessionError::LineTooLong { max },
                LinesCodecError::Io(e) => SessionError::Io(e),
            })?;

            let record = line.trim();
            if record.is_empty() {
                continue;
            }
            self.dispatcher.dispatch(record);
        }

        Ok(())
    }
}

impl Dispatcher {
    fn transition(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "unexpected state transition");
        }
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    /// Parse, classify and route one record, then go back to reading.
    fn dispatch(&mut self, raw: &str) {
        self.transition(ConnectionState::Dispatching);
        self.handle_record(raw);
        self.transition(ConnectionState::Reading);
    }

    fn handle_record(&mut self, raw: &str) {
        let context = self.context.clone();
        let listener = context.listener();

        self.summary.records += 1;
        counters::record_received(listener);
        context.stats.inc_received();

        // A panicking converter costs this record, never the connection
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| context.parser.parse(raw)));
        let parsed = match outcome {
            Ok(Ok(parsed)) => parsed,
            Ok(Err(e)) => {
                warn!(error = %e, raw = %raw, "dropping incomplete record");
                self.reject(e.kind());
                return;
            }
            Err(payload) => {
                error!(
                    error = panic_message(payload.as_ref()),
                    raw = ?raw,
                    "unexpected error parsing record"
                );
                self.reject("unexpected");
                return;
            }
        };

        counters::record_parsed(listener);
        context.stats.inc_parsed();

        for warning in &parsed.warnings {
            warn!(
                field = warning.name,
                index = warning.index,
                raw = %warning.raw,
                error = %warning.error,
                "field replaced by default"
            );
            counters::field_warning(warning.name, warning.error.kind());
        }
        if parsed.extra_fields > 0 {
            debug!(extra = parsed.extra_fields, "ignoring trailing fields");
        }

        let decision = context.classifier.classify(parsed.record.cells());
        counters::decision(listener, decision.as_str());

        if !decision.is_missed() {
            info!(%decision, queue = ?parsed.record.queue_id(), "not a missed call");
            return;
        }

        let call = MissedCall::new(parsed.record, listener, self.id.0, self.peer);
        info!(
            queue = ?call.queue_id(),
            disposition = ?call.record.disposition(),
            "missed call"
        );

        if context.sink.submit(call) {
            self.summary.missed += 1;
            context.stats.inc_missed();
        }
    }

    fn reject(&mut self, reason: &str) {
        self.summary.rejected += 1;
        counters::record_rejected(self.context.listener(), reason);
        self.context.stats.inc_rejected();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("panic")
}
