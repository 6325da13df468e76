//! TCP acceptor for switch connections.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{error, info, span, Instrument, Level};

use crate::config::ListenerConfig;
use crate::telemetry::{counters, AdminState};

use super::connection::ConnectionId;
use super::registry::{HandlerRegistry, SharedHandlerRegistry};
use super::session::{CdrSession, SessionContext};

/// Listener errors.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("no address found for {0}")]
    NoAddress(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

/// Listener for incoming switch connections.
pub struct Listener {
    /// Listener name (for logging/metrics)
    name: String,

    /// Bound socket
    listener: TcpListener,

    /// Actual bound address (port 0 resolved)
    local_addr: SocketAddr,

    /// Connection ID generator
    next_connection_id: AtomicU64,

    /// Live handlers
    registry: SharedHandlerRegistry,

    /// Shared by every session
    context: Arc<SessionContext>,
}

impl Listener {
    /// Resolve and bind the configured address with SO_REUSEADDR and the configured
    /// backlog.
    pub async fn bind(
        config: &ListenerConfig,
        context: Arc<SessionContext>,
    ) -> Result<Self, ListenerError> {
        let address = config.bind_address();
        let resolved = tokio::net::lookup_host(&address)
            .await
            .map_err(|source| ListenerError::Resolve {
                address: address.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ListenerError::NoAddress(address.clone()))?;

        let listener = bind_socket(resolved, config.backlog).map_err(|source| {
            ListenerError::Bind {
                address: resolved,
                source,
            }
        })?;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            address: resolved,
            source,
        })?;

        info!(
            listener = %config.name,
            address = %local_addr,
            backlog = config.backlog,
            framing = ?config.framing,
            "listener started"
        );
        counters::listener_started(&config.name);

        Ok(Self {
            name: config.name.clone(),
            listener,
            local_addr,
            next_connection_id: AtomicU64::new(1),
            registry: HandlerRegistry::new(),
            context,
        })
    }

    /// Get listener name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the live handler registry.
    pub fn registry(&self) -> SharedHandlerRegistry {
        self.registry.clone()
    }

    /// Run the accept loop.
    ///
    /// Only returns on an accept failure, which is fatal for the listener.
    pub async fn run(&self) -> Result<(), ListenerError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let conn_id =
                        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::SeqCst));

                    let span = span!(
                        Level::INFO,
                        "conn",
                        listener = %self.name,
                        id = %conn_id,
                        peer = %peer_addr
                    );

                    info!(parent: &span, "accepted connection");
                    counters::connection_accepted(&self.name);

                    let active = ActiveConnection::open(self.context.stats().clone());
                    let session = CdrSession::new(conn_id, peer_addr, stream, self.context.clone());

                    self.registry
                        .spawn(
                            conn_id,
                            peer_addr,
                            async move {
                                let _active = active;
                                // Errors are logged by the session itself
                                let _ = session.run().await;
                            }
                            .instrument(span),
                        )
                        .await;
                }
                Err(e) => {
                    error!(
                        listener = %self.name,
                        severity = "critical",
                        error = %e,
                        "accept failed, listener stopping"
                    );
                    counters::listener_accept_error(&self.name);
                    return Err(ListenerError::Accept(e));
                }
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        counters::listener_stopped(&self.name);
        info!(
            listener = %self.name,
            address = %self.local_addr,
            "listening socket released"
        );
    }
}

/// Counts a connection as active for as long as its task holds it.
struct ActiveConnection(Arc<AdminState>);

impl ActiveConnection {
    fn open(stats: Arc<AdminState>) -> Self {
        stats.inc_connections();
        Self(stats)
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.dec_connections();
    }
}

/// Create, configure and bind the listening socket.
fn bind_socket(address: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if address.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(address)?;
    socket.listen(backlog)
}
