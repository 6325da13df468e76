//! Registry of live connection handlers.
//!
//! Every spawned session is recorded here with its peer, start time and abort handle, so
//! the server can list live connections and abort them all on shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::{oneshot, RwLock};
use tokio::task::AbortHandle;
use tracing::debug;

use super::connection::ConnectionId;

/// Entry for a registered handler
struct HandlerEntry {
    peer: SocketAddr,
    started_at: Instant,
    abort: AbortHandle,
}

/// Point-in-time view of one live handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub uptime: Duration,
}

/// Handler registry
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<ConnectionId, HandlerEntry>>,
}

impl HandlerRegistry {
    /// Create a new handler registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawn a handler task and register it.
    ///
    /// The task does not start its work until it is registered, so it can never
    /// unregister itself first.
    pub async fn spawn<F>(self: &Arc<Self>, id: ConnectionId, peer: SocketAddr, handler: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let registry = self.clone();

        let task = tokio::spawn(async move {
            if registered_rx.await.is_err() {
                return;
            }
            let _registration = Registration { registry, id };
            handler.await;
        });

        self.register(id, peer, task.abort_handle()).await;
        let _ = registered_tx.send(());
    }

    /// Register a running handler
    pub async fn register(&self, id: ConnectionId, peer: SocketAddr, abort: AbortHandle) {
        let entry = HandlerEntry {
            peer,
            started_at: Instant::now(),
            abort,
        };

        self.handlers.write().await.insert(id, entry);
        debug!(%id, %peer, "handler registered");
    }

    /// Unregister a handler
    pub async fn unregister(&self, id: ConnectionId) {
        if self.handlers.write().await.remove(&id).is_some() {
            debug!(%id, "handler unregistered");
        }
    }

    /// Get the number of live handlers
    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Check if no handler is live
    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }

    /// Live handlers ordered by connection id
    pub async fn snapshot(&self) -> Vec<HandlerInfo> {
        let handlers = self.handlers.read().await;
        let mut infos: Vec<HandlerInfo> = handlers
            .iter()
            .map(|(id, entry)| HandlerInfo {
                id: *id,
                peer: entry.peer,
                uptime: entry.started_at.elapsed(),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Abort every live handler without draining. Returns how many were aborted.
    pub async fn abort_all(&self) -> usize {
        let mut handlers = self.handlers.write().await;
        let count = handlers.len();

        for (id, entry) in handlers.drain() {
            entry.abort.abort();
            debug!(%id, peer = %entry.peer, "handler aborted");
        }

        count
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }
}

/// Removes a handler from the registry when its task ends, whether it returned, panicked
/// or was aborted.
struct Registration {
    registry: Arc<HandlerRegistry>,
    id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let id = self.id;
        match self.registry.handlers.try_write() {
            Ok(mut handlers) => {
                if handlers.remove(&id).is_some() {
                    debug!(%id, "handler unregistered");
                }
            }
            // Lock is busy; finish on the runtime
            Err(_) => {
                if let Ok(runtime) = Handle::try_current() {
                    let registry = self.registry.clone();
                    runtime.spawn(async move { registry.unregister(id).await });
                }
            }
        }
    }
}

/// Shared handler registry type
pub type SharedHandlerRegistry = Arc<HandlerRegistry>;
