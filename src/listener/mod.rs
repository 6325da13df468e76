//! Listener module for accepting switch connections.
//!
//! - The acceptor binds one socket and spawns a session task per connection
//! - Sessions read, parse and classify records, and submit missed calls
//! - Live sessions are tracked in the handler registry until they end or are aborted

mod acceptor;
mod connection;
mod registry;
mod session;

pub use acceptor::{Listener, ListenerError};
pub use connection::{ConnectionId, ConnectionState};
pub use registry::{HandlerInfo, HandlerRegistry, SharedHandlerRegistry};
pub use session::{CdrSession, SessionContext, SessionError, SessionSummary};
