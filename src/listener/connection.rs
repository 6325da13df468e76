//! Connection identity and lifecycle state.

use std::fmt;

/// Unique connection identifier, assigned by the acceptor in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection state.
///
/// ```text
/// Open -> Reading <-> Dispatching
///            |
///            v
///         Closing -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, nothing read yet
    Open,
    /// Waiting for the next record
    Reading,
    /// Parsing and classifying a record
    Dispatching,
    /// Read loop finished, stream being shut down
    Closing,
    /// Stream released
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Open => write!(f, "OPEN"),
            ConnectionState::Reading => write!(f, "READING"),
            ConnectionState::Dispatching => write!(f, "DISPATCHING"),
            ConnectionState::Closing => write!(f, "CLOSING"),
            ConnectionState::Closed => write!(f, "CLOSED"),
        }
    }
}

impl ConnectionState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Open, Reading)
                | (Reading, Dispatching)
                | (Dispatching, Reading)
                | (Open | Reading | Dispatching, Closing)
                | (Closing, Closed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(ConnectionState::Open.can_transition_to(ConnectionState::Reading));
        assert!(ConnectionState::Reading.can_transition_to(ConnectionState::Dispatching));
        assert!(ConnectionState::Dispatching.can_transition_to(ConnectionState::Reading));
        assert!(ConnectionState::Reading.can_transition_to(ConnectionState::Closing));
        assert!(ConnectionState::Closing.can_transition_to(ConnectionState::Closed));

        assert!(!ConnectionState::Closed.can_transition_to(ConnectionState::Reading));
        assert!(!ConnectionState::Open.can_transition_to(ConnectionState::Dispatching));
        assert!(!ConnectionState::Closing.can_transition_to(ConnectionState::Reading));
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionId(42).to_string(), "42");
        assert_eq!(ConnectionState::Dispatching.to_string(), "DISPATCHING");
    }
}
