//! Connection state machine.

use std::fmt;

/// Observable state of the channel.
///
/// Transitions:
/// - `Disconnected -> Connecting` when a handshake starts
/// - `Connecting -> Open` on handshake success, `-> Disconnected` on failure
/// - `Open -> Disconnected` when the handle drops or errors
/// - `Open -> Closing -> Disconnected` on an intentional close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live handle; a retry may be pending
    Disconnected,
    /// Handshake in flight
    Connecting,
    /// Handle established and delivering frames
    Open,
    /// Intentional close requested, waiting for the peer
    Closing,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_open_is_open() {
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Connecting.is_open());
        assert!(!ConnectionState::Closing.is_open());
        assert!(!ConnectionState::Disconnected.is_open());
    }

    #[test]
    fn test_display_is_lowercase() {
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
    }
}
