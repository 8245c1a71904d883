//! Connection state and status types for UI consumption.
//!
//! These types are published by the communication worker and read by any
//! display layer without touching the connection itself.

use serde::{Deserialize, Serialize};

use crate::value::current_timestamp_millis;

/// Lifecycle state of the device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not started, or stopped on request.
    #[default]
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// The link is usable.
    Connected,
    /// The last connect attempt or transport call failed; a retry is pending.
    Faulted,
}

impl ConnectionState {
    /// Get the lowercase name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Faulted => "faulted",
        }
    }

    /// Only a connected link accepts requests.
    pub fn is_usable(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether communication has been started (any state but `Disconnected`).
    pub fn is_running(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of the connection for status indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Timestamp of the last state change (millis since epoch).
    pub since: i64,
    /// Last error message, cleared on stop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Consecutive failed connect attempts.
    pub reconnect_attempts: u32,
}

impl ConnectionStatus {
    /// Create a status for the given state, stamped now.
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state,
            since: current_timestamp_millis(),
            last_error: None,
            reconnect_attempts: 0,
        }
    }

    /// Attach an error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connected_is_usable() {
        assert!(ConnectionState::Connected.is_usable());
        assert!(!ConnectionState::Connecting.is_usable());
        assert!(!ConnectionState::Faulted.is_usable());
        assert!(!ConnectionState::Disconnected.is_usable());
    }

    #[test]
    fn test_running_states() {
        assert!(!ConnectionState::Disconnected.is_running());
        assert!(ConnectionState::Faulted.is_running());
    }

    #[test]
    fn test_status_serialization() {
        let status = ConnectionStatus::new(ConnectionState::Faulted).with_error("refused");
        let json = serde_json::to_string(&status).unwrap();

        assert!(json.contains("\"state\":\"faulted\""));
        assert!(json.contains("\"last_error\":\"refused\""));
    }

    #[test]
    fn test_default_status_has_no_error() {
        let status = ConnectionStatus::default();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.last_error.is_none());
    }
}
