//! Connection lifecycle state

use serde::{Deserialize, Serialize};

/// Lifecycle state of one role's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No live handle exists
    Disconnected,
    /// An initialize attempt is in flight
    Connecting,
    /// Handle exists and the last liveness probe passed
    Connected,
    /// Handle exists but the last liveness probe failed
    Degraded,
}

impl ConnectionState {
    /// Whether queries may be issued in this state.
    ///
    /// Only `Connected` qualifies; a `Degraded` handle is kept around for the
    /// health loop to re-probe but is never handed to the query layer.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}
