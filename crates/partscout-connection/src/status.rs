//! Status broadcasting toward the presentation layer

use partscout_core::DbRole;

use crate::pool::ConnectionState;

/// Connection status notification delivered to observers
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub role: DbRole,
    pub state: ConnectionState,
    /// Failure message, when the state is not `Connected`
    pub error: Option<String>,
}

/// Receives connection status changes.
///
/// Fire-and-forget: implementations must return quickly and never fail; the
/// core does not await a response. The UI registers its own sink, the core
/// only emits events.
pub trait StatusSink: Send + Sync {
    fn on_status_changed(&self, event: StatusEvent);
}

/// Default sink that writes status transitions to the log.
#[derive(Debug, Default)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn on_status_changed(&self, event: StatusEvent) {
        match event.state {
            ConnectionState::Connected => {
                tracing::info!(role = %event.role, "database connected");
            }
            state => {
                tracing::warn!(
                    role = %event.role,
                    state = %state,
                    error = event.error.as_deref(),
                    "database connection state changed"
                );
            }
        }
    }
}
