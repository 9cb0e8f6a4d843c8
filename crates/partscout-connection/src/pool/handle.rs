//! The live handle for one database role

use std::sync::Arc;

use parking_lot::RwLock;
use partscout_core::{Connection, ConnectionConfig, PartScoutError};

use super::ConnectionState;

/// One role's live connection plus its observed state.
///
/// Shared read-only across all concurrent query callers; only the pool
/// manager replaces or closes it, and only the pool manager and health
/// monitor change its state.
pub struct PoolHandle {
    config: ConnectionConfig,
    conn: Arc<dyn Connection>,
    state: RwLock<ConnectionState>,
    last_error: RwLock<Option<String>>,
}

impl PoolHandle {
    /// A handle is only ever created from a freshly probed connection.
    pub(crate) fn new(config: ConnectionConfig, conn: Arc<dyn Connection>) -> Self {
        Self {
            config,
            conn,
            state: RwLock::new(ConnectionState::Connected),
            last_error: RwLock::new(None),
        }
    }

    /// The configuration this handle was opened with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The underlying driver connection. The business query layer issues its
    /// SQL through this.
    pub fn connection(&self) -> Arc<dyn Connection> {
        self.conn.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Score a failed liveness probe. The handle stays alive so the health
    /// loop can re-probe or replace it.
    pub(crate) fn mark_degraded(&self, error: &PartScoutError) {
        *self.state.write() = ConnectionState::Degraded;
        *self.last_error.write() = Some(error.to_string());
    }

    /// A probe passed again after a degraded period.
    pub(crate) fn mark_connected(&self) {
        *self.state.write() = ConnectionState::Connected;
        *self.last_error.write() = None;
    }

    /// Close the underlying connection. Idempotent; errors during close are
    /// logged, not propagated, since the handle is being discarded anyway.
    pub(crate) async fn close(&self) {
        *self.state.write() = ConnectionState::Disconnected;
        if let Err(err) = self.conn.close().await {
            tracing::warn!(error = %err, "error while closing connection");
        }
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("server", &self.config.server)
            .field("database", &self.config.database)
            .field("state", &self.state())
            .finish()
    }
}
