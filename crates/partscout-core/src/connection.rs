//! Connection and driver traits

use crate::{ConnectionConfig, QueryResult, Result, StatementResult, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// A live database session.
///
/// The business query layer receives this through a pool handle and issues
/// parameterized SQL against it; the connection crate uses it for liveness
/// probes and database-existence checks.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "mssql")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE/DDL)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// A database driver that can open sessions from a configuration.
///
/// Errors coming out of `connect` are already classified into the
/// `PartScoutError` taxonomy; callers never inspect driver-native codes.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Unique identifier for this driver (e.g., "mssql")
    fn name(&self) -> &'static str;

    /// Open a new session
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;

    /// Open and immediately discard a session, to validate a configuration
    async fn test_connection(&self, config: &ConnectionConfig) -> Result<()> {
        let conn = self.connect(config).await?;
        conn.close().await
    }
}
