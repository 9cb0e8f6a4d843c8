//! MS SQL Server driver implementation

use std::sync::Arc;

use async_trait::async_trait;
use partscout_core::{Connection, ConnectionConfig, DatabaseDriver, Result};

use crate::connection::MssqlConnection;

/// MS SQL Server database driver
#[derive(Debug)]
pub struct MssqlDriver;

impl MssqlDriver {
    pub fn new() -> Self {
        tracing::debug!("MS SQL Server driver initialized");
        Self
    }
}

impl Default for MssqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for MssqlDriver {
    fn name(&self) -> &'static str {
        "mssql"
    }

    #[tracing::instrument(
        skip(self, config),
        fields(server = %config.server, database = %config.database)
    )]
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let connection = MssqlConnection::connect(config).await?;
        Ok(Arc::new(connection))
    }
}
