//! Persisted connection configurations
//!
//! Both roles' configurations live in one JSON document on disk. Saving a
//! configuration whose password is empty keeps the previously stored
//! credential (reconfiguration carry-forward), so operators can edit a host
//! or database name without retyping the password.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use partscout_core::{ConnectionConfig, DbRole, Result};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "connections.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredConfig {
    config: ConnectionConfig,
    saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    catalog: Option<StoredConfig>,
    #[serde(default)]
    ledger: Option<StoredConfig>,
}

impl ConfigDocument {
    fn get(&self, role: DbRole) -> Option<&StoredConfig> {
        match role {
            DbRole::Catalog => self.catalog.as_ref(),
            DbRole::Ledger => self.ledger.as_ref(),
        }
    }

    fn set(&mut self, role: DbRole, entry: StoredConfig) {
        match role {
            DbRole::Catalog => self.catalog = Some(entry),
            DbRole::Ledger => self.ledger = Some(entry),
        }
    }
}

/// Load/save capability for connection configurations
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The standard per-user location for the configuration document.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("partscout")
            .join(CONFIG_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored configuration for a role, if any.
    #[tracing::instrument(skip(self), fields(role = %role))]
    pub async fn load(&self, role: DbRole) -> Result<Option<ConnectionConfig>> {
        let document = self.read_document().await?;
        Ok(document.get(role).map(|entry| entry.config.clone()))
    }

    /// Apply credential carry-forward without persisting anything.
    ///
    /// Used by the save flow to validate the effective configuration before
    /// it is written to disk.
    pub async fn resolve_credentials(
        &self,
        role: DbRole,
        mut config: ConnectionConfig,
    ) -> Result<ConnectionConfig> {
        if config.password.is_empty() {
            if let Some(previous) = self.load(role).await? {
                config.password = previous.password;
            }
        }
        Ok(config)
    }

    /// Persist a role's configuration, carrying the stored credential
    /// forward when the incoming one is empty. Returns the value actually
    /// written.
    #[tracing::instrument(skip(self, config), fields(role = %role, server = %config.server))]
    pub async fn save(&self, role: DbRole, config: ConnectionConfig) -> Result<ConnectionConfig> {
        let config = self.resolve_credentials(role, config).await?;

        let mut document = self.read_document().await?;
        document.set(
            role,
            StoredConfig {
                config: config.clone(),
                saved_at: Utc::now(),
            },
        );
        self.write_document(&document).await?;

        tracing::info!(path = ?self.path, "connection configuration saved");
        Ok(config)
    }

    async fn read_document(&self) -> Result<ConfigDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(ConfigDocument::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write_document(&self, document: &ConfigDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(document)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}
