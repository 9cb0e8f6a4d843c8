//! Bootstrap and shutdown facade
//!
//! Wires the two pool managers, the config store, the health monitor, and
//! the status sink together. On process start both roles are brought up
//! independently (neither failure blocks the other) and the health monitor
//! starts regardless of outcome.

use std::sync::Arc;

use partscout_core::{
    ConnectionConfig, DatabaseDriver, DbRole, PartScoutError, Result,
};

use crate::health::{HealthMonitor, HealthMonitorConfig, WatchedRole};
use crate::manager::PoolManager;
use crate::pool::ConnectionState;
use crate::reconnect::{ReconnectPolicy, retry_initialize};
use crate::recovery::LazyRecovery;
use crate::status::{StatusEvent, StatusSink};
use crate::storage::ConfigStore;

/// Owns the connection machinery for both database roles.
pub struct ConnectionService {
    catalog: Arc<PoolManager>,
    ledger: Arc<PoolManager>,
    store: ConfigStore,
    sink: Arc<dyn StatusSink>,
    monitor_config: HealthMonitorConfig,
    monitor: tokio::sync::Mutex<Option<HealthMonitor>>,
}

impl ConnectionService {
    pub fn new(
        driver: Arc<dyn DatabaseDriver>,
        store: ConfigStore,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            catalog: Arc::new(PoolManager::new(DbRole::Catalog, driver.clone())),
            ledger: Arc::new(PoolManager::new(DbRole::Ledger, driver)),
            store,
            sink,
            monitor_config: HealthMonitorConfig::default(),
            monitor: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_monitor_config(mut self, config: HealthMonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    pub fn manager(&self, role: DbRole) -> &Arc<PoolManager> {
        match role {
            DbRole::Catalog => &self.catalog,
            DbRole::Ledger => &self.ledger,
        }
    }

    /// The recovery hook handed to the business query layer.
    pub fn recovery(&self) -> LazyRecovery {
        LazyRecovery::new(self.catalog.clone(), self.ledger.clone())
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Bring both roles up from persisted configuration and start health
    /// monitoring.
    ///
    /// Each role is attempted independently through the startup retry loop;
    /// a role with no stored configuration is skipped, a failed role is left
    /// to the health loop, and the monitor starts in every case.
    pub async fn startup(&self) {
        for role in DbRole::ALL {
            let manager = self.manager(role);
            let config = match self.store.load(role).await {
                Ok(Some(config)) => config,
                Ok(None) => {
                    tracing::info!(role = %role, "no stored connection configuration, skipping");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(role = %role, error = %err, "failed to load stored configuration");
                    continue;
                }
            };

            let policy = ReconnectPolicy::for_role(role);
            match retry_initialize(manager, &policy, config).await {
                Ok(()) => {
                    self.emit(role, ConnectionState::Connected, None);
                }
                Err(err) => {
                    tracing::warn!(role = %role, error = %err, "initial connection failed");
                    self.emit(role, ConnectionState::Disconnected, Some(err.to_string()));
                }
            }
        }
        self.restart_monitor().await;
    }

    /// The UI "save configuration" flow: validate with a one-shot test
    /// connection, persist (with credential carry-forward), then connect.
    ///
    /// Propagates the concrete failure so the operator sees the real reason
    /// (unreachable vs. bad credential vs. missing database) and nothing is
    /// persisted for a configuration that failed validation.
    pub async fn save_and_connect(&self, role: DbRole, config: ConnectionConfig) -> Result<()> {
        let manager = self.manager(role);

        let resolved = self.store.resolve_credentials(role, config).await?;
        manager.test_config(&resolved).await?;
        self.store.save(role, resolved.clone()).await?;

        // A user-initiated reconfiguration always starts with a fresh budget.
        manager.reset_reconnect_counters();
        manager.initialize(resolved).await?;
        self.emit(role, ConnectionState::Connected, None);
        Ok(())
    }

    /// User-triggered reconnect; the escape hatch from a stuck cooldown.
    pub async fn manual_reconnect(&self, role: DbRole) -> Result<()> {
        let manager = self.manager(role);
        let config = match manager.config() {
            Some(config) => config,
            None => self
                .store
                .load(role)
                .await?
                .ok_or(PartScoutError::NotConfigured(role))?,
        };

        manager.reset_reconnect_counters();
        match manager.initialize(config).await {
            Ok(()) => {
                self.emit(role, ConnectionState::Connected, None);
                Ok(())
            }
            Err(err) => {
                self.emit(role, manager.state(), Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Stop monitoring, then close both roles.
    pub async fn shutdown(&self) {
        if let Some(mut monitor) = self.monitor.lock().await.take() {
            monitor.stop().await;
        }
        for role in DbRole::ALL {
            if let Err(err) = self.manager(role).close().await {
                tracing::warn!(role = %role, error = %err, "error during shutdown");
            }
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor.lock().await.is_some()
    }

    async fn restart_monitor(&self) {
        let mut slot = self.monitor.lock().await;
        if let Some(mut previous) = slot.take() {
            previous.stop().await;
        }
        let roles = vec![
            WatchedRole::new(
                self.catalog.clone(),
                ReconnectPolicy::for_role(DbRole::Catalog),
            ),
            WatchedRole::new(
                self.ledger.clone(),
                ReconnectPolicy::for_role(DbRole::Ledger),
            )
            .check_every_ticks(2),
        ];
        *slot = Some(HealthMonitor::start(
            roles,
            self.sink.clone(),
            self.monitor_config.clone(),
        ));
    }

    fn emit(&self, role: DbRole, state: ConnectionState, error: Option<String>) {
        self.sink.on_status_changed(StatusEvent { role, state, error });
    }
}

impl std::fmt::Debug for ConnectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionService")
            .field("catalog", &self.catalog.state())
            .field("ledger", &self.ledger.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailKind, MockDriver, RecordingSink};

    fn test_config() -> ConnectionConfig {
        ConnectionConfig::new("db01", "repuestos", "scout", "secret")
    }

    fn service_in(
        dir: &tempfile::TempDir,
        driver: MockDriver,
        sink: Arc<RecordingSink>,
    ) -> ConnectionService {
        ConnectionService::new(
            Arc::new(driver),
            ConfigStore::new(dir.path().join("connections.json")),
            sink,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_without_stored_configs() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let service = service_in(&dir, MockDriver::new(), sink.clone());

        service.startup().await;

        // No configs, no attempts, no events, but monitoring runs.
        assert!(sink.events().is_empty());
        assert!(service.is_monitoring().await);
        service.shutdown().await;
        assert!(!service.is_monitoring().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_connects_stored_roles_independently() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let service = service_in(&dir, MockDriver::new(), sink.clone());

        service
            .store()
            .save(DbRole::Catalog, test_config())
            .await
            .unwrap();

        service.startup().await;

        assert!(service.manager(DbRole::Catalog).get_pool().is_some());
        assert!(service.manager(DbRole::Ledger).get_pool().is_none());
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].role, DbRole::Catalog);
        assert_eq!(events[0].state, ConnectionState::Connected);
        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_tolerates_unreachable_role() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MockDriver::new();
        driver.state().fail_connects_forever(FailKind::Unreachable);
        let sink = Arc::new(RecordingSink::default());
        let service = service_in(&dir, driver, sink.clone());

        service
            .store()
            .save(DbRole::Catalog, test_config())
            .await
            .unwrap();

        service.startup().await;

        // Startup finished, reported the failure, and monitoring still runs.
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, ConnectionState::Disconnected);
        assert!(events[0].error.as_ref().unwrap().contains("unreachable"));
        assert!(service.is_monitoring().await);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_save_and_connect_persists_after_validation() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let service = service_in(&dir, MockDriver::new(), sink.clone());

        service
            .save_and_connect(DbRole::Ledger, test_config())
            .await
            .unwrap();

        assert!(service.manager(DbRole::Ledger).get_pool().is_some());
        let stored = service.store().load(DbRole::Ledger).await.unwrap();
        assert_eq!(stored.unwrap(), test_config());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_save_and_connect_rejects_bad_credentials_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MockDriver::new();
        driver.state().fail_connects_forever(FailKind::Auth);
        let sink = Arc::new(RecordingSink::default());
        let service = service_in(&dir, driver, sink);

        let err = service
            .save_and_connect(DbRole::Catalog, test_config())
            .await
            .unwrap_err();

        assert!(matches!(err, PartScoutError::AuthFailed(_)));
        // Validation failed, so nothing was written.
        assert!(service.store().load(DbRole::Catalog).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manual_reconnect_resets_budget_and_connects() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let service = service_in(&dir, MockDriver::new(), sink);

        let manager = service.manager(DbRole::Catalog);
        manager.initialize(test_config()).await.unwrap();
        manager.close().await.unwrap();

        // Pretend the health loop exhausted its budget.
        let policy = ReconnectPolicy::new(1);
        manager.record_health_failure(&policy);
        assert!(manager.in_cooldown());

        service.manual_reconnect(DbRole::Catalog).await.unwrap();
        assert!(!manager.in_cooldown());
        assert_eq!(manager.reconnect_attempts(), 0);
        assert!(manager.get_pool().is_some());
    }

    #[tokio::test]
    async fn test_manual_reconnect_without_config() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let service = service_in(&dir, MockDriver::new(), sink);

        let err = service.manual_reconnect(DbRole::Ledger).await.unwrap_err();
        assert!(matches!(err, PartScoutError::NotConfigured(DbRole::Ledger)));
    }
}
