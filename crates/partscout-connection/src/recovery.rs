//! On-demand recovery for queries that hit a dead connection
//!
//! When a business query fails with a connection-class error before the
//! health loop has noticed the outage, this path makes exactly one reconnect
//! attempt with the role's last-known configuration. It never consults the
//! health loop's attempt counters: a user is actively waiting on a query, so
//! a cooldown must not starve it.

use std::sync::Arc;

use partscout_core::{DbRole, PartScoutError, Result};
use tokio::task::JoinHandle;

use crate::manager::PoolManager;
use crate::pool::ConnectionState;

/// Best-effort reconnection invoked by the business query layer.
#[derive(Clone)]
pub struct LazyRecovery {
    catalog: Arc<PoolManager>,
    ledger: Arc<PoolManager>,
}

impl LazyRecovery {
    pub fn new(catalog: Arc<PoolManager>, ledger: Arc<PoolManager>) -> Self {
        Self { catalog, ledger }
    }

    fn manager(&self, role: DbRole) -> &Arc<PoolManager> {
        match role {
            DbRole::Catalog => &self.catalog,
            DbRole::Ledger => &self.ledger,
        }
    }

    /// Whether a failed query should trigger recovery at all. Statement and
    /// input errors never do.
    pub fn should_recover(error: &PartScoutError) -> bool {
        error.is_connection_error()
    }

    /// One reconnect attempt, awaited inline.
    ///
    /// Write paths use this so a failure surfaces to the caller, who retries
    /// the whole operation; nothing is ever retried mid-transaction. If an
    /// initialize is already in flight, the outcome of that attempt is
    /// returned instead of starting a duplicate.
    pub async fn recover_and_wait(&self, role: DbRole) -> Result<()> {
        let manager = self.manager(role);
        if manager.is_connecting() {
            return Self::inflight_outcome(manager).await;
        }

        let config = manager
            .config()
            .ok_or(PartScoutError::NotConfigured(role))?;
        match manager.initialize(config).await {
            Err(PartScoutError::AlreadyConnecting(_)) => Self::inflight_outcome(manager).await,
            other => other,
        }
    }

    /// Fire-and-forget recovery for read paths.
    ///
    /// The failed query reports no data to its caller; the *next* query finds
    /// the replacement handle. The join handle is returned for tests and is
    /// safe to drop.
    pub fn recover_in_background(&self, role: DbRole) -> JoinHandle<()> {
        let recovery = self.clone();
        tokio::spawn(async move {
            if let Err(err) = recovery.recover_and_wait(role).await {
                tracing::warn!(role = %role, error = %err, "background recovery failed");
            }
        })
    }

    async fn inflight_outcome(manager: &PoolManager) -> Result<()> {
        match manager.wait_for_inflight().await {
            ConnectionState::Connected => Ok(()),
            _ => Err(PartScoutError::Unreachable(
                manager
                    .last_error()
                    .unwrap_or_else(|| "connection attempt failed".to_string()),
            )),
        }
    }
}

impl std::fmt::Debug for LazyRecovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyRecovery").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailKind, MockDriver};
    use partscout_core::ConnectionConfig;
    use std::time::Duration;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig::new("db01", "repuestos", "scout", "secret")
    }

    fn recovery_with(driver: MockDriver) -> (LazyRecovery, Arc<PoolManager>) {
        let catalog = Arc::new(PoolManager::new(DbRole::Catalog, Arc::new(driver)));
        let ledger = Arc::new(PoolManager::new(
            DbRole::Ledger,
            Arc::new(MockDriver::new()),
        ));
        (LazyRecovery::new(catalog.clone(), ledger), catalog)
    }

    #[test]
    fn test_should_recover_classification() {
        assert!(LazyRecovery::should_recover(&PartScoutError::Unreachable(
            "gone".into()
        )));
        assert!(LazyRecovery::should_recover(&PartScoutError::ProbeFailed(
            "socket closed".into()
        )));
        assert!(!LazyRecovery::should_recover(&PartScoutError::Query(
            "bad LIKE pattern".into()
        )));
        assert!(!LazyRecovery::should_recover(&PartScoutError::AuthFailed(
            "login".into()
        )));
    }

    #[tokio::test]
    async fn test_recover_without_config_fails() {
        let (recovery, _catalog) = recovery_with(MockDriver::new());
        let err = recovery.recover_and_wait(DbRole::Catalog).await.unwrap_err();
        assert!(matches!(err, PartScoutError::NotConfigured(DbRole::Catalog)));
    }

    #[tokio::test]
    async fn test_recover_reopens_closed_connection() {
        let driver = MockDriver::new();
        let (recovery, catalog) = recovery_with(driver);

        catalog.initialize(test_config()).await.unwrap();
        catalog.close().await.unwrap();
        assert!(catalog.get_pool().is_none());

        recovery.recover_and_wait(DbRole::Catalog).await.unwrap();
        assert!(catalog.get_pool().is_some());
    }

    #[tokio::test]
    async fn test_recovery_bypasses_cooldown() {
        let driver = MockDriver::new();
        let state = driver.state();
        let (recovery, catalog) = recovery_with(driver);
        catalog.initialize(test_config()).await.unwrap();
        catalog.close().await.unwrap();

        // Exhaust the health loop's budget so the role sits in cooldown.
        let policy = crate::reconnect::ReconnectPolicy::new(1);
        catalog.record_health_failure(&policy);
        assert!(catalog.in_cooldown());

        let attempts_before = state.connect_attempts_count();
        recovery.recover_and_wait(DbRole::Catalog).await.unwrap();
        assert!(state.connect_attempts_count() > attempts_before);
        assert!(catalog.get_pool().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_waits_for_inflight_initialize() {
        let driver = MockDriver::new();
        let state = driver.state();
        let (recovery, catalog) = recovery_with(driver);

        catalog.initialize(test_config()).await.unwrap();
        catalog.close().await.unwrap();
        let opened_before = state.opened_count();

        state.set_connect_delay(Some(Duration::from_millis(200)));
        let init = {
            let catalog = catalog.clone();
            tokio::spawn(async move { catalog.initialize(test_config()).await })
        };
        tokio::task::yield_now().await;
        assert!(catalog.is_connecting());

        // Recovery rides on the in-flight attempt instead of racing it.
        recovery.recover_and_wait(DbRole::Catalog).await.unwrap();
        init.await.unwrap().unwrap();

        // Exactly one attempt's worth of sessions: admin check + pool.
        assert_eq!(state.opened_count(), opened_before + 2);
        assert!(catalog.get_pool().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_reports_inflight_failure() {
        let driver = MockDriver::new();
        let state = driver.state();
        let (recovery, catalog) = recovery_with(driver);
        catalog.initialize(test_config()).await.unwrap();

        state.set_connect_delay(Some(Duration::from_millis(50)));
        state.fail_connects_forever(FailKind::Unreachable);
        let init = {
            let catalog = catalog.clone();
            tokio::spawn(async move { catalog.initialize(test_config()).await })
        };
        tokio::task::yield_now().await;

        let result = recovery.recover_and_wait(DbRole::Catalog).await;
        let _ = init.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_background_recovery_restores_next_query() {
        let driver = MockDriver::new();
        let (recovery, catalog) = recovery_with(driver);
        catalog.initialize(test_config()).await.unwrap();
        catalog.close().await.unwrap();

        let task = recovery.recover_in_background(DbRole::Catalog);
        task.await.unwrap();

        assert!(catalog.get_pool().is_some());
    }
}
