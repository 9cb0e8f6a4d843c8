//! Per-role connection lifecycle management

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use partscout_core::{
    Connection, ConnectionConfig, DatabaseDriver, DbRole, PartScoutError, Result, Value,
};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::health::probe_connection;
use crate::pool::{ConnectionState, PoolHandle};
use crate::reconnect::{ReconnectCounters, ReconnectDecision, ReconnectPolicy};

/// Administrative database used for existence checks and database creation.
const ADMIN_DATABASE: &str = "master";

const DATABASE_EXISTS_QUERY: &str = "SELECT name FROM sys.databases WHERE name = @P1";

/// Owns the full connection lifecycle for one database role.
///
/// At most one `initialize` runs per role at any time, enforced by a
/// compare-and-set guard rather than a queue: a colliding caller observes
/// `AlreadyConnecting` (or awaits the in-flight outcome via
/// [`wait_for_inflight`](PoolManager::wait_for_inflight)) instead of opening
/// a second pool.
pub struct PoolManager {
    role: DbRole,
    driver: Arc<dyn DatabaseDriver>,
    handle: RwLock<Option<Arc<PoolHandle>>>,
    /// Last-known configuration, kept even when an attempt fails so the
    /// health loop and lazy recovery can retry with it.
    config: RwLock<Option<ConnectionConfig>>,
    last_error: RwLock<Option<String>>,
    connecting: AtomicBool,
    counters: Mutex<ReconnectCounters>,
    /// Bumped whenever an attempt completes, waking `wait_for_inflight`.
    attempt_epoch: watch::Sender<u64>,
}

/// Clears the connecting flag and wakes waiters on every exit path of a
/// guarded section.
struct ConnectGuard<'a> {
    manager: &'a PoolManager,
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.manager.connecting.store(false, Ordering::SeqCst);
        self.manager.attempt_epoch.send_modify(|epoch| *epoch += 1);
    }
}

impl PoolManager {
    pub fn new(role: DbRole, driver: Arc<dyn DatabaseDriver>) -> Self {
        let (attempt_epoch, _) = watch::channel(0);
        Self {
            role,
            driver,
            handle: RwLock::new(None),
            config: RwLock::new(None),
            last_error: RwLock::new(None),
            connecting: AtomicBool::new(false),
            counters: Mutex::new(ReconnectCounters::new()),
            attempt_epoch,
        }
    }

    pub fn role(&self) -> DbRole {
        self.role
    }

    /// The last-known configuration for this role, if any.
    pub fn config(&self) -> Option<ConnectionConfig> {
        self.config.read().clone()
    }

    pub fn is_configured(&self) -> bool {
        self.config.read().is_some()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    /// The role's current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        if self.is_connecting() {
            return ConnectionState::Connecting;
        }
        self.handle
            .read()
            .as_ref()
            .map(|h| h.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// The message of the most recent failed attempt or probe.
    pub fn last_error(&self) -> Option<String> {
        if let Some(handle) = self.handle.read().as_ref() {
            if let Some(err) = handle.last_error() {
                return Some(err);
            }
        }
        self.last_error.read().clone()
    }

    /// The current handle, but only while it is `Connected`.
    ///
    /// Query callers must treat `None` as "attempt lazy recovery or fail the
    /// user-visible operation"; a half-initialized or degraded handle is
    /// never returned. Pure read, no side effects.
    pub fn get_pool(&self) -> Option<Arc<PoolHandle>> {
        self.handle
            .read()
            .clone()
            .filter(|handle| handle.state().is_connected())
    }

    /// The current handle regardless of state, for the health loop's probes.
    pub(crate) fn current_handle(&self) -> Option<Arc<PoolHandle>> {
        self.handle.read().clone()
    }

    /// Open (or replace) this role's connection from `config`.
    ///
    /// Steps: close any existing handle, make sure the target database
    /// exists, open a fresh connection, and run one liveness probe. On
    /// success the handle is stored `Connected` and the reconnect budget
    /// resets; on failure the role is left `Disconnected` with the error
    /// recorded, and the concrete error propagates to the caller, who
    /// decides whether to retry.
    #[tracing::instrument(
        skip(self, config),
        fields(role = %self.role, server = %config.server, database = %config.database)
    )]
    pub async fn initialize(&self, config: ConnectionConfig) -> Result<()> {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("initialize skipped, an attempt is already in progress");
            return Err(PartScoutError::AlreadyConnecting(self.role));
        }
        let _guard = ConnectGuard { manager: self };

        *self.config.write() = Some(config.clone());

        // The previous handle is closed before a replacement is opened; two
        // live pools for one role must never coexist.
        let previous = self.handle.write().take();
        if let Some(previous) = previous {
            previous.close().await;
        }

        match self.open_handle(&config).await {
            Ok(handle) => {
                *self.handle.write() = Some(Arc::new(handle));
                *self.last_error.write() = None;
                self.counters.lock().record_success();
                tracing::info!("connection established");
                Ok(())
            }
            Err(err) => {
                *self.last_error.write() = Some(err.to_string());
                tracing::error!(error = %err, "connection failed");
                Err(err)
            }
        }
    }

    async fn open_handle(&self, config: &ConnectionConfig) -> Result<PoolHandle> {
        self.ensure_database_exists(config).await?;
        let conn = self.driver.connect(config).await?;
        match probe_connection(conn.as_ref(), config.request_timeout()).await {
            Ok(latency) => {
                tracing::debug!(
                    latency_ms = latency.as_millis() as u64,
                    "liveness probe passed"
                );
                Ok(PoolHandle::new(config.clone(), conn))
            }
            Err(err) => {
                let _ = conn.close().await;
                Err(err)
            }
        }
    }

    /// Make sure the target database exists, creating it if absent.
    ///
    /// Runs against the server's administrative database. An absent but
    /// creatable database is expected (first run against a fresh server); a
    /// permissions error is not, and surfaces to the caller unretried.
    async fn ensure_database_exists(&self, config: &ConnectionConfig) -> Result<()> {
        let admin = config.clone().with_database(ADMIN_DATABASE);
        let conn = self.driver.connect(&admin).await?;
        let result = Self::check_and_create(conn.as_ref(), config).await;
        let _ = conn.close().await;
        result
    }

    async fn check_and_create(conn: &dyn Connection, config: &ConnectionConfig) -> Result<()> {
        let timeout = config.request_timeout();
        let existing = with_timeout(
            timeout,
            conn.query(
                DATABASE_EXISTS_QUERY,
                &[Value::String(config.database.clone())],
            ),
        )
        .await?;

        if existing.rows.is_empty() {
            tracing::info!(database = %config.database, "target database absent, creating it");
            let create = format!("CREATE DATABASE [{}]", config.database);
            with_timeout(timeout, conn.execute(&create, &[])).await?;
        }
        Ok(())
    }

    /// One-shot validation of a configuration for the save/test flow.
    ///
    /// Connects to the administrative database and probes it, so reachability
    /// and credentials are verified without touching the stored handle; the
    /// target database itself is created during `initialize`.
    #[tracing::instrument(skip(self, config), fields(role = %self.role, server = %config.server))]
    pub async fn test_config(&self, config: &ConnectionConfig) -> Result<()> {
        let admin = config.clone().with_database(ADMIN_DATABASE);
        let conn = self.driver.connect(&admin).await?;
        let result = probe_connection(conn.as_ref(), config.request_timeout()).await;
        let _ = conn.close().await;
        result.map(|_| ())
    }

    /// Wait until no initialize is in flight, then report the resulting
    /// state. Returns immediately when the guard is clear.
    pub async fn wait_for_inflight(&self) -> ConnectionState {
        let mut rx = self.attempt_epoch.subscribe();
        while self.is_connecting() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.state()
    }

    /// Release the underlying connection and clear the reconnect budget.
    ///
    /// Serializes behind an in-flight initialize instead of racing it, so a
    /// shutdown can never leave two live pools or leak a handle. Idempotent;
    /// the last-known configuration is kept.
    pub async fn close(&self) -> Result<()> {
        while self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.wait_for_inflight().await;
        }
        let _guard = ConnectGuard { manager: self };

        let handle = self.handle.write().take();
        if let Some(handle) = handle {
            handle.close().await;
        }
        self.counters.lock().reset();
        tracing::debug!(role = %self.role, "connection closed");
        Ok(())
    }

    /// Clear the health loop's attempt budget and any active cooldown.
    /// Every user-triggered reconnect calls this first.
    pub fn reset_reconnect_counters(&self) {
        self.counters.lock().reset();
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.counters.lock().attempts()
    }

    pub fn in_cooldown(&self) -> bool {
        self.counters.lock().in_cooldown(Instant::now())
    }

    pub(crate) fn reconnect_decision(&self, policy: &ReconnectPolicy) -> ReconnectDecision {
        self.counters.lock().decision(policy, Instant::now())
    }

    pub(crate) fn record_health_failure(&self, policy: &ReconnectPolicy) {
        self.counters.lock().record_failure(policy, Instant::now());
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("role", &self.role)
            .field("state", &self.state())
            .finish()
    }
}

/// Bound a driver request with the configuration's request timeout; a
/// timed-out operation is treated identically to a connection error.
pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(PartScoutError::Timeout(format!(
            "request exceeded {:?}",
            timeout
        ))),
    }
}
