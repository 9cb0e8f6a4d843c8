//! The recurring health check task

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use partscout_core::PartScoutError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::probe::probe_connection;
use crate::manager::PoolManager;
use crate::pool::ConnectionState;
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};
use crate::status::{StatusEvent, StatusSink};

/// Configuration for the health monitor
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Interval between ticks
    pub check_interval: Duration,
    /// While a role is in cooldown, report at most one failure event per
    /// this many of its ticks
    pub cooldown_report_every: u32,
}

impl HealthMonitorConfig {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            check_interval,
            cooldown_report_every: 10,
        }
    }

    pub fn with_cooldown_report_every(mut self, ticks: u32) -> Self {
        self.cooldown_report_every = ticks.max(1);
        self
    }
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// One role under health monitoring
pub struct WatchedRole {
    manager: Arc<PoolManager>,
    policy: ReconnectPolicy,
    check_every_ticks: u32,
    last_reported: Mutex<Option<ConnectionState>>,
    cooldown_ticks: AtomicU32,
}

impl WatchedRole {
    pub fn new(manager: Arc<PoolManager>, policy: ReconnectPolicy) -> Self {
        Self {
            manager,
            policy,
            check_every_ticks: 1,
            last_reported: Mutex::new(None),
            cooldown_ticks: AtomicU32::new(0),
        }
    }

    /// Check this role only every `n` ticks. The ledger is read-mostly and
    /// less latency-sensitive, so it is polled at half the catalog's
    /// frequency.
    pub fn check_every_ticks(mut self, n: u32) -> Self {
        self.check_every_ticks = n.max(1);
        self
    }
}

impl std::fmt::Debug for WatchedRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchedRole")
            .field("role", &self.manager.role())
            .field("check_every_ticks", &self.check_every_ticks)
            .finish()
    }
}

struct MonitorInner {
    roles: Vec<WatchedRole>,
    sink: Arc<dyn StatusSink>,
    config: HealthMonitorConfig,
}

/// A single recurring task that verifies both roles and drives recovery.
///
/// `stop` cancels the timer deterministically: no tick fires after it
/// returns, though an in-flight reconnect attempt is allowed to finish (an
/// orphaned half-open pool is worse than a slightly late shutdown).
pub struct HealthMonitor {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawn the monitor task.
    pub fn start(
        roles: Vec<WatchedRole>,
        sink: Arc<dyn StatusSink>,
        config: HealthMonitorConfig,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(MonitorInner {
            roles,
            sink,
            config,
        });
        let task = tokio::spawn(run(inner, shutdown_rx));
        tracing::debug!("health monitor started");
        Self {
            shutdown,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown.send(true);
            let _ = task.await;
            tracing::debug!("health monitor stopped");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run(inner: Arc<MonitorInner>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(inner.config.check_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval completes immediately; consume it
    // so the first real check runs one full interval after start.
    interval.tick().await;

    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        tick += 1;

        let due = inner
            .roles
            .iter()
            .filter(|role| tick % role.check_every_ticks as u64 == 0);
        // Roles are checked concurrently so a hung probe on one cannot delay
        // the other's check within the same tick.
        futures::future::join_all(due.map(|role| inner.check_role(role))).await;
    }
    tracing::debug!("health monitor loop exited");
}

impl MonitorInner {
    async fn check_role(&self, watch: &WatchedRole) {
        let manager = &watch.manager;
        let Some(config) = manager.config() else {
            // Never configured; nothing to check, nothing to report.
            return;
        };

        if let Some(handle) = manager.current_handle() {
            match probe_connection(
                handle.connection().as_ref(),
                handle.config().request_timeout(),
            )
            .await
            {
                Ok(latency) => {
                    handle.mark_connected();
                    watch.cooldown_ticks.store(0, Ordering::SeqCst);
                    tracing::trace!(
                        role = %manager.role(),
                        latency_ms = latency.as_millis() as u64,
                        "liveness probe ok"
                    );
                    self.report(watch, ConnectionState::Connected, None, false);
                    return;
                }
                Err(err) => {
                    tracing::warn!(role = %manager.role(), error = %err, "liveness probe failed");
                    handle.mark_degraded(&err);
                }
            }
        }

        // Handle missing or probe failed: reconnect within the policy.
        match manager.reconnect_decision(&watch.policy) {
            ReconnectDecision::Attempt => match manager.initialize(config).await {
                Ok(()) => {
                    watch.cooldown_ticks.store(0, Ordering::SeqCst);
                    self.report(watch, ConnectionState::Connected, None, false);
                }
                Err(PartScoutError::AlreadyConnecting(_)) => {
                    // Another caller owns the in-flight attempt; its outcome
                    // shows up on the next tick.
                }
                Err(err) => {
                    manager.record_health_failure(&watch.policy);
                    self.report(watch, manager.state(), Some(err.to_string()), true);
                }
            },
            ReconnectDecision::Cooldown => {
                let ticks = watch.cooldown_ticks.fetch_add(1, Ordering::SeqCst);
                if ticks % self.config.cooldown_report_every == 0 {
                    self.report(watch, manager.state(), manager.last_error(), true);
                }
            }
        }
    }

    /// Emit a status event on state transitions, or unconditionally when
    /// `force` is set (failed attempts and throttled cooldown reports).
    fn report(
        &self,
        watch: &WatchedRole,
        state: ConnectionState,
        error: Option<String>,
        force: bool,
    ) {
        let mut last = watch.last_reported.lock();
        if !force && *last == Some(state) {
            return;
        }
        *last = Some(state);
        drop(last);

        self.sink.on_status_changed(StatusEvent {
            role: watch.manager.role(),
            state,
            error,
        });
    }
}
