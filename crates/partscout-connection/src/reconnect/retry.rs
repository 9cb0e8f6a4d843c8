//! Startup retry loop

use partscout_core::{ConnectionConfig, PartScoutError, Result};

use super::ReconnectPolicy;
use crate::manager::PoolManager;

/// Drive `initialize` with a bounded number of evenly spaced attempts.
///
/// Used at startup, where the caller wants up to `max_attempts` tries with
/// the policy's fixed delay awaited between iterations, without the health
/// loop's cooldown bookkeeping. Returns the first success or the last error.
///
/// An `AlreadyConnecting` collision is returned immediately: some other
/// caller owns the in-flight attempt and repeating here would only race it.
pub async fn retry_initialize(
    manager: &PoolManager,
    policy: &ReconnectPolicy,
    config: ConnectionConfig,
) -> Result<()> {
    let mut last_error = None;

    for attempt in 0..policy.max_attempts() {
        if attempt > 0 {
            tokio::time::sleep(policy.retry_delay()).await;
        }
        match manager.initialize(config.clone()).await {
            Ok(()) => return Ok(()),
            Err(err @ PartScoutError::AlreadyConnecting(_)) => return Err(err),
            Err(err) => {
                tracing::warn!(
                    role = %manager.role(),
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts(),
                    error = %err,
                    "connection attempt failed"
                );
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        PartScoutError::Configuration("retry budget allows no connection attempts".into())
    }))
}
