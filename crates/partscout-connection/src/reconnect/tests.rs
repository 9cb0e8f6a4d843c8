//! Tests for the reconnect module

use super::*;
use std::time::Duration;

mod policy_tests {
    use super::*;
    use partscout_core::DbRole;

    #[test]
    fn test_policy_defaults() {
        let policy = ReconnectPolicy::new(4);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.retry_delay(), Duration::from_secs(3));
        assert_eq!(policy.cooldown_period(), Duration::from_secs(300));
    }

    #[test]
    fn test_policy_per_role_budgets() {
        assert_eq!(ReconnectPolicy::for_role(DbRole::Catalog).max_attempts(), 5);
        assert_eq!(ReconnectPolicy::for_role(DbRole::Ledger).max_attempts(), 3);
    }

    #[test]
    fn test_policy_builder() {
        let policy = ReconnectPolicy::new(3)
            .with_retry_delay(Duration::from_millis(500))
            .with_cooldown_period(Duration::from_secs(60));

        assert_eq!(policy.retry_delay(), Duration::from_millis(500));
        assert_eq!(policy.cooldown_period(), Duration::from_secs(60));
    }
}

mod counter_tests {
    use super::*;
    use tokio::time::Instant;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(3).with_cooldown_period(Duration::from_secs(300))
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_allows_attempts_until_spent() {
        let policy = policy();
        let mut counters = ReconnectCounters::new();
        let now = Instant::now();

        for _ in 0..3 {
            assert_eq!(counters.decision(&policy, now), ReconnectDecision::Attempt);
            counters.record_failure(&policy, now);
        }

        assert_eq!(counters.attempts(), 3);
        assert!(counters.in_cooldown(now));
        assert_eq!(counters.decision(&policy, now), ReconnectDecision::Cooldown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_holds_until_period_elapses() {
        let policy = policy();
        let mut counters = ReconnectCounters::new();
        let now = Instant::now();
        for _ in 0..3 {
            counters.record_failure(&policy, now);
        }

        let almost = now + Duration::from_secs(299);
        assert_eq!(counters.decision(&policy, almost), ReconnectDecision::Cooldown);
        assert!(counters.in_cooldown(almost));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expiry_resets_budget() {
        let policy = policy();
        let mut counters = ReconnectCounters::new();
        let now = Instant::now();
        for _ in 0..3 {
            counters.record_failure(&policy, now);
        }

        let expired = now + Duration::from_secs(300);
        assert_eq!(counters.decision(&policy, expired), ReconnectDecision::Attempt);
        assert_eq!(counters.attempts(), 0);
        assert!(!counters.in_cooldown(expired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reset_escapes_cooldown() {
        let policy = policy();
        let mut counters = ReconnectCounters::new();
        let now = Instant::now();
        for _ in 0..3 {
            counters.record_failure(&policy, now);
        }
        assert!(counters.in_cooldown(now));

        counters.reset();

        assert_eq!(counters.attempts(), 0);
        assert!(!counters.in_cooldown(now));
        assert_eq!(counters.decision(&policy, now), ReconnectDecision::Attempt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_partial_budget() {
        let policy = policy();
        let mut counters = ReconnectCounters::new();
        let now = Instant::now();
        counters.record_failure(&policy, now);
        counters.record_failure(&policy, now);

        counters.record_success();

        assert_eq!(counters.attempts(), 0);
        assert_eq!(counters.decision(&policy, now), ReconnectDecision::Attempt);
    }
}

mod retry_tests {
    use super::*;
    use crate::manager::PoolManager;
    use crate::test_support::{FailKind, MockDriver};
    use partscout_core::{ConnectionConfig, DbRole, PartScoutError};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig::new("erp-srv", "contab", "consulta", "secret")
    }

    fn manager_with(driver: MockDriver) -> PoolManager {
        PoolManager::new(DbRole::Ledger, Arc::new(driver))
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let driver = MockDriver::new();
        let state = driver.state();
        let manager = manager_with(driver);
        let policy = ReconnectPolicy::new(3);

        retry_initialize(&manager, &policy, test_config())
            .await
            .unwrap();

        assert!(manager.get_pool().is_some());
        // One admin session for the existence check plus the real one.
        assert_eq!(state.connect_attempts_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_fixed_delay_until_success() {
        let driver = MockDriver::new();
        let state = driver.state();
        state.fail_connects(2, FailKind::Unreachable);
        let manager = manager_with(driver);
        let policy = ReconnectPolicy::new(5).with_retry_delay(Duration::from_secs(3));

        let start = Instant::now();
        retry_initialize(&manager, &policy, test_config())
            .await
            .unwrap();

        // Two failed attempts, each followed by the fixed delay.
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert!(manager.get_pool().is_some());
        // Two failing admin connects, then admin check + pool.
        assert_eq!(state.connect_attempts_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_returns_last_error() {
        let driver = MockDriver::new();
        let state = driver.state();
        state.fail_connects_forever(FailKind::Unreachable);
        let manager = manager_with(driver);
        let policy = ReconnectPolicy::new(3).with_retry_delay(Duration::from_secs(3));

        let err = retry_initialize(&manager, &policy, test_config())
            .await
            .unwrap_err();

        assert!(matches!(err, PartScoutError::Unreachable(_)));
        assert_eq!(state.connect_attempts_count(), 3);
        assert!(manager.get_pool().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_collision_with_inflight_initialize_returns_immediately() {
        let driver = MockDriver::new();
        let state = driver.state();
        state.set_connect_delay(Some(Duration::from_millis(200)));
        let manager = Arc::new(manager_with(driver));

        let inflight = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.initialize(test_config()).await })
        };
        tokio::task::yield_now().await;
        assert!(manager.is_connecting());

        let policy = ReconnectPolicy::new(3);
        let err = retry_initialize(&manager, &policy, test_config())
            .await
            .unwrap_err();
        assert!(matches!(err, PartScoutError::AlreadyConnecting(DbRole::Ledger)));

        inflight.await.unwrap().unwrap();
        assert!(manager.get_pool().is_some());
    }
}
