//! Failed-attempt lockout policy.
//!
//! A small state machine per principal: `Unlocked` until the consecutive
//! failure count reaches the configured maximum, then `Locked(until)`.
//! Success always clears the whole state. The counter increment itself is
//! delegated to [`ProfileStore::increment_failed_attempts`] so concurrent
//! failures serialize at the data layer.
//!
//! [`ProfileStore::increment_failed_attempts`]: crate::profile::ProfileStore::increment_failed_attempts

use std::time::{Duration, SystemTime};

use crate::error::Result;
use crate::profile::ProfileStore;

/// Lockout thresholds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Consecutive failures before lockout.
    pub max_attempts: u32,
    /// How long the lockout lasts.
    pub lockout_duration: Duration,
}

impl LockoutPolicy {
    pub fn new(max_attempts: u32, lockout_duration: Duration) -> Self {
        Self {
            max_attempts,
            lockout_duration,
        }
    }

    /// Attempts left before lockout, for caller messaging.
    #[must_use]
    pub fn remaining_attempts(&self, failed_attempts: u32) -> u32 {
        self.max_attempts.saturating_sub(failed_attempts)
    }

    /// Record a failed attempt for `principal_id`.
    ///
    /// Increments the stored counter atomically; if the new count reaches
    /// the maximum, transitions to locked with expiry `now + duration`.
    pub async fn record_failure<S: ProfileStore>(
        &self,
        store: &S,
        principal_id: &str,
        now: SystemTime,
    ) -> Result<FailureRecord> {
        let attempts = store.increment_failed_attempts(principal_id).await?;

        if attempts >= self.max_attempts {
            let until = now + self.lockout_duration;
            store.set_locked_until(principal_id, until).await?;

            tracing::warn!(
                target: "mfa.lockout.locked",
                principal_id = %principal_id,
                attempts,
                duration_secs = self.lockout_duration.as_secs(),
                "principal locked out after repeated failures"
            );

            return Ok(FailureRecord {
                attempts,
                just_locked: true,
                locked_until: Some(until),
            });
        }

        Ok(FailureRecord {
            attempts,
            just_locked: false,
            locked_until: None,
        })
    }

    /// Record a successful verification: resets the counter and clears any
    /// lockout, regardless of current state.
    pub async fn record_success<S: ProfileStore>(
        &self,
        store: &S,
        principal_id: &str,
    ) -> Result<()> {
        store.clear_lockout(principal_id).await?;
        tracing::debug!(
            target: "mfa.lockout.cleared",
            principal_id = %principal_id,
            "lockout state cleared on success"
        );
        Ok(())
    }
}

/// Outcome of recording a failed attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureRecord {
    /// Failure count after this attempt.
    pub attempts: u32,
    /// Whether this attempt triggered the lockout.
    pub just_locked: bool,
    /// Lockout expiry, when locked.
    pub locked_until: Option<SystemTime>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::profile::MfaProfile;

    fn policy() -> LockoutPolicy {
        LockoutPolicy::new(3, Duration::from_secs(900))
    }

    async fn store_with_profile(principal: &str) -> MemoryStore {
        use crate::profile::ProfileStore as _;
        let store = MemoryStore::new();
        store
            .upsert_profile(&MfaProfile::pending(principal, vec![0]))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_locks_exactly_at_max_attempts() {
        let store = store_with_profile("user-1").await;
        let policy = policy();
        let now = SystemTime::now();

        let r1 = policy.record_failure(&store, "user-1", now).await.unwrap();
        assert_eq!(r1.attempts, 1);
        assert!(!r1.just_locked);

        let r2 = policy.record_failure(&store, "user-1", now).await.unwrap();
        assert_eq!(r2.attempts, 2);
        assert!(!r2.just_locked);

        let r3 = policy.record_failure(&store, "user-1", now).await.unwrap();
        assert_eq!(r3.attempts, 3);
        assert!(r3.just_locked);
        assert_eq!(r3.locked_until, Some(now + Duration::from_secs(900)));

        let profile = store.find_profile("user-1").await.unwrap().unwrap();
        assert!(profile.is_locked(now));
        assert!(!profile.is_locked(now + Duration::from_secs(901)));
    }

    #[tokio::test]
    async fn test_success_clears_counter_and_lock() {
        let store = store_with_profile("user-1").await;
        let policy = policy();
        let now = SystemTime::now();

        for _ in 0..3 {
            policy.record_failure(&store, "user-1", now).await.unwrap();
        }
        policy.record_success(&store, "user-1").await.unwrap();

        let profile = store.find_profile("user-1").await.unwrap().unwrap();
        assert_eq!(profile.failed_attempts, 0);
        assert!(profile.locked_until.is_none());
        assert!(!profile.is_locked(now));
    }

    #[tokio::test]
    async fn test_concurrent_failures_serialize() {
        let store = std::sync::Arc::new(store_with_profile("user-1").await);
        let policy = std::sync::Arc::new(policy());
        let now = SystemTime::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let store = store.clone();
            let policy = policy.clone();
            handles.push(tokio::spawn(async move {
                policy.record_failure(&*store, "user-1", now).await.unwrap()
            }));
        }

        let mut locked_count = 0;
        let mut seen = Vec::new();
        for handle in handles {
            let record = handle.await.unwrap();
            if record.just_locked {
                locked_count += 1;
            }
            seen.push(record.attempts);
        }

        // The atomic increment guarantees distinct counts, so exactly one
        // recording observes the threshold.
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(locked_count, 1);
    }

    #[test]
    fn test_remaining_attempts() {
        let policy = policy();
        assert_eq!(policy.remaining_attempts(0), 3);
        assert_eq!(policy.remaining_attempts(2), 1);
        assert_eq!(policy.remaining_attempts(5), 0);
    }
}
