//! MFA profile entity and its storage seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::error::Result;

/// Enrolled second-factor method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaMethod {
    Totp,
    BackupCode,
}

/// Enrollment state for a principal, derived from the stored profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MfaStatus {
    /// No MFA configured.
    Disabled,
    /// Secret provisioned but not yet confirmed with a live code.
    Pending,
    /// Fully enabled and verified.
    Enabled,
}

/// Per-principal MFA state.
///
/// `secret` holds the *sealed* (encrypted-at-rest) key material produced by
/// the [`SecretVault`](crate::vault::SecretVault); decrypted bytes never
/// touch storage. Invariants: `verified` implies `enabled`, and a profile
/// without a secret can never be enabled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MfaProfile {
    pub principal_id: String,
    pub method: MfaMethod,
    /// Sealed secret; `None` once MFA is disabled.
    pub secret: Option<Vec<u8>>,
    pub enabled: bool,
    pub verified: bool,
    pub enabled_at: Option<SystemTime>,
    pub last_used_at: Option<SystemTime>,
    pub failed_attempts: u32,
    pub locked_until: Option<SystemTime>,
    pub recovery_email: Option<String>,
}

impl MfaProfile {
    /// Create a pending profile holding a freshly sealed secret.
    pub fn pending(principal_id: impl Into<String>, sealed_secret: Vec<u8>) -> Self {
        Self {
            principal_id: principal_id.into(),
            method: MfaMethod::Totp,
            secret: Some(sealed_secret),
            enabled: false,
            verified: false,
            enabled_at: None,
            last_used_at: None,
            failed_attempts: 0,
            locked_until: None,
            recovery_email: None,
        }
    }

    /// Whether this profile is fully enabled and verified.
    pub fn is_active(&self) -> bool {
        self.enabled && self.verified
    }

    /// Whether the profile is locked at `now`.
    ///
    /// A read-only check: an expired `locked_until` reads as unlocked but is
    /// only cleared by an explicit success or administrative clear.
    pub fn is_locked(&self, now: SystemTime) -> bool {
        self.locked_until.map(|until| now < until).unwrap_or(false)
    }

    /// Current enrollment status.
    pub fn status(&self) -> MfaStatus {
        if self.is_active() {
            MfaStatus::Enabled
        } else if self.secret.is_some() {
            MfaStatus::Pending
        } else {
            MfaStatus::Disabled
        }
    }
}

/// Storage seam for MFA profiles.
///
/// `increment_failed_attempts` must be an atomic read-modify-write per
/// principal (row lock or compare-and-swap): two concurrent failures must
/// never both observe the same pre-increment count.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the profile for a principal, if one exists.
    async fn find_profile(&self, principal_id: &str) -> Result<Option<MfaProfile>>;

    /// Insert or fully replace a profile.
    async fn upsert_profile(&self, profile: &MfaProfile) -> Result<()>;

    /// Delete a profile. Idempotent.
    async fn delete_profile(&self, principal_id: &str) -> Result<()>;

    /// Atomically increment the failure counter and return the new count.
    async fn increment_failed_attempts(&self, principal_id: &str) -> Result<u32>;

    /// Set the lockout expiry.
    async fn set_locked_until(&self, principal_id: &str, until: SystemTime) -> Result<()>;

    /// Reset the failure counter and clear any lockout.
    async fn clear_lockout(&self, principal_id: &str) -> Result<()>;

    /// Record a successful verification at `at`.
    async fn touch_last_used(&self, principal_id: &str, at: SystemTime) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pending_profile_invariants() {
        let profile = MfaProfile::pending("user-1", vec![1, 2, 3]);
        assert!(!profile.enabled);
        assert!(!profile.verified);
        assert!(!profile.is_active());
        assert_eq!(profile.status(), MfaStatus::Pending);
        assert_eq!(profile.failed_attempts, 0);
    }

    #[test]
    fn test_status_transitions() {
        let mut profile = MfaProfile::pending("user-1", vec![1]);
        profile.enabled = true;
        profile.verified = true;
        assert_eq!(profile.status(), MfaStatus::Enabled);

        profile.enabled = false;
        profile.verified = false;
        profile.secret = None;
        assert_eq!(profile.status(), MfaStatus::Disabled);
    }

    #[test]
    fn test_lock_expiry_is_read_only() {
        let now = SystemTime::now();
        let mut profile = MfaProfile::pending("user-1", vec![1]);
        profile.locked_until = Some(now + Duration::from_secs(60));
        profile.failed_attempts = 5;

        assert!(profile.is_locked(now));
        // Past the expiry the profile reads unlocked, but the stored state
        // is untouched until an explicit clear.
        assert!(!profile.is_locked(now + Duration::from_secs(61)));
        assert_eq!(profile.failed_attempts, 5);
        assert!(profile.locked_until.is_some());
    }
}
