//! IP whitelist bypass policy.
//!
//! A whitelisted source address skips MFA entirely for a principal. Bypass
//! hits are still auditable: the engine records them with a distinct
//! `ip_whitelist` method so they never masquerade as a normal TOTP pass.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::error::Result;

/// A whitelisted address for a principal. Unique per (principal, address).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub principal_id: String,
    pub address: String,
    pub description: Option<String>,
    pub active: bool,
    pub last_access_at: Option<SystemTime>,
}

/// Storage seam for whitelist entries.
#[async_trait]
pub trait WhitelistStore: Send + Sync {
    /// Look up the entry for `(principal, address)`, active or not.
    async fn find_entry(&self, principal_id: &str, address: &str)
        -> Result<Option<WhitelistEntry>>;

    /// Insert or replace an entry.
    async fn upsert_entry(&self, entry: &WhitelistEntry) -> Result<()>;

    /// Remove an entry. Returns whether it existed.
    async fn remove_entry(&self, principal_id: &str, address: &str) -> Result<bool>;

    /// All entries for a principal.
    async fn list_entries(&self, principal_id: &str) -> Result<Vec<WhitelistEntry>>;

    /// Record an access through this entry.
    async fn touch_entry(&self, principal_id: &str, address: &str, at: SystemTime) -> Result<()>;
}

/// Evaluates whether a source address bypasses MFA.
pub struct IpWhitelistPolicy<S: WhitelistStore> {
    store: S,
}

impl<S: WhitelistStore> IpWhitelistPolicy<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// True iff the feature is enabled and an active entry exists for the
    /// pair. A hit updates the entry's last-access time (best-effort).
    pub async fn is_bypassed(
        &self,
        principal_id: &str,
        address: &str,
        enabled: bool,
        now: SystemTime,
    ) -> Result<bool> {
        if !enabled {
            return Ok(false);
        }

        let entry = match self.store.find_entry(principal_id, address).await? {
            Some(e) if e.active => e,
            _ => return Ok(false),
        };

        if let Err(e) = self.store.touch_entry(principal_id, address, now).await {
            tracing::warn!(
                target: "mfa.whitelist.touch_failed",
                principal_id = %principal_id,
                error = %e,
                "failed to record whitelist access time"
            );
        }

        tracing::debug!(
            target: "mfa.whitelist.bypass",
            principal_id = %principal_id,
            address = %entry.address,
            "MFA bypassed by IP whitelist"
        );

        Ok(true)
    }
}
