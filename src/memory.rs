//! In-memory store backend.
//!
//! Implements every storage seam behind a single shared state guarded by
//! one lock, which makes the per-principal read-modify-write operations
//! (`increment_failed_attempts`, `mark_code_used`, `replace_codes`)
//! trivially atomic. Suitable for tests and single-process deployments;
//! production systems implement the traits over their own database.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::audit::{AuditEvent, AuditStore};
use crate::backup::{BackupCode, BackupCodeStore};
use crate::error::{GatekeyError, Result};
use crate::profile::{MfaProfile, ProfileStore};
use crate::trusted_device::{TrustedDevice, TrustedDeviceStore};
use crate::whitelist::{WhitelistEntry, WhitelistStore};

#[derive(Default)]
struct State {
    profiles: HashMap<String, MfaProfile>,
    /// Backup codes by code id.
    codes: HashMap<String, BackupCode>,
    /// Trusted devices by device id.
    devices: HashMap<String, TrustedDevice>,
    /// Whitelist entries by (principal, address).
    whitelist: HashMap<(String, String), WhitelistEntry>,
    audit: Vec<AuditEvent>,
}

/// Shared in-memory implementation of all gatekey store traits.
///
/// Cheap to clone; clones share the same underlying state, like a database
/// connection pool handle.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn find_profile(&self, principal_id: &str) -> Result<Option<MfaProfile>> {
        Ok(self.state.read().profiles.get(principal_id).cloned())
    }

    async fn upsert_profile(&self, profile: &MfaProfile) -> Result<()> {
        self.state
            .write()
            .profiles
            .insert(profile.principal_id.clone(), profile.clone());
        Ok(())
    }

    async fn delete_profile(&self, principal_id: &str) -> Result<()> {
        self.state.write().profiles.remove(principal_id);
        Ok(())
    }

    async fn increment_failed_attempts(&self, principal_id: &str) -> Result<u32> {
        let mut state = self.state.write();
        let profile = state
            .profiles
            .get_mut(principal_id)
            .ok_or_else(|| GatekeyError::storage(format!("no profile for {principal_id}")))?;
        profile.failed_attempts += 1;
        Ok(profile.failed_attempts)
    }

    async fn set_locked_until(&self, principal_id: &str, until: SystemTime) -> Result<()> {
        let mut state = self.state.write();
        if let Some(profile) = state.profiles.get_mut(principal_id) {
            profile.locked_until = Some(until);
        }
        Ok(())
    }

    async fn clear_lockout(&self, principal_id: &str) -> Result<()> {
        let mut state = self.state.write();
        if let Some(profile) = state.profiles.get_mut(principal_id) {
            profile.failed_attempts = 0;
            profile.locked_until = None;
        }
        Ok(())
    }

    async fn touch_last_used(&self, principal_id: &str, at: SystemTime) -> Result<()> {
        let mut state = self.state.write();
        if let Some(profile) = state.profiles.get_mut(principal_id) {
            profile.last_used_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl BackupCodeStore for MemoryStore {
    async fn replace_codes(&self, principal_id: &str, codes: &[BackupCode]) -> Result<()> {
        // Single write lock: delete + insert are one atomic step.
        let mut state = self.state.write();
        state.codes.retain(|_, c| c.principal_id != principal_id);
        for code in codes {
            state.codes.insert(code.id.clone(), code.clone());
        }
        Ok(())
    }

    async fn unused_codes(&self, principal_id: &str) -> Result<Vec<BackupCode>> {
        Ok(self
            .state
            .read()
            .codes
            .values()
            .filter(|c| c.principal_id == principal_id && !c.used)
            .cloned()
            .collect())
    }

    async fn mark_code_used(
        &self,
        code_id: &str,
        at: SystemTime,
        address: Option<&str>,
    ) -> Result<bool> {
        let mut state = self.state.write();
        match state.codes.get_mut(code_id) {
            Some(code) if !code.used => {
                code.used = true;
                code.used_at = Some(at);
                code.used_from_address = address.map(str::to_string);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_codes(&self, principal_id: &str) -> Result<()> {
        self.state
            .write()
            .codes
            .retain(|_, c| c.principal_id != principal_id);
        Ok(())
    }
}

#[async_trait]
impl TrustedDeviceStore for MemoryStore {
    async fn insert_device(&self, device: &TrustedDevice) -> Result<()> {
        self.state
            .write()
            .devices
            .insert(device.id.clone(), device.clone());
        Ok(())
    }

    async fn active_devices(&self, principal_id: &str) -> Result<Vec<TrustedDevice>> {
        Ok(self
            .state
            .read()
            .devices
            .values()
            .filter(|d| d.principal_id == principal_id && d.active)
            .cloned()
            .collect())
    }

    async fn touch_device(
        &self,
        device_id: &str,
        at: SystemTime,
        address: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write();
        if let Some(device) = state.devices.get_mut(device_id) {
            device.last_seen_at = Some(at);
            if address.is_some() {
                device.last_address = address.map(str::to_string);
            }
        }
        Ok(())
    }

    async fn deactivate_device(&self, device_id: &str) -> Result<bool> {
        let mut state = self.state.write();
        match state.devices.get_mut(device_id) {
            Some(device) if device.active => {
                device.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_all_devices(&self, principal_id: &str) -> Result<usize> {
        let mut state = self.state.write();
        let mut count = 0;
        for device in state.devices.values_mut() {
            if device.principal_id == principal_id && device.active {
                device.active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_expired_devices(&self, now: SystemTime) -> Result<usize> {
        let mut state = self.state.write();
        let before = state.devices.len();
        state.devices.retain(|_, d| d.expires_at >= now);
        Ok(before - state.devices.len())
    }
}

#[async_trait]
impl WhitelistStore for MemoryStore {
    async fn find_entry(
        &self,
        principal_id: &str,
        address: &str,
    ) -> Result<Option<WhitelistEntry>> {
        Ok(self
            .state
            .read()
            .whitelist
            .get(&(principal_id.to_string(), address.to_string()))
            .cloned())
    }

    async fn upsert_entry(&self, entry: &WhitelistEntry) -> Result<()> {
        self.state.write().whitelist.insert(
            (entry.principal_id.clone(), entry.address.clone()),
            entry.clone(),
        );
        Ok(())
    }

    async fn remove_entry(&self, principal_id: &str, address: &str) -> Result<bool> {
        Ok(self
            .state
            .write()
            .whitelist
            .remove(&(principal_id.to_string(), address.to_string()))
            .is_some())
    }

    async fn list_entries(&self, principal_id: &str) -> Result<Vec<WhitelistEntry>> {
        Ok(self
            .state
            .read()
            .whitelist
            .values()
            .filter(|e| e.principal_id == principal_id)
            .cloned()
            .collect())
    }

    async fn touch_entry(&self, principal_id: &str, address: &str, at: SystemTime) -> Result<()> {
        let mut state = self.state.write();
        if let Some(entry) = state
            .whitelist
            .get_mut(&(principal_id.to_string(), address.to_string()))
        {
            entry.last_access_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_event(&self, event: &AuditEvent) -> Result<()> {
        self.state.write().audit.push(event.clone());
        Ok(())
    }

    async fn events_for(&self, principal_id: &str) -> Result<Vec<AuditEvent>> {
        Ok(self
            .state
            .read()
            .audit
            .iter()
            .filter(|e| e.principal_id == principal_id)
            .cloned()
            .collect())
    }
}
