//! Trusted-device bypass tokens.
//!
//! After completing MFA a caller may mark the device as trusted, letting it
//! skip verification for a bounded period. Raw tokens are returned once and
//! only their SHA-256 hash is stored; validation compares hashes in
//! constant time against the principal's active, unexpired devices.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime};
use subtle::ConstantTimeEq;

use crate::error::Result;

/// Length of generated trust tokens (32 bytes = 256 bits).
const TOKEN_LENGTH: usize = 32;

/// Maximum length for stored IP address strings.
const MAX_ADDRESS_LENGTH: usize = 45; // IPv6 max length

/// Maximum length for stored user agent strings.
const MAX_USER_AGENT_LENGTH: usize = 512;

/// A trusted device record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrustedDevice {
    pub id: String,
    pub principal_id: String,
    /// SHA-256 hex of the raw token.
    pub token_hash: String,
    /// Friendly name parsed from the user agent.
    pub display_name: String,
    pub last_address: Option<String>,
    pub user_agent: Option<String>,
    pub trusted_at: SystemTime,
    pub last_seen_at: Option<SystemTime>,
    pub expires_at: SystemTime,
    pub active: bool,
}

impl TrustedDevice {
    /// Whether the trust has expired at `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now > self.expires_at
    }

    /// Most recent activity, used for cap eviction ordering.
    fn last_activity(&self) -> SystemTime {
        self.last_seen_at.unwrap_or(self.trusted_at)
    }
}

/// Storage seam for trusted devices.
#[async_trait]
pub trait TrustedDeviceStore: Send + Sync {
    /// Persist a new device.
    async fn insert_device(&self, device: &TrustedDevice) -> Result<()>;

    /// All active devices for a principal (expired ones may be included;
    /// callers filter by expiry themselves).
    async fn active_devices(&self, principal_id: &str) -> Result<Vec<TrustedDevice>>;

    /// Update `last_seen_at` and `last_address` after a successful validation.
    async fn touch_device(
        &self,
        device_id: &str,
        at: SystemTime,
        address: Option<&str>,
    ) -> Result<()>;

    /// Set `active = false`. Returns whether the device existed and was
    /// active. Idempotent.
    async fn deactivate_device(&self, device_id: &str) -> Result<bool>;

    /// Deactivate every device for a principal. Returns the count affected.
    async fn deactivate_all_devices(&self, principal_id: &str) -> Result<usize>;

    /// Remove devices whose expiry is in the past. Returns the count removed.
    async fn delete_expired_devices(&self, now: SystemTime) -> Result<usize>;
}

/// Issues and validates trusted-device tokens.
pub struct TrustedDeviceManager<S: TrustedDeviceStore> {
    store: S,
    ttl: Duration,
    max_devices: usize,
}

/// Result of issuing a trust token.
pub struct TrustIssuance {
    /// The raw token, returned exactly once. Never recoverable from storage.
    pub token: String,
    /// The stored record (hash only).
    pub device: TrustedDevice,
}

impl<S: TrustedDeviceStore> TrustedDeviceManager<S> {
    pub fn new(store: S, ttl: Duration, max_devices: usize) -> Self {
        Self {
            store,
            ttl,
            max_devices,
        }
    }

    /// Issue a trust token for a device.
    ///
    /// When the principal is at the device cap, the least recently seen
    /// device is evicted to make room.
    pub async fn issue<R: RngCore + CryptoRng>(
        &self,
        principal_id: &str,
        address: Option<&str>,
        user_agent: Option<&str>,
        now: SystemTime,
        rng: &mut R,
    ) -> Result<TrustIssuance> {
        let live: Vec<TrustedDevice> = self
            .store
            .active_devices(principal_id)
            .await?
            .into_iter()
            .filter(|d| !d.is_expired(now))
            .collect();

        if live.len() >= self.max_devices {
            if let Some(oldest) = live.iter().min_by_key(|d| d.last_activity()) {
                self.store.deactivate_device(&oldest.id).await?;
                tracing::info!(
                    target: "mfa.trusted_device.evicted",
                    principal_id = %principal_id,
                    device_id = %oldest.id,
                    "evicted least recently seen trusted device at cap"
                );
            }
        }

        let mut token_bytes = [0u8; TOKEN_LENGTH];
        rng.fill_bytes(&mut token_bytes);
        let token = URL_SAFE_NO_PAD.encode(token_bytes);

        let address = address.map(|a| truncate(a, MAX_ADDRESS_LENGTH));
        let user_agent = user_agent.map(|ua| truncate(ua, MAX_USER_AGENT_LENGTH));

        let device = TrustedDevice {
            id: uuid::Uuid::new_v4().to_string(),
            principal_id: principal_id.to_string(),
            token_hash: hash_token(&token),
            display_name: user_agent
                .as_deref()
                .map(parse_device_name)
                .unwrap_or_else(|| "Unknown device".to_string()),
            last_address: address,
            user_agent,
            trusted_at: now,
            last_seen_at: None,
            expires_at: now + self.ttl,
            active: true,
        };

        self.store.insert_device(&device).await?;

        tracing::info!(
            target: "mfa.trusted_device.created",
            principal_id = %principal_id,
            device_id = %device.id,
            expires_in_days = self.ttl.as_secs() / 86400,
            "device trusted"
        );

        Ok(TrustIssuance { token, device })
    }

    /// Validate a raw token against the principal's devices.
    ///
    /// On a match, updates the device's last-seen metadata and returns it.
    /// No match, expired, or inactive all read as `None`; the caller should
    /// fall through to full MFA.
    pub async fn validate(
        &self,
        principal_id: &str,
        raw_token: &str,
        address: Option<&str>,
        now: SystemTime,
    ) -> Result<Option<TrustedDevice>> {
        let candidate_hash = hash_token(raw_token);
        let devices = self.store.active_devices(principal_id).await?;

        let matched = devices.into_iter().find(|d| {
            bool::from(d.token_hash.as_bytes().ct_eq(candidate_hash.as_bytes()))
        });

        let device = match matched {
            Some(d) if !d.is_expired(now) => d,
            Some(d) => {
                tracing::debug!(
                    target: "mfa.trusted_device.expired",
                    principal_id = %principal_id,
                    device_id = %d.id,
                    "trust token expired"
                );
                return Ok(None);
            }
            None => return Ok(None),
        };

        self.store
            .touch_device(&device.id, now, address.map(|a| truncate(a, MAX_ADDRESS_LENGTH)).as_deref())
            .await?;

        tracing::debug!(
            target: "mfa.trusted_device.verified",
            principal_id = %principal_id,
            device_id = %device.id,
            "device trust verified"
        );

        Ok(Some(device))
    }

    /// List the principal's active, unexpired devices.
    pub async fn list(&self, principal_id: &str, now: SystemTime) -> Result<Vec<TrustedDevice>> {
        Ok(self
            .store
            .active_devices(principal_id)
            .await?
            .into_iter()
            .filter(|d| !d.is_expired(now))
            .collect())
    }

    /// Revoke a single device owned by the principal.
    pub async fn revoke(&self, principal_id: &str, device_id: &str) -> Result<bool> {
        // Ownership check before touching the record.
        let devices = self.store.active_devices(principal_id).await?;
        if !devices.iter().any(|d| d.id == device_id) {
            return Ok(false);
        }

        let revoked = self.store.deactivate_device(device_id).await?;
        if revoked {
            tracing::info!(
                target: "mfa.trusted_device.revoked",
                principal_id = %principal_id,
                device_id = %device_id,
                "trusted device revoked"
            );
        }
        Ok(revoked)
    }

    /// Revoke every device for a principal.
    pub async fn revoke_all(&self, principal_id: &str) -> Result<usize> {
        let count = self.store.deactivate_all_devices(principal_id).await?;
        tracing::warn!(
            target: "mfa.trusted_device.revoke_all",
            principal_id = %principal_id,
            count,
            "all trusted devices revoked"
        );
        Ok(count)
    }

    /// Remove expired device records.
    pub async fn cleanup_expired(&self, now: SystemTime) -> Result<usize> {
        let count = self.store.delete_expired_devices(now).await?;
        if count > 0 {
            tracing::info!(
                target: "mfa.trusted_device.cleanup",
                count,
                "expired trusted devices cleaned up"
            );
        }
        Ok(count)
    }
}

/// SHA-256 hex of a raw token.
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parse a user agent string into a friendly device name.
fn parse_device_name(ua: &str) -> String {
    let browser = if ua.contains("Chrome") && !ua.contains("Edg") {
        "Chrome"
    } else if ua.contains("Firefox") {
        "Firefox"
    } else if ua.contains("Safari") && !ua.contains("Chrome") {
        "Safari"
    } else if ua.contains("Edg") {
        "Edge"
    } else {
        "Browser"
    };

    // iPhone/iPad report Mac-like strings, so check iOS first.
    let os = if ua.contains("iPhone") || ua.contains("iPad") {
        "iOS"
    } else if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Unknown"
    };

    format!("{} on {}", browser, os)
}

/// Truncate a string to a maximum length at a UTF-8 boundary.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    const DAY: Duration = Duration::from_secs(86_400);

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(11)
    }

    fn manager(ttl_days: u64, max: usize) -> TrustedDeviceManager<MemoryStore> {
        TrustedDeviceManager::new(MemoryStore::new(), DAY * ttl_days as u32, max)
    }

    #[tokio::test]
    async fn test_issue_and_validate() {
        let manager = manager(30, 10);
        let now = SystemTime::now();
        let mut rng = rng();

        let issued = manager
            .issue("user-1", Some("10.0.0.5"), Some("Mozilla/5.0 Chrome/120"), now, &mut rng)
            .await
            .unwrap();
        assert!(!issued.token.is_empty());
        assert_ne!(issued.token, issued.device.token_hash);

        let device = manager
            .validate("user-1", &issued.token, Some("10.0.0.6"), now)
            .await
            .unwrap();
        assert!(device.is_some());

        // Validation updated the last-seen metadata.
        let listed = manager.list("user-1", now).await.unwrap();
        assert_eq!(listed[0].last_seen_at, Some(now));
        assert_eq!(listed[0].last_address.as_deref(), Some("10.0.0.6"));
    }

    #[tokio::test]
    async fn test_wrong_token_and_wrong_principal_fail() {
        let manager = manager(30, 10);
        let now = SystemTime::now();
        let mut rng = rng();

        let issued = manager
            .issue("user-1", None, None, now, &mut rng)
            .await
            .unwrap();

        assert!(manager
            .validate("user-1", "not-the-token", None, now)
            .await
            .unwrap()
            .is_none());
        assert!(manager
            .validate("user-2", &issued.token, None, now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let manager = manager(30, 10);
        let now = SystemTime::now();
        let mut rng = rng();

        let issued = manager.issue("user-1", None, None, now, &mut rng).await.unwrap();

        // Valid one day before expiry, invalid one day after.
        assert!(manager
            .validate("user-1", &issued.token, None, now + DAY * 29)
            .await
            .unwrap()
            .is_some());
        assert!(manager
            .validate("user-1", &issued.token, None, now + DAY * 31)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cap_evicts_least_recently_seen() {
        let manager = manager(30, 2);
        let now = SystemTime::now();
        let mut rng = rng();

        let first = manager.issue("user-1", None, None, now, &mut rng).await.unwrap();
        let second = manager
            .issue("user-1", None, None, now + Duration::from_secs(1), &mut rng)
            .await
            .unwrap();

        // Touch the first device so the second becomes the eviction target.
        manager
            .validate("user-1", &first.token, None, now + Duration::from_secs(2))
            .await
            .unwrap();

        let third = manager
            .issue("user-1", None, None, now + Duration::from_secs(3), &mut rng)
            .await
            .unwrap();

        let t = now + Duration::from_secs(4);
        assert!(manager.validate("user-1", &first.token, None, t).await.unwrap().is_some());
        assert!(manager.validate("user-1", &second.token, None, t).await.unwrap().is_none());
        assert!(manager.validate("user-1", &third.token, None, t).await.unwrap().is_some());
        assert_eq!(manager.list("user-1", t).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_revoke_and_revoke_all() {
        let manager = manager(30, 10);
        let now = SystemTime::now();
        let mut rng = rng();

        let a = manager.issue("user-1", None, None, now, &mut rng).await.unwrap();
        let b = manager.issue("user-1", None, None, now, &mut rng).await.unwrap();
        let other = manager.issue("user-2", None, None, now, &mut rng).await.unwrap();

        assert!(manager.revoke("user-1", &a.device.id).await.unwrap());
        assert!(manager.validate("user-1", &a.token, None, now).await.unwrap().is_none());
        // Revoking again is a no-op.
        assert!(!manager.revoke("user-1", &a.device.id).await.unwrap());
        // A principal cannot revoke someone else's device.
        assert!(!manager.revoke("user-1", &other.device.id).await.unwrap());

        assert_eq!(manager.revoke_all("user-1").await.unwrap(), 1);
        assert!(manager.validate("user-1", &b.token, None, now).await.unwrap().is_none());
        assert!(manager.validate("user-2", &other.token, None, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let manager = manager(1, 10);
        let now = SystemTime::now();
        let mut rng = rng();

        manager.issue("user-1", None, None, now, &mut rng).await.unwrap();
        manager.issue("user-2", None, None, now, &mut rng).await.unwrap();

        assert_eq!(manager.cleanup_expired(now).await.unwrap(), 0);
        assert_eq!(manager.cleanup_expired(now + DAY * 2).await.unwrap(), 2);
    }

    #[test]
    fn test_parse_device_name() {
        assert_eq!(
            parse_device_name("Mozilla/5.0 (Macintosh; Intel Mac OS X) Chrome/120"),
            "Chrome on macOS"
        );
        assert_eq!(
            parse_device_name("Mozilla/5.0 (Windows NT 10.0) Firefox/121"),
            "Firefox on Windows"
        );
        assert_eq!(
            parse_device_name("Mozilla/5.0 (iPhone; CPU iPhone OS 17) Safari/605"),
            "Safari on iOS"
        );
    }

    #[test]
    fn test_truncate_respects_utf8_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 45), "short");
    }
}
