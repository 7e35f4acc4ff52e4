//! Engine configuration.
//!
//! All security knobs are plain configuration inputs; nothing in the engine
//! hardcodes them. Callers typically load these from their own settings
//! source and hand the finished `MfaConfig` to [`MfaEngine`](crate::MfaEngine).

use std::time::Duration;

/// Default maximum failed attempts before lockout.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default lockout duration (15 minutes).
const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(15 * 60);

/// Default number of backup codes issued at enrollment.
const DEFAULT_BACKUP_CODES: usize = 10;

/// Default trusted-device lifetime (30 days).
const DEFAULT_DEVICE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default maximum trusted devices per principal.
const DEFAULT_MAX_DEVICES: usize = 10;

/// Configuration for the MFA engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MfaConfig {
    /// Issuer name shown in authenticator apps (e.g., "Acme").
    pub issuer: String,
    /// Consecutive failures before the principal is locked out.
    pub max_failed_attempts: u32,
    /// How long a lockout lasts once triggered.
    pub lockout_duration: Duration,
    /// Number of backup codes issued per batch.
    pub backup_codes_count: usize,
    /// How long a trusted-device token stays valid.
    pub trusted_device_ttl: Duration,
    /// Maximum trusted devices per principal; the oldest is evicted beyond this.
    pub max_trusted_devices: usize,
    /// Whether whitelisted addresses bypass MFA entirely.
    pub ip_whitelist_enabled: bool,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            issuer: "App".to_string(),
            max_failed_attempts: DEFAULT_MAX_ATTEMPTS,
            lockout_duration: DEFAULT_LOCKOUT_DURATION,
            backup_codes_count: DEFAULT_BACKUP_CODES,
            trusted_device_ttl: DEFAULT_DEVICE_TTL,
            max_trusted_devices: DEFAULT_MAX_DEVICES,
            ip_whitelist_enabled: false,
        }
    }
}

impl MfaConfig {
    /// Create a config with the given issuer and default settings.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            ..Default::default()
        }
    }

    /// Create a strict config (3 attempts, 30 min lockout, 5 devices).
    #[must_use]
    pub fn strict(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            max_failed_attempts: 3,
            lockout_duration: Duration::from_secs(30 * 60),
            max_trusted_devices: 5,
            ..Default::default()
        }
    }

    /// Set the maximum failed attempts before lockout.
    ///
    /// Note: setting this to 0 locks the account on the first failure.
    #[must_use]
    pub fn max_failed_attempts(mut self, max: u32) -> Self {
        self.max_failed_attempts = max;
        self
    }

    /// Set the lockout duration.
    #[must_use]
    pub fn lockout_duration(mut self, duration: Duration) -> Self {
        self.lockout_duration = duration;
        self
    }

    /// Set the number of backup codes issued per batch.
    #[must_use]
    pub fn backup_codes_count(mut self, count: usize) -> Self {
        self.backup_codes_count = count;
        self
    }

    /// Set the trusted-device lifetime.
    #[must_use]
    pub fn trusted_device_ttl(mut self, ttl: Duration) -> Self {
        self.trusted_device_ttl = ttl;
        self
    }

    /// Set the trusted-device lifetime in days.
    #[must_use]
    pub fn trusted_device_days(mut self, days: u64) -> Self {
        self.trusted_device_ttl = Duration::from_secs(days * 24 * 60 * 60);
        self
    }

    /// Set the maximum trusted devices per principal.
    #[must_use]
    pub fn max_trusted_devices(mut self, max: usize) -> Self {
        self.max_trusted_devices = max;
        self
    }

    /// Enable or disable IP whitelist bypass.
    #[must_use]
    pub fn ip_whitelist_enabled(mut self, enabled: bool) -> Self {
        self.ip_whitelist_enabled = enabled;
        self
    }
}
