//! MFA engine orchestration.
//!
//! [`MfaEngine`] is the only surface external callers talk to. It is
//! stateless over storage: every call loads what it needs, applies the
//! policies, commits, and audits. Clock and randomness are supplied by the
//! caller on each operation, so behavior is fully deterministic under test.

use rand::{CryptoRng, RngCore};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::audit::{AuditEvent, AuditLog, AuditStore, MfaAction};
use crate::backup::{BackupCodeGenerator, BackupCodeStore};
use crate::config::MfaConfig;
use crate::error::{GatekeyError, Result};
use crate::lockout::LockoutPolicy;
use crate::profile::{MfaProfile, MfaStatus, ProfileStore};
use crate::totp::{SecretBytes, TotpAlgorithm};
use crate::trusted_device::{TrustIssuance, TrustedDevice, TrustedDeviceManager, TrustedDeviceStore};
use crate::vault::SecretVault;
use crate::whitelist::{IpWhitelistPolicy, WhitelistStore};

/// Combined storage seam the engine runs over.
///
/// Blanket-implemented for any type providing all five stores; implement
/// the individual traits on your backend and this comes for free.
pub trait MfaStore:
    ProfileStore + BackupCodeStore + TrustedDeviceStore + WhitelistStore + AuditStore
{
}

impl<T> MfaStore for T where
    T: ProfileStore + BackupCodeStore + TrustedDeviceStore + WhitelistStore + AuditStore
{
}

/// Request-scoped inputs to a verification or issuance call.
#[derive(Clone, Debug)]
pub struct VerificationContext {
    /// Source address of the request.
    pub address: Option<String>,
    /// User agent of the request.
    pub user_agent: Option<String>,
    /// Wall-clock time of the request.
    pub now: SystemTime,
}

impl VerificationContext {
    pub fn new(now: SystemTime) -> Self {
        Self {
            address: None,
            user_agent: None,
            now,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// The credential a caller is presenting.
#[derive(Clone, Debug)]
pub enum Credential {
    /// A 6-digit authenticator code.
    Totp(String),
    /// A one-time recovery code.
    BackupCode(String),
}

/// How a successful verification was satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifiedMethod {
    Totp,
    BackupCode,
    IpWhitelist,
}

impl VerifiedMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::BackupCode => "backup_code",
            Self::IpWhitelist => "ip_whitelist",
        }
    }
}

/// Result of a successful verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// A credential was checked and passed.
    Passed { method: VerifiedMethod },
    /// The source address was whitelisted; no credential was checked.
    Bypassed,
}

impl VerificationOutcome {
    /// Whether a backup code was spent on this verification.
    pub fn used_backup_code(&self) -> bool {
        matches!(
            self,
            Self::Passed {
                method: VerifiedMethod::BackupCode
            }
        )
    }
}

/// Material returned from `begin_enrollment` for the caller to display.
#[derive(Clone, Debug)]
pub struct EnrollmentSetup {
    /// Base32-encoded secret for manual entry.
    pub secret: String,
    /// `otpauth://` URI for QR rendering.
    pub uri: String,
}

/// The multi-factor authentication engine.
pub struct MfaEngine<S: MfaStore + Clone, V: SecretVault> {
    store: S,
    vault: V,
    config: MfaConfig,
    totp: TotpAlgorithm,
    lockout: LockoutPolicy,
    devices: TrustedDeviceManager<S>,
    whitelist: IpWhitelistPolicy<S>,
    audit: AuditLog<S>,
    backup: BackupCodeGenerator,
}

impl<S: MfaStore + Clone, V: SecretVault> MfaEngine<S, V> {
    /// Create an engine over a store backend and secret vault.
    pub fn new(store: S, vault: V, config: MfaConfig) -> Self {
        Self {
            lockout: LockoutPolicy::new(config.max_failed_attempts, config.lockout_duration),
            devices: TrustedDeviceManager::new(
                store.clone(),
                config.trusted_device_ttl,
                config.max_trusted_devices,
            ),
            whitelist: IpWhitelistPolicy::new(store.clone()),
            audit: AuditLog::new(store.clone()),
            totp: TotpAlgorithm::new(),
            backup: BackupCodeGenerator::new(),
            store,
            vault,
            config,
        }
    }

    /// Current enrollment status for a principal.
    pub async fn status(&self, principal_id: &str) -> Result<MfaStatus> {
        Ok(self
            .store
            .find_profile(principal_id)
            .await?
            .map(|p| p.status())
            .unwrap_or(MfaStatus::Disabled))
    }

    /// Start (or restart) TOTP enrollment.
    ///
    /// Generates a fresh secret, seals it, and stores a pending profile,
    /// overwriting any stale pending secret. Re-running enrollment for an
    /// already-enabled principal resets it to pending until confirmed.
    pub async fn begin_enrollment<R: RngCore + CryptoRng>(
        &self,
        principal_id: &str,
        now: SystemTime,
        rng: &mut R,
    ) -> Result<EnrollmentSetup> {
        let secret = SecretBytes::generate(rng);
        let sealed = self.vault.seal(&secret)?;

        let mut profile = MfaProfile::pending(principal_id, sealed);
        if let Some(existing) = self.store.find_profile(principal_id).await? {
            profile.recovery_email = existing.recovery_email;
        }
        self.store.upsert_profile(&profile).await?;

        self.audit
            .record(AuditEvent::new(principal_id, MfaAction::SetupInitiated, now))
            .await;

        Ok(EnrollmentSetup {
            uri: self
                .totp
                .provisioning_uri(&secret, &self.config.issuer, principal_id),
            secret: secret.to_base32(),
        })
    }

    /// Confirm enrollment with a live code from the authenticator.
    ///
    /// On success the profile flips to enabled+verified and a fresh batch
    /// of backup codes is installed; the plaintext codes are returned
    /// exactly once for display.
    pub async fn confirm_enrollment<R: RngCore + CryptoRng>(
        &self,
        principal_id: &str,
        submitted_code: &str,
        ctx: &VerificationContext,
        rng: &mut R,
    ) -> Result<Vec<String>> {
        let mut profile = self
            .store
            .find_profile(principal_id)
            .await?
            .ok_or(GatekeyError::NoPendingSecret)?;
        if profile.verified {
            return Err(GatekeyError::NoPendingSecret);
        }
        let sealed = profile
            .secret
            .as_deref()
            .ok_or(GatekeyError::NoPendingSecret)?;

        let secret = self.vault.open(sealed)?;
        if !self
            .totp
            .verify(&secret, submitted_code, unix_secs(ctx.now))
        {
            return Err(GatekeyError::InvalidCode);
        }

        let batch =
            self.backup
                .generate_batch(principal_id, self.config.backup_codes_count, rng);
        self.store.replace_codes(principal_id, &batch.records).await?;

        profile.enabled = true;
        profile.verified = true;
        profile.enabled_at = Some(ctx.now);
        self.store.upsert_profile(&profile).await?;

        tracing::info!(
            target: "mfa.enrollment.completed",
            principal_id = %principal_id,
            backup_codes = batch.records.len(),
            "MFA enrollment confirmed"
        );
        self.audit
            .record(
                AuditEvent::new(principal_id, MfaAction::SetupCompleted, ctx.now)
                    .with_address(ctx.address.as_deref())
                    .with_user_agent(ctx.user_agent.as_deref())
                    .with_detail("backup_codes", batch.records.len().to_string()),
            )
            .await;

        Ok(batch.plaintext)
    }

    /// Abandon a pending enrollment. Never touches an enabled profile.
    ///
    /// Clears the pending secret but keeps the profile row, so fields like
    /// the recovery email survive a later re-enrollment. Returns whether a
    /// pending enrollment was actually cleared.
    pub async fn cancel_enrollment(&self, principal_id: &str, now: SystemTime) -> Result<bool> {
        let mut profile = match self.store.find_profile(principal_id).await? {
            Some(p) if !p.enabled && p.secret.is_some() => p,
            _ => return Ok(false),
        };

        profile.secret = None;
        profile.verified = false;
        self.store.upsert_profile(&profile).await?;
        self.audit
            .record(AuditEvent::new(principal_id, MfaAction::SetupCancelled, now))
            .await;
        Ok(true)
    }

    /// Verify a credential for a principal.
    ///
    /// Order of checks: enabled → whitelist bypass → lockout → credential.
    /// Failures while locked are not recorded, so an attacker cannot
    /// inflate the counter during an active lockout.
    pub async fn verify(
        &self,
        principal_id: &str,
        credential: &Credential,
        ctx: &VerificationContext,
    ) -> Result<VerificationOutcome> {
        let profile = self
            .store
            .find_profile(principal_id)
            .await?
            .filter(MfaProfile::is_active)
            .ok_or(GatekeyError::MfaNotEnabled)?;

        if let Some(address) = ctx.address.as_deref() {
            if self
                .whitelist
                .is_bypassed(
                    principal_id,
                    address,
                    self.config.ip_whitelist_enabled,
                    ctx.now,
                )
                .await?
            {
                self.audit
                    .record(
                        AuditEvent::new(principal_id, MfaAction::Verified, ctx.now)
                            .with_address(Some(address))
                            .with_user_agent(ctx.user_agent.as_deref())
                            .with_detail("method", VerifiedMethod::IpWhitelist.as_str()),
                    )
                    .await;
                return Ok(VerificationOutcome::Bypassed);
            }
        }

        if profile.is_locked(ctx.now) {
            let until = profile
                .locked_until
                .unwrap_or(ctx.now + self.config.lockout_duration);
            return Err(GatekeyError::Locked { until });
        }

        let (passed, method) = match credential {
            Credential::Totp(code) => (self.check_totp(&profile, code, ctx)?, VerifiedMethod::Totp),
            Credential::BackupCode(code) => (
                self.consume_backup_code(principal_id, code, ctx).await?,
                VerifiedMethod::BackupCode,
            ),
        };

        if passed {
            self.lockout.record_success(&self.store, principal_id).await?;
            self.store.touch_last_used(principal_id, ctx.now).await?;
            self.audit
                .record(
                    AuditEvent::new(principal_id, MfaAction::Verified, ctx.now)
                        .with_address(ctx.address.as_deref())
                        .with_user_agent(ctx.user_agent.as_deref())
                        .with_detail("method", method.as_str()),
                )
                .await;
            return Ok(VerificationOutcome::Passed { method });
        }

        let record = self
            .lockout
            .record_failure(&self.store, principal_id, ctx.now)
            .await?;
        self.audit
            .record(
                AuditEvent::new(principal_id, MfaAction::VerificationFailed, ctx.now)
                    .with_address(ctx.address.as_deref())
                    .with_user_agent(ctx.user_agent.as_deref())
                    .with_detail("method", method.as_str())
                    .with_detail("attempts", record.attempts.to_string()),
            )
            .await;
        if record.just_locked {
            self.audit
                .record(
                    AuditEvent::new(principal_id, MfaAction::Lockout, ctx.now)
                        .with_address(ctx.address.as_deref())
                        .with_detail("attempts", record.attempts.to_string()),
                )
                .await;
        }

        Err(GatekeyError::InvalidCode)
    }

    /// Attempts remaining before lockout, for caller messaging.
    pub async fn remaining_attempts(&self, principal_id: &str) -> Result<u32> {
        let profile = self
            .store
            .find_profile(principal_id)
            .await?
            .ok_or(GatekeyError::MfaNotEnabled)?;
        Ok(self.lockout.remaining_attempts(profile.failed_attempts))
    }

    /// Disable MFA for a principal.
    ///
    /// Clears the secret, deletes every backup code, revokes every trusted
    /// device, and flips the profile off — all four together; a partial
    /// disable would leave bypass paths standing.
    pub async fn disable(&self, principal_id: &str, ctx: &VerificationContext) -> Result<()> {
        let Some(mut profile) = self.store.find_profile(principal_id).await? else {
            return Ok(());
        };

        profile.secret = None;
        profile.enabled = false;
        profile.verified = false;
        profile.enabled_at = None;
        profile.failed_attempts = 0;
        profile.locked_until = None;
        self.store.upsert_profile(&profile).await?;
        self.store.delete_codes(principal_id).await?;
        let revoked = self.devices.revoke_all(principal_id).await?;

        tracing::info!(
            target: "mfa.disabled",
            principal_id = %principal_id,
            devices_revoked = revoked,
            "MFA disabled"
        );
        self.audit
            .record(
                AuditEvent::new(principal_id, MfaAction::Disabled, ctx.now)
                    .with_address(ctx.address.as_deref())
                    .with_user_agent(ctx.user_agent.as_deref()),
            )
            .await;
        Ok(())
    }

    /// Replace the principal's backup codes with a fresh batch.
    ///
    /// The old set is invalidated atomically; the new plaintext codes are
    /// returned exactly once.
    pub async fn regenerate_backup_codes<R: RngCore + CryptoRng>(
        &self,
        principal_id: &str,
        ctx: &VerificationContext,
        rng: &mut R,
    ) -> Result<Vec<String>> {
        let profile = self
            .store
            .find_profile(principal_id)
            .await?
            .filter(MfaProfile::is_active)
            .ok_or(GatekeyError::MfaNotEnabled)?;

        let batch = self.backup.generate_batch(
            &profile.principal_id,
            self.config.backup_codes_count,
            rng,
        );
        self.store.replace_codes(principal_id, &batch.records).await?;

        self.audit
            .record(
                AuditEvent::new(principal_id, MfaAction::BackupCodesRegenerated, ctx.now)
                    .with_address(ctx.address.as_deref())
                    .with_detail("count", batch.records.len().to_string()),
            )
            .await;

        Ok(batch.plaintext)
    }

    /// Unused backup codes remaining for a principal.
    pub async fn backup_codes_remaining(&self, principal_id: &str) -> Result<usize> {
        self.store.unused_count(principal_id).await
    }

    /// Trust the current device after a successful verification.
    ///
    /// Returns the raw bypass token to hand to the client (e.g. a cookie
    /// value); it is never recoverable from storage afterward.
    pub async fn trust_device<R: RngCore + CryptoRng>(
        &self,
        principal_id: &str,
        ctx: &VerificationContext,
        rng: &mut R,
    ) -> Result<TrustIssuance> {
        self.store
            .find_profile(principal_id)
            .await?
            .filter(MfaProfile::is_active)
            .ok_or(GatekeyError::MfaNotEnabled)?;

        let issuance = self
            .devices
            .issue(
                principal_id,
                ctx.address.as_deref(),
                ctx.user_agent.as_deref(),
                ctx.now,
                rng,
            )
            .await?;

        self.audit
            .record(
                AuditEvent::new(principal_id, MfaAction::DeviceTrusted, ctx.now)
                    .with_address(ctx.address.as_deref())
                    .with_user_agent(ctx.user_agent.as_deref())
                    .with_detail("device_id", issuance.device.id.clone()),
            )
            .await;

        Ok(issuance)
    }

    /// Whether a raw device token lets this principal skip MFA right now.
    pub async fn is_device_trusted(
        &self,
        principal_id: &str,
        raw_token: &str,
        ctx: &VerificationContext,
    ) -> Result<bool> {
        Ok(self
            .devices
            .validate(principal_id, raw_token, ctx.address.as_deref(), ctx.now)
            .await?
            .is_some())
    }

    /// List the principal's active trusted devices.
    pub async fn list_trusted_devices(
        &self,
        principal_id: &str,
        now: SystemTime,
    ) -> Result<Vec<TrustedDevice>> {
        self.devices.list(principal_id, now).await
    }

    /// Revoke a single trusted device.
    pub async fn revoke_device(
        &self,
        principal_id: &str,
        device_id: &str,
        now: SystemTime,
    ) -> Result<bool> {
        let revoked = self.devices.revoke(principal_id, device_id).await?;
        if revoked {
            self.audit
                .record(
                    AuditEvent::new(principal_id, MfaAction::DeviceRevoked, now)
                        .with_detail("device_id", device_id),
                )
                .await;
        }
        Ok(revoked)
    }

    /// Revoke every trusted device for a principal.
    pub async fn revoke_all_devices(&self, principal_id: &str, now: SystemTime) -> Result<usize> {
        let count = self.devices.revoke_all(principal_id).await?;
        if count > 0 {
            self.audit
                .record(
                    AuditEvent::new(principal_id, MfaAction::DeviceRevoked, now)
                        .with_detail("count", count.to_string()),
                )
                .await;
        }
        Ok(count)
    }

    /// The engine's configuration.
    pub fn config(&self) -> &MfaConfig {
        &self.config
    }

    fn check_totp(
        &self,
        profile: &MfaProfile,
        code: &str,
        ctx: &VerificationContext,
    ) -> Result<bool> {
        // An active profile without a secret violates the data invariant.
        let sealed = profile
            .secret
            .as_deref()
            .ok_or_else(|| GatekeyError::invalid_secret("enabled profile has no secret"))?;
        let secret = self.vault.open(sealed)?;
        Ok(self.totp.verify(&secret, code, unix_secs(ctx.now)))
    }

    async fn consume_backup_code(
        &self,
        principal_id: &str,
        candidate: &str,
        ctx: &VerificationContext,
    ) -> Result<bool> {
        let codes = self.store.unused_codes(principal_id).await?;
        let Some(code_id) = self.backup.match_candidate(candidate, &codes) else {
            return Ok(false);
        };
        // The store's test-and-set decides ties between concurrent
        // submissions of the same code.
        self.store
            .mark_code_used(&code_id, ctx.now, ctx.address.as_deref())
            .await
    }
}

/// Seconds since the unix epoch; pre-epoch times clamp to zero.
fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::vault::AesGcmVault;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn engine(config: MfaConfig) -> MfaEngine<MemoryStore, AesGcmVault> {
        MfaEngine::new(MemoryStore::new(), AesGcmVault::new(&[0x42; 32]), config)
    }

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(99)
    }

    #[tokio::test]
    async fn test_verify_requires_enabled_profile() {
        let engine = engine(MfaConfig::new("Acme"));
        let ctx = VerificationContext::new(SystemTime::now());

        let err = engine
            .verify("ghost", &Credential::Totp("123456".into()), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeyError::MfaNotEnabled));

        // A pending (unconfirmed) profile is not enabled either.
        engine
            .begin_enrollment("user-1", ctx.now, &mut rng())
            .await
            .unwrap();
        let err = engine
            .verify("user-1", &Credential::Totp("123456".into()), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeyError::MfaNotEnabled));
    }

    #[tokio::test]
    async fn test_confirm_without_pending_secret() {
        let engine = engine(MfaConfig::new("Acme"));
        let ctx = VerificationContext::new(SystemTime::now());
        let err = engine
            .confirm_enrollment("ghost", "123456", &ctx, &mut rng())
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeyError::NoPendingSecret));
    }

    #[tokio::test]
    async fn test_cancel_enrollment_spares_enabled_profile() {
        let engine = engine(MfaConfig::new("Acme"));
        let now = SystemTime::now();
        let ctx = VerificationContext::new(now);
        let mut rng = rng();

        let setup = engine.begin_enrollment("user-1", now, &mut rng).await.unwrap();
        let secret = SecretBytes::from_base32(&setup.secret).unwrap();
        let code = TotpAlgorithm::new().generate(&secret, unix_secs(now));
        engine
            .confirm_enrollment("user-1", &code, &ctx, &mut rng)
            .await
            .unwrap();

        assert!(!engine.cancel_enrollment("user-1", now).await.unwrap());
        assert_eq!(engine.status("user-1").await.unwrap(), MfaStatus::Enabled);
    }

    #[tokio::test]
    async fn test_cancel_enrollment_keeps_recovery_email() {
        let store = MemoryStore::new();
        let engine = MfaEngine::new(
            store.clone(),
            AesGcmVault::new(&[0x42; 32]),
            MfaConfig::new("Acme"),
        );
        let now = SystemTime::now();
        let mut rng = rng();

        engine.begin_enrollment("user-1", now, &mut rng).await.unwrap();
        let mut profile = store.find_profile("user-1").await.unwrap().unwrap();
        profile.recovery_email = Some("ops@example.com".into());
        store.upsert_profile(&profile).await.unwrap();

        assert!(engine.cancel_enrollment("user-1", now).await.unwrap());

        let profile = store.find_profile("user-1").await.unwrap().unwrap();
        assert!(profile.secret.is_none());
        assert_eq!(profile.recovery_email.as_deref(), Some("ops@example.com"));
        assert_eq!(engine.status("user-1").await.unwrap(), MfaStatus::Disabled);
        // With nothing pending, a second cancel is a no-op.
        assert!(!engine.cancel_enrollment("user-1", now).await.unwrap());

        // A later re-enrollment still carries the email forward.
        engine.begin_enrollment("user-1", now, &mut rng).await.unwrap();
        let profile = store.find_profile("user-1").await.unwrap().unwrap();
        assert_eq!(profile.recovery_email.as_deref(), Some("ops@example.com"));
    }

    #[tokio::test]
    async fn test_begin_enrollment_overwrites_stale_pending_secret() {
        let engine = engine(MfaConfig::new("Acme"));
        let now = SystemTime::now();
        let ctx = VerificationContext::new(now);
        let mut rng = rng();

        let first = engine.begin_enrollment("user-1", now, &mut rng).await.unwrap();
        let second = engine.begin_enrollment("user-1", now, &mut rng).await.unwrap();
        assert_ne!(first.secret, second.secret);

        // A code from the stale secret no longer confirms.
        let stale = SecretBytes::from_base32(&first.secret).unwrap();
        let code = TotpAlgorithm::new().generate(&stale, unix_secs(now));
        let result = engine.confirm_enrollment("user-1", &code, &ctx, &mut rng).await;
        // (The two secrets could in principle collide on one code; the seeds
        // here don't.)
        assert!(matches!(result, Err(GatekeyError::InvalidCode)));
    }

    #[tokio::test]
    async fn test_enrollment_setup_uri_carries_issuer() {
        let engine = engine(MfaConfig::new("Acme"));
        let setup = engine
            .begin_enrollment("user-1", SystemTime::now(), &mut rng())
            .await
            .unwrap();
        assert!(setup.uri.starts_with("otpauth://totp/Acme:user-1?"));
        assert!(setup.uri.contains(&format!("secret={}", setup.secret)));
    }
}
