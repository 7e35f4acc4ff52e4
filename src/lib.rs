//! Gatekey - a multi-factor authentication engine
//!
//! Gatekey implements the full second-factor lifecycle — TOTP enrollment,
//! verification with drift tolerance, one-time backup codes, failure
//! lockout, trusted-device bypass tokens, and IP whitelisting — behind
//! pluggable storage traits, so it drops into any application regardless
//! of database.
//!
//! # Features
//!
//! - **TOTP**: RFC 6238 codes derived in-crate (HMAC-SHA1, 6 digits, 30s
//!   steps, ±1 step drift window)
//! - **Backup codes**: `NNNN-NNNN` one-time recovery codes, hashed at rest
//! - **Lockout**: consecutive-failure counter with timed lockout
//! - **Trusted devices**: hashed bypass tokens with TTL and a per-principal cap
//! - **IP whitelist**: optional per-principal address bypass
//! - **Audit**: append-only, best-effort event trail
//! - **Storage-agnostic**: implement the store traits over your database;
//!   an in-memory backend ships for tests and small deployments
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use gatekey::{Credential, MemoryStore, MfaConfig, MfaEngine, AesGcmVault, VerificationContext};
//! use std::time::SystemTime;
//!
//! #[tokio::main]
//! async fn main() -> gatekey::Result<()> {
//!     gatekey::init_tracing();
//!
//!     let engine = MfaEngine::new(
//!         MemoryStore::new(),
//!         AesGcmVault::new(&[0u8; 32]), // load a real key in production
//!         MfaConfig::new("Acme"),
//!     );
//!
//!     let mut rng = rand::rngs::OsRng;
//!     let now = SystemTime::now();
//!
//!     // Enrollment: show `setup.uri` as a QR code, then confirm with a
//!     // live code from the authenticator.
//!     let setup = engine.begin_enrollment("user-1", now, &mut rng).await?;
//!     println!("scan: {}", setup.uri);
//!
//!     // Later: verify a code at login.
//!     let ctx = VerificationContext::new(SystemTime::now()).with_address("10.0.0.5");
//!     let outcome = engine
//!         .verify("user-1", &Credential::Totp("123456".into()), &ctx)
//!         .await?;
//!     println!("verified via {:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod backup;
pub mod base32;
mod config;
pub mod engine;
mod error;
pub mod lockout;
mod memory;
pub mod profile;
pub mod totp;
pub mod trusted_device;
pub mod vault;
pub mod whitelist;

// Re-exports for public API
pub use audit::{AuditEvent, AuditLog, AuditStore, MfaAction};
pub use backup::{BackupCode, BackupCodeGenerator, BackupCodeStore, GeneratedCodes};
pub use config::MfaConfig;
pub use engine::{
    Credential, EnrollmentSetup, MfaEngine, MfaStore, VerificationContext, VerificationOutcome,
    VerifiedMethod,
};
pub use error::{GatekeyError, Result};
pub use lockout::{FailureRecord, LockoutPolicy};
pub use memory::MemoryStore;
pub use profile::{MfaMethod, MfaProfile, MfaStatus, ProfileStore};
pub use totp::{SecretBytes, TotpAlgorithm};
pub use trusted_device::{
    TrustIssuance, TrustedDevice, TrustedDeviceManager, TrustedDeviceStore,
};
pub use vault::{AesGcmVault, SecretVault};
pub use whitelist::{IpWhitelistPolicy, WhitelistEntry, WhitelistStore};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults
///
/// Call this early in your application, typically in main() before
/// constructing the engine.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "gatekey=debug")
/// - `GATEKEY_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("GATEKEY_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
