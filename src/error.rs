use std::time::SystemTime;

/// The main error type for gatekey operations.
///
/// `InvalidCode` and `Locked` are expected, user-facing outcomes: callers
/// should match on them and translate them into their own messaging rather
/// than treat them as faults. `Storage` wraps whatever the persistence
/// collaborator returned, unchanged; gatekey performs no retries itself.
#[derive(Debug, thiserror::Error)]
pub enum GatekeyError {
    /// A secret could not be decoded or decrypted into usable key material.
    #[error("invalid secret: {0}")]
    InvalidSecret(String),

    /// Input contained a character outside the RFC 4648 Base32 alphabet.
    #[error("invalid base32 character: {0:?}")]
    InvalidAlphabet(char),

    /// Enrollment confirmation was attempted with no pending secret on file.
    #[error("no pending enrollment for this principal")]
    NoPendingSecret,

    /// The supplied TOTP or backup code did not verify.
    #[error("invalid verification code")]
    InvalidCode,

    /// MFA is not enabled (or not yet verified) for this principal.
    #[error("MFA is not enabled for this principal")]
    MfaNotEnabled,

    /// Too many consecutive failures; verification is suspended.
    #[error("account locked until {until:?}")]
    Locked { until: SystemTime },

    /// The secret vault failed to seal or open key material.
    #[error("secret vault failure: {0}")]
    Vault(String),

    /// The persistence collaborator failed.
    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl GatekeyError {
    pub fn invalid_secret(msg: impl Into<String>) -> Self {
        Self::InvalidSecret(msg.into())
    }

    pub fn vault(msg: impl Into<String>) -> Self {
        Self::Vault(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(anyhow::anyhow!(msg.into()))
    }

    /// Whether this error is an expected business outcome rather than a fault.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::InvalidCode | Self::Locked { .. } | Self::MfaNotEnabled | Self::NoPendingSecret
        )
    }
}

/// Result type alias used throughout gatekey.
pub type Result<T> = std::result::Result<T, GatekeyError>;
