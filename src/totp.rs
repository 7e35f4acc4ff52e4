//! TOTP derivation and verification (RFC 6238).
//!
//! Codes are derived in-crate: HMAC-SHA1 over the big-endian time step,
//! dynamic truncation, modulo 10^digits. Callers supply the unix time on
//! every call, so the algorithm has no ambient clock and is deterministic
//! under test.

use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::base32;
use crate::error::{GatekeyError, Result};

type HmacSha1 = Hmac<Sha1>;

/// Length of generated shared secrets in bytes (160 bits, the SHA-1 block).
const SECRET_LENGTH: usize = 20;

/// Decrypted TOTP key material.
///
/// Wiped from memory on drop; intentionally has no `Display` and a redacted
/// `Debug` so it cannot leak into logs.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Draw a fresh secret from a cryptographically secure RNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = vec![0u8; SECRET_LENGTH];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Decode a Base32-encoded secret.
    pub fn from_base32(text: &str) -> Result<Self> {
        let bytes = base32::decode(text)
            .map_err(|e| GatekeyError::invalid_secret(e.to_string()))?;
        if bytes.is_empty() {
            return Err(GatekeyError::invalid_secret("secret is empty"));
        }
        Ok(Self(bytes))
    }

    /// Encode for display in an authenticator enrollment step.
    pub fn to_base32(&self) -> String {
        base32::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretBytes(..)")
    }
}

/// TOTP code derivation parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TotpAlgorithm {
    /// Number of digits in a code (default: 6).
    digits: u32,
    /// Time step in seconds (default: 30).
    step: u64,
    /// Accepted drift in steps either side of now (default: 1, i.e. ±30s).
    ///
    /// Widening this increases replay tolerance; don't raise it without a
    /// matching review of the threat model.
    window: i64,
}

impl Default for TotpAlgorithm {
    fn default() -> Self {
        Self {
            digits: 6,
            step: 30,
            window: 1,
        }
    }
}

impl TotpAlgorithm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the accepted drift window in steps.
    #[must_use]
    pub fn window(mut self, window: u32) -> Self {
        self.window = i64::from(window);
        self
    }

    /// Generate the code for the step containing `unix_time`.
    pub fn generate(&self, secret: &SecretBytes, unix_time: u64) -> String {
        self.generate_at_step(secret, unix_time / self.step)
    }

    /// Verify a candidate code against the drift window around `unix_time`.
    ///
    /// The candidate is normalized (spaces and dashes stripped) and rejected
    /// outright unless it is exactly `digits` digits; malformed input is a
    /// plain `false`, never an error, so callers treat all rejections alike.
    /// Comparison is constant-time per window slot.
    pub fn verify(&self, secret: &SecretBytes, candidate: &str, unix_time: u64) -> bool {
        let candidate = candidate.replace([' ', '-'], "");
        if candidate.len() != self.digits as usize
            || !candidate.bytes().all(|b| b.is_ascii_digit())
        {
            return false;
        }

        let base_step = (unix_time / self.step) as i64;
        let mut matched = false;
        for offset in -self.window..=self.window {
            let step = base_step + offset;
            if step < 0 {
                continue;
            }
            let expected = self.generate_at_step(secret, step as u64);
            // No early exit: every slot is compared in constant time.
            matched |= bool::from(expected.as_bytes().ct_eq(candidate.as_bytes()));
        }
        matched
    }

    /// Build the `otpauth://` provisioning URI for authenticator apps.
    pub fn provisioning_uri(&self, secret: &SecretBytes, issuer: &str, account: &str) -> String {
        format!(
            "otpauth://totp/{}:{}?secret={}&issuer={}&digits={}&period={}",
            urlencoding::encode(issuer),
            urlencoding::encode(account),
            secret.to_base32(),
            urlencoding::encode(issuer),
            self.digits,
            self.step
        )
    }

    fn generate_at_step(&self, secret: &SecretBytes, step: u64) -> String {
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(&step.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        // Dynamic truncation (RFC 4226 §5.3): low nibble of the last byte
        // selects a 4-byte slice, whose high bit is cleared.
        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        let binary = (u32::from(digest[offset]) & 0x7f) << 24
            | u32::from(digest[offset + 1]) << 16
            | u32::from(digest[offset + 2]) << 8
            | u32::from(digest[offset + 3]);

        let code = binary % 10u32.pow(self.digits);
        format!("{:0width$}", code, width = self.digits as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha1_test_secret() -> SecretBytes {
        // RFC 6238 reference key: ASCII "12345678901234567890"
        SecretBytes::from(b"12345678901234567890".to_vec())
    }

    #[test]
    fn test_rfc6238_reference_vectors() {
        // Truncated to 6 digits from the RFC's 8-digit test table.
        let totp = TotpAlgorithm::new();
        let secret = sha1_test_secret();

        assert_eq!(totp.generate(&secret, 59), "287082");
        assert_eq!(totp.generate(&secret, 1_111_111_109), "081804");
        assert_eq!(totp.generate(&secret, 1_234_567_890), "005924");
        assert_eq!(totp.generate(&secret, 2_000_000_000), "279037");
    }

    #[test]
    fn test_generate_is_stable() {
        let totp = TotpAlgorithm::new();
        let secret = sha1_test_secret();
        assert_eq!(totp.generate(&secret, 59), totp.generate(&secret, 59));
        // Same 30-second step, same code.
        assert_eq!(totp.generate(&secret, 30), totp.generate(&secret, 59));
    }

    #[test]
    fn test_verify_own_codes() {
        let totp = TotpAlgorithm::new();
        let secret = sha1_test_secret();
        for t in [59u64, 1_111_111_109, 1_234_567_890] {
            let code = totp.generate(&secret, t);
            assert!(totp.verify(&secret, &code, t));
        }
    }

    #[test]
    fn test_verify_tolerates_one_step_of_drift() {
        let totp = TotpAlgorithm::new();
        let secret = sha1_test_secret();
        let t = 1_234_567_890u64;
        let code = totp.generate(&secret, t);

        assert!(totp.verify(&secret, &code, t + 30));
        assert!(totp.verify(&secret, &code, t.saturating_sub(30)));
    }

    #[test]
    fn test_verify_rejects_beyond_window() {
        let totp = TotpAlgorithm::new();
        let secret = sha1_test_secret();
        let t = 1_234_567_890u64;
        let code = totp.generate(&secret, t);

        // Exactly window+1 steps away must fail.
        assert!(!totp.verify(&secret, &code, t + 60));
        assert!(!totp.verify(&secret, &code, t - 60));
    }

    #[test]
    fn test_widened_window_extends_the_boundary() {
        let totp = TotpAlgorithm::new().window(2);
        let secret = sha1_test_secret();
        let t = 1_234_567_890u64;
        let code = totp.generate(&secret, t);

        // Two steps of drift pass, three still fail.
        assert!(totp.verify(&secret, &code, t + 60));
        assert!(totp.verify(&secret, &code, t - 60));
        assert!(!totp.verify(&secret, &code, t + 90));
        assert!(!totp.verify(&secret, &code, t - 90));
    }

    #[test]
    fn test_verify_normalizes_spaces_and_dashes() {
        let totp = TotpAlgorithm::new();
        let secret = sha1_test_secret();
        let code = totp.generate(&secret, 59); // "287082"
        assert!(totp.verify(&secret, "287 082", 59));
        assert!(totp.verify(&secret, "287-082", 59));
    }

    #[test]
    fn test_verify_rejects_malformed_candidates() {
        let totp = TotpAlgorithm::new();
        let secret = sha1_test_secret();
        assert!(!totp.verify(&secret, "", 59));
        assert!(!totp.verify(&secret, "28708", 59));
        assert!(!totp.verify(&secret, "2870822", 59));
        assert!(!totp.verify(&secret, "28708a", 59));
    }

    #[test]
    fn test_secret_base32_round_trip() {
        let mut rng = rand::rngs::OsRng;
        let secret = SecretBytes::generate(&mut rng);
        let encoded = secret.to_base32();
        let decoded = SecretBytes::from_base32(&encoded).unwrap();
        assert_eq!(secret.as_bytes(), decoded.as_bytes());
    }

    #[test]
    fn test_malformed_secret_is_an_error() {
        assert!(matches!(
            SecretBytes::from_base32("not base32!"),
            Err(GatekeyError::InvalidSecret(_))
        ));
        assert!(matches!(
            SecretBytes::from_base32(""),
            Err(GatekeyError::InvalidSecret(_))
        ));
    }

    #[test]
    fn test_provisioning_uri() {
        let totp = TotpAlgorithm::new();
        let secret = SecretBytes::from_base32("JBSWY3DPEHPK3PXP").unwrap();
        let uri = totp.provisioning_uri(&secret, "Acme", "user@example.com");

        assert!(uri.starts_with("otpauth://totp/Acme:user%40example.com?"));
        assert!(uri.contains("secret=JBSWY3DPEHPK3PXP"));
        assert!(uri.contains("issuer=Acme"));
        assert!(uri.contains("digits=6"));
        assert!(uri.contains("period=30"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let secret = sha1_test_secret();
        assert_eq!(format!("{:?}", secret), "SecretBytes(..)");
    }
}
