//! One-time backup codes for account recovery.
//!
//! Codes are two independently drawn 4-digit groups (`NNNN-NNNN`), produced
//! from a caller-supplied CSPRNG. Only a one-way hash is ever stored; the
//! plaintext batch is returned exactly once for display.

use async_trait::async_trait;
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::SystemTime;
use subtle::ConstantTimeEq;

use crate::error::Result;

/// A stored backup code. Holds only the hash, never the plaintext.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupCode {
    pub id: String,
    pub principal_id: String,
    pub code_hash: String,
    pub used: bool,
    pub used_at: Option<SystemTime>,
    pub used_from_address: Option<String>,
}

/// A freshly generated batch: plaintext for one-time display, records for
/// storage. The two vectors are index-aligned.
pub struct GeneratedCodes {
    pub plaintext: Vec<String>,
    pub records: Vec<BackupCode>,
}

/// Generates and matches backup codes.
#[derive(Clone, Debug, Default)]
pub struct BackupCodeGenerator;

impl BackupCodeGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate a batch of `count` codes for a principal.
    pub fn generate_batch<R: RngCore + CryptoRng>(
        &self,
        principal_id: &str,
        count: usize,
        rng: &mut R,
    ) -> GeneratedCodes {
        let mut plaintext = Vec::with_capacity(count);
        let mut records = Vec::with_capacity(count);

        for _ in 0..count {
            let code = format!(
                "{:04}-{:04}",
                rng.gen_range(0..10_000u32),
                rng.gen_range(0..10_000u32)
            );
            records.push(BackupCode {
                id: uuid::Uuid::new_v4().to_string(),
                principal_id: principal_id.to_string(),
                code_hash: hash_code(&code),
                used: false,
                used_at: None,
                used_from_address: None,
            });
            plaintext.push(code);
        }

        GeneratedCodes { plaintext, records }
    }

    /// Find the stored code matching a candidate, comparing hashes in
    /// constant time. Returns the matching code's id.
    pub fn match_candidate(&self, candidate: &str, codes: &[BackupCode]) -> Option<String> {
        let candidate_hash = hash_code(candidate);
        let mut matched = None;
        for code in codes {
            if bool::from(code.code_hash.as_bytes().ct_eq(candidate_hash.as_bytes())) {
                matched.get_or_insert_with(|| code.id.clone());
            }
        }
        matched
    }
}

/// One-way hash of a backup code over its normalized (digits-only) form,
/// so `1234-5678` and `12345678` hash identically.
pub fn hash_code(code: &str) -> String {
    let normalized: String = code.chars().filter(char::is_ascii_digit).collect();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Storage seam for backup codes.
///
/// `replace_codes` must be transactional: after it returns, the principal
/// has either the complete old set or the complete new set, never a mix and
/// never an empty window. `mark_code_used` must be an atomic test-and-set on
/// the `used` flag so two concurrent submissions cannot both consume the
/// same code.
#[async_trait]
pub trait BackupCodeStore: Send + Sync {
    /// Atomically delete the principal's existing codes and insert `codes`.
    async fn replace_codes(&self, principal_id: &str, codes: &[BackupCode]) -> Result<()>;

    /// Fetch the principal's unused codes.
    async fn unused_codes(&self, principal_id: &str) -> Result<Vec<BackupCode>>;

    /// Mark a code used iff it is currently unused. Returns `false` when the
    /// code was already consumed (e.g. a lost race).
    async fn mark_code_used(
        &self,
        code_id: &str,
        at: SystemTime,
        address: Option<&str>,
    ) -> Result<bool>;

    /// Delete all codes for a principal. Idempotent.
    async fn delete_codes(&self, principal_id: &str) -> Result<()>;

    /// Count of unused codes remaining.
    async fn unused_count(&self, principal_id: &str) -> Result<usize> {
        Ok(self.unused_codes(principal_id).await?.len())
    }
}
