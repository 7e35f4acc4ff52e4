//! Append-only audit trail of security-relevant events.
//!
//! Every enrollment, verification, lockout and device action leaves an
//! event. The engine never updates or deletes events; retention is an
//! external concern. Appends are best-effort: a failing audit store is
//! logged loudly but never turns a completed operation into a failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

use crate::error::Result;

/// Auditable MFA actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaAction {
    SetupInitiated,
    SetupCompleted,
    SetupCancelled,
    Verified,
    VerificationFailed,
    Lockout,
    Disabled,
    BackupCodesRegenerated,
    DeviceTrusted,
    DeviceRevoked,
}

impl MfaAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetupInitiated => "setup_initiated",
            Self::SetupCompleted => "setup_completed",
            Self::SetupCancelled => "setup_cancelled",
            Self::Verified => "verified",
            Self::VerificationFailed => "verification_failed",
            Self::Lockout => "lockout",
            Self::Disabled => "disabled",
            Self::BackupCodesRegenerated => "backup_codes_regenerated",
            Self::DeviceTrusted => "device_trusted",
            Self::DeviceRevoked => "device_revoked",
        }
    }
}

impl std::fmt::Display for MfaAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable audit event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub principal_id: String,
    pub action: MfaAction,
    pub address: Option<String>,
    pub user_agent: Option<String>,
    pub details: HashMap<String, String>,
    pub timestamp: SystemTime,
}

impl AuditEvent {
    pub fn new(principal_id: impl Into<String>, action: MfaAction, timestamp: SystemTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            principal_id: principal_id.into(),
            action,
            address: None,
            user_agent: None,
            details: HashMap::new(),
            timestamp,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: Option<impl Into<String>>) -> Self {
        self.address = address.map(Into::into);
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: Option<impl Into<String>>) -> Self {
        self.user_agent = user_agent.map(Into::into);
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Storage seam for the audit trail. Append-only by contract.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append an event.
    async fn append_event(&self, event: &AuditEvent) -> Result<()>;

    /// Events for a principal, oldest first.
    async fn events_for(&self, principal_id: &str) -> Result<Vec<AuditEvent>>;
}

/// Best-effort writer over an [`AuditStore`].
pub struct AuditLog<S: AuditStore> {
    store: S,
}

impl<S: AuditStore> AuditLog<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Append an event, swallowing (but logging) storage failures.
    pub async fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "mfa.audit",
            principal_id = %event.principal_id,
            action = %event.action,
            "audit event"
        );

        if let Err(e) = self.store.append_event(&event).await {
            tracing::error!(
                target: "mfa.audit.append_failed",
                principal_id = %event.principal_id,
                action = %event.action,
                error = %e,
                "failed to persist audit event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_record_appends() {
        let store = MemoryStore::new();
        let log = AuditLog::new(store.clone());
        let now = SystemTime::now();

        log.record(
            AuditEvent::new("42", MfaAction::Verified, now)
                .with_address(Some("10.0.0.5"))
                .with_user_agent(Some("curl/8"))
                .with_detail("method", "totp"),
        )
        .await;
        log.record(AuditEvent::new("42", MfaAction::Lockout, now)).await;
        log.record(AuditEvent::new("7", MfaAction::Disabled, now)).await;

        let events = store.events_for("42").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, MfaAction::Verified);
        assert_eq!(events[0].address.as_deref(), Some("10.0.0.5"));
        assert_eq!(events[0].details.get("method").map(String::as_str), Some("totp"));
        assert_eq!(events[1].action, MfaAction::Lockout);
    }

    #[test]
    fn test_action_names() {
        assert_eq!(MfaAction::SetupInitiated.as_str(), "setup_initiated");
        assert_eq!(MfaAction::VerificationFailed.to_string(), "verification_failed");
    }
}
