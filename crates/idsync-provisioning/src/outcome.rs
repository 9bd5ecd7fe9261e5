//! Per-record outcomes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AnyKind, OutcomeStatus, ResourceOperation};

/// Result of processing one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningOutcome {
    /// Local record key, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Uuid>,
    /// Identifier on the resource, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Record name.
    pub name: String,
    /// User or group.
    pub kind: AnyKind,
    /// Operation performed, or that would have been.
    pub operation: ResourceOperation,
    /// Result status.
    pub status: OutcomeStatus,
    /// Failure or skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProvisioningOutcome {
    /// Create a SUCCESS outcome.
    pub fn success(kind: AnyKind, operation: ResourceOperation, name: impl Into<String>) -> Self {
        Self {
            key: None,
            uid: None,
            name: name.into(),
            kind,
            operation,
            status: OutcomeStatus::Success,
            message: None,
        }
    }

    /// Set the local key.
    #[must_use]
    pub fn with_key(mut self, key: Uuid) -> Self {
        self.key = Some(key);
        self
    }

    /// Set the resource identifier.
    #[must_use]
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Replace the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach an informational message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Mark as FAILURE with a message.
    #[must_use]
    pub fn into_failure(mut self, message: impl Into<String>) -> Self {
        self.status = OutcomeStatus::Failure;
        self.message = Some(message.into());
        self
    }

    /// Mark as IGNORE with a message.
    #[must_use]
    pub fn into_ignored(mut self, message: impl Into<String>) -> Self {
        self.status = OutcomeStatus::Ignore;
        self.message = Some(message.into());
        self
    }

    /// Identifier shown in reports: the local key, else the resource uid.
    pub fn display_id(&self) -> String {
        match (&self.key, &self.uid) {
            (Some(key), _) => key.to_string(),
            (None, Some(uid)) => uid.clone(),
            (None, None) => "-".to_string(),
        }
    }

    /// Whether the outcome is a failure.
    pub fn is_failure(&self) -> bool {
        self.status == OutcomeStatus::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let key = Uuid::new_v4();
        let outcome = ProvisioningOutcome::success(AnyKind::User, ResourceOperation::Update, "jdoe")
            .with_key(key)
            .into_failure("boom");
        assert!(outcome.is_failure());
        assert_eq!(outcome.message.as_deref(), Some("boom"));
        assert_eq!(outcome.display_id(), key.to_string());
    }

    #[test]
    fn test_display_id_falls_back_to_uid() {
        let outcome = ProvisioningOutcome::success(AnyKind::User, ResourceOperation::Create, "jdoe")
            .with_uid("uid-1");
        assert_eq!(outcome.display_id(), "uid-1");
        let bare = ProvisioningOutcome::success(AnyKind::Group, ResourceOperation::None, "g");
        assert_eq!(bare.display_id(), "-");
    }
}
