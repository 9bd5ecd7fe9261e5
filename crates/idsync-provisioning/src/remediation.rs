//! Remediation queue for failed pull records.
//!
//! With `remediation` enabled on a pull task, every record that ends in a
//! FAILURE outcome is also captured as a [`Remediation`]: the incoming
//! change, the local key when one matched, and the error. An operator or a
//! later job can retry the entry without waiting for the resource to report
//! the object again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::TaskConfig;
use crate::error::StoreError;
use crate::outcome::ProvisioningOutcome;
use crate::record::SyncDelta;
use crate::types::{AnyKind, ResourceOperation};

/// A failed pull record kept for retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remediation {
    /// Entry identifier.
    pub id: Uuid,
    /// Task that produced the entry.
    pub task: String,
    /// Resource the change came from.
    pub resource: String,
    /// User or group.
    pub kind: AnyKind,
    /// Operation that failed.
    pub operation: ResourceOperation,
    /// Identifier of the object on the resource.
    pub remote_name: String,
    /// Local record involved, when one matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_key: Option<Uuid>,
    /// The change as received.
    pub payload: JsonValue,
    /// Root cause of the failure.
    pub error: String,
    /// When the failure happened.
    pub instant: DateTime<Utc>,
}

impl Remediation {
    /// Capture a failed outcome together with the change that caused it.
    pub fn from_failure(task: &TaskConfig, outcome: &ProvisioningOutcome, delta: &SyncDelta) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.name.clone(),
            resource: task.resource.clone(),
            kind: outcome.kind,
            operation: outcome.operation,
            remote_name: delta.uid_value().to_string(),
            local_key: outcome.key,
            payload: serde_json::to_value(delta).unwrap_or(JsonValue::Null),
            error: outcome.message.clone().unwrap_or_default(),
            instant: Utc::now(),
        }
    }
}

/// Where remediation entries are kept between runs.
#[async_trait]
pub trait RemediationStore: Send + Sync {
    /// Append the entries of one run.
    async fn save(&self, entries: &[Remediation]) -> Result<(), StoreError>;
}

/// [`RemediationStore`] held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRemediationStore {
    entries: RwLock<Vec<Remediation>>,
}

impl InMemoryRemediationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every saved entry, oldest first.
    pub async fn entries(&self) -> Vec<Remediation> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl RemediationStore for InMemoryRemediationStore {
    async fn save(&self, entries: &[Remediation]) -> Result<(), StoreError> {
        self.entries.write().await.extend_from_slice(entries);
        Ok(())
    }
}
