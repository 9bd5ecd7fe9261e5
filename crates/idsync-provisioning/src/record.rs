//! External and local identity records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use idsync_connector::prelude::{AttributeSet, ObjectClass, SyncChange, SyncChangeType, Uid};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::AnyKind;

/// Snapshot of an object read from a resource. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRecord {
    /// Identifier on the resource.
    pub uid: Uid,
    /// Identifier before a rename, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_uid: Option<Uid>,
    /// Object class.
    pub object_class: ObjectClass,
    /// Attributes as read from the resource.
    #[serde(default)]
    pub attributes: AttributeSet,
}

impl ExternalRecord {
    /// Create a record from an identifier and attributes.
    pub fn new(uid: Uid, object_class: ObjectClass, attributes: AttributeSet) -> Self {
        Self {
            uid,
            previous_uid: None,
            object_class,
            attributes,
        }
    }

    /// The identifier value to correlate on.
    pub fn correlation_value(&self) -> &str {
        self.previous_uid.as_ref().unwrap_or(&self.uid).value()
    }
}

/// Kind of incoming change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaKind {
    /// The object exists on the resource.
    CreateOrUpdate,
    /// The object was removed from the resource.
    Delete,
}

/// One change to reconcile, from an incremental sync or a full scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDelta {
    /// What happened.
    pub kind: DeltaKind,
    /// The object concerned.
    pub object: ExternalRecord,
    /// Cursor position of the change, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SyncDelta {
    /// Build a delta for an object that exists on the resource.
    pub fn create_or_update(object: ExternalRecord) -> Self {
        Self {
            kind: DeltaKind::CreateOrUpdate,
            object,
            token: None,
        }
    }

    /// Build a delta for a removed object.
    pub fn delete(object: ExternalRecord) -> Self {
        Self {
            kind: DeltaKind::Delete,
            object,
            token: None,
        }
    }

    /// Identifier value used in logs and reports.
    pub fn uid_value(&self) -> &str {
        self.object.uid.value()
    }
}

impl From<SyncChange> for SyncDelta {
    fn from(change: SyncChange) -> Self {
        let kind = match change.change_type {
            SyncChangeType::Create | SyncChangeType::Update => DeltaKind::CreateOrUpdate,
            SyncChangeType::Delete => DeltaKind::Delete,
        };
        Self {
            kind,
            object: ExternalRecord {
                uid: change.uid,
                previous_uid: change.previous_uid,
                object_class: change.object_class,
                attributes: change.attributes.unwrap_or_default(),
            },
            token: change.token,
        }
    }
}

/// An identity record held by the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Stable key.
    pub key: Uuid,
    /// User or group.
    pub kind: AnyKind,
    /// Unique name within the kind.
    pub name: String,
    /// Local attributes.
    #[serde(default)]
    pub attributes: AttributeSet,
    /// Resources the record is linked to. Propagation targets these.
    #[serde(default)]
    pub resources: BTreeSet<String>,
    /// Whether the record is suspended.
    #[serde(default)]
    pub suspended: bool,
    /// Member user keys (groups only).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub members: BTreeSet<Uuid>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl LocalRecord {
    /// Create a new record with a fresh key.
    pub fn new(kind: AnyKind, name: impl Into<String>) -> Self {
        Self {
            key: Uuid::new_v4(),
            kind,
            name: name.into(),
            attributes: AttributeSet::new(),
            resources: BTreeSet::new(),
            suspended: false,
            members: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// Set attributes using builder pattern.
    #[must_use]
    pub fn with_attributes(mut self, attributes: AttributeSet) -> Self {
        self.attributes = attributes;
        self
    }

    /// Link a resource using builder pattern.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.insert(resource.into());
        self
    }

    /// Whether the record is linked to `resource`.
    pub fn is_linked(&self, resource: &str) -> bool {
        self.resources.contains(resource)
    }

    /// Value of an internal attribute; `name` resolves to the record name.
    pub fn internal_value(&self, attribute: &str) -> Option<String> {
        if attribute == NAME_ATTRIBUTE {
            return Some(self.name.clone());
        }
        self.attributes.get(attribute).and_then(|v| v.to_text())
    }
}

/// Pseudo attribute addressing [`LocalRecord::name`] in mappings.
pub const NAME_ATTRIBUTE: &str = "name";

/// Outcome of correlating an external record with local records.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    /// No local record correlates.
    Unmatched,
    /// One or more local records correlate.
    Matched(Vec<LocalRecord>),
}

impl MatchResult {
    /// Whether at least one local record matched.
    pub fn is_found(&self) -> bool {
        matches!(self, MatchResult::Matched(m) if !m.is_empty())
    }
}

impl From<Vec<LocalRecord>> for MatchResult {
    fn from(records: Vec<LocalRecord>) -> Self {
        if records.is_empty() {
            MatchResult::Unmatched
        } else {
            MatchResult::Matched(records)
        }
    }
}
