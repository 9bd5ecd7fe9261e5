//! Connector capability traits
//!
//! One trait per capability (create, update, delete, search, incremental
//! sync). The engine only sees resources through these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorResult;
use crate::operation::{AttributeDelta, AttributeSet, Filter, PageRequest, SearchResult, Uid};
use crate::types::ObjectClass;

/// A connected resource.
///
/// Writes and reads are split into capability traits; a task needs every
/// one of them, see [`FullConnector`].
pub trait Connector: Send + Sync {
    /// Name used in logs.
    fn display_name(&self) -> &str;
}

/// Capability for creating objects on the resource.
#[async_trait]
pub trait CreateOp: Connector {
    /// Create an object and return its uid.
    async fn create(
        &self,
        object_class: ObjectClass,
        attributes: AttributeSet,
    ) -> ConnectorResult<Uid>;
}

/// Capability for updating objects on the resource.
#[async_trait]
pub trait UpdateOp: Connector {
    /// Modify an existing object and return its uid, which changes when the
    /// delta renames the object.
    async fn update(
        &self,
        object_class: ObjectClass,
        uid: &Uid,
        changes: AttributeDelta,
    ) -> ConnectorResult<Uid>;
}

/// Capability for deleting objects from the resource.
#[async_trait]
pub trait DeleteOp: Connector {
    async fn delete(&self, object_class: ObjectClass, uid: &Uid) -> ConnectorResult<()>;
}

/// Capability for searching objects on the resource.
#[async_trait]
pub trait SearchOp: Connector {
    /// Objects of a class matching `filter` (every object when `None`).
    async fn search(
        &self,
        object_class: ObjectClass,
        filter: Option<Filter>,
        page_request: Option<PageRequest>,
    ) -> ConnectorResult<SearchResult>;

    /// The object with the given uid, if any.
    async fn get(
        &self,
        object_class: ObjectClass,
        uid: &Uid,
    ) -> ConnectorResult<Option<AttributeSet>> {
        let filter = Filter::equals(uid.attribute_name(), uid.value());
        let result = self.search(object_class, Some(filter), None).await?;
        Ok(result.objects.into_iter().next())
    }
}

/// One entry of a resource's change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncChange {
    pub uid: Uid,
    /// Uid before a rename, when the resource reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_uid: Option<Uid>,
    pub change_type: SyncChangeType,
    pub object_class: ObjectClass,
    /// Object state after the change; absent for deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<AttributeSet>,
    /// Token to resume after this change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SyncChange {
    pub fn created(uid: Uid, object_class: ObjectClass, attributes: AttributeSet) -> Self {
        Self::with_type(uid, SyncChangeType::Create, object_class, Some(attributes))
    }

    pub fn updated(uid: Uid, object_class: ObjectClass, attributes: AttributeSet) -> Self {
        Self::with_type(uid, SyncChangeType::Update, object_class, Some(attributes))
    }

    pub fn deleted(uid: Uid, object_class: ObjectClass) -> Self {
        Self::with_type(uid, SyncChangeType::Delete, object_class, None)
    }

    fn with_type(
        uid: Uid,
        change_type: SyncChangeType,
        object_class: ObjectClass,
        attributes: Option<AttributeSet>,
    ) -> Self {
        Self {
            uid,
            previous_uid: None,
            change_type,
            object_class,
            attributes,
            token: None,
        }
    }

    #[must_use]
    pub fn with_previous_uid(mut self, previous: Uid) -> Self {
        self.previous_uid = Some(previous);
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncChangeType {
    Create,
    Update,
    Delete,
}

impl SyncChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncChangeType::Create => "create",
            SyncChangeType::Update => "update",
            SyncChangeType::Delete => "delete",
        }
    }
}

impl std::fmt::Display for SyncChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A batch of changes.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub changes: Vec<SyncChange>,
    /// Token to resume after the batch; `None` leaves the caller's token as is.
    pub new_token: Option<String>,
    /// More changes are pending after `new_token`.
    pub has_more: bool,
}

impl SyncResult {
    #[must_use]
    pub fn with_changes(changes: Vec<SyncChange>) -> Self {
        Self {
            changes,
            new_token: None,
            has_more: false,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.new_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_more(mut self) -> Self {
        self.has_more = true;
        self
    }
}

/// Incremental synchronization.
///
/// Tokens are opaque to the engine; it stores them and hands them back.
#[async_trait]
pub trait SyncCapable: Connector {
    /// Up to `batch_size` changes after `sync_token`, from the start of the
    /// log when `sync_token` is `None`.
    async fn fetch_changes(
        &self,
        object_class: ObjectClass,
        sync_token: Option<&str>,
        batch_size: u32,
    ) -> ConnectorResult<SyncResult>;
}

/// A connector with every capability, as pull and push tasks require.
pub trait FullConnector: CreateOp + UpdateOp + DeleteOp + SearchOp + SyncCapable {}

impl<T> FullConnector for T where T: CreateOp + UpdateOp + DeleteOp + SearchOp + SyncCapable {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleted_change_has_no_attributes() {
        let change = SyncChange::deleted(Uid::new("uid", "jdoe"), ObjectClass::Account);
        assert_eq!(change.change_type.as_str(), "delete");
        assert!(change.attributes.is_none());
        assert!(change.token.is_none());
    }

    #[test]
    fn test_change_json_omits_empty_fields() {
        let change = SyncChange::created(
            Uid::new("uid", "jdoe"),
            ObjectClass::Account,
            AttributeSet::new().with("uid", "jdoe"),
        )
        .with_token("3");
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["change_type"], "create");
        assert_eq!(json["token"], "3");
        assert!(json.get("previous_uid").is_none());
    }
}
