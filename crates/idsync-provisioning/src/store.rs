//! Local identity store.
//!
//! The engine treats persistence of users and groups as an external
//! collaborator. Each call is atomic on its own, which is the transactional
//! scope of one record.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::record::{LocalRecord, NAME_ATTRIBUTE};
use crate::types::AnyKind;

/// Store of local users and groups.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Get a record by key.
    async fn find(&self, key: Uuid) -> Result<Option<LocalRecord>, StoreError>;

    /// Get a record by kind and name.
    async fn find_by_name(
        &self,
        kind: AnyKind,
        name: &str,
    ) -> Result<Option<LocalRecord>, StoreError>;

    /// Get every record of a kind whose attribute equals `value`.
    async fn find_by_attribute(
        &self,
        kind: AnyKind,
        attribute: &str,
        value: &str,
    ) -> Result<Vec<LocalRecord>, StoreError>;

    /// Keys of every record of a kind, in stable order.
    async fn list_keys(&self, kind: AnyKind) -> Result<Vec<Uuid>, StoreError>;

    /// Insert a new record.
    async fn create(&self, record: LocalRecord) -> Result<LocalRecord, StoreError>;

    /// Replace an existing record.
    async fn update(&self, record: LocalRecord) -> Result<LocalRecord, StoreError>;

    /// Delete a record.
    async fn delete(&self, key: Uuid) -> Result<(), StoreError>;
}

/// [`IdentityStore`] backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    records: RwLock<BTreeMap<Uuid, LocalRecord>>,
}

impl InMemoryIdentityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = LocalRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.key, r)).collect()),
        }
    }

    /// Every record, ordered by kind then name.
    pub async fn records(&self) -> Vec<LocalRecord> {
        let mut records: Vec<LocalRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));
        records
    }

    /// Number of records of a kind.
    pub async fn count(&self, kind: AnyKind) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.kind == kind)
            .count()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find(&self, key: Uuid) -> Result<Option<LocalRecord>, StoreError> {
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn find_by_name(
        &self,
        kind: AnyKind,
        name: &str,
    ) -> Result<Option<LocalRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.kind == kind && r.name == name)
            .cloned())
    }

    async fn find_by_attribute(
        &self,
        kind: AnyKind,
        attribute: &str,
        value: &str,
    ) -> Result<Vec<LocalRecord>, StoreError> {
        if attribute == NAME_ATTRIBUTE {
            return Ok(self.find_by_name(kind, value).await?.into_iter().collect());
        }
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| {
                r.kind == kind && r.internal_value(attribute).as_deref() == Some(value)
            })
            .cloned()
            .collect())
    }

    async fn list_keys(&self, kind: AnyKind) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .records()
            .await
            .into_iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.key)
            .collect())
    }

    async fn create(&self, mut record: LocalRecord) -> Result<LocalRecord, StoreError> {
        let mut records = self.records.write().await;
        if records
            .values()
            .any(|r| r.kind == record.kind && r.name == record.name)
        {
            return Err(StoreError::Duplicate {
                kind: record.kind.to_string(),
                name: record.name,
            });
        }
        record.updated_at = Utc::now();
        records.insert(record.key, record.clone());
        Ok(record)
    }

    async fn update(&self, mut record: LocalRecord) -> Result<LocalRecord, StoreError> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.key) {
            return Err(StoreError::NotFound { key: record.key });
        }
        if records
            .values()
            .any(|r| r.key != record.key && r.kind == record.kind && r.name == record.name)
        {
            return Err(StoreError::Duplicate {
                kind: record.kind.to_string(),
                name: record.name,
            });
        }
        record.updated_at = Utc::now();
        records.insert(record.key, record.clone());
        Ok(record)
    }

    async fn delete(&self, key: Uuid) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .remove(&key)
            .map(|_| ())
            .ok_or(StoreError::NotFound { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idsync_connector::prelude::AttributeSet;

    #[tokio::test]
    async fn test_create_rejects_duplicate_names() {
        let store = InMemoryIdentityStore::new();
        store.create(LocalRecord::new(AnyKind::User, "jdoe")).await.unwrap();
        let err = store
            .create(LocalRecord::new(AnyKind::User, "jdoe"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));

        // Same name, other kind is fine.
        store.create(LocalRecord::new(AnyKind::Group, "jdoe")).await.unwrap();
        assert_eq!(store.count(AnyKind::User).await, 1);
    }

    #[tokio::test]
    async fn test_find_by_attribute() {
        let store = InMemoryIdentityStore::new();
        let record = LocalRecord::new(AnyKind::User, "jdoe")
            .with_attributes(AttributeSet::new().with("employeeId", "E1"));
        store.create(record.clone()).await.unwrap();

        let found = store
            .find_by_attribute(AnyKind::User, "employeeId", "E1")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, record.key);

        let by_name = store
            .find_by_attribute(AnyKind::User, "name", "jdoe")
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);

        let none = store
            .find_by_attribute(AnyKind::Group, "employeeId", "E1")
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let store = InMemoryIdentityStore::new();
        let ghost = LocalRecord::new(AnyKind::User, "ghost");
        assert!(matches!(
            store.update(ghost.clone()).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete(ghost.key).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_keys_ordered_by_name() {
        let b = LocalRecord::new(AnyKind::User, "b");
        let a = LocalRecord::new(AnyKind::User, "a");
        let g = LocalRecord::new(AnyKind::Group, "g");
        let store = InMemoryIdentityStore::with_records([b.clone(), g, a.clone()]);
        assert_eq!(store.list_keys(AnyKind::User).await.unwrap(), vec![a.key, b.key]);
    }
}
