//! In-memory connector
//!
//! A complete connector backed by process memory. Every write is appended to
//! a changelog whose sequence numbers serve as sync tokens, so the same
//! instance can drive both incremental pulls and pushes. Used by the runner's
//! sandbox mode and by tests.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ConnectorError, ConnectorResult};
use crate::operation::{AttributeDelta, AttributeSet, Filter, PageRequest, SearchResult, Uid};
use crate::traits::{
    Connector, CreateOp, DeleteOp, SearchOp, SyncCapable, SyncChange, SyncResult, UpdateOp,
};
use crate::types::ObjectClass;

/// Serializable state of an [`InMemoryConnector`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorSnapshot {
    /// Current objects per class.
    #[serde(default)]
    pub objects: BTreeMap<ObjectClass, Vec<AttributeSet>>,
    /// Ordered change log; position + 1 is the change's sync token.
    #[serde(default)]
    pub changelog: Vec<SyncChange>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectClass, BTreeMap<String, AttributeSet>>,
    changelog: Vec<SyncChange>,
}

impl State {
    fn record(&mut self, change: SyncChange) {
        let seq = self.changelog.len() + 1;
        self.changelog.push(change.with_token(seq.to_string()));
    }
}

/// Connector holding accounts and groups in memory.
#[derive(Debug)]
pub struct InMemoryConnector {
    name: String,
    uid_attribute: String,
    state: RwLock<State>,
    failing_uids: RwLock<HashSet<String>>,
    fail_fetch: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryConnector {
    /// Create an empty connector whose objects are keyed by `uid_attribute`.
    pub fn new(name: impl Into<String>, uid_attribute: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid_attribute: uid_attribute.into(),
            state: RwLock::new(State::default()),
            failing_uids: RwLock::new(HashSet::new()),
            fail_fetch: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Restore a connector from a snapshot.
    pub fn from_snapshot(
        name: impl Into<String>,
        uid_attribute: impl Into<String>,
        snapshot: ConnectorSnapshot,
    ) -> Self {
        let uid_attribute = uid_attribute.into();
        let mut state = State {
            changelog: snapshot.changelog,
            ..State::default()
        };
        for (class, objects) in snapshot.objects {
            let entries = state.objects.entry(class).or_default();
            for attrs in objects {
                if let Some(key) = attrs.get_string(&uid_attribute) {
                    entries.insert(key.to_string(), attrs.clone());
                }
            }
        }
        Self {
            state: RwLock::new(state),
            ..Self::new(name, uid_attribute)
        }
    }

    /// Export the current state.
    pub async fn snapshot(&self) -> ConnectorSnapshot {
        let state = self.state.read().await;
        ConnectorSnapshot {
            objects: state
                .objects
                .iter()
                .map(|(class, objs)| (*class, objs.values().cloned().collect()))
                .collect(),
            changelog: state.changelog.clone(),
        }
    }

    /// Insert an object as if it had been created on the resource by a third party.
    ///
    /// The insertion is logged, so it is visible to incremental syncs.
    pub async fn seed(
        &self,
        object_class: ObjectClass,
        attributes: AttributeSet,
    ) -> ConnectorResult<Uid> {
        let key = self.key_of(&attributes)?;
        let uid = Uid::new(&self.uid_attribute, &key);
        let mut state = self.state.write().await;
        state
            .objects
            .entry(object_class)
            .or_default()
            .insert(key, attributes.clone());
        state.record(SyncChange::created(uid.clone(), object_class, attributes));
        Ok(uid)
    }

    /// Remove an object as if a third party had deleted it.
    pub async fn remove(&self, object_class: ObjectClass, uid_value: &str) -> bool {
        let mut state = self.state.write().await;
        let removed = state
            .objects
            .get_mut(&object_class)
            .and_then(|objs| objs.remove(uid_value))
            .is_some();
        if removed {
            state.record(SyncChange::deleted(
                Uid::new(&self.uid_attribute, uid_value),
                object_class,
            ));
        }
        removed
    }

    /// Make every write touching `uid_value` fail.
    pub async fn inject_failure(&self, uid_value: impl Into<String>) {
        self.failing_uids.write().await.insert(uid_value.into());
    }

    /// Make change fetching and searching fail.
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes (create, update, delete).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of objects currently held for a class.
    pub async fn count(&self, object_class: ObjectClass) -> usize {
        self.state
            .read()
            .await
            .objects
            .get(&object_class)
            .map_or(0, BTreeMap::len)
    }

    /// The sequence number of the last logged change.
    pub async fn head_token(&self) -> Option<String> {
        let len = self.state.read().await.changelog.len();
        (len > 0).then(|| len.to_string())
    }

    fn key_of(&self, attributes: &AttributeSet) -> ConnectorResult<String> {
        attributes
            .get_string(&self.uid_attribute)
            .map(ToString::to_string)
            .ok_or_else(|| ConnectorError::InvalidData {
                message: format!("missing '{}' attribute", self.uid_attribute),
            })
    }

    async fn check_injected(&self, key: &str) -> ConnectorResult<()> {
        if self.failing_uids.read().await.contains(key) {
            return Err(ConnectorError::operation_failed(format!(
                "injected failure for {key}"
            )));
        }
        Ok(())
    }

    fn check_fetch(&self) -> ConnectorResult<()> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ConnectorError::TargetUnavailable {
                message: format!("{} is not reachable", self.name),
            });
        }
        Ok(())
    }

    fn parse_token(token: Option<&str>) -> ConnectorResult<usize> {
        match token {
            None => Ok(0),
            Some(t) => t.parse::<usize>().map_err(|_| ConnectorError::InvalidSyncToken {
                token: t.to_string(),
            }),
        }
    }
}

impl Connector for InMemoryConnector {
    fn display_name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl CreateOp for InMemoryConnector {
    async fn create(
        &self,
        object_class: ObjectClass,
        attributes: AttributeSet,
    ) -> ConnectorResult<Uid> {
        let key = self.key_of(&attributes)?;
        self.check_injected(&key).await?;
        let uid = Uid::new(&self.uid_attribute, &key);

        let mut state = self.state.write().await;
        let objects = state.objects.entry(object_class).or_default();
        if objects.contains_key(&key) {
            return Err(ConnectorError::already_exists(uid.to_string()));
        }
        objects.insert(key, attributes.clone());
        state.record(SyncChange::created(uid.clone(), object_class, attributes));
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(connector = %self.name, uid = %uid, "Object created");
        Ok(uid)
    }
}

#[async_trait]
impl UpdateOp for InMemoryConnector {
    async fn update(
        &self,
        object_class: ObjectClass,
        uid: &Uid,
        changes: AttributeDelta,
    ) -> ConnectorResult<Uid> {
        self.check_injected(uid.value()).await?;

        let mut state = self.state.write().await;
        let objects = state.objects.entry(object_class).or_default();
        let mut attrs = objects
            .remove(uid.value())
            .ok_or_else(|| ConnectorError::not_found(uid.to_string()))?;
        changes.apply_to(&mut attrs);

        let new_key = attrs
            .get_string(&self.uid_attribute)
            .unwrap_or(uid.value())
            .to_string();
        attrs.set(self.uid_attribute.clone(), new_key.clone());
        objects.insert(new_key.clone(), attrs.clone());

        let new_uid = Uid::new(&self.uid_attribute, new_key);
        let mut change = SyncChange::updated(new_uid.clone(), object_class, attrs);
        if new_uid != *uid {
            change = change.with_previous_uid(uid.clone());
        }
        state.record(change);
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(connector = %self.name, uid = %new_uid, "Object updated");
        Ok(new_uid)
    }
}

#[async_trait]
impl DeleteOp for InMemoryConnector {
    async fn delete(&self, object_class: ObjectClass, uid: &Uid) -> ConnectorResult<()> {
        self.check_injected(uid.value()).await?;

        let mut state = self.state.write().await;
        state
            .objects
            .get_mut(&object_class)
            .and_then(|objs| objs.remove(uid.value()))
            .ok_or_else(|| ConnectorError::not_found(uid.to_string()))?;
        state.record(SyncChange::deleted(uid.clone(), object_class));
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(connector = %self.name, uid = %uid, "Object deleted");
        Ok(())
    }
}

#[async_trait]
impl SearchOp for InMemoryConnector {
    async fn search(
        &self,
        object_class: ObjectClass,
        filter: Option<Filter>,
        page_request: Option<PageRequest>,
    ) -> ConnectorResult<SearchResult> {
        self.check_fetch()?;

        let state = self.state.read().await;
        let matching: Vec<AttributeSet> = state
            .objects
            .get(&object_class)
            .map(|objs| {
                objs.values()
                    .filter(|attrs| filter.as_ref().map_or(true, |f| f.matches(attrs)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let total = matching.len();
        let Some(page) = page_request else {
            return Ok(SearchResult::new(matching).with_total_count(total as u64));
        };

        let start = page.offset as usize;
        let end = start.saturating_add(page.page_size as usize).min(total);
        let objects = matching.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let mut result = SearchResult::new(objects).with_total_count(total as u64);
        if end < total {
            result = result.with_more();
        }
        Ok(result)
    }
}

#[async_trait]
impl SyncCapable for InMemoryConnector {
    async fn fetch_changes(
        &self,
        object_class: ObjectClass,
        sync_token: Option<&str>,
        batch_size: u32,
    ) -> ConnectorResult<SyncResult> {
        self.check_fetch()?;
        let after = Self::parse_token(sync_token)?;

        let state = self.state.read().await;
        let pending: Vec<(usize, &SyncChange)> = state
            .changelog
            .iter()
            .enumerate()
            .skip(after)
            .filter(|(_, c)| c.object_class == object_class)
            .collect();

        let take = (batch_size.max(1) as usize).min(pending.len());
        let changes: Vec<SyncChange> = pending
            .iter()
            .take(take)
            .map(|(_, c)| (*c).clone())
            .collect();

        // An empty batch still moves the cursor past other classes' entries.
        let new_token = match take.checked_sub(1).and_then(|i| pending.get(i)) {
            Some((idx, _)) => idx + 1,
            None => state.changelog.len().max(after),
        }
        .to_string();

        let mut result = SyncResult::with_changes(changes).with_token(new_token);
        if pending.len() > take {
            result = result.with_more();
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(uid: &str, mail: &str) -> AttributeSet {
        AttributeSet::new().with("uid", uid).with("mail", mail)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let conn = InMemoryConnector::new("ldap", "uid");
        let uid = conn
            .create(ObjectClass::Account, account("jdoe", "j@x"))
            .await
            .unwrap();
        assert_eq!(uid.value(), "jdoe");

        let found = conn.get(ObjectClass::Account, &uid).await.unwrap();
        assert_eq!(found.unwrap().get_string("mail"), Some("j@x"));
        assert_eq!(conn.write_count(), 1);

        let dup = conn.create(ObjectClass::Account, account("jdoe", "j@x")).await;
        assert!(matches!(dup, Err(ConnectorError::ObjectAlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_rename_reports_previous_uid() {
        let conn = InMemoryConnector::new("ldap", "uid");
        let uid = conn
            .create(ObjectClass::Account, account("jdoe", "j@x"))
            .await
            .unwrap();
        let delta = AttributeDelta::new().with_replace("uid", "jdoe2");
        let renamed = conn.update(ObjectClass::Account, &uid, delta).await.unwrap();
        assert_eq!(renamed.value(), "jdoe2");

        let result = conn
            .fetch_changes(ObjectClass::Account, Some("1"), 10)
            .await
            .unwrap();
        assert_eq!(result.changes.len(), 1);
        assert_eq!(
            result.changes[0].previous_uid.as_ref().map(Uid::value),
            Some("jdoe")
        );
        assert_eq!(result.new_token.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_fetch_changes_batches_and_filters_class() {
        let conn = InMemoryConnector::new("ldap", "uid");
        conn.seed(ObjectClass::Account, account("a", "a@x")).await.unwrap();
        conn.seed(ObjectClass::Group, AttributeSet::new().with("uid", "staff"))
            .await
            .unwrap();
        conn.seed(ObjectClass::Account, account("b", "b@x")).await.unwrap();

        let first = conn
            .fetch_changes(ObjectClass::Account, None, 1)
            .await
            .unwrap();
        assert_eq!(first.changes.len(), 1);
        assert!(first.has_more);
        assert_eq!(first.new_token.as_deref(), Some("1"));

        let second = conn
            .fetch_changes(ObjectClass::Account, first.new_token.as_deref(), 1)
            .await
            .unwrap();
        assert_eq!(second.changes[0].uid.value(), "b");
        assert!(!second.has_more);
        assert_eq!(second.new_token.as_deref(), Some("3"));

        let empty = conn
            .fetch_changes(ObjectClass::Account, Some("3"), 10)
            .await
            .unwrap();
        assert!(empty.changes.is_empty());
        assert_eq!(empty.new_token.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_invalid_token_rejected() {
        let conn = InMemoryConnector::new("ldap", "uid");
        let err = conn
            .fetch_changes(ObjectClass::Account, Some("not-a-number"), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidSyncToken { .. }));
    }

    #[tokio::test]
    async fn test_paged_search() {
        let conn = InMemoryConnector::new("ldap", "uid");
        for name in ["a", "b", "c"] {
            conn.seed(ObjectClass::Account, account(name, "x")).await.unwrap();
        }
        let page = conn
            .search(ObjectClass::Account, None, Some(PageRequest::new(2)))
            .await
            .unwrap();
        assert_eq!(page.objects.len(), 2);
        assert!(page.has_more);

        let last = conn
            .search(
                ObjectClass::Account,
                None,
                Some(PageRequest::new(2).with_offset(2)),
            )
            .await
            .unwrap();
        assert_eq!(last.objects.len(), 1);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let conn = InMemoryConnector::new("ldap", "uid");
        conn.inject_failure("bad").await;
        let err = conn
            .create(ObjectClass::Account, account("bad", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::OperationFailed { .. }));

        conn.set_fail_fetch(true);
        assert!(conn.search(ObjectClass::Account, None, None).await.is_err());
        assert_eq!(conn.write_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_keeps_changelog() {
        let conn = InMemoryConnector::new("ldap", "uid");
        conn.seed(ObjectClass::Account, account("a", "a@x")).await.unwrap();
        let snapshot = conn.snapshot().await;

        let restored = InMemoryConnector::from_snapshot("ldap", "uid", snapshot);
        assert_eq!(restored.count(ObjectClass::Account).await, 1);
        assert_eq!(restored.head_token().await.as_deref(), Some("1"));
    }
}
