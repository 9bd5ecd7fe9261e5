//! Common fixtures for job tests.
//!
//! Every test builds its own connector, store, token store and run
//! registry, so tests never observe each other's runs.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use idsync_connector::prelude::{AttributeSet, InMemoryConnector, ObjectClass};
use idsync_provisioning::{
    AnyKind, AttributeMapping, Direction, KeyMapping, LocalRecord, ProvisioningError,
    ProvisioningOutcome, ProvisioningResult, Provision, PullActions, PushActions, RunContext,
    SyncDelta, TaskConfig,
};

pub const RESOURCE: &str = "ldap";

/// Users keyed by `uid` on the resource and by name locally.
pub fn user_provision() -> Provision {
    Provision::new(AnyKind::User, KeyMapping::new("uid", "name"))
        .with_mapping(AttributeMapping::simple("mail", "email"))
}

/// Groups keyed by `uid`, with members listed in `members`.
pub fn group_provision() -> Provision {
    Provision::new(AnyKind::Group, KeyMapping::new("uid", "name"))
        .with_member_attribute("members")
}

pub fn pull_task() -> TaskConfig {
    TaskConfig::new(RESOURCE, Direction::Pull).with_provision(user_provision())
}

pub fn push_task() -> TaskConfig {
    TaskConfig::new(RESOURCE, Direction::Push).with_provision(user_provision())
}

pub fn account(uid: &str) -> AttributeSet {
    AttributeSet::new()
        .with("uid", uid)
        .with("mail", format!("{uid}@example.com"))
}

pub fn user(name: &str) -> LocalRecord {
    LocalRecord::new(AnyKind::User, name)
        .with_attributes(AttributeSet::new().with("email", format!("{name}@corp.example.com")))
}

/// Connector holding one account per uid, each creation logged.
pub async fn connector_with(uids: &[&str]) -> Arc<InMemoryConnector> {
    let connector = Arc::new(InMemoryConnector::new(RESOURCE, "uid"));
    for uid in uids {
        connector.seed(ObjectClass::Account, account(uid)).await.unwrap();
    }
    connector
}

/// Pull action failing one hook for one uid, counting every call.
pub struct FailingPullAction {
    pub uid: String,
    pub calls: AtomicUsize,
    pub after_calls: AtomicUsize,
    pub ignore: bool,
}

impl FailingPullAction {
    pub fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            calls: AtomicUsize::new(0),
            after_calls: AtomicUsize::new(0),
            ignore: false,
        }
    }

    /// Ask for the record to be skipped instead of failing it.
    pub fn ignoring(mut self) -> Self {
        self.ignore = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn after_calls(&self) -> usize {
        self.after_calls.load(Ordering::SeqCst)
    }

    fn check(&self, uid: &str) -> ProvisioningResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match (uid == self.uid, self.ignore) {
            (false, _) => Ok(()),
            (true, false) => Err(ProvisioningError::vetoed("failing", format!("refused {uid}"))),
            (true, true) => Err(ProvisioningError::ignored("failing", format!("skipped {uid}"))),
        }
    }
}

#[async_trait]
impl PullActions for FailingPullAction {
    fn name(&self) -> &str {
        "failing"
    }

    async fn before_provision(
        &self,
        _ctx: &RunContext,
        delta: SyncDelta,
    ) -> ProvisioningResult<SyncDelta> {
        self.check(delta.uid_value())?;
        Ok(delta)
    }

    async fn before_update(
        &self,
        _ctx: &RunContext,
        delta: SyncDelta,
        _local: &LocalRecord,
    ) -> ProvisioningResult<SyncDelta> {
        self.check(delta.uid_value())?;
        Ok(delta)
    }

    async fn after(
        &self,
        _ctx: &RunContext,
        _delta: &SyncDelta,
        _local: Option<&LocalRecord>,
        _outcome: &ProvisioningOutcome,
    ) -> ProvisioningResult<()> {
        self.after_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Push action counting `before_all`/`after_all` and refusing one name.
pub struct RecordingPushAction {
    pub refuse: Option<String>,
    pub before_all: AtomicUsize,
    pub after_all: AtomicUsize,
}

impl RecordingPushAction {
    pub fn new(refuse: Option<&str>) -> Self {
        Self {
            refuse: refuse.map(ToString::to_string),
            before_all: AtomicUsize::new(0),
            after_all: AtomicUsize::new(0),
        }
    }

    pub fn run_hooks(&self) -> (usize, usize) {
        (
            self.before_all.load(Ordering::SeqCst),
            self.after_all.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl PushActions for RecordingPushAction {
    fn name(&self) -> &str {
        "recording"
    }

    async fn before_all(&self, _ctx: &RunContext) -> ProvisioningResult<()> {
        self.before_all.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn before_provision(
        &self,
        _ctx: &RunContext,
        record: LocalRecord,
    ) -> ProvisioningResult<LocalRecord> {
        if self.refuse.as_deref() == Some(record.name.as_str()) {
            return Err(ProvisioningError::vetoed("recording", "not allowed"));
        }
        Ok(record)
    }

    async fn after_all(&self, _ctx: &RunContext) -> ProvisioningResult<()> {
        self.after_all.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
