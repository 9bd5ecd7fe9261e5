//! Pull Job Tests
//!
//! End-to-end pull runs against the in-memory connector, covering:
//! - Incremental pulls and sync token handling
//! - Per-record failure isolation
//! - Dry run, feature gates and full/filtered reconciliation
//! - Delete deltas, group membership and run-level failures
//! - One outcome per object and remediation of failed records

mod common;

use std::sync::Arc;

use idsync_connector::prelude::{
    AttributeDelta, AttributeSet, AttributeValue, Filter, ObjectClass, SearchOp, Uid, UpdateOp,
};
use idsync_connector::prelude::InMemoryConnector;
use idsync_provisioning::{
    ActionPipeline, AnyKind, ConflictResolution, EventResult, EventSinks, IdentityStore, InMemoryIdentityStore,
    InMemoryRemediationStore, InMemorySyncTokenStore, JobError, KeyMapping, LocalRecord, MatchingRule, MemoryEventSink,
    OutcomeStatus, Provision, PullActions, PullJob, PullMode, ResourceOperation, RunRegistry,
    SyncTokenStore, TaskConfig, UnmatchingRule, DRY_RUN_BANNER,
};

use common::{account, connector_with, pull_task, user, FailingPullAction, RESOURCE};

struct Fixture {
    connector: Arc<InMemoryConnector>,
    store: Arc<InMemoryIdentityStore>,
    tokens: Arc<InMemorySyncTokenStore>,
}

impl Fixture {
    async fn new(uids: &[&str], locals: Vec<LocalRecord>) -> Self {
        Self {
            connector: connector_with(uids).await,
            store: Arc::new(InMemoryIdentityStore::with_records(locals)),
            tokens: Arc::new(InMemorySyncTokenStore::new()),
        }
    }

    fn job(&self, task: TaskConfig) -> PullJob {
        PullJob::new(
            task,
            self.connector.clone(),
            self.store.clone(),
            self.tokens.clone(),
        )
        .with_registry(RunRegistry::new())
    }

    async fn token(&self, class: ObjectClass) -> Option<String> {
        self.tokens
            .get(RESOURCE, class)
            .await
            .unwrap()
            .map(|t| t.token_value)
    }
}

fn failing(action: FailingPullAction) -> (Arc<FailingPullAction>, ActionPipeline<dyn PullActions>) {
    let action = Arc::new(action);
    let pipeline = ActionPipeline::<dyn PullActions>::new().with(action.clone());
    (action, pipeline)
}

// =============================================================================
// Failure isolation
// =============================================================================

#[tokio::test]
async fn test_failing_record_does_not_stop_the_run() {
    let fx = Fixture::new(&["a", "b", "c"], vec![user("a"), user("b"), user("c")]).await;
    let (action, pipeline) = failing(FailingPullAction::new("b"));
    let task = pull_task()
        .with_rules(UnmatchingRule::Ignore, MatchingRule::Update)
        .with_gates(false, true, false);

    let report = fx.job(task).with_actions(pipeline).run().await.unwrap();

    let statuses: Vec<_> = report.outcomes.iter().map(|o| (o.name.as_str(), o.status)).collect();
    assert_eq!(
        statuses,
        vec![
            ("a", OutcomeStatus::Success),
            ("b", OutcomeStatus::Failure),
            ("c", OutcomeStatus::Success),
        ]
    );
    assert!(report.outcomes.iter().all(|o| o.operation == ResourceOperation::Update));
    assert_eq!(
        report.outcomes[1].message.as_deref(),
        Some("Vetoed by failing: refused b")
    );
    assert_eq!(action.calls(), 3);
    assert_eq!(action.after_calls(), 2);

    // Failures do not hold the token back.
    assert!(report.tokens_advanced);
    assert_eq!(fx.token(ObjectClass::Account).await.as_deref(), Some("3"));

    let a = fx.store.find_by_name(AnyKind::User, "a").await.unwrap().unwrap();
    assert_eq!(a.attributes.get_string("email"), Some("a@example.com"));
    let b = fx.store.find_by_name(AnyKind::User, "b").await.unwrap().unwrap();
    assert_eq!(b.attributes.get_string("email"), Some("b@corp.example.com"));
}

#[tokio::test]
async fn test_ignored_by_action_is_reported_as_ignore() {
    let fx = Fixture::new(&["a", "b"], vec![]).await;
    let (_, pipeline) = failing(FailingPullAction::new("b").ignoring());
    let task = pull_task()
        .with_rules(UnmatchingRule::Provision, MatchingRule::Ignore)
        .with_gates(true, false, false);

    let report = fx.job(task).with_actions(pipeline).run().await.unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[1].status, OutcomeStatus::Ignore);
    assert_eq!(report.outcomes[1].operation, ResourceOperation::None);
    assert_eq!(report.summary.users.created, 1);
    assert_eq!(report.summary.users.ignored, 1);
    assert_eq!(fx.store.count(AnyKind::User).await, 1);
}

// =============================================================================
// Rules
// =============================================================================

#[tokio::test]
async fn test_provision_creates_unlinked_records() {
    let fx = Fixture::new(&["a", "b"], vec![]).await;
    let task = pull_task()
        .with_rules(UnmatchingRule::Provision, MatchingRule::Ignore)
        .with_gates(true, false, false);

    let report = fx.job(task).run().await.unwrap();

    assert_eq!(report.summary.users.created, 2);
    let records = fx.store.records().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| !r.is_linked(RESOURCE)));
    assert_eq!(records[0].attributes.get_string("email"), Some("a@example.com"));
    assert_eq!(fx.connector.write_count(), 0);
}

#[tokio::test]
async fn test_assign_links_without_writing_back() {
    let fx = Fixture::new(&["a"], vec![]).await;
    let task = pull_task()
        .with_rules(UnmatchingRule::Assign, MatchingRule::Ignore)
        .with_gates(true, false, false);

    let report = fx.job(task).run().await.unwrap();

    assert_eq!(report.outcomes[0].operation, ResourceOperation::Create);
    let a = fx.store.find_by_name(AnyKind::User, "a").await.unwrap().unwrap();
    assert!(a.is_linked(RESOURCE));
    assert_eq!(report.outcomes[0].key, Some(a.key));
    assert_eq!(fx.connector.write_count(), 0);
}

#[tokio::test]
async fn test_deprovision_deletes_resource_object_and_keeps_link() {
    let fx = Fixture::new(&["a"], vec![user("a").with_resource(RESOURCE)]).await;
    let task = pull_task()
        .with_rules(UnmatchingRule::Ignore, MatchingRule::Deprovision)
        .with_gates(false, true, false);

    let report = fx.job(task).run().await.unwrap();

    assert_eq!(report.outcomes[0].operation, ResourceOperation::Delete);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Success);
    assert_eq!(fx.connector.count(ObjectClass::Account).await, 0);
    let a = fx.store.find_by_name(AnyKind::User, "a").await.unwrap().unwrap();
    assert!(a.is_linked(RESOURCE));
}

#[tokio::test]
async fn test_unlink_removes_link_only() {
    let fx = Fixture::new(&["a"], vec![user("a").with_resource(RESOURCE)]).await;
    let task = pull_task()
        .with_rules(UnmatchingRule::Ignore, MatchingRule::Unlink)
        .with_gates(false, true, false);

    let report = fx.job(task).run().await.unwrap();

    assert_eq!(report.outcomes[0].operation, ResourceOperation::None);
    let a = fx.store.find_by_name(AnyKind::User, "a").await.unwrap().unwrap();
    assert!(!a.is_linked(RESOURCE));
    assert_eq!(fx.connector.count(ObjectClass::Account).await, 1);
}

#[tokio::test]
async fn test_missing_rules_ignore_everything() {
    let fx = Fixture::new(&["a", "b"], vec![user("a")]).await;
    let task = pull_task().with_gates(true, true, true);

    let report = fx.job(task).run().await.unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.operation == ResourceOperation::None && o.status == OutcomeStatus::Success));
    assert_eq!(fx.store.count(AnyKind::User).await, 1);
}

#[tokio::test]
async fn test_gate_disabled_records_intended_operation() {
    let fx = Fixture::new(&["a", "b"], vec![]).await;
    let sink = MemoryEventSink::new();
    let (action, pipeline) = failing(FailingPullAction::new("nobody"));
    let task = pull_task().with_rules(UnmatchingRule::Provision, MatchingRule::Update);

    let report = fx
        .job(task)
        .with_actions(pipeline)
        .with_sinks(EventSinks::new().with(Arc::new(sink.clone())))
        .run()
        .await
        .unwrap();

    for outcome in &report.outcomes {
        assert_eq!(outcome.operation, ResourceOperation::Create);
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.message.as_deref(), Some("not configured for create"));
    }
    assert_eq!(fx.store.count(AnyKind::User).await, 0);
    assert_eq!(action.calls(), 0);

    let events = sink.events().await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.event == "provision" && e.result == EventResult::Success));
}

#[tokio::test]
async fn test_multiple_matches_fail_unless_resolved() {
    // Correlate on a non-unique `login` attribute instead of the name.
    let keyed_by_login = || Provision::new(AnyKind::User, KeyMapping::new("uid", "login"));
    let twin = |name: &str| {
        LocalRecord::new(AnyKind::User, name)
            .with_attributes(AttributeSet::new().with("login", "a"))
    };
    let task = |resolution| {
        TaskConfig::new(RESOURCE, idsync_provisioning::Direction::Pull)
            .with_provision(keyed_by_login())
            .with_rules(UnmatchingRule::Ignore, MatchingRule::Update)
            .with_gates(false, true, false)
            .with_conflict_resolution(resolution)
    };

    let fx = Fixture::new(&["a"], vec![twin("first"), twin("second")]).await;
    let report = fx.job(task(ConflictResolution::Ignore)).run().await.unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Failure);
    assert_eq!(report.outcomes[0].operation, ResourceOperation::Update);
    assert_eq!(
        report.outcomes[0].message.as_deref(),
        Some("more than one match (2 local records)")
    );

    let fx = Fixture::new(&["a"], vec![twin("first"), twin("second")]).await;
    let report = fx.job(task(ConflictResolution::FirstMatch)).run().await.unwrap();
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Success);
    assert_eq!(report.outcomes[0].operation, ResourceOperation::Update);

    // A dry run reports the ambiguity without failing the record.
    let fx = Fixture::new(&["a"], vec![twin("first"), twin("second")]).await;
    let dry = task(ConflictResolution::Ignore).with_dry_run(true);
    let report = fx.job(dry).run().await.unwrap();
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Success);
    assert_eq!(report.outcomes[0].operation, ResourceOperation::Update);
    assert_eq!(
        report.outcomes[0].message.as_deref(),
        Some("more than one match (2 local records)")
    );
    assert!(!report.has_failures());
}

// =============================================================================
// Dry run
// =============================================================================

#[tokio::test]
async fn test_dry_run_has_no_side_effects() {
    let fx = Fixture::new(&["a", "b", "c"], vec![user("a")]).await;
    let (action, pipeline) = failing(FailingPullAction::new("nobody"));
    let task = pull_task()
        .with_rules(UnmatchingRule::Provision, MatchingRule::Deprovision)
        .with_gates(true, true, true)
        .with_dry_run(true);

    let report = fx.job(task).with_actions(pipeline).run().await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.summary.users.created, 2);
    assert_eq!(report.summary.users.deleted, 1);
    assert!(report.report.as_deref().unwrap().starts_with(DRY_RUN_BANNER));

    assert_eq!(fx.store.count(AnyKind::User).await, 1);
    assert_eq!(fx.connector.count(ObjectClass::Account).await, 3);
    assert_eq!(fx.connector.write_count(), 0);
    assert_eq!(action.calls(), 0);
    assert!(!report.tokens_advanced);
    assert!(fx.tokens.tokens().await.is_empty());
}

#[tokio::test]
async fn test_dry_run_with_disabled_gate_emits_no_events() {
    let fx = Fixture::new(&["a", "b"], vec![user("a")]).await;
    fx.tokens
        .put_all(RESOURCE, &[(ObjectClass::Account, "2".to_string())])
        .await
        .unwrap();
    fx.connector.remove(ObjectClass::Account, "a").await;
    let sink = MemoryEventSink::new();
    let sinks = || EventSinks::new().with(Arc::new(sink.clone()));
    let dry = || {
        pull_task()
            .with_rules(UnmatchingRule::Provision, MatchingRule::Update)
            .with_dry_run(true)
    };

    // Full scan: only `b` is left on the resource, and creating is disabled.
    let full = dry().with_pull_mode(PullMode::FullReconciliation);
    let report = fx.job(full).with_sinks(sinks()).run().await.unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].name, "b");
    assert_eq!(report.outcomes[0].message.as_deref(), Some("not configured for create"));

    // Incremental: the removal of `a` meets the disabled delete gate.
    let report = fx.job(dry()).with_sinks(sinks()).run().await.unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].operation, ResourceOperation::Delete);
    assert_eq!(report.outcomes[0].message.as_deref(), Some("not configured for delete"));

    assert!(sink.events().await.is_empty());
    assert_eq!(fx.store.count(AnyKind::User).await, 1);
}

// =============================================================================
// Sync tokens
// =============================================================================

#[tokio::test]
async fn test_incremental_resumes_from_stored_token() {
    let fx = Fixture::new(&["a", "b", "c"], vec![]).await;
    fx.tokens
        .put_all(RESOURCE, &[(ObjectClass::Account, "2".to_string())])
        .await
        .unwrap();
    let task = pull_task()
        .with_rules(UnmatchingRule::Provision, MatchingRule::Ignore)
        .with_gates(true, false, false);

    let report = fx.job(task).run().await.unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].name, "c");
    let stored = fx.tokens.get(RESOURCE, ObjectClass::Account).await.unwrap().unwrap();
    assert_eq!(stored.token_value, "3");
    assert_eq!(stored.sequence_number, 2);
}

#[tokio::test]
async fn test_changes_fetched_in_batches() {
    let fx = Fixture::new(&["a", "b", "c", "d", "e"], vec![]).await;
    let task = pull_task()
        .with_rules(UnmatchingRule::Provision, MatchingRule::Ignore)
        .with_gates(true, false, false)
        .with_batch_size(2);

    let report = fx.job(task).run().await.unwrap();

    assert_eq!(report.summary.users.created, 5);
    assert_eq!(fx.token(ObjectClass::Account).await.as_deref(), Some("5"));
}

#[tokio::test]
async fn test_full_reconciliation_leaves_token_untouched() {
    let fx = Fixture::new(&["a", "b", "c"], vec![user("a")]).await;
    let task = pull_task()
        .with_rules(UnmatchingRule::Provision, MatchingRule::Update)
        .with_gates(true, true, false)
        .with_pull_mode(PullMode::FullReconciliation)
        .with_batch_size(2);

    let report = fx.job(task).run().await.unwrap();

    let operations: Vec<_> = report.outcomes.iter().map(|o| o.operation).collect();
    assert_eq!(
        operations,
        vec![
            ResourceOperation::Update,
            ResourceOperation::Create,
            ResourceOperation::Create
        ]
    );
    assert!(!report.tokens_advanced);
    assert!(fx.tokens.tokens().await.is_empty());
}

#[tokio::test]
async fn test_filtered_reconciliation_only_sees_matching_objects() {
    let fx = Fixture::new(&["alice", "bob", "anna"], vec![]).await;
    let task = pull_task()
        .with_rules(UnmatchingRule::Provision, MatchingRule::Ignore)
        .with_gates(true, false, false)
        .with_pull_mode(PullMode::FilteredReconciliation)
        .with_filter(Filter::starts_with("uid", "a"));

    let report = fx.job(task).run().await.unwrap();

    let mut names: Vec<_> = report.outcomes.iter().map(|o| o.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["alice", "anna"]);
    assert!(!report.tokens_advanced);
}

#[tokio::test]
async fn test_full_reconciliation_processes_objects_removed_during_the_scan() {
    let locals = vec![
        user("a").with_resource(RESOURCE),
        user("b").with_resource(RESOURCE),
        user("c").with_resource(RESOURCE),
    ];
    let fx = Fixture::new(&["a", "b", "c"], locals).await;
    let task = pull_task()
        .with_rules(UnmatchingRule::Ignore, MatchingRule::Deprovision)
        .with_gates(false, true, false)
        .with_pull_mode(PullMode::FullReconciliation)
        .with_batch_size(1);

    let report = fx.job(task).run().await.unwrap();

    let names: Vec<_> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.operation == ResourceOperation::Delete && o.status == OutcomeStatus::Success));
    assert_eq!(fx.connector.count(ObjectClass::Account).await, 0);
}

// =============================================================================
// One outcome per object
// =============================================================================

#[tokio::test]
async fn test_changes_to_one_object_give_one_outcome() {
    let fx = Fixture::new(&["a", "b"], vec![]).await;
    fx.connector
        .update(
            ObjectClass::Account,
            &Uid::new("uid", "a"),
            AttributeDelta::new().with_replace("mail", "new@example.com"),
        )
        .await
        .unwrap();
    let task = pull_task()
        .with_rules(UnmatchingRule::Provision, MatchingRule::Update)
        .with_gates(true, true, false);

    let report = fx.job(task).run().await.unwrap();

    let seen: Vec<_> = report
        .outcomes
        .iter()
        .map(|o| (o.name.as_str(), o.operation))
        .collect();
    assert_eq!(
        seen,
        vec![("a", ResourceOperation::Create), ("b", ResourceOperation::Create)]
    );
    let a = fx.store.find_by_name(AnyKind::User, "a").await.unwrap().unwrap();
    assert_eq!(a.attributes.get_string("email"), Some("new@example.com"));
    assert_eq!(fx.token(ObjectClass::Account).await.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_renamed_object_correlates_on_its_first_name() {
    let fx = Fixture::new(&["a"], vec![user("a")]).await;
    fx.tokens
        .put_all(RESOURCE, &[(ObjectClass::Account, "1".to_string())])
        .await
        .unwrap();
    let renamed = fx
        .connector
        .update(
            ObjectClass::Account,
            &Uid::new("uid", "a"),
            AttributeDelta::new().with_replace("uid", "a2"),
        )
        .await
        .unwrap();
    fx.connector
        .update(
            ObjectClass::Account,
            &renamed,
            AttributeDelta::new().with_replace("mail", "a2@example.com"),
        )
        .await
        .unwrap();
    let task = pull_task()
        .with_rules(UnmatchingRule::Provision, MatchingRule::Update)
        .with_gates(true, true, false);

    let report = fx.job(task).run().await.unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].operation, ResourceOperation::Update);
    assert_eq!(report.outcomes[0].uid.as_deref(), Some("a2"));
    assert_eq!(fx.store.count(AnyKind::User).await, 1);
    let renamed = fx.store.find_by_name(AnyKind::User, "a2").await.unwrap().unwrap();
    assert_eq!(renamed.attributes.get_string("email"), Some("a2@example.com"));
}

// =============================================================================
// Remediation
// =============================================================================

#[tokio::test]
async fn test_failed_records_are_queued_for_remediation() {
    let fx = Fixture::new(&["a", "b", "c"], vec![user("a"), user("b"), user("c")]).await;
    let b_key = fx.store.find_by_name(AnyKind::User, "b").await.unwrap().unwrap().key;
    let remediations = Arc::new(InMemoryRemediationStore::new());
    let (_, pipeline) = failing(FailingPullAction::new("b"));
    let task = pull_task()
        .with_name("nightly")
        .with_rules(UnmatchingRule::Ignore, MatchingRule::Update)
        .with_gates(false, true, false)
        .with_remediation(true);

    let report = fx
        .job(task)
        .with_actions(pipeline)
        .with_remediation_store(remediations.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.remediations.len(), 1);
    let entry = &report.remediations[0];
    assert_eq!(entry.task, "nightly");
    assert_eq!(entry.remote_name, "b");
    assert_eq!(entry.operation, ResourceOperation::Update);
    assert_eq!(entry.local_key, Some(b_key));
    assert_eq!(entry.error, "Vetoed by failing: refused b");
    assert_eq!(entry.payload["object"]["attributes"]["mail"], "b@example.com");
    assert_eq!(remediations.entries().await, report.remediations);
    assert!(report.tokens_advanced);
}

#[tokio::test]
async fn test_no_remediation_unless_enabled() {
    let fx = Fixture::new(&["a", "b"], vec![user("a"), user("b")]).await;
    let remediations = Arc::new(InMemoryRemediationStore::new());
    let (_, pipeline) = failing(FailingPullAction::new("b"));
    let task = pull_task()
        .with_rules(UnmatchingRule::Ignore, MatchingRule::Update)
        .with_gates(false, true, false);

    let report = fx
        .job(task)
        .with_actions(pipeline)
        .with_remediation_store(remediations.clone())
        .run()
        .await
        .unwrap();

    assert!(report.has_failures());
    assert!(report.remediations.is_empty());
    assert!(remediations.entries().await.is_empty());
}

// =============================================================================
// Delete deltas
// =============================================================================

#[tokio::test]
async fn test_delete_delta_removes_local_record() {
    let fx = Fixture::new(&["a"], vec![user("a")]).await;
    fx.tokens
        .put_all(RESOURCE, &[(ObjectClass::Account, "1".to_string())])
        .await
        .unwrap();
    assert!(fx.connector.remove(ObjectClass::Account, "a").await);
    let task = pull_task().with_gates(false, false, true);

    let report = fx.job(task).run().await.unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].operation, ResourceOperation::Delete);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Success);
    assert_eq!(fx.store.count(AnyKind::User).await, 0);
    assert_eq!(fx.token(ObjectClass::Account).await.as_deref(), Some("2"));
}

#[tokio::test]
async fn test_delete_delta_respects_gate_and_skips_unknown_records() {
    let fx = Fixture::new(&["a", "b"], vec![user("a")]).await;
    fx.tokens
        .put_all(RESOURCE, &[(ObjectClass::Account, "2".to_string())])
        .await
        .unwrap();
    fx.connector.remove(ObjectClass::Account, "a").await;
    fx.connector.remove(ObjectClass::Account, "b").await;

    let report = fx.job(pull_task()).run().await.unwrap();

    // Only `a` is known locally; nothing is recorded for `b`.
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].name, "a");
    assert_eq!(report.outcomes[0].message.as_deref(), Some("not configured for delete"));
    assert_eq!(fx.store.count(AnyKind::User).await, 1);
}

// =============================================================================
// Groups
// =============================================================================

#[tokio::test]
async fn test_groups_resolve_members_after_users() {
    let fx = Fixture::new(&[], vec![]).await;
    let members = AttributeValue::Array(vec!["a".into(), "b".into(), "ghost".into()]);
    fx.connector
        .seed(
            ObjectClass::Group,
            AttributeSet::new().with("uid", "staff").with("members", members),
        )
        .await
        .unwrap();
    fx.connector.seed(ObjectClass::Account, account("a")).await.unwrap();
    fx.connector.seed(ObjectClass::Account, account("b")).await.unwrap();

    let task = pull_task()
        .with_provision(common::group_provision())
        .with_rules(UnmatchingRule::Provision, MatchingRule::Update)
        .with_gates(true, true, false);

    let report = fx.job(task).run().await.unwrap();

    let kinds: Vec<_> = report.outcomes.iter().map(|o| o.kind).collect();
    assert_eq!(kinds, vec![AnyKind::User, AnyKind::User, AnyKind::Group]);

    let a = fx.store.find_by_name(AnyKind::User, "a").await.unwrap().unwrap();
    let b = fx.store.find_by_name(AnyKind::User, "b").await.unwrap().unwrap();
    let staff = fx.store.find_by_name(AnyKind::Group, "staff").await.unwrap().unwrap();
    assert_eq!(staff.members, [a.key, b.key].into_iter().collect());

    assert_eq!(fx.token(ObjectClass::Account).await.as_deref(), Some("3"));
    assert_eq!(fx.token(ObjectClass::Group).await.as_deref(), Some("1"));
}

// =============================================================================
// Run-level failures
// =============================================================================

#[tokio::test]
async fn test_connector_failure_aborts_without_token() {
    let fx = Fixture::new(&["a"], vec![]).await;
    fx.connector.set_fail_fetch(true);
    let task = pull_task()
        .with_rules(UnmatchingRule::Provision, MatchingRule::Ignore)
        .with_gates(true, false, false);

    let err = fx.job(task).run().await.unwrap_err();

    assert!(matches!(err, JobError::Connector { .. }));
    assert!(err.is_retryable());
    assert!(fx.tokens.tokens().await.is_empty());
}

#[tokio::test]
async fn test_token_store_failure_is_fatal() {
    let fx = Fixture::new(&["a"], vec![]).await;
    fx.tokens.set_fail_writes(true);
    let task = pull_task()
        .with_rules(UnmatchingRule::Provision, MatchingRule::Ignore)
        .with_gates(true, false, false);

    let err = fx.job(task).run().await.unwrap_err();

    assert!(matches!(err, JobError::TokenStore(_)));
    // Record-level work already committed stays committed.
    assert_eq!(fx.store.count(AnyKind::User).await, 1);
}

#[tokio::test]
async fn test_concurrent_run_on_same_resource_rejected() {
    let fx = Fixture::new(&["a"], vec![]).await;
    let registry = RunRegistry::new();
    let guard = registry.try_acquire(RESOURCE).unwrap();

    let job = fx.job(pull_task()).with_registry(registry.clone());
    let err = job.run().await.unwrap_err();
    assert!(matches!(err, JobError::AlreadyRunning { .. }));

    drop(guard);
    assert!(job.run().await.is_ok());
    assert!(!registry.is_running(RESOURCE));
}

#[tokio::test]
async fn test_invalid_task_rejected_before_fetching() {
    let fx = Fixture::new(&["a"], vec![]).await;
    fx.connector.set_fail_fetch(true);
    let task = TaskConfig::new(RESOURCE, idsync_provisioning::Direction::Pull);

    let err = fx.job(task).run().await.unwrap_err();

    assert!(matches!(err, JobError::Configuration { .. }));
}

#[tokio::test]
async fn test_resource_object_unchanged_by_update_pull() {
    let fx = Fixture::new(&["a"], vec![user("a").with_resource(RESOURCE)]).await;
    let task = pull_task()
        .with_rules(UnmatchingRule::Ignore, MatchingRule::Update)
        .with_gates(false, true, false);

    fx.job(task).run().await.unwrap();

    // The pulled resource is the source of truth; it is not written back.
    let object = fx
        .connector
        .get(ObjectClass::Account, &Uid::new("uid", "a"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(object.get_string("mail"), Some("a@example.com"));
    assert_eq!(fx.connector.write_count(), 0);
}
