//! Per-run state.
//!
//! Handlers keep no state of their own between records; everything a run
//! accumulates lives in a [`RunContext`] passed to them by `&mut`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use idsync_connector::ObjectClass;
use tracing::warn;
use uuid::Uuid;

use crate::config::TaskConfig;
use crate::error::JobError;
use crate::outcome::ProvisioningOutcome;
use crate::remediation::Remediation;

/// Identity of a processed record. A run keeps at most one outcome per id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    /// Object on the resource, by class and the identifier it correlates on.
    External {
        object_class: ObjectClass,
        uid: String,
    },
    /// Local record, by key.
    Local(Uuid),
}

impl RecordId {
    pub fn external(object_class: ObjectClass, uid: impl Into<String>) -> Self {
        Self::External {
            object_class,
            uid: uid.into(),
        }
    }

    pub fn local(key: Uuid) -> Self {
        Self::Local(key)
    }
}

/// State of a single run.
#[derive(Debug)]
pub struct RunContext {
    task: TaskConfig,
    dry_run: bool,
    recorded: HashSet<RecordId>,
    outcomes: Vec<ProvisioningOutcome>,
    remediations: Vec<Remediation>,
    members_before_update: HashMap<Uuid, BTreeSet<Uuid>>,
    latest_tokens: BTreeMap<ObjectClass, String>,
    aborted: Option<JobError>,
}

impl RunContext {
    /// Create a context for `task`.
    pub fn new(task: TaskConfig) -> Self {
        let dry_run = task.dry_run;
        Self {
            task,
            dry_run,
            recorded: HashSet::new(),
            outcomes: Vec::new(),
            remediations: Vec::new(),
            members_before_update: HashMap::new(),
            latest_tokens: BTreeMap::new(),
            aborted: None,
        }
    }

    /// The task being run.
    pub fn task(&self) -> &TaskConfig {
        &self.task
    }

    /// Whether side effects are suppressed.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Append the outcome of a record.
    ///
    /// Returns `false`, and keeps the first outcome, when `id` already has one.
    pub fn record(&mut self, id: RecordId, outcome: ProvisioningOutcome) -> bool {
        if self.recorded.contains(&id) {
            warn!(
                record = ?id,
                name = %outcome.name,
                operation = %outcome.operation,
                "Duplicate outcome rejected"
            );
            return false;
        }
        self.recorded.insert(id);
        self.outcomes.push(outcome);
        true
    }

    /// Whether `id` already has an outcome in this run.
    pub fn is_recorded(&self, id: &RecordId) -> bool {
        self.recorded.contains(id)
    }

    /// Queue a failed record for a later retry.
    pub fn add_remediation(&mut self, remediation: Remediation) {
        self.remediations.push(remediation);
    }

    /// Remediation entries queued so far.
    pub fn remediations(&self) -> &[Remediation] {
        &self.remediations
    }

    /// Outcomes so far, in processing order.
    pub fn outcomes(&self) -> &[ProvisioningOutcome] {
        &self.outcomes
    }

    /// Remember a group's members before it was updated.
    pub fn remember_members(&mut self, group: Uuid, members: BTreeSet<Uuid>) {
        self.members_before_update.insert(group, members);
    }

    /// Members a group had before this run updated it.
    pub fn members_before_update(&self, group: Uuid) -> Option<&BTreeSet<Uuid>> {
        self.members_before_update.get(&group)
    }

    /// Record the most recent token seen for an object class.
    pub fn advance_token(&mut self, object_class: ObjectClass, token: impl Into<String>) {
        self.latest_tokens.insert(object_class, token.into());
    }

    /// Latest tokens, one per object class.
    pub fn latest_tokens(&self) -> Vec<(ObjectClass, String)> {
        self.latest_tokens
            .iter()
            .map(|(class, token)| (*class, token.clone()))
            .collect()
    }

    /// Stop the run with a job-level error. The first error wins.
    pub fn abort(&mut self, error: JobError) {
        if self.aborted.is_none() {
            self.aborted = Some(error);
        }
    }

    /// Take the error that stopped the run, if any.
    pub fn take_abort(&mut self) -> Option<JobError> {
        self.aborted.take()
    }

    /// Consume the context, returning its outcomes and remediation entries.
    pub fn into_results(self) -> (Vec<ProvisioningOutcome>, Vec<Remediation>) {
        (self.outcomes, self.remediations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnyKind, Direction, ResourceOperation};

    fn ctx() -> RunContext {
        RunContext::new(TaskConfig::new("ldap", Direction::Pull))
    }

    #[test]
    fn test_duplicate_outcome_rejected() {
        let mut ctx = ctx();
        let first = ProvisioningOutcome::success(AnyKind::User, ResourceOperation::Create, "a");
        assert!(ctx.record(RecordId::external(ObjectClass::Account, "a"), first.clone()));

        // Same object seen again, e.g. a later change in the same window.
        let again = RecordId::external(ObjectClass::Account, "a");
        assert!(ctx.is_recorded(&again));
        assert!(!ctx.record(again, first.into_failure("again")));
        assert_eq!(ctx.outcomes().len(), 1);
        assert!(!ctx.outcomes()[0].is_failure());

        // Same uid in another class is another record.
        assert!(ctx.record(
            RecordId::external(ObjectClass::Group, "a"),
            ProvisioningOutcome::success(AnyKind::Group, ResourceOperation::Update, "a")
        ));
        let (outcomes, remediations) = ctx.into_results();
        assert_eq!(outcomes.len(), 2);
        assert!(remediations.is_empty());
    }

    #[test]
    fn test_local_records_keyed_by_key() {
        let mut ctx = ctx();
        let key = Uuid::new_v4();
        let outcome = ProvisioningOutcome::success(AnyKind::User, ResourceOperation::None, "a");
        assert!(ctx.record(RecordId::local(key), outcome.clone()));
        assert!(!ctx.record(RecordId::local(key), outcome.clone()));
        assert!(ctx.record(RecordId::local(Uuid::new_v4()), outcome));
        assert_eq!(ctx.outcomes().len(), 2);
    }

    #[test]
    fn test_latest_token_per_class() {
        let mut ctx = ctx();
        ctx.advance_token(ObjectClass::Account, "3");
        ctx.advance_token(ObjectClass::Group, "4");
        ctx.advance_token(ObjectClass::Account, "5");
        assert_eq!(
            ctx.latest_tokens(),
            vec![
                (ObjectClass::Account, "5".to_string()),
                (ObjectClass::Group, "4".to_string())
            ]
        );
    }

    #[test]
    fn test_first_abort_wins() {
        let mut ctx = ctx();
        ctx.abort(JobError::configuration("first"));
        ctx.abort(JobError::configuration("second"));
        let err = ctx.take_abort().unwrap();
        assert!(err.to_string().contains("first"));
        assert!(ctx.take_abort().is_none());
    }

    #[test]
    fn test_dry_run_follows_task() {
        let task = TaskConfig::new("ldap", Direction::Push).with_dry_run(true);
        assert!(RunContext::new(task).is_dry_run());
    }
}
