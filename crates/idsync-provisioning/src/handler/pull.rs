//! Pull result handler.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{enabled_status, gate_message, Audit};
use crate::actions::{ActionPipeline, PullActions, PullStage};
use crate::audit::{EventResult, EventSinks};
use crate::context::{RecordId, RunContext};
use crate::error::{JobError, ProvisioningError, ProvisioningResult};
use crate::mapping::{InboundValues, Provision};
use crate::outcome::ProvisioningOutcome;
use crate::propagation::{Propagation, ENABLE_ATTRIBUTE};
use crate::record::{DeltaKind, LocalRecord, MatchResult, SyncDelta};
use crate::remediation::Remediation;
use crate::rules::{evaluate, MatchingRule, RuleDecision, TaskGate, UnmatchingRule};
use crate::store::IdentityStore;
use crate::types::{AnyKind, ConflictResolution, Direction, ResourceOperation};

/// Action selected for a pulled record.
enum PullAction {
    Create { assign: bool },
    Update(LocalRecord),
    Deprovision(LocalRecord),
    Unassign(LocalRecord),
    Link(LocalRecord),
    Unlink(LocalRecord),
}

impl PullAction {
    /// `None` when the rule has nothing to do.
    fn plan(decision: RuleDecision, local: Option<LocalRecord>) -> Option<Self> {
        match (decision, local) {
            (RuleDecision::Unmatched(UnmatchingRule::Assign), _) => {
                Some(Self::Create { assign: true })
            }
            (RuleDecision::Unmatched(UnmatchingRule::Provision), _) => {
                Some(Self::Create { assign: false })
            }
            (RuleDecision::Matched(MatchingRule::Update), Some(l)) => Some(Self::Update(l)),
            (RuleDecision::Matched(MatchingRule::Deprovision), Some(l)) => {
                Some(Self::Deprovision(l))
            }
            (RuleDecision::Matched(MatchingRule::Unassign), Some(l)) => Some(Self::Unassign(l)),
            (RuleDecision::Matched(MatchingRule::Link), Some(l)) => Some(Self::Link(l)),
            (RuleDecision::Matched(MatchingRule::Unlink), Some(l)) => Some(Self::Unlink(l)),
            _ => None,
        }
    }
}

/// Reconciles deltas read from a resource into the identity store.
pub struct PullHandler {
    store: Arc<dyn IdentityStore>,
    propagation: Arc<dyn Propagation>,
    actions: ActionPipeline<dyn PullActions>,
    sinks: EventSinks,
}

impl PullHandler {
    /// Create a handler without actions or event sinks.
    pub fn new(store: Arc<dyn IdentityStore>, propagation: Arc<dyn Propagation>) -> Self {
        Self {
            store,
            propagation,
            actions: ActionPipeline::new(),
            sinks: EventSinks::new(),
        }
    }

    /// Set the actions using builder pattern.
    #[must_use]
    pub fn with_actions(mut self, actions: ActionPipeline<dyn PullActions>) -> Self {
        self.actions = actions;
        self
    }

    /// Set the event sinks using builder pattern.
    #[must_use]
    pub fn with_sinks(mut self, sinks: EventSinks) -> Self {
        self.sinks = sinks;
        self
    }

    /// The configured actions.
    pub fn actions(&self) -> &ActionPipeline<dyn PullActions> {
        &self.actions
    }

    /// Process one delta, appending at most one outcome to `ctx`.
    ///
    /// Returns `false` when the identity store cannot be queried; the error
    /// is left in the context.
    #[instrument(
        skip_all,
        fields(resource = %ctx.task().resource, kind = %provision.kind, uid = %delta.uid_value())
    )]
    pub async fn handle(
        &self,
        ctx: &mut RunContext,
        provision: &Provision,
        delta: SyncDelta,
    ) -> bool {
        let id = RecordId::external(delta.object.object_class, delta.object.correlation_value());
        if ctx.is_recorded(&id) {
            warn!("Record already handled in this run, skipped");
            return true;
        }
        let retry = (ctx.task().remediation && !ctx.is_dry_run()).then(|| delta.clone());

        let matches = match self
            .store
            .find_by_attribute(
                provision.kind,
                &provision.key.internal,
                delta.object.correlation_value(),
            )
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                error!(error = %e, "Correlation query failed");
                ctx.abort(JobError::Store(e));
                return false;
            }
        };

        let local = match pick_match(ctx.task().conflict_resolution, matches.into()) {
            Ok(local) => local,
            Err(count) => {
                let operation = match delta.kind {
                    DeltaKind::Delete => ResourceOperation::Delete,
                    DeltaKind::CreateOrUpdate => evaluate(true, &ctx.task().rules()).operation(),
                };
                let message = format!("more than one match ({count} local records)");
                let outcome =
                    ProvisioningOutcome::success(provision.kind, operation, delta.uid_value())
                        .with_uid(delta.uid_value());
                let outcome = if ctx.is_dry_run() {
                    warn!(count, "More than one local record matches");
                    outcome.with_message(message)
                } else {
                    error!(count, "More than one local record matches");
                    outcome.into_failure(message)
                };
                finish(ctx, id, outcome, retry);
                return true;
            }
        };

        let outcome = match (delta.kind, local) {
            (DeltaKind::Delete, None) => {
                debug!("Nothing to delete locally");
                return true;
            }
            (DeltaKind::Delete, Some(local)) => self.delete(ctx, provision, delta, local).await,
            (DeltaKind::CreateOrUpdate, local) => {
                self.create_or_update(ctx, provision, delta, local).await
            }
        };
        finish(ctx, id, outcome, retry);
        true
    }

    async fn create_or_update(
        &self,
        ctx: &mut RunContext,
        provision: &Provision,
        delta: SyncDelta,
        local: Option<LocalRecord>,
    ) -> ProvisioningOutcome {
        let decision = evaluate(local.is_some(), &ctx.task().rules());
        let name = match &local {
            Some(l) => l.name.clone(),
            None => self
                .inbound(provision, &delta)
                .map_or_else(|_| delta.uid_value().to_string(), |v| v.name),
        };
        let mut outcome = ProvisioningOutcome::success(provision.kind, decision.operation(), name)
            .with_uid(delta.uid_value());
        if let Some(l) = &local {
            outcome = outcome.with_key(l.key);
        }
        debug!(rule = %decision, operation = %outcome.operation, "Rule selected");

        if decision.is_ignore() {
            return outcome;
        }

        let audit = self.audit(ctx, provision.kind);
        let before = local.as_ref().and_then(|l| serde_json::to_value(l).ok());

        if let Some(gate) = decision.gate(Direction::Pull) {
            if !ctx.task().allows(gate) {
                debug!(gate = %gate, "Task gate disabled, action skipped");
                if !ctx.is_dry_run() {
                    audit
                        .emit(decision.event_name(), EventResult::Success, before, None)
                        .await;
                }
                return outcome.with_message(gate_message(gate));
            }
        }

        let Some(action) = PullAction::plan(decision, local) else {
            return outcome;
        };

        if ctx.is_dry_run() {
            return outcome;
        }

        match self.apply(ctx, provision, action, delta, &outcome).await {
            Ok(record) => {
                outcome = outcome.with_key(record.key).with_name(record.name.clone());
                info!(key = %record.key, rule = %decision, "Pulled record handled");
                let output = serde_json::to_value(&record).ok();
                audit
                    .emit(decision.event_name(), EventResult::Success, before, output)
                    .await;
                outcome
            }
            Err(e) => {
                let output = Some(serde_json::Value::String(e.to_string()));
                audit
                    .emit(decision.event_name(), EventResult::Failure, before, output)
                    .await;
                failed(outcome, e)
            }
        }
    }

    /// Run the action with its hooks; returns the resulting local record.
    async fn apply(
        &self,
        ctx: &mut RunContext,
        provision: &Provision,
        action: PullAction,
        delta: SyncDelta,
        outcome: &ProvisioningOutcome,
    ) -> ProvisioningResult<LocalRecord> {
        let resource = ctx.task().resource.clone();

        let (delta, record) = match action {
            PullAction::Create { assign } => {
                let stage = if assign {
                    PullStage::Assign
                } else {
                    PullStage::Provision
                };
                let delta = self.actions.before(stage, ctx, delta).await?;
                let values = self.inbound(provision, &delta)?;

                let mut record = LocalRecord::new(provision.kind, values.name)
                    .with_attributes(values.attributes);
                if assign {
                    record.resources.insert(resource.clone());
                }
                if let Some(enabled) = pulled_status(ctx, &delta) {
                    record.suspended = !enabled;
                }
                if provision.kind == AnyKind::Group {
                    record.members = self.resolve_members(ctx, provision, &delta).await?;
                }

                let created = self.store.create(record).await?;
                self.propagate_create(ctx, &created).await?;
                (delta, created)
            }
            PullAction::Update(local) => {
                let delta = self
                    .actions
                    .before(PullStage::Update(&local), ctx, delta)
                    .await?;
                let values = self.inbound(provision, &delta)?;

                let mut record = local.clone();
                record.name = values.name;
                record.attributes.merge(&values.attributes);
                if let Some(enabled) = pulled_status(ctx, &delta) {
                    record.suspended = !enabled;
                }
                if provision.kind == AnyKind::Group {
                    ctx.remember_members(local.key, local.members.clone());
                    record.members = self.resolve_members(ctx, provision, &delta).await?;
                }

                let updated = self.store.update(record).await?;
                self.propagate_update(ctx, &updated).await?;
                (delta, updated)
            }
            PullAction::Deprovision(local) => {
                let delta = self
                    .actions
                    .before(PullStage::Deprovision(&local), ctx, delta)
                    .await?;
                self.propagation.delete(&resource, &local).await?;
                (delta, local)
            }
            PullAction::Unassign(local) => {
                let delta = self
                    .actions
                    .before(PullStage::Unassign(&local), ctx, delta)
                    .await?;
                let mut record = local;
                record.resources.remove(&resource);
                let updated = self.store.update(record).await?;
                self.propagation.delete(&resource, &updated).await?;
                (delta, updated)
            }
            PullAction::Link(local) => {
                let delta = self
                    .actions
                    .before(PullStage::Link(&local), ctx, delta)
                    .await?;
                let mut record = local;
                record.resources.insert(resource);
                (delta, self.store.update(record).await?)
            }
            PullAction::Unlink(local) => {
                let delta = self
                    .actions
                    .before(PullStage::Unlink(&local), ctx, delta)
                    .await?;
                let mut record = local;
                record.resources.remove(&resource);
                (delta, self.store.update(record).await?)
            }
        };

        let done = outcome
            .clone()
            .with_key(record.key)
            .with_name(record.name.clone());
        self.actions.after(ctx, &delta, Some(&record), &done).await?;
        Ok(record)
    }

    async fn delete(
        &self,
        ctx: &mut RunContext,
        provision: &Provision,
        delta: SyncDelta,
        local: LocalRecord,
    ) -> ProvisioningOutcome {
        let outcome = ProvisioningOutcome::success(
            provision.kind,
            ResourceOperation::Delete,
            local.name.clone(),
        )
        .with_key(local.key)
        .with_uid(delta.uid_value());

        let audit = self.audit(ctx, provision.kind);
        let before = serde_json::to_value(&local).ok();

        if !ctx.task().allows(TaskGate::Delete) {
            debug!("Pull task not configured for delete");
            if !ctx.is_dry_run() {
                audit.emit("delete", EventResult::Success, before, None).await;
            }
            return outcome.with_message(gate_message(TaskGate::Delete));
        }
        if ctx.is_dry_run() {
            return outcome;
        }

        let result = self.remove_local(ctx, delta, &local, &outcome).await;

        match result {
            Ok(()) => {
                info!(key = %local.key, "Local record deleted");
                audit.emit("delete", EventResult::Success, before, None).await;
                outcome
            }
            Err(e) => {
                let output = Some(serde_json::Value::String(e.to_string()));
                audit.emit("delete", EventResult::Failure, before, output).await;
                failed(outcome, e)
            }
        }
    }

    async fn remove_local(
        &self,
        ctx: &RunContext,
        delta: SyncDelta,
        local: &LocalRecord,
        outcome: &ProvisioningOutcome,
    ) -> ProvisioningResult<()> {
        let delta = self
            .actions
            .before(PullStage::Delete(local), ctx, delta)
            .await?;
        self.store.delete(local.key).await?;
        let resource = &ctx.task().resource;
        for other in local.resources.iter().filter(|r| *r != resource) {
            self.propagation.delete(other, local).await?;
        }
        self.actions.after(ctx, &delta, None, outcome).await
    }

    fn inbound(
        &self,
        provision: &Provision,
        delta: &SyncDelta,
    ) -> ProvisioningResult<InboundValues> {
        let key_value = delta
            .object
            .attributes
            .get_string(&provision.key.external)
            .unwrap_or_else(|| delta.uid_value());
        provision.inbound(key_value, &delta.object.attributes)
    }

    /// Resolve a group's member identifiers into local user keys.
    async fn resolve_members(
        &self,
        ctx: &RunContext,
        provision: &Provision,
        delta: &SyncDelta,
    ) -> ProvisioningResult<BTreeSet<Uuid>> {
        let user_key = ctx
            .task()
            .provisions
            .iter()
            .find(|p| p.kind == AnyKind::User)
            .map_or(crate::record::NAME_ATTRIBUTE, |p| p.key.internal.as_str());

        let mut members = BTreeSet::new();
        for member in provision.member_ids(&delta.object.attributes) {
            let found = self
                .store
                .find_by_attribute(AnyKind::User, user_key, member)
                .await?;
            match found.as_slice() {
                [user] => {
                    members.insert(user.key);
                }
                [] => debug!(member, "Member not found locally, skipped"),
                _ => warn!(member, "Member matches several users, skipped"),
            }
        }
        Ok(members)
    }

    async fn propagate_create(
        &self,
        ctx: &RunContext,
        record: &LocalRecord,
    ) -> ProvisioningResult<()> {
        let enabled = enabled_status(ctx.task(), record);
        for resource in record.resources.iter().filter(|r| **r != ctx.task().resource) {
            self.propagation.create(resource, record, enabled).await?;
        }
        Ok(())
    }

    async fn propagate_update(
        &self,
        ctx: &RunContext,
        record: &LocalRecord,
    ) -> ProvisioningResult<()> {
        let enabled = enabled_status(ctx.task(), record);
        for resource in record.resources.iter().filter(|r| **r != ctx.task().resource) {
            self.propagation.update(resource, record, enabled).await?;
        }
        Ok(())
    }

    fn audit(&self, ctx: &RunContext, kind: AnyKind) -> Audit<'_> {
        Audit {
            sinks: &self.sinks,
            category: Direction::Pull,
            kind,
            resource: ctx.task().resource.clone(),
        }
    }
}

/// Keep one of several matches, or report how many there were.
fn pick_match(
    resolution: ConflictResolution,
    found: MatchResult,
) -> Result<Option<LocalRecord>, usize> {
    let MatchResult::Matched(mut matches) = found else {
        return Ok(None);
    };
    match (matches.len(), resolution) {
        (0, _) => Ok(None),
        (1, _) | (_, ConflictResolution::LastMatch) => Ok(matches.pop()),
        (_, ConflictResolution::FirstMatch) => Ok(Some(matches.swap_remove(0))),
        (count, ConflictResolution::Ignore) => Err(count),
    }
}

/// Append the outcome, queueing a remediation entry for a failure.
///
/// `retry` is the incoming change, kept only when the task asks for
/// remediation.
fn finish(
    ctx: &mut RunContext,
    id: RecordId,
    outcome: ProvisioningOutcome,
    retry: Option<SyncDelta>,
) {
    let entry = retry
        .filter(|_| outcome.is_failure())
        .map(|delta| Remediation::from_failure(ctx.task(), &outcome, &delta));
    if !ctx.record(id, outcome) {
        return;
    }
    if let Some(entry) = entry {
        debug!(remediation = %entry.id, "Failed record queued for remediation");
        ctx.add_remediation(entry);
    }
}

/// Enabled status carried by the delta, when the task synchronizes status.
fn pulled_status(ctx: &RunContext, delta: &SyncDelta) -> Option<bool> {
    if !ctx.task().sync_status {
        return None;
    }
    delta
        .object
        .attributes
        .get(ENABLE_ATTRIBUTE)
        .and_then(|v| v.as_boolean())
}

fn failed(outcome: ProvisioningOutcome, error: ProvisioningError) -> ProvisioningOutcome {
    if error.is_ignored() {
        warn!(error = %error, "Record ignored by action");
        let mut ignored = outcome.into_ignored(error.to_string());
        ignored.operation = ResourceOperation::None;
        return ignored;
    }
    let message = error.root_cause_message();
    error!(error = %error, "Could not handle pulled record");
    outcome.into_failure(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> LocalRecord {
        LocalRecord::new(AnyKind::User, name)
    }

    #[test]
    fn test_pick_match() {
        assert_eq!(pick_match(ConflictResolution::Ignore, MatchResult::Unmatched), Ok(None));

        let single = pick_match(ConflictResolution::Ignore, vec![record("a")].into()).unwrap();
        assert_eq!(single.unwrap().name, "a");

        let both = || MatchResult::from(vec![record("a"), record("b")]);
        assert_eq!(pick_match(ConflictResolution::Ignore, both()), Err(2));
        let first = pick_match(ConflictResolution::FirstMatch, both()).unwrap();
        assert_eq!(first.unwrap().name, "a");
        let last = pick_match(ConflictResolution::LastMatch, both()).unwrap();
        assert_eq!(last.unwrap().name, "b");
    }

    #[test]
    fn test_plan_without_match_is_noop_for_matching_rules() {
        assert!(PullAction::plan(RuleDecision::Matched(MatchingRule::Update), None).is_none());
        assert!(PullAction::plan(RuleDecision::Unmatched(UnmatchingRule::Unlink), None).is_none());
        assert!(matches!(
            PullAction::plan(RuleDecision::Unmatched(UnmatchingRule::Provision), None),
            Some(PullAction::Create { assign: false })
        ));
    }
}
