//! Push result handler.

use std::sync::Arc;

use idsync_connector::prelude::{AttributeSet, FullConnector, SearchOp, Uid};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{enabled_status, gate_message, Audit};
use crate::actions::{ActionPipeline, PushActions, PushStage};
use crate::audit::{EventResult, EventSinks};
use crate::context::{RecordId, RunContext};
use crate::error::{JobError, ProvisioningError, ProvisioningResult};
use crate::mapping::Provision;
use crate::outcome::ProvisioningOutcome;
use crate::propagation::Propagation;
use crate::record::LocalRecord;
use crate::rules::{evaluate, MatchingRule, RuleDecision, UnmatchingRule};
use crate::store::IdentityStore;
use crate::types::{Direction, ResourceOperation};

/// Reconciles local records out to a resource.
pub struct PushHandler {
    connector: Arc<dyn FullConnector>,
    store: Arc<dyn IdentityStore>,
    propagation: Arc<dyn Propagation>,
    actions: ActionPipeline<dyn PushActions>,
    sinks: EventSinks,
}

impl PushHandler {
    /// Create a handler without actions or event sinks.
    ///
    /// `connector` is only read from; writes go through `propagation`.
    pub fn new(
        connector: Arc<dyn FullConnector>,
        store: Arc<dyn IdentityStore>,
        propagation: Arc<dyn Propagation>,
    ) -> Self {
        Self {
            connector,
            store,
            propagation,
            actions: ActionPipeline::new(),
            sinks: EventSinks::new(),
        }
    }

    /// Set the actions using builder pattern.
    #[must_use]
    pub fn with_actions(mut self, actions: ActionPipeline<dyn PushActions>) -> Self {
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
    pub fn actions(&self) -> &ActionPipeline<dyn PushActions> {
        &self.actions
    }

    /// Push one local record, appending one outcome to `ctx`.
    ///
    /// Returns `false` when the identity store cannot be read; the error is
    /// left in the context.
    #[instrument(skip_all, fields(resource = %ctx.task().resource, kind = %provision.kind, %key))]
    pub async fn handle(&self, ctx: &mut RunContext, provision: &Provision, key: Uuid) -> bool {
        let id = RecordId::local(key);
        if ctx.is_recorded(&id) {
            warn!("Record already handled in this run, skipped");
            return true;
        }

        let record = match self.store.find(key).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Local record vanished before push");
                let outcome =
                    ProvisioningOutcome::success(provision.kind, ResourceOperation::None, "")
                        .with_key(key)
                        .into_failure(
                            ProvisioningError::not_found(provision.kind.as_str(), key.to_string())
                                .to_string(),
                        );
                ctx.record(id, outcome);
                return true;
            }
            Err(e) => {
                error!(error = %e, "Local record lookup failed");
                ctx.abort(JobError::Store(e));
                return false;
            }
        };

        let outcome = self.push(ctx, provision, record).await;
        ctx.record(id, outcome);
        true
    }

    async fn push(
        &self,
        ctx: &mut RunContext,
        provision: &Provision,
        record: LocalRecord,
    ) -> ProvisioningOutcome {
        let audit = Audit {
            sinks: &self.sinks,
            category: Direction::Push,
            kind: provision.kind,
            resource: ctx.task().resource.clone(),
        };
        let account_id = provision.account_id(&record);
        let mut outcome =
            ProvisioningOutcome::success(provision.kind, ResourceOperation::None, &record.name)
                .with_key(record.key);
        if let Some(account_id) = &account_id {
            outcome = outcome.with_uid(account_id.clone());
        }

        let before = match self.read(provision, account_id.as_deref()).await {
            Ok(before) => before,
            Err(e) => {
                if !ctx.is_dry_run() {
                    let output = Some(serde_json::Value::String(e.to_string()));
                    audit.emit("push", EventResult::Failure, None, output).await;
                }
                return failed(outcome, e);
            }
        };

        let decision = evaluate(before.is_some(), &ctx.task().rules());
        outcome.operation = decision.operation();
        debug!(rule = %decision, operation = %outcome.operation, "Rule selected");

        if decision.is_ignore() {
            return outcome;
        }
        if let Some(gate) = decision.gate(Direction::Push) {
            if !ctx.task().allows(gate) {
                debug!(gate = %gate, "Task gate disabled, action skipped");
                return outcome.with_message(gate_message(gate));
            }
        }
        let Some(stage) = stage_of(decision) else {
            return outcome;
        };
        if ctx.is_dry_run() {
            return outcome;
        }

        let result = self.run(ctx, stage, record, &outcome).await;

        // The resource is read again whatever happened, for the audit trail.
        let after = match self.read_after(provision, &result, account_id.as_deref()).await {
            Ok(after) => after,
            Err(e) => {
                warn!(error = %e, "Could not read resource object after push");
                None
            }
        };

        let before = before.and_then(|b| serde_json::to_value(b).ok());
        match result {
            Ok(_) => {
                info!(rule = %decision, "Local record pushed");
                let output = after.and_then(|a| serde_json::to_value(a).ok());
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

    /// Run the stage's hooks, the action and the `after` hooks.
    async fn run(
        &self,
        ctx: &RunContext,
        stage: PushStage,
        record: LocalRecord,
        outcome: &ProvisioningOutcome,
    ) -> ProvisioningResult<LocalRecord> {
        let resource = ctx.task().resource.as_str();
        let enabled = enabled_status(ctx.task(), &record);
        let mut record = self.actions.before(stage, ctx, record).await?;

        match stage {
            PushStage::Assign => {
                record.resources.insert(resource.to_string());
                record = self.store.update(record).await?;
                self.propagation.create(resource, &record, enabled).await?;
            }
            PushStage::Provision => {
                self.propagation.create(resource, &record, enabled).await?;
            }
            PushStage::Update => {
                self.propagation.update(resource, &record, enabled).await?;
            }
            PushStage::Deprovision => {
                self.propagation.delete(resource, &record).await?;
            }
            PushStage::Unassign => {
                record.resources.remove(resource);
                record = self.store.update(record).await?;
                self.propagation.delete(resource, &record).await?;
            }
            PushStage::Link => {
                record.resources.insert(resource.to_string());
                record = self.store.update(record).await?;
            }
            PushStage::Unlink => {
                record.resources.remove(resource);
                record = self.store.update(record).await?;
            }
        }

        self.actions.after(ctx, &record, outcome).await?;
        Ok(record)
    }

    async fn read(
        &self,
        provision: &Provision,
        account_id: Option<&str>,
    ) -> ProvisioningResult<Option<AttributeSet>> {
        let Some(account_id) = account_id else {
            return Ok(None);
        };
        let uid = Uid::new(provision.key.external.clone(), account_id);
        Ok(self.connector.get(provision.object_class, &uid).await?)
    }

    async fn read_after(
        &self,
        provision: &Provision,
        result: &ProvisioningResult<LocalRecord>,
        fallback: Option<&str>,
    ) -> ProvisioningResult<Option<AttributeSet>> {
        let account_id = match result {
            Ok(record) => provision.account_id(record),
            Err(_) => fallback.map(str::to_string),
        };
        self.read(provision, account_id.as_deref()).await
    }
}

/// Hook chain of a push rule, or `None` when the rule has nothing to do.
fn stage_of(decision: RuleDecision) -> Option<PushStage> {
    match decision {
        RuleDecision::Unmatched(UnmatchingRule::Assign) => Some(PushStage::Assign),
        RuleDecision::Unmatched(UnmatchingRule::Provision) => Some(PushStage::Provision),
        RuleDecision::Unmatched(UnmatchingRule::Unlink)
        | RuleDecision::Matched(MatchingRule::Unlink) => Some(PushStage::Unlink),
        RuleDecision::Matched(MatchingRule::Update) => Some(PushStage::Update),
        RuleDecision::Matched(MatchingRule::Deprovision) => Some(PushStage::Deprovision),
        RuleDecision::Matched(MatchingRule::Unassign) => Some(PushStage::Unassign),
        RuleDecision::Matched(MatchingRule::Link) => Some(PushStage::Link),
        RuleDecision::Unmatched(UnmatchingRule::Ignore)
        | RuleDecision::Matched(MatchingRule::Ignore) => None,
    }
}

fn failed(outcome: ProvisioningOutcome, error: ProvisioningError) -> ProvisioningOutcome {
    if error.is_ignored() {
        warn!(error = %error, "Record ignored by action");
        let mut ignored = outcome.into_ignored(error.to_string());
        ignored.operation = ResourceOperation::None;
        return ignored;
    }
    let message = error.root_cause_message();
    error!(error = %error, "Could not push local record");
    outcome.into_failure(message)
}
