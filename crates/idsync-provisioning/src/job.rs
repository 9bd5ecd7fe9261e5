//! Reconciliation jobs.
//!
//! A [`PullJob`] enumerates a resource (incrementally from the stored sync
//! token, or by a full or filtered scan) and hands every object to the pull
//! handler. A [`PushJob`] walks the local records and hands every key to the
//! push handler. Both render a [`JobReport`] at the end of the run.
//!
//! A pull reads everything it will process before handling the first record:
//! the handlers write to the resource being enumerated, so paging through it
//! while processing would shift later objects out of reach. Changes to the
//! same object within one window are folded into one delta.
//!
//! Record-level errors end up in the report. Only enumeration, token
//! persistence, remediation storage, local store listing and run-level action
//! hooks abort a run.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use idsync_connector::prelude::{Connector, FullConnector, PageRequest, SearchOp, SyncCapable, Uid};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::actions::{ActionPipeline, PullActions, PushActions};
use crate::audit::EventSinks;
use crate::config::TaskConfig;
use crate::context::RunContext;
use crate::error::{JobError, JobResult};
use crate::handler::{PullHandler, PushHandler};
use crate::mapping::Provision;
use crate::outcome::ProvisioningOutcome;
use crate::propagation::{ConnectorPropagation, Propagation, ResourceBinding};
use crate::record::{ExternalRecord, SyncDelta};
use crate::remediation::{Remediation, RemediationStore};
use crate::report::{ReportGenerator, RunSummary};
use crate::store::IdentityStore;
use crate::token::SyncTokenStore;
use crate::types::{Direction, PullMode};

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    /// Task name.
    pub task: String,
    /// Resource reconciled.
    pub resource: String,
    /// Pull or push.
    pub direction: Direction,
    /// Whether side effects were suppressed.
    pub dry_run: bool,
    /// One outcome per processed record, in processing order.
    pub outcomes: Vec<ProvisioningOutcome>,
    /// Rendered report, absent at trace level `NONE`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    /// Failed pull records queued for retry.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remediations: Vec<Remediation>,
    /// Counters.
    pub summary: RunSummary,
    /// Whether sync tokens were persisted.
    pub tokens_advanced: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl JobReport {
    fn build(ctx: RunContext, started_at: DateTime<Utc>, started: Instant, tokens: bool) -> Self {
        let task = ctx.task().clone();
        let dry_run = ctx.is_dry_run();
        let (outcomes, remediations) = ctx.into_results();
        Self {
            report: ReportGenerator::render(&outcomes, task.trace_level, dry_run),
            summary: RunSummary::from_outcomes(&outcomes),
            task: task.name,
            resource: task.resource,
            direction: task.direction,
            dry_run,
            outcomes,
            remediations,
            tokens_advanced: tokens,
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether any record failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }
}

/// Resources with an active run.
///
/// Cloning shares the registry. [`RunRegistry::global`] is shared by every
/// job that is not given its own registry.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    #[must_use]
    pub fn global() -> Self {
        static GLOBAL: OnceLock<RunRegistry> = OnceLock::new();
        GLOBAL.get_or_init(RunRegistry::new).clone()
    }

    /// Mark `resource` as running until the returned guard is dropped.
    pub fn try_acquire(&self, resource: &str) -> Result<RunGuard, JobError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(resource.to_string()) {
            return Err(JobError::AlreadyRunning {
                resource: resource.to_string(),
            });
        }
        Ok(RunGuard {
            registry: self.clone(),
            resource: resource.to_string(),
        })
    }

    /// Check if a run is active on `resource`.
    #[must_use]
    pub fn is_running(&self, resource: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(resource)
    }
}

/// Releases a resource when dropped.
#[derive(Debug)]
pub struct RunGuard {
    registry: RunRegistry,
    resource: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.resource);
    }
}

/// Error left by the handler that stopped the run.
fn aborted(ctx: &mut RunContext) -> JobError {
    ctx.take_abort()
        .unwrap_or_else(|| JobError::configuration("run stopped without an error"))
}

/// Propagation writing to the task's own resource through `connector`.
fn task_propagation(task: &TaskConfig, connector: &Arc<dyn FullConnector>) -> ConnectorPropagation {
    let binding = ResourceBinding::new(connector.clone(), task.provisions.clone());
    ConnectorPropagation::new().with_resource(task.resource.clone(), binding)
}

/// Fold changes to the same object into its latest change, in order of
/// first appearance.
///
/// A rename joins the entry of the identifier it replaces, and the surviving
/// delta keeps correlating on the oldest identifier of the chain.
fn coalesce(deltas: Vec<SyncDelta>) -> Vec<SyncDelta> {
    let mut slots: Vec<Option<SyncDelta>> = Vec::with_capacity(deltas.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for mut delta in deltas {
        let current = delta.uid_value().to_string();
        let mut earlier: Vec<usize> = delta
            .object
            .previous_uid
            .as_ref()
            .map(|p| p.value().to_string())
            .into_iter()
            .chain(std::iter::once(current.clone()))
            .filter_map(|id| positions.remove(&id))
            .collect();
        earlier.sort_unstable();
        earlier.dedup();

        let slot = match earlier.first() {
            Some(&first) => {
                if let Some(oldest) = slots.get_mut(first).and_then(Option::take) {
                    let origin = oldest.object.previous_uid.unwrap_or(oldest.object.uid);
                    if origin.value() != current {
                        delta.object.previous_uid = Some(origin);
                    }
                }
                for &later in &earlier[1..] {
                    if let Some(superseded) = slots.get_mut(later) {
                        *superseded = None;
                    }
                }
                first
            }
            None => {
                slots.push(None);
                slots.len() - 1
            }
        };

        positions.insert(current, slot);
        if let Some(entry) = slots.get_mut(slot) {
            *entry = Some(delta);
        }
    }

    slots.into_iter().flatten().collect()
}

fn check_direction(task: &TaskConfig, expected: Direction) -> Result<(), JobError> {
    if task.direction != expected {
        return Err(JobError::configuration(format!(
            "task {} is a {} task, not {}",
            task.name, task.direction, expected
        )));
    }
    Ok(())
}

/// Pulls a resource into the identity store.
pub struct PullJob {
    task: TaskConfig,
    connector: Arc<dyn FullConnector>,
    store: Arc<dyn IdentityStore>,
    tokens: Arc<dyn SyncTokenStore>,
    propagation: Arc<dyn Propagation>,
    actions: ActionPipeline<dyn PullActions>,
    sinks: EventSinks,
    registry: RunRegistry,
    remediations: Option<Arc<dyn RemediationStore>>,
}

impl PullJob {
    /// Create a pull job.
    ///
    /// Only the pulled resource is registered for propagation; writes to
    /// other resources are skipped until
    /// [`with_propagation`](Self::with_propagation) registers them.
    pub fn new(
        task: TaskConfig,
        connector: Arc<dyn FullConnector>,
        store: Arc<dyn IdentityStore>,
        tokens: Arc<dyn SyncTokenStore>,
    ) -> Self {
        let propagation = task_propagation(&task, &connector);
        Self {
            task,
            connector,
            store,
            tokens,
            propagation: Arc::new(propagation),
            actions: ActionPipeline::new(),
            sinks: EventSinks::new(),
            registry: RunRegistry::global(),
            remediations: None,
        }
    }

    /// Set the propagation using builder pattern.
    #[must_use]
    pub fn with_propagation(mut self, propagation: Arc<dyn Propagation>) -> Self {
        self.propagation = propagation;
        self
    }

    /// Persist remediation entries to `store`. Without one they are only
    /// returned on the report.
    #[must_use]
    pub fn with_remediation_store(mut self, store: Arc<dyn RemediationStore>) -> Self {
        self.remediations = Some(store);
        self
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

    /// Set the run registry using builder pattern.
    #[must_use]
    pub fn with_registry(mut self, registry: RunRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The task this job runs.
    pub fn task(&self) -> &TaskConfig {
        &self.task
    }

    /// Run the task once.
    #[instrument(
        skip(self),
        fields(
            task = %self.task.name,
            resource = %self.task.resource,
            mode = %self.task.pull_mode,
            dry_run = self.task.dry_run
        )
    )]
    pub async fn run(&self) -> JobResult<JobReport> {
        let started = Instant::now();
        let started_at = Utc::now();

        self.task.validate()?;
        check_direction(&self.task, Direction::Pull)?;
        let _guard = self.registry.try_acquire(&self.task.resource)?;

        let handler = PullHandler::new(self.store.clone(), self.propagation.clone())
            .with_actions(self.actions.clone())
            .with_sinks(self.sinks.clone());
        let mut ctx = RunContext::new(self.task.clone());

        if !ctx.is_dry_run() {
            self.actions.before_all(&ctx).await?;
        }
        info!(connector = self.connector.display_name(), "Pull started");

        for provision in self.task.ordered_provisions() {
            match self.task.pull_mode {
                PullMode::Incremental => self.pull_changes(&handler, &mut ctx, provision).await?,
                PullMode::FullReconciliation => {
                    self.reconcile(&handler, &mut ctx, provision, false).await?;
                }
                PullMode::FilteredReconciliation => {
                    self.reconcile(&handler, &mut ctx, provision, true).await?;
                }
            }
        }

        self.save_remediations(&ctx).await?;
        let tokens_advanced = self.persist_tokens(&ctx).await?;

        if !ctx.is_dry_run() {
            self.actions.after_all(&ctx).await?;
        }

        let report = JobReport::build(ctx, started_at, started, tokens_advanced);
        info!(
            processed = report.summary.processed,
            failed = report.summary.failed,
            remediations = report.remediations.len(),
            tokens_advanced,
            duration_ms = report.duration_ms,
            "Pull completed"
        );
        Ok(report)
    }

    /// Process every change since the stored token.
    async fn pull_changes(
        &self,
        handler: &PullHandler,
        ctx: &mut RunContext,
        provision: &Provision,
    ) -> Result<(), JobError> {
        let resource = &self.task.resource;
        let class = provision.object_class;
        let mut token = self
            .tokens
            .get(resource, class)
            .await?
            .filter(|t| t.can_resume())
            .map(|t| t.token_value);
        debug!(object_class = %class, token = ?token, "Fetching changes");

        let mut deltas = Vec::new();
        loop {
            let batch = self
                .connector
                .fetch_changes(class, token.as_deref(), self.task.batch_size)
                .await
                .map_err(|e| JobError::connector(resource, e))?;
            debug!(object_class = %class, changes = batch.changes.len(), "Batch fetched");

            for change in batch.changes {
                if let Some(change_token) = &change.token {
                    ctx.advance_token(class, change_token.clone());
                }
                deltas.push(SyncDelta::from(change));
            }

            if let Some(new_token) = &batch.new_token {
                ctx.advance_token(class, new_token.clone());
            }

            if !batch.has_more {
                break;
            }
            if batch.new_token.is_none() || batch.new_token == token {
                warn!(
                    object_class = %class,
                    "Connector reported more changes without moving the token"
                );
                break;
            }
            token = batch.new_token;
        }

        let fetched = deltas.len();
        let deltas = coalesce(deltas);
        debug!(object_class = %class, fetched, objects = deltas.len(), "Changes coalesced");

        for delta in deltas {
            if !handler.handle(ctx, provision, delta).await {
                return Err(aborted(ctx));
            }
        }
        Ok(())
    }

    /// Process every object of the provision's class, page by page.
    async fn reconcile(
        &self,
        handler: &PullHandler,
        ctx: &mut RunContext,
        provision: &Provision,
        filtered: bool,
    ) -> Result<(), JobError> {
        let resource = &self.task.resource;
        let class = provision.object_class;
        let filter = if filtered {
            self.task.reconciliation_filter.clone()
        } else {
            None
        };
        let mut offset = 0u32;
        let mut objects = Vec::new();

        loop {
            let page = PageRequest::new(self.task.batch_size).with_offset(offset);
            let result = self
                .connector
                .search(class, filter.clone(), Some(page))
                .await
                .map_err(|e| JobError::connector(resource, e))?;
            let count = u32::try_from(result.objects.len()).unwrap_or(u32::MAX);
            debug!(object_class = %class, offset, count, "Page fetched");
            objects.extend(result.objects);

            if !result.has_more || count == 0 {
                break;
            }
            offset = offset.saturating_add(count);
        }

        for attributes in objects {
            let Some(value) = attributes.get_string(&provision.key.external) else {
                warn!(
                    object_class = %class,
                    attribute = %provision.key.external,
                    "Object without key attribute skipped"
                );
                continue;
            };
            let uid = Uid::new(provision.key.external.clone(), value);
            let object = ExternalRecord::new(uid, class, attributes);
            let delta = SyncDelta::create_or_update(object);
            if !handler.handle(ctx, provision, delta).await {
                return Err(aborted(ctx));
            }
        }
        Ok(())
    }

    /// Hand the run's remediation entries to the configured store.
    async fn save_remediations(&self, ctx: &RunContext) -> Result<(), JobError> {
        let Some(store) = &self.remediations else {
            return Ok(());
        };
        let entries = ctx.remediations();
        if entries.is_empty() {
            return Ok(());
        }
        store.save(entries).await?;
        info!(entries = entries.len(), "Remediation entries saved");
        Ok(())
    }

    /// Store the latest token of every class in one write, when allowed.
    async fn persist_tokens(&self, ctx: &RunContext) -> Result<bool, JobError> {
        if ctx.is_dry_run() {
            debug!("Dry run, sync tokens left untouched");
            return Ok(false);
        }
        if !self.task.pull_mode.uses_sync_token() {
            return Ok(false);
        }
        let latest = ctx.latest_tokens();
        if latest.is_empty() {
            return Ok(false);
        }
        self.tokens.put_all(&self.task.resource, &latest).await?;
        info!(classes = latest.len(), "Sync tokens advanced");
        Ok(true)
    }
}

/// Pushes local records to a resource.
pub struct PushJob {
    task: TaskConfig,
    connector: Arc<dyn FullConnector>,
    store: Arc<dyn IdentityStore>,
    propagation: Arc<dyn Propagation>,
    actions: ActionPipeline<dyn PushActions>,
    sinks: EventSinks,
    registry: RunRegistry,
}

impl PushJob {
    /// Create a push job writing through `connector`.
    pub fn new(
        task: TaskConfig,
        connector: Arc<dyn FullConnector>,
        store: Arc<dyn IdentityStore>,
    ) -> Self {
        let propagation = task_propagation(&task, &connector);
        Self {
            task,
            connector,
            store,
            propagation: Arc::new(propagation),
            actions: ActionPipeline::new(),
            sinks: EventSinks::new(),
            registry: RunRegistry::global(),
        }
    }

    /// Set the propagation using builder pattern.
    #[must_use]
    pub fn with_propagation(mut self, propagation: Arc<dyn Propagation>) -> Self {
        self.propagation = propagation;
        self
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

    /// Set the run registry using builder pattern.
    #[must_use]
    pub fn with_registry(mut self, registry: RunRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The task this job runs.
    pub fn task(&self) -> &TaskConfig {
        &self.task
    }

    /// Run the task once.
    #[instrument(
        skip(self),
        fields(task = %self.task.name, resource = %self.task.resource, dry_run = self.task.dry_run)
    )]
    pub async fn run(&self) -> JobResult<JobReport> {
        let started = Instant::now();
        let started_at = Utc::now();

        self.task.validate()?;
        check_direction(&self.task, Direction::Push)?;
        let _guard = self.registry.try_acquire(&self.task.resource)?;

        let handler = PushHandler::new(
            self.connector.clone(),
            self.store.clone(),
            self.propagation.clone(),
        )
        .with_actions(self.actions.clone())
        .with_sinks(self.sinks.clone());
        let mut ctx = RunContext::new(self.task.clone());

        if !ctx.is_dry_run() {
            self.actions.before_all(&ctx).await?;
        }
        info!(connector = self.connector.display_name(), "Push started");

        for provision in self.task.ordered_provisions() {
            let keys = self.store.list_keys(provision.kind).await?;
            debug!(kind = %provision.kind, records = keys.len(), "Pushing local records");
            for key in keys {
                if !handler.handle(&mut ctx, provision, key).await {
                    return Err(aborted(&mut ctx));
                }
            }
        }

        if !ctx.is_dry_run() {
            self.actions.after_all(&ctx).await?;
        }

        let report = JobReport::build(ctx, started_at, started, false);
        info!(
            processed = report.summary.processed,
            failed = report.summary.failed,
            duration_ms = report.duration_ms,
            "Push completed"
        );
        Ok(report)
    }
}
