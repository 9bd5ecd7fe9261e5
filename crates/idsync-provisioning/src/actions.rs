//! Pull and push actions.
//!
//! Actions are user extensions invoked around every rule. Each `before_*`
//! hook may transform its input or refuse the action by returning an
//! error; [`ProvisioningError::Ignored`] skips the record instead of
//! failing it. Stages of an [`ActionPipeline`] run in configured order and
//! the first error stops the chain.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::RunContext;
use crate::error::{JobError, ProvisioningResult};
use crate::outcome::ProvisioningOutcome;
use crate::record::{LocalRecord, SyncDelta};

/// Extension hooks for pull tasks.
#[allow(unused_variables)]
#[async_trait]
pub trait PullActions: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Called once before any record, unless dry run.
    async fn before_all(&self, ctx: &RunContext) -> ProvisioningResult<()> {
        Ok(())
    }

    async fn before_assign(
        &self,
        ctx: &RunContext,
        delta: SyncDelta,
    ) -> ProvisioningResult<SyncDelta> {
        Ok(delta)
    }

    async fn before_provision(
        &self,
        ctx: &RunContext,
        delta: SyncDelta,
    ) -> ProvisioningResult<SyncDelta> {
        Ok(delta)
    }

    async fn before_update(
        &self,
        ctx: &RunContext,
        delta: SyncDelta,
        local: &LocalRecord,
    ) -> ProvisioningResult<SyncDelta> {
        Ok(delta)
    }

    async fn before_deprovision(
        &self,
        ctx: &RunContext,
        delta: SyncDelta,
        local: &LocalRecord,
    ) -> ProvisioningResult<SyncDelta> {
        Ok(delta)
    }

    async fn before_unassign(
        &self,
        ctx: &RunContext,
        delta: SyncDelta,
        local: &LocalRecord,
    ) -> ProvisioningResult<SyncDelta> {
        Ok(delta)
    }

    async fn before_link(
        &self,
        ctx: &RunContext,
        delta: SyncDelta,
        local: &LocalRecord,
    ) -> ProvisioningResult<SyncDelta> {
        Ok(delta)
    }

    async fn before_unlink(
        &self,
        ctx: &RunContext,
        delta: SyncDelta,
        local: &LocalRecord,
    ) -> ProvisioningResult<SyncDelta> {
        Ok(delta)
    }

    /// Called before a local record is deleted following a delete delta.
    async fn before_delete(
        &self,
        ctx: &RunContext,
        delta: SyncDelta,
        local: &LocalRecord,
    ) -> ProvisioningResult<SyncDelta> {
        Ok(delta)
    }

    /// Called after a successful action with its outcome.
    async fn after(
        &self,
        ctx: &RunContext,
        delta: &SyncDelta,
        local: Option<&LocalRecord>,
        outcome: &ProvisioningOutcome,
    ) -> ProvisioningResult<()> {
        Ok(())
    }

    /// Called once after every record, unless dry run.
    async fn after_all(&self, ctx: &RunContext) -> ProvisioningResult<()> {
        Ok(())
    }
}

/// Extension hooks for push tasks.
#[allow(unused_variables)]
#[async_trait]
pub trait PushActions: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    async fn before_all(&self, ctx: &RunContext) -> ProvisioningResult<()> {
        Ok(())
    }

    async fn before_assign(
        &self,
        ctx: &RunContext,
        record: LocalRecord,
    ) -> ProvisioningResult<LocalRecord> {
        Ok(record)
    }

    async fn before_provision(
        &self,
        ctx: &RunContext,
        record: LocalRecord,
    ) -> ProvisioningResult<LocalRecord> {
        Ok(record)
    }

    async fn before_update(
        &self,
        ctx: &RunContext,
        record: LocalRecord,
    ) -> ProvisioningResult<LocalRecord> {
        Ok(record)
    }

    async fn before_deprovision(
        &self,
        ctx: &RunContext,
        record: LocalRecord,
    ) -> ProvisioningResult<LocalRecord> {
        Ok(record)
    }

    async fn before_unassign(
        &self,
        ctx: &RunContext,
        record: LocalRecord,
    ) -> ProvisioningResult<LocalRecord> {
        Ok(record)
    }

    async fn before_link(
        &self,
        ctx: &RunContext,
        record: LocalRecord,
    ) -> ProvisioningResult<LocalRecord> {
        Ok(record)
    }

    async fn before_unlink(
        &self,
        ctx: &RunContext,
        record: LocalRecord,
    ) -> ProvisioningResult<LocalRecord> {
        Ok(record)
    }

    async fn after(
        &self,
        ctx: &RunContext,
        record: &LocalRecord,
        outcome: &ProvisioningOutcome,
    ) -> ProvisioningResult<()> {
        Ok(())
    }

    async fn after_all(&self, ctx: &RunContext) -> ProvisioningResult<()> {
        Ok(())
    }
}

/// Hook chain selected by a pull rule, with the matched record if any.
#[derive(Debug, Clone, Copy)]
pub enum PullStage<'a> {
    Assign,
    Provision,
    Update(&'a LocalRecord),
    Deprovision(&'a LocalRecord),
    Unassign(&'a LocalRecord),
    Link(&'a LocalRecord),
    Unlink(&'a LocalRecord),
    Delete(&'a LocalRecord),
}

impl PullStage<'_> {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PullStage::Assign => "before_assign",
            PullStage::Provision => "before_provision",
            PullStage::Update(_) => "before_update",
            PullStage::Deprovision(_) => "before_deprovision",
            PullStage::Unassign(_) => "before_unassign",
            PullStage::Link(_) => "before_link",
            PullStage::Unlink(_) => "before_unlink",
            PullStage::Delete(_) => "before_delete",
        }
    }
}

impl fmt::Display for PullStage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hook chain selected by a push rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStage {
    Assign,
    Provision,
    Update,
    Deprovision,
    Unassign,
    Link,
    Unlink,
}

impl PushStage {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PushStage::Assign => "before_assign",
            PushStage::Provision => "before_provision",
            PushStage::Update => "before_update",
            PushStage::Deprovision => "before_deprovision",
            PushStage::Unassign => "before_unassign",
            PushStage::Link => "before_link",
            PushStage::Unlink => "before_unlink",
        }
    }
}

impl fmt::Display for PushStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered actions of a task.
pub struct ActionPipeline<A: ?Sized> {
    stages: Vec<Arc<A>>,
}

impl<A: ?Sized> ActionPipeline<A> {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append an action using builder pattern.
    #[must_use]
    pub fn with(mut self, action: Arc<A>) -> Self {
        self.stages.push(action);
        self
    }

    /// Append an action.
    pub fn push(&mut self, action: Arc<A>) {
        self.stages.push(action);
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no actions.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl<A: ?Sized> Default for ActionPipeline<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized> Clone for ActionPipeline<A> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
        }
    }
}

impl ActionPipeline<dyn PullActions> {
    /// Run every `before_all` hook.
    pub async fn before_all(&self, ctx: &RunContext) -> Result<(), JobError> {
        for action in &self.stages {
            action.before_all(ctx).await.map_err(|e| JobError::Actions {
                action: action.name().to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Run the hooks of `stage`, threading the delta through them.
    pub async fn before(
        &self,
        stage: PullStage<'_>,
        ctx: &RunContext,
        mut delta: SyncDelta,
    ) -> ProvisioningResult<SyncDelta> {
        for action in &self.stages {
            debug!(action = action.name(), stage = stage.as_str(), "Running pull action");
            delta = match stage {
                PullStage::Assign => action.before_assign(ctx, delta).await?,
                PullStage::Provision => action.before_provision(ctx, delta).await?,
                PullStage::Update(local) => action.before_update(ctx, delta, local).await?,
                PullStage::Deprovision(local) => {
                    action.before_deprovision(ctx, delta, local).await?
                }
                PullStage::Unassign(local) => action.before_unassign(ctx, delta, local).await?,
                PullStage::Link(local) => action.before_link(ctx, delta, local).await?,
                PullStage::Unlink(local) => action.before_unlink(ctx, delta, local).await?,
                PullStage::Delete(local) => action.before_delete(ctx, delta, local).await?,
            };
        }
        Ok(delta)
    }

    /// Run every `after` hook.
    pub async fn after(
        &self,
        ctx: &RunContext,
        delta: &SyncDelta,
        local: Option<&LocalRecord>,
        outcome: &ProvisioningOutcome,
    ) -> ProvisioningResult<()> {
        for action in &self.stages {
            action.after(ctx, delta, local, outcome).await?;
        }
        Ok(())
    }

    /// Run every `after_all` hook.
    pub async fn after_all(&self, ctx: &RunContext) -> Result<(), JobError> {
        for action in &self.stages {
            action.after_all(ctx).await.map_err(|e| JobError::Actions {
                action: action.name().to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

impl ActionPipeline<dyn PushActions> {
    /// Run every `before_all` hook.
    pub async fn before_all(&self, ctx: &RunContext) -> Result<(), JobError> {
        for action in &self.stages {
            action.before_all(ctx).await.map_err(|e| JobError::Actions {
                action: action.name().to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Run the hooks of `stage`, threading the record through them.
    pub async fn before(
        &self,
        stage: PushStage,
        ctx: &RunContext,
        mut record: LocalRecord,
    ) -> ProvisioningResult<LocalRecord> {
        for action in &self.stages {
            debug!(action = action.name(), stage = stage.as_str(), "Running push action");
            record = match stage {
                PushStage::Assign => action.before_assign(ctx, record).await?,
                PushStage::Provision => action.before_provision(ctx, record).await?,
                PushStage::Update => action.before_update(ctx, record).await?,
                PushStage::Deprovision => action.before_deprovision(ctx, record).await?,
                PushStage::Unassign => action.before_unassign(ctx, record).await?,
                PushStage::Link => action.before_link(ctx, record).await?,
                PushStage::Unlink => action.before_unlink(ctx, record).await?,
            };
        }
        Ok(record)
    }

    /// Run every `after` hook.
    pub async fn after(
        &self,
        ctx: &RunContext,
        record: &LocalRecord,
        outcome: &ProvisioningOutcome,
    ) -> ProvisioningResult<()> {
        for action in &self.stages {
            action.after(ctx, record, outcome).await?;
        }
        Ok(())
    }

    /// Run every `after_all` hook.
    pub async fn after_all(&self, ctx: &RunContext) -> Result<(), JobError> {
        for action in &self.stages {
            action.after_all(ctx).await.map_err(|e| JobError::Actions {
                action: action.name().to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}
