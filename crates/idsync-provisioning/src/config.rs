//! Task configuration.
//!
//! A task binds one resource to its provisions, rules and feature gates.
//! Loaded from JSON; unknown rule or mode names fail at parse time.

use idsync_connector::prelude::Filter;
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::mapping::Provision;
use crate::rules::{MatchingRule, RuleSet, TaskGate, UnmatchingRule};
use crate::types::{ConflictResolution, Direction, PullMode, TraceLevel};

/// Configuration of a pull or push task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task name, used in logs and audit events.
    #[serde(default = "default_task_name")]
    pub name: String,

    /// Resource the task reconciles.
    pub resource: String,

    /// Pull or push.
    pub direction: Direction,

    /// Provisions, processed users first then groups.
    #[serde(default)]
    pub provisions: Vec<Provision>,

    /// Rule for unmatched records.
    #[serde(default)]
    pub unmatching_rule: Option<UnmatchingRule>,

    /// Rule for matched records.
    #[serde(default)]
    pub matching_rule: Option<MatchingRule>,

    /// Allow actions gated on create.
    #[serde(default)]
    pub perform_create: bool,

    /// Allow actions gated on update.
    #[serde(default)]
    pub perform_update: bool,

    /// Allow actions gated on delete.
    #[serde(default)]
    pub perform_delete: bool,

    /// Propagate the local suspended flag as the resource enabled status.
    #[serde(default)]
    pub sync_status: bool,

    /// Report verbosity.
    #[serde(default)]
    pub trace_level: TraceLevel,

    /// Enumeration strategy (pull only).
    #[serde(default)]
    pub pull_mode: PullMode,

    /// Filter for filtered reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciliation_filter: Option<Filter>,

    /// Behaviour when several local records match.
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,

    /// Page / batch size for enumeration.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Compute outcomes without side effects.
    #[serde(default)]
    pub dry_run: bool,

    /// Queue failed pull records as remediation entries.
    #[serde(default)]
    pub remediation: bool,
}

fn default_task_name() -> String {
    "reconciliation".to_string()
}

fn default_batch_size() -> u32 {
    100
}

impl TaskConfig {
    /// Create a task with defaults for everything but resource and direction.
    pub fn new(resource: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: default_task_name(),
            resource: resource.into(),
            direction,
            provisions: Vec::new(),
            unmatching_rule: None,
            matching_rule: None,
            perform_create: false,
            perform_update: false,
            perform_delete: false,
            sync_status: false,
            trace_level: TraceLevel::default(),
            pull_mode: PullMode::default(),
            reconciliation_filter: None,
            conflict_resolution: ConflictResolution::default(),
            batch_size: default_batch_size(),
            dry_run: false,
            remediation: false,
        }
    }

    /// Set the task name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a provision.
    #[must_use]
    pub fn with_provision(mut self, provision: Provision) -> Self {
        self.provisions.push(provision);
        self
    }

    /// Set both rules.
    #[must_use]
    pub fn with_rules(mut self, unmatching: UnmatchingRule, matching: MatchingRule) -> Self {
        self.unmatching_rule = Some(unmatching);
        self.matching_rule = Some(matching);
        self
    }

    /// Enable or disable the three feature gates at once.
    #[must_use]
    pub fn with_gates(mut self, create: bool, update: bool, delete: bool) -> Self {
        self.perform_create = create;
        self.perform_update = update;
        self.perform_delete = delete;
        self
    }

    /// Set the pull mode.
    #[must_use]
    pub fn with_pull_mode(mut self, mode: PullMode) -> Self {
        self.pull_mode = mode;
        self
    }

    /// Set the reconciliation filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.reconciliation_filter = Some(filter);
        self
    }

    /// Set the trace level.
    #[must_use]
    pub fn with_trace_level(mut self, level: TraceLevel) -> Self {
        self.trace_level = level;
        self
    }

    /// Set conflict resolution.
    #[must_use]
    pub fn with_conflict_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.conflict_resolution = resolution;
        self
    }

    /// Set batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set dry run.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set remediation.
    #[must_use]
    pub fn with_remediation(mut self, remediation: bool) -> Self {
        self.remediation = remediation;
        self
    }

    /// Set sync status.
    #[must_use]
    pub fn with_sync_status(mut self, sync_status: bool) -> Self {
        self.sync_status = sync_status;
        self
    }

    /// The configured rules.
    #[must_use]
    pub fn rules(&self) -> RuleSet {
        RuleSet {
            unmatching: self.unmatching_rule,
            matching: self.matching_rule,
        }
    }

    /// Whether a feature gate is enabled.
    #[must_use]
    pub fn allows(&self, gate: TaskGate) -> bool {
        match gate {
            TaskGate::Create => self.perform_create,
            TaskGate::Update => self.perform_update,
            TaskGate::Delete => self.perform_delete,
        }
    }

    /// Provisions in processing order: users before groups.
    #[must_use]
    pub fn ordered_provisions(&self) -> Vec<&Provision> {
        let mut provisions: Vec<&Provision> = self.provisions.iter().collect();
        provisions.sort_by_key(|p| p.kind);
        provisions
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.resource.trim().is_empty() {
            return Err(JobError::configuration("resource must not be empty"));
        }

        if self.provisions.is_empty() {
            return Err(JobError::configuration(format!(
                "no provisions configured for resource {}",
                self.resource
            )));
        }

        for provision in &self.provisions {
            if provision.key.external.is_empty() || provision.key.internal.is_empty() {
                return Err(JobError::configuration(format!(
                    "provision {} has no key mapping",
                    provision.kind
                )));
            }
        }

        let mut kinds: Vec<_> = self.provisions.iter().map(|p| p.kind).collect();
        kinds.sort();
        kinds.dedup();
        if kinds.len() != self.provisions.len() {
            return Err(JobError::configuration("duplicate provision for the same kind"));
        }

        if self.batch_size == 0 || self.batch_size > 10_000 {
            return Err(JobError::configuration(
                "batch_size must be between 1 and 10000",
            ));
        }

        if self.direction == Direction::Pull
            && self.pull_mode == PullMode::FilteredReconciliation
            && self.reconciliation_filter.is_none()
        {
            return Err(JobError::configuration(
                "filtered reconciliation requires a reconciliation_filter",
            ));
        }

        if self.direction == Direction::Push && self.remediation {
            return Err(JobError::configuration(
                "remediation is only available on pull tasks",
            ));
        }

        Ok(())
    }
}
