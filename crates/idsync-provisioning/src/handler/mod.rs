//! Per-record result handlers.
//!
//! A handler takes one record (a pull delta or a local key to push), picks
//! the rule, runs the matching action and appends exactly one outcome to the
//! run context. Record-level errors never escape a handler: they become
//! FAILURE or IGNORE outcomes. `handle` returns `false` only when the run
//! must stop, after storing the job-level error in the context.

mod pull;
mod push;

pub use pull::PullHandler;
pub use push::PushHandler;

use crate::audit::{EventResult, EventSinks, ProvisioningEvent};
use crate::config::TaskConfig;
use crate::record::LocalRecord;
use crate::rules::TaskGate;
use crate::types::{AnyKind, Direction};

/// Message of outcomes whose action is disabled by a task gate.
pub(crate) fn gate_message(gate: TaskGate) -> String {
    format!("not configured for {gate}")
}

/// Enabled status to propagate, when the task synchronizes status.
pub(crate) fn enabled_status(task: &TaskConfig, record: &LocalRecord) -> Option<bool> {
    task.sync_status.then_some(!record.suspended)
}

/// Audit event data shared by both handlers.
pub(crate) struct Audit<'a> {
    pub sinks: &'a EventSinks,
    pub category: Direction,
    pub kind: AnyKind,
    pub resource: String,
}

impl Audit<'_> {
    pub(crate) async fn emit(
        &self,
        event: impl Into<String>,
        result: EventResult,
        before: Option<serde_json::Value>,
        output: Option<serde_json::Value>,
    ) {
        let mut event =
            ProvisioningEvent::new(self.category, self.kind, &self.resource, event, result)
                .with_output(output);
        event.before = before;
        self.sinks.emit(event).await;
    }
}
