//! # Reconciliation Engine
//!
//! Pull and push reconciliation between the local identity store and
//! external resources.
//!
//! This crate provides:
//! - The matching rule evaluator (which rule applies to a record)
//! - Pull and push result handlers with per-record failure isolation
//! - Pull/push action pipelines invoked around every rule
//! - Reconciliation jobs with sync tokens, dry run and trace-level reports
//! - A remediation queue for records a pull could not apply
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  deltas   ┌──────────────┐  rule   ┌──────────────┐
//! │  Connector   │──────────►│  PullHandler │────────►│ IdentityStore│
//! │  (resource)  │◄──────────│  PushHandler │────────►│  Propagation │
//! └──────┬───────┘  before/  └──────┬───────┘         └──────────────┘
//!        │          after           │ outcome
//!        │ token             ┌──────▼───────┐         ┌──────────────┐
//!        └──────────────────►│  RunContext  │────────►│ JobReport    │
//!                            └──────────────┘         └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use idsync_provisioning::{PullJob, TaskConfig, InMemoryIdentityStore};
//!
//! let task: TaskConfig = serde_json::from_str(&task_json)?;
//! let report = PullJob::new(task, connector, store, tokens).run().await?;
//! println!("{}", report.report.unwrap_or_default());
//! ```

pub mod actions;
pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod job;
pub mod mapping;
pub mod outcome;
pub mod propagation;
pub mod record;
pub mod remediation;
pub mod report;
pub mod rules;
pub mod store;
pub mod token;
pub mod types;

// Re-exports for convenience
pub use actions::{ActionPipeline, PullActions, PullStage, PushActions, PushStage};
pub use audit::{
    EventResult, EventSink, EventSinks, MemoryEventSink, ProvisioningEvent, TracingEventSink,
};
pub use config::TaskConfig;
pub use context::{RecordId, RunContext};
pub use error::{
    JobError, JobResult, ProvisioningError, ProvisioningResult, StoreError, TokenStoreError,
};
pub use handler::{PullHandler, PushHandler};
pub use job::{JobReport, PullJob, PushJob, RunGuard, RunRegistry};
pub use mapping::{AttributeMapping, InboundValues, KeyMapping, MappingDirection, Provision};
pub use outcome::ProvisioningOutcome;
pub use propagation::{ConnectorPropagation, Propagation, ResourceBinding, ENABLE_ATTRIBUTE};
pub use record::{
    DeltaKind, ExternalRecord, LocalRecord, MatchResult, SyncDelta, NAME_ATTRIBUTE,
};
pub use remediation::{InMemoryRemediationStore, Remediation, RemediationStore};
pub use report::{KindSummary, ReportGenerator, RunSummary, DRY_RUN_BANNER};
pub use rules::{evaluate, MatchingRule, RuleDecision, RuleSet, TaskGate, UnmatchingRule};
pub use store::{IdentityStore, InMemoryIdentityStore};
pub use token::{InMemorySyncTokenStore, PgSyncTokenStore, SyncToken, SyncTokenStore};
pub use types::{
    AnyKind, ConflictResolution, Direction, OutcomeStatus, PullMode, ResourceOperation,
    TraceLevel,
};
