//! Common enums shared by handlers, jobs and reports.

use idsync_connector::ObjectClass;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of local identity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnyKind {
    /// A user.
    User,
    /// A group.
    Group,
}

impl AnyKind {
    /// Wire name, as used in task definitions.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AnyKind::User => "USER",
            AnyKind::Group => "GROUP",
        }
    }

    /// Plural label used in reports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            AnyKind::User => "Users",
            AnyKind::Group => "Groups",
        }
    }

    /// Default object class on a resource.
    #[must_use]
    pub fn object_class(&self) -> ObjectClass {
        match self {
            AnyKind::User => ObjectClass::Account,
            AnyKind::Group => ObjectClass::Group,
        }
    }
}

impl fmt::Display for AnyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USER" => Ok(AnyKind::User),
            "GROUP" => Ok(AnyKind::Group),
            _ => Err(format!("Unknown any kind: {s}")),
        }
    }
}

/// Operation performed (or that would have been performed) on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceOperation {
    /// Object created.
    Create,
    /// Object updated.
    Update,
    /// Object deleted.
    Delete,
    /// No operation.
    None,
}

impl ResourceOperation {
        #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceOperation::Create => "CREATE",
            ResourceOperation::Update => "UPDATE",
            ResourceOperation::Delete => "DELETE",
            ResourceOperation::None => "NONE",
        }
    }
}

impl fmt::Display for ResourceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result status of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    /// The action completed, or was intentionally skipped.
    Success,
    /// The action failed.
    Failure,
    /// An action asked to skip the record.
    Ignore,
}

impl OutcomeStatus {
        #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "SUCCESS",
            OutcomeStatus::Failure => "FAILURE",
            OutcomeStatus::Ignore => "IGNORE",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Report verbosity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceLevel {
    /// No report.
    None,
    /// Counters only.
    Summary,
    /// Counters and failed records.
    #[default]
    Failures,
    /// Counters and every record.
    All,
}

impl TraceLevel {
        #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceLevel::None => "NONE",
            TraceLevel::Summary => "SUMMARY",
            TraceLevel::Failures => "FAILURES",
            TraceLevel::All => "ALL",
        }
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TraceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NONE" => Ok(TraceLevel::None),
            "SUMMARY" => Ok(TraceLevel::Summary),
            "FAILURES" => Ok(TraceLevel::Failures),
            "ALL" => Ok(TraceLevel::All),
            _ => Err(format!("Unknown trace level: {s}")),
        }
    }
}

/// How a pull task enumerates the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullMode {
    /// Only changes since the stored sync token.
    #[default]
    Incremental,
    /// Every object matching the task's reconciliation filter.
    FilteredReconciliation,
    /// Every object.
    FullReconciliation,
}

impl PullMode {
        #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PullMode::Incremental => "INCREMENTAL",
            PullMode::FilteredReconciliation => "FILTERED_RECONCILIATION",
            PullMode::FullReconciliation => "FULL_RECONCILIATION",
        }
    }

    /// Whether the mode reads and advances sync tokens.
    #[must_use]
    pub fn uses_sync_token(&self) -> bool {
        matches!(self, PullMode::Incremental)
    }
}

impl fmt::Display for PullMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PullMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "INCREMENTAL" => Ok(PullMode::Incremental),
            "FILTERED_RECONCILIATION" => Ok(PullMode::FilteredReconciliation),
            "FULL_RECONCILIATION" => Ok(PullMode::FullReconciliation),
            _ => Err(format!("Unknown pull mode: {s}")),
        }
    }
}

/// What to do when an external record matches several local records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictResolution {
    /// Record a failure and leave every match untouched.
    #[default]
    Ignore,
    /// Act on the first match.
    FirstMatch,
    /// Act on the last match.
    LastMatch,
}

impl ConflictResolution {
        #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::Ignore => "IGNORE",
            ConflictResolution::FirstMatch => "FIRST_MATCH",
            ConflictResolution::LastMatch => "LAST_MATCH",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Resource to local store.
    Pull,
    /// Local store to resource.
    Push,
}

impl Direction {
        #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Pull => "PULL",
            Direction::Push => "PUSH",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
