//! Matching rule evaluation.
//!
//! Given whether an external record correlates with a local record, picks
//! the rule to apply. Unmatched records only ever select an
//! [`UnmatchingRule`] and matched records only a [`MatchingRule`]. The
//! evaluation itself has no side effects.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Direction, ResourceOperation};

/// Rule applied when no local record matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnmatchingRule {
    /// Create the local record, assign the resource and propagate.
    Assign,
    /// Create without assigning; no propagation to the resource.
    Provision,
    /// Remove a stale link; a no-op when nothing matches in pull.
    Unlink,
    /// Do nothing.
    Ignore,
}

impl UnmatchingRule {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            UnmatchingRule::Assign => "ASSIGN",
            UnmatchingRule::Provision => "PROVISION",
            UnmatchingRule::Unlink => "UNLINK",
            UnmatchingRule::Ignore => "IGNORE",
        }
    }
}

impl fmt::Display for UnmatchingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UnmatchingRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ASSIGN" => Ok(UnmatchingRule::Assign),
            "PROVISION" => Ok(UnmatchingRule::Provision),
            "UNLINK" => Ok(UnmatchingRule::Unlink),
            "IGNORE" => Ok(UnmatchingRule::Ignore),
            _ => Err(format!("Unknown unmatching rule: {s}")),
        }
    }
}

/// Rule applied when a local record matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchingRule {
    /// Apply attribute changes.
    Update,
    /// Delete the external account, keep the link.
    Deprovision,
    /// Unlink and delete the external account.
    Unassign,
    /// Add the link only.
    Link,
    /// Remove the link only.
    Unlink,
    /// Do nothing.
    Ignore,
}

impl MatchingRule {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchingRule::Update => "UPDATE",
            MatchingRule::Deprovision => "DEPROVISION",
            MatchingRule::Unassign => "UNASSIGN",
            MatchingRule::Link => "LINK",
            MatchingRule::Unlink => "UNLINK",
            MatchingRule::Ignore => "IGNORE",
        }
    }
}

impl fmt::Display for MatchingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MatchingRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UPDATE" => Ok(MatchingRule::Update),
            "DEPROVISION" => Ok(MatchingRule::Deprovision),
            "UNASSIGN" => Ok(MatchingRule::Unassign),
            "LINK" => Ok(MatchingRule::Link),
            "UNLINK" => Ok(MatchingRule::Unlink),
            "IGNORE" => Ok(MatchingRule::Ignore),
            _ => Err(format!("Unknown matching rule: {s}")),
        }
    }
}

/// Configured rules of a task. A missing rule behaves as `IGNORE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Rule for records without a local match.
    #[serde(default)]
    pub unmatching: Option<UnmatchingRule>,
    /// Rule for records with a local match.
    #[serde(default)]
    pub matching: Option<MatchingRule>,
}

impl RuleSet {
    /// Create a rule set with both rules configured.
    #[must_use]
    pub fn new(unmatching: UnmatchingRule, matching: MatchingRule) -> Self {
        Self {
            unmatching: Some(unmatching),
            matching: Some(matching),
        }
    }
}

/// Task feature flag that must be enabled for an action to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskGate {
    /// `perform_create`.
    Create,
    /// `perform_update`.
    Update,
    /// `perform_delete`.
    Delete,
}

impl TaskGate {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskGate::Create => "create",
            TaskGate::Update => "update",
            TaskGate::Delete => "delete",
        }
    }
}

impl fmt::Display for TaskGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The rule selected for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleDecision {
    /// No local record matched.
    Unmatched(UnmatchingRule),
    /// A local record matched.
    Matched(MatchingRule),
}

impl RuleDecision {
    /// Resource operation the rule results in.
    #[must_use]
    pub fn operation(&self) -> ResourceOperation {
        match self {
            RuleDecision::Unmatched(UnmatchingRule::Assign | UnmatchingRule::Provision) => {
                ResourceOperation::Create
            }
            RuleDecision::Matched(MatchingRule::Update) => ResourceOperation::Update,
            RuleDecision::Matched(MatchingRule::Deprovision | MatchingRule::Unassign) => {
                ResourceOperation::Delete
            }
            _ => ResourceOperation::None,
        }
    }

    /// Feature gate controlling the rule's action, or `None` for `IGNORE`.
    #[must_use]
    pub fn gate(&self, direction: Direction) -> Option<TaskGate> {
        match (self, direction) {
            (RuleDecision::Unmatched(UnmatchingRule::Ignore), _)
            | (RuleDecision::Matched(MatchingRule::Ignore), _) => None,
            (RuleDecision::Unmatched(UnmatchingRule::Assign | UnmatchingRule::Provision), _) => {
                Some(TaskGate::Create)
            }
            (RuleDecision::Unmatched(UnmatchingRule::Unlink), _) => Some(TaskGate::Update),
            (
                RuleDecision::Matched(
                    MatchingRule::Update | MatchingRule::Link | MatchingRule::Unlink,
                ),
                _,
            ) => Some(TaskGate::Update),
            // Pull treats removal rules as updates of the local record.
            (
                RuleDecision::Matched(MatchingRule::Deprovision | MatchingRule::Unassign),
                Direction::Pull,
            ) => Some(TaskGate::Update),
            (
                RuleDecision::Matched(MatchingRule::Deprovision | MatchingRule::Unassign),
                Direction::Push,
            ) => Some(TaskGate::Delete),
        }
    }

    /// Whether the rule is a no-op.
    #[must_use]
    pub fn is_ignore(&self) -> bool {
        matches!(
            self,
            RuleDecision::Unmatched(UnmatchingRule::Ignore)
                | RuleDecision::Matched(MatchingRule::Ignore)
        )
    }

    /// Lowercase rule name used as audit event name.
    #[must_use]
    pub fn event_name(&self) -> String {
        match self {
            RuleDecision::Unmatched(rule) => rule.as_str().to_lowercase(),
            RuleDecision::Matched(rule) => rule.as_str().to_lowercase(),
        }
    }
}

impl fmt::Display for RuleDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleDecision::Unmatched(rule) => write!(f, "unmatched:{rule}"),
            RuleDecision::Matched(rule) => write!(f, "matched:{rule}"),
        }
    }
}

/// Select the rule for a record.
#[must_use]
pub fn evaluate(found: bool, rules: &RuleSet) -> RuleDecision {
    if found {
        RuleDecision::Matched(rules.matching.unwrap_or(MatchingRule::Ignore))
    } else {
        RuleDecision::Unmatched(rules.unmatching.unwrap_or(UnmatchingRule::Ignore))
    }
}
