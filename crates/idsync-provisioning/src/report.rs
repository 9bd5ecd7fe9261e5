//! Run report rendering.
//!
//! Counts outcomes per kind, operation and status, then renders the text
//! report stored with a task execution. Verbosity follows the task's
//! [`TraceLevel`].

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::outcome::ProvisioningOutcome;
use crate::types::{AnyKind, OutcomeStatus, ResourceOperation, TraceLevel};

/// Banner prepended to dry-run reports.
pub const DRY_RUN_BANNER: &str = "==>Dry run only, no modifications were made<==\n\n";

/// Counters for one kind of record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSummary {
    pub created: u32,
    pub create_failures: u32,
    pub updated: u32,
    pub update_failures: u32,
    pub deleted: u32,
    pub delete_failures: u32,
    pub no_operation: u32,
    pub ignored: u32,
    /// Failures before any operation was chosen or on link-only rules.
    #[serde(default)]
    pub no_operation_failures: u32,
}

impl KindSummary {
    fn count(&mut self, outcome: &ProvisioningOutcome) {
        use ResourceOperation as Op;

        match (outcome.status, outcome.operation) {
            (OutcomeStatus::Ignore, _) => self.ignored += 1,
            (OutcomeStatus::Success, Op::Create) => self.created += 1,
            (OutcomeStatus::Success, Op::Update) => self.updated += 1,
            (OutcomeStatus::Success, Op::Delete) => self.deleted += 1,
            (OutcomeStatus::Success, Op::None) => self.no_operation += 1,
            (OutcomeStatus::Failure, Op::Create) => self.create_failures += 1,
            (OutcomeStatus::Failure, Op::Update) => self.update_failures += 1,
            (OutcomeStatus::Failure, Op::Delete) => self.delete_failures += 1,
            (OutcomeStatus::Failure, Op::None) => self.no_operation_failures += 1,
        }
    }

    /// Number of failed records.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.create_failures
            + self.update_failures
            + self.delete_failures
            + self.no_operation_failures
    }
}

/// Counters for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// User counters.
    pub users: KindSummary,
    /// Group counters.
    pub groups: KindSummary,
    /// Records processed.
    pub processed: u32,
    /// Records with a FAILURE outcome, whatever the operation.
    pub failed: u32,
}

impl RunSummary {
    /// Count a set of outcomes.
    #[must_use]
    pub fn from_outcomes(outcomes: &[ProvisioningOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            summary.processed += 1;
            if outcome.is_failure() {
                summary.failed += 1;
            }
            summary.kind_mut(outcome.kind).count(outcome);
        }
        summary
    }

    /// Counters of one kind.
    #[must_use]
    pub fn kind(&self, kind: AnyKind) -> &KindSummary {
        match kind {
            AnyKind::User => &self.users,
            AnyKind::Group => &self.groups,
        }
    }

    fn kind_mut(&mut self, kind: AnyKind) -> &mut KindSummary {
        match kind {
            AnyKind::User => &mut self.users,
            AnyKind::Group => &mut self.groups,
        }
    }
}

/// Renders run reports.
pub struct ReportGenerator;

impl ReportGenerator {
    /// Render the report, or `None` when the trace level is `NONE`.
    #[must_use]
    pub fn render(
        outcomes: &[ProvisioningOutcome],
        level: TraceLevel,
        dry_run: bool,
    ) -> Option<String> {
        if level == TraceLevel::None {
            return None;
        }

        let summary = RunSummary::from_outcomes(outcomes);
        let mut report = String::new();
        if dry_run {
            report.push_str(DRY_RUN_BANNER);
        }

        for (i, kind) in [AnyKind::User, AnyKind::Group].into_iter().enumerate() {
            if i > 0 {
                report.push('\n');
            }
            Self::summary_line(&mut report, kind, summary.kind(kind));
        }

        if level >= TraceLevel::Failures {
            for kind in [AnyKind::User, AnyKind::Group] {
                let mut first = true;
                for (operation, title) in [
                    (ResourceOperation::Create, "failed to create"),
                    (ResourceOperation::Update, "failed to update"),
                    (ResourceOperation::Delete, "failed to delete"),
                    (ResourceOperation::None, "failed with no operation"),
                ] {
                    let failed = select(outcomes, kind, operation, OutcomeStatus::Failure);
                    if failed.is_empty() {
                        continue;
                    }
                    report.push_str(if first { "\n\n" } else { "\n" });
                    first = false;
                    let _ = write!(report, "{} {title}: ", kind.label());
                    report.push_str(&lines(&failed, level));
                }
            }
        }

        if level == TraceLevel::All {
            for kind in [AnyKind::User, AnyKind::Group] {
                let succeeded = |op| select(outcomes, kind, op, OutcomeStatus::Success);
                let sections = [
                    ("created", succeeded(ResourceOperation::Create)),
                    ("updated", succeeded(ResourceOperation::Update)),
                    ("deleted", succeeded(ResourceOperation::Delete)),
                    ("no operation", succeeded(ResourceOperation::None)),
                    ("ignored", ignored(outcomes, kind)),
                ];
                for (i, (title, selected)) in sections.iter().enumerate() {
                    report.push_str(if i == 0 { "\n\n" } else { "\n" });
                    let _ = writeln!(report, "{} {title}:", kind.label());
                    report.push_str(&lines(selected, level));
                }
            }
        }

        Some(report)
    }

    fn summary_line(report: &mut String, kind: AnyKind, s: &KindSummary) {
        let _ = write!(
            report,
            "{} [created/failures]: {}/{} [updated/failures]: {}/{} \
             [deleted/failures]: {}/{} [no operation/ignored]: {}/{}",
            kind.label(),
            s.created,
            s.create_failures,
            s.updated,
            s.update_failures,
            s.deleted,
            s.delete_failures,
            s.no_operation,
            s.ignored,
        );
        if s.no_operation_failures > 0 {
            let _ = write!(report, " [failed/no operation]: {}", s.no_operation_failures);
        }
    }
}

fn select<'a>(
    outcomes: &'a [ProvisioningOutcome],
    kind: AnyKind,
    operation: ResourceOperation,
    status: OutcomeStatus,
) -> Vec<&'a ProvisioningOutcome> {
    outcomes
        .iter()
        .filter(|o| o.kind == kind && o.operation == operation && o.status == status)
        .collect()
}

fn ignored(outcomes: &[ProvisioningOutcome], kind: AnyKind) -> Vec<&ProvisioningOutcome> {
    outcomes
        .iter()
        .filter(|o| o.kind == kind && o.status == OutcomeStatus::Ignore)
        .collect()
}

fn lines(outcomes: &[&ProvisioningOutcome], level: TraceLevel) -> String {
    let mut out = String::new();
    for outcome in outcomes {
        match level {
            TraceLevel::None | TraceLevel::Summary => return out,
            TraceLevel::Failures if outcome.is_failure() => {
                let _ = writeln!(
                    out,
                    "Failed {} (id/name): {}/{} with message: {}",
                    outcome.operation,
                    outcome.display_id(),
                    outcome.name,
                    outcome.message.as_deref().unwrap_or_default(),
                );
            }
            _ => {
                let _ = write!(
                    out,
                    "{} {} (id/name): {}/{}",
                    outcome.operation,
                    outcome.status,
                    outcome.display_id(),
                    outcome.name,
                );
                match outcome.message.as_deref() {
                    Some(message) if !message.is_empty() => {
                        let _ = writeln!(out, " with message: {message}");
                    }
                    _ => out.push('\n'),
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes() -> Vec<ProvisioningOutcome> {
        vec![
            ProvisioningOutcome::success(AnyKind::User, ResourceOperation::Create, "a")
                .with_uid("a"),
            ProvisioningOutcome::success(AnyKind::User, ResourceOperation::Update, "b")
                .with_uid("b")
                .into_failure("boom"),
            ProvisioningOutcome::success(AnyKind::User, ResourceOperation::None, "c")
                .with_uid("c"),
            ProvisioningOutcome::success(AnyKind::Group, ResourceOperation::Update, "g")
                .with_uid("g")
                .into_ignored("skipped"),
        ]
    }

    #[test]
    fn test_none_level_renders_nothing() {
        assert_eq!(ReportGenerator::render(&outcomes(), TraceLevel::None, false), None);
    }

    #[test]
    fn test_summary_level() {
        let report = ReportGenerator::render(&outcomes(), TraceLevel::Summary, false).unwrap();
        assert_eq!(
            report,
            "Users [created/failures]: 1/0 [updated/failures]: 0/1 [deleted/failures]: 0/0 \
             [no operation/ignored]: 1/0\n\
             Groups [created/failures]: 0/0 [updated/failures]: 0/0 [deleted/failures]: 0/0 \
             [no operation/ignored]: 0/1"
        );
    }

    #[test]
    fn test_failures_level_lists_failures() {
        let report = ReportGenerator::render(&outcomes(), TraceLevel::Failures, true).unwrap();
        assert!(report.starts_with(DRY_RUN_BANNER));
        assert!(report.contains(
            "\n\nUsers failed to update: Failed UPDATE (id/name): b/b with message: boom\n"
        ));
        assert!(!report.contains("Users created:"));
    }

    #[test]
    fn test_all_level_lists_successes() {
        let report = ReportGenerator::render(&outcomes(), TraceLevel::All, false).unwrap();
        assert!(report.contains("Users created:\nCREATE SUCCESS (id/name): a/a\n"));
        assert!(report.contains("Users no operation:\nNONE SUCCESS (id/name): c/c\n"));
        assert!(report
            .contains("Groups ignored:\nUPDATE IGNORE (id/name): g/g with message: skipped\n"));
        assert!(report
            .contains("Users failed to update: UPDATE FAILURE (id/name): b/b with message: boom\n"));
    }

    #[test]
    fn test_failure_without_operation_is_reported() {
        let mut outcomes = outcomes();
        outcomes.push(
            ProvisioningOutcome::success(AnyKind::User, ResourceOperation::None, "d")
                .with_uid("d")
                .into_failure("link refused"),
        );

        let summary = RunSummary::from_outcomes(&outcomes);
        assert_eq!(summary.users.no_operation_failures, 1);
        assert_eq!(summary.users.failures(), 2);
        assert_eq!(summary.failed, 2);

        let report = ReportGenerator::render(&outcomes, TraceLevel::Failures, false).unwrap();
        assert!(report.contains("[no operation/ignored]: 1/0 [failed/no operation]: 1\n"));
        assert!(report.contains(
            "Users failed with no operation: Failed NONE (id/name): d/d with message: link refused\n"
        ));
        // Groups have none, so their summary line keeps the usual columns.
        assert!(report.contains("Groups [created/failures]: 0/0 [updated/failures]: 0/0 \
             [deleted/failures]: 0/0 [no operation/ignored]: 0/1\n"));
    }

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary::from_outcomes(&outcomes());
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.users.failures(), 1);
        assert_eq!(summary.groups.ignored, 1);
        assert_eq!(summary.kind(AnyKind::User).no_operation, 1);
    }
}
