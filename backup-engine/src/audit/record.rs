//! Audit record data structures

use crate::copy::plan::CopyDecision;
use crate::copy::{FileOutcome, OutcomeStatus};
use crate::verify::{VerifyEntry, VerifyStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Kind of action an audit record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    VersionCreated,
    Copy,
    Verify,
    RetentionAge,
    RetentionCount,
    Delete,
    Restore,
    ScheduleRegister,
    Error,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditAction::VersionCreated => "VersionCreated",
            AuditAction::Copy => "Copy",
            AuditAction::Verify => "Verify",
            AuditAction::RetentionAge => "RetentionAge",
            AuditAction::RetentionCount => "RetentionCount",
            AuditAction::Delete => "Delete",
            AuditAction::Restore => "Restore",
            AuditAction::ScheduleRegister => "ScheduleRegister",
            AuditAction::Error => "Error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Ok,
    Mismatch,
    Missing,
    Error,
    DryRun,
    Skip,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditStatus::Ok => "OK",
            AuditStatus::Mismatch => "MISMATCH",
            AuditStatus::Missing => "MISSING",
            AuditStatus::Error => "ERROR",
            AuditStatus::DryRun => "DRYRUN",
            AuditStatus::Skip => "SKIP",
        };
        f.write_str(name)
    }
}

impl From<VerifyStatus> for AuditStatus {
    fn from(status: VerifyStatus) -> Self {
        match status {
            VerifyStatus::Ok => AuditStatus::Ok,
            VerifyStatus::Mismatch => AuditStatus::Mismatch,
            VerifyStatus::Missing => AuditStatus::Missing,
            VerifyStatus::Error => AuditStatus::Error,
        }
    }
}

/// A single audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: NaiveDateTime,
    pub action: AuditAction,
    pub source: String,
    pub target: String,
    pub size: u64,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(
        timestamp: NaiveDateTime,
        action: AuditAction,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
        size: u64,
        status: AuditStatus,
    ) -> Self {
        Self {
            timestamp,
            action,
            source: source.as_ref().display().to_string(),
            target: target.as_ref().display().to_string(),
            size,
            status,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Structural failure of a pipeline stage
    pub fn error(timestamp: NaiveDateTime, source: impl AsRef<Path>, target: impl AsRef<Path>, detail: impl Into<String>) -> Self {
        Self::new(timestamp, AuditAction::Error, source, target, 0, AuditStatus::Error).with_detail(detail)
    }

    /// Record for one copied (or would-be copied, or failed) file. Unchanged
    /// files produce no record.
    pub fn from_copy(timestamp: NaiveDateTime, action: AuditAction, outcome: &FileOutcome) -> Option<Self> {
        let status = match outcome.status {
            OutcomeStatus::Copied | OutcomeStatus::Deleted => AuditStatus::Ok,
            OutcomeStatus::Simulated => AuditStatus::DryRun,
            OutcomeStatus::Failed => AuditStatus::Error,
            OutcomeStatus::Skipped => return None,
        };
        let action = if outcome.status == OutcomeStatus::Deleted || outcome.decision == CopyDecision::Extra {
            AuditAction::Delete
        } else {
            action
        };

        let record = Self::new(timestamp, action, &outcome.source, &outcome.destination, outcome.size, status);
        Some(match &outcome.error {
            Some(error) => record.with_detail(error.clone()),
            None => record,
        })
    }

    pub fn from_verify(timestamp: NaiveDateTime, entry: &VerifyEntry) -> Self {
        let record = Self::new(
            timestamp,
            AuditAction::Verify,
            &entry.reference,
            &entry.copy,
            entry.size,
            entry.status.into(),
        );
        match &entry.detail {
            Some(detail) => record.with_detail(detail.clone()),
            None => record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::plan::CopyDecision;
    use std::path::PathBuf;

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2026, 6, 1)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .unwrap()
    }

    fn outcome(status: OutcomeStatus) -> FileOutcome {
        FileOutcome {
            relative_path: PathBuf::from("a.txt"),
            source: PathBuf::from("/src/a.txt"),
            destination: PathBuf::from("/dst/a.txt"),
            size: 42,
            decision: CopyDecision::New,
            status,
            attempts: 1,
            error: None,
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(AuditStatus::DryRun.to_string(), "DRYRUN");
        assert_eq!(AuditAction::RetentionCount.to_string(), "RetentionCount");
        assert_eq!(
            serde_json::to_string(&AuditStatus::DryRun).unwrap(),
            "\"DRYRUN\""
        );
    }

    #[test]
    fn test_from_copy() {
        let copied = AuditRecord::from_copy(now(), AuditAction::Copy, &outcome(OutcomeStatus::Copied)).unwrap();
        assert_eq!(copied.status, AuditStatus::Ok);
        assert_eq!(copied.size, 42);
        assert_eq!(copied.target, "/dst/a.txt");

        let simulated = AuditRecord::from_copy(now(), AuditAction::Restore, &outcome(OutcomeStatus::Simulated)).unwrap();
        assert_eq!(simulated.action, AuditAction::Restore);
        assert_eq!(simulated.status, AuditStatus::DryRun);

        let deleted = AuditRecord::from_copy(now(), AuditAction::Copy, &outcome(OutcomeStatus::Deleted)).unwrap();
        assert_eq!(deleted.action, AuditAction::Delete);

        let mut stuck = outcome(OutcomeStatus::Failed);
        stuck.decision = CopyDecision::Extra;
        let stuck = AuditRecord::from_copy(now(), AuditAction::Copy, &stuck).unwrap();
        assert_eq!(stuck.action, AuditAction::Delete);
        assert_eq!(stuck.status, AuditStatus::Error);

        assert!(AuditRecord::from_copy(now(), AuditAction::Copy, &outcome(OutcomeStatus::Skipped)).is_none());
    }
}
