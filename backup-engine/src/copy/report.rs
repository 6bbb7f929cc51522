//! Structured results of one copy run and the operation log rendered from them.

use crate::copy::plan::CopyDecision;
use crate::fs::filter::to_slash;
use crate::fs::walker::WalkFailure;
use crate::utils::format::{format_bytes, format_duration, format_throughput};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

/// What actually happened to one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Copied,
    Skipped,
    /// Would have been copied or deleted (simulate mode)
    Simulated,
    Deleted,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub relative_path: PathBuf,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size: u64,
    pub decision: CopyDecision,
    pub status: OutcomeStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyExit {
    Success,
    PartialFailure,
}

impl CopyExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopyStats {
    pub total_files: usize,
    pub copied: usize,
    pub new_files: usize,
    pub changed: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub failed: usize,
    pub bytes_copied: u64,
    #[serde(skip)]
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct CopyReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub simulate: bool,
    pub mirror: bool,
    pub outcomes: Vec<FileOutcome>,
    pub walk_failures: Vec<WalkFailure>,
    pub stats: CopyStats,
}

impl CopyReport {
    pub(crate) fn new(source: PathBuf, destination: PathBuf, simulate: bool, mirror: bool) -> Self {
        Self {
            source,
            destination,
            simulate,
            mirror,
            outcomes: Vec::new(),
            walk_failures: Vec::new(),
            stats: CopyStats::default(),
        }
    }

    pub(crate) fn push(&mut self, outcome: FileOutcome) {
        let stats = &mut self.stats;
        if outcome.decision != CopyDecision::Extra {
            stats.total_files += 1;
        }
        match outcome.status {
            OutcomeStatus::Copied => {
                stats.copied += 1;
                stats.bytes_copied += outcome.size;
            }
            OutcomeStatus::Skipped => stats.skipped += 1,
            OutcomeStatus::Deleted => stats.deleted += 1,
            OutcomeStatus::Failed => stats.failed += 1,
            OutcomeStatus::Simulated => {}
        }
        if outcome.status != OutcomeStatus::Failed {
            match outcome.decision {
                CopyDecision::New => stats.new_files += 1,
                CopyDecision::Changed => stats.changed += 1,
                _ => {}
            }
        }
        self.outcomes.push(outcome);
    }

    pub fn exit(&self) -> CopyExit {
        if self.stats.failed > 0 || !self.walk_failures.is_empty() {
            CopyExit::PartialFailure
        } else {
            CopyExit::Success
        }
    }

    /// Outcomes for files that were written (or would have been, when simulating)
    pub fn transferred(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| {
            o.decision.needs_transfer()
                && matches!(o.status, OutcomeStatus::Copied | OutcomeStatus::Simulated)
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
    }

    /// Render the raw operation log, one line per decision
    pub fn render_log(&self) -> String {
        let mut out = String::new();
        let rule = "-".repeat(78);

        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "  Source : {}", self.source.display());
        let _ = writeln!(out, "  Dest   : {}", self.destination.display());
        let mut mode = Vec::new();
        if self.simulate {
            mode.push("simulate");
        }
        if self.mirror {
            mode.push("mirror");
        }
        if !mode.is_empty() {
            let _ = writeln!(out, "  Mode   : {}", mode.join(", "));
        }
        let _ = writeln!(out, "{}", rule);

        for outcome in &self.outcomes {
            let label = match outcome.status {
                OutcomeStatus::Deleted => "*EXTRA File (deleted)",
                OutcomeStatus::Failed => "ERROR",
                _ => outcome.decision.label(),
            };
            let _ = writeln!(
                out,
                "  {:<22}{:>14}  {}",
                label,
                outcome.size,
                to_slash(&outcome.relative_path)
            );
            if let Some(error) = &outcome.error {
                let _ = writeln!(
                    out,
                    "      after {} attempt(s): {}",
                    outcome.attempts, error
                );
            }
        }

        for failure in &self.walk_failures {
            let _ = writeln!(out, "  {:<22}{:>14}  {}", "ERROR (scan)", "", failure.path.display());
            let _ = writeln!(out, "      {}", failure.message);
        }

        let stats = &self.stats;
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(
            out,
            "  Files : {} total, {} copied ({} new, {} changed), {} skipped, {} extra deleted, {} failed",
            stats.total_files, stats.copied, stats.new_files, stats.changed, stats.skipped, stats.deleted, stats.failed
        );
        let _ = writeln!(
            out,
            "  Bytes : {} in {} ({})",
            format_bytes(stats.bytes_copied),
            format_duration(stats.duration),
            format_throughput(stats.bytes_copied, stats.duration)
        );
        let _ = writeln!(out, "  Exit  : {}", self.exit().as_str());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(name: &str, decision: CopyDecision, status: OutcomeStatus, size: u64) -> FileOutcome {
        FileOutcome {
            relative_path: PathBuf::from(name),
            source: PathBuf::from("/src").join(name),
            destination: PathBuf::from("/dst").join(name),
            size,
            decision,
            status,
            attempts: if status == OutcomeStatus::Skipped { 0 } else { 1 },
            error: (status == OutcomeStatus::Failed).then(|| "access denied".to_string()),
        }
    }

    #[test]
    fn test_stats_and_exit() {
        let mut report = CopyReport::new("/src".into(), "/dst".into(), false, true);
        report.push(outcome("a.txt", CopyDecision::New, OutcomeStatus::Copied, 10));
        report.push(outcome("b.txt", CopyDecision::Changed, OutcomeStatus::Copied, 5));
        report.push(outcome("c.txt", CopyDecision::Unchanged, OutcomeStatus::Skipped, 7));
        report.push(outcome("old.txt", CopyDecision::Extra, OutcomeStatus::Deleted, 3));
        assert_eq!(report.exit(), CopyExit::Success);

        report.push(outcome("d.txt", CopyDecision::New, OutcomeStatus::Failed, 1));
        let stats = &report.stats;
        assert_eq!(stats.total_files, 4);
        assert_eq!(stats.copied, 2);
        assert_eq!(stats.new_files, 1);
        assert_eq!(stats.changed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.bytes_copied, 15);
        assert_eq!(report.exit(), CopyExit::PartialFailure);
        assert_eq!(report.transferred().count(), 2);
    }

    #[test]
    fn test_render_log_lists_every_decision() {
        let mut report = CopyReport::new("/src".into(), "/dst".into(), true, false);
        report.push(outcome("docs/a.txt", CopyDecision::New, OutcomeStatus::Simulated, 10));
        report.push(outcome("b.bin", CopyDecision::New, OutcomeStatus::Failed, 1));

        let log = report.render_log();
        assert!(log.contains("Mode   : simulate"));
        assert!(log.contains("New File"));
        assert!(log.contains("docs/a.txt"));
        assert!(log.contains("access denied"));
        assert!(log.contains("Exit  : partial_failure"));
    }
}
