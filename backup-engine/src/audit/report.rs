//! Run artifact directory, summary report and log rotation.
//!
//! Each run writes its artifacts to
//! `<log_dir>/<set>/<yyyyMMdd-HHmmss>-<run id prefix>/`.

use crate::audit::export::{RunHeader, RunOutcome};
use crate::audit::ledger::AuditLedger;
use crate::utils::errors::{EngineError, Result};
use crate::utils::days_before;
use crate::utils::format::format_bytes;
use chrono::NaiveDateTime;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const DIR_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Paths of the files one run produces
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub dir: PathBuf,
    pub execution_log: PathBuf,
    pub audit_csv: PathBuf,
    pub audit_json: PathBuf,
    pub summary: PathBuf,
}

impl RunArtifacts {
    pub fn create(log_dir: &Path, scope: &str, started: NaiveDateTime, run_id: Uuid) -> Result<Self> {
        let id = run_id.simple().to_string();
        let dir = log_dir.join(scope).join(format!(
            "{}-{}",
            started.format(DIR_TIMESTAMP_FORMAT),
            &id[..8]
        ));
        fs::create_dir_all(&dir).map_err(|e| EngineError::io_at(&dir, e))?;

        Ok(Self {
            execution_log: dir.join("execution.log"),
            audit_csv: dir.join("audit.csv"),
            audit_json: dir.join("audit.json"),
            summary: dir.join("summary.txt"),
            dir,
        })
    }
}

/// Human-readable run summary, grouped by action tag
pub fn render_summary(header: &RunHeader, ledger: &AuditLedger, artifacts: Option<&RunArtifacts>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run       : {} ({})", header.command, header.run_id);
    if let Some(set) = &header.set {
        let _ = writeln!(out, "Set       : {}", set);
    }
    if let Some(version) = &header.version {
        let _ = writeln!(out, "Version   : {}", version);
    }
    if let Some(path) = &header.version_path {
        let _ = writeln!(out, "Path      : {}", path.display());
    }
    let _ = writeln!(out, "Started   : {}", header.started.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Finished  : {}", header.finished.format("%Y-%m-%d %H:%M:%S"));
    if header.dry_run {
        let _ = writeln!(out, "Mode      : dry run (no changes made)");
    }
    match &header.outcome {
        RunOutcome::Success => {
            let _ = writeln!(out, "Outcome   : success");
        }
        RunOutcome::Failed { error } => {
            let _ = writeln!(out, "Outcome   : FAILED - {}", error);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{:<18}{:>8}{:>14}", "Action", "Count", "Size");
    for group in ledger.summary() {
        let _ = writeln!(
            out,
            "{:<18}{:>8}{:>14}",
            group.action.to_string(),
            group.count,
            format_bytes(group.total_size)
        );
    }

    let problems: Vec<_> = ledger
        .records()
        .iter()
        .filter(|r| {
            !matches!(
                r.status,
                crate::audit::AuditStatus::Ok | crate::audit::AuditStatus::DryRun
            )
        })
        .collect();
    if !problems.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Attention ({}):", problems.len());
        for record in problems {
            let _ = writeln!(
                out,
                "  {} {} {}{}",
                record.action,
                record.status,
                record.source,
                record.detail.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default()
            );
        }
    }

    if let Some(artifacts) = artifacts {
        let _ = writeln!(out);
        let _ = writeln!(out, "Artifacts:");
        let _ = writeln!(out, "  {}", artifacts.execution_log.display());
        let _ = writeln!(out, "  {}", artifacts.audit_csv.display());
        let _ = writeln!(out, "  {}", artifacts.audit_json.display());
        let _ = writeln!(out, "  {}", artifacts.summary.display());
    }
    out
}

/// Remove run-artifact directories under `scope_dir` older than
/// `retention_days`. Returns the removed directories. 0 keeps everything.
pub fn rotate_logs(scope_dir: &Path, retention_days: u32, now: NaiveDateTime) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    if retention_days == 0 || !scope_dir.is_dir() {
        return removed;
    }

    let cutoff = days_before(now, retention_days);
    let entries = match fs::read_dir(scope_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {} for log rotation: {}", scope_dir.display(), e);
            return removed;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let started = name
            .get(..15)
            .and_then(|stamp| NaiveDateTime::parse_from_str(stamp, DIR_TIMESTAMP_FORMAT).ok());
        let started = match started {
            Some(started) => started,
            None => {
                debug!("Skipping {} during log rotation", name);
                continue;
            }
        };
        if started >= cutoff {
            continue;
        }

        let path = entry.path();
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                info!("Removed old run artifacts {}", path.display());
                removed.push(path);
            }
            Err(e) => warn!("Could not remove old run artifacts {}: {}", path.display(), e),
        }
    }
    removed
}
