//! Restore of a version, or selected top-level paths of it, into a target.
//!
//! Restore reuses the differential copy engine in the reverse direction and
//! never mirrors: nothing in the version and nothing extra in the target is
//! ever deleted.

use crate::audit::{AuditAction, AuditLedger, AuditRecord, AuditStatus};
use crate::copy::{copy_single, run_copy, CopyExit, CopyJob, RetryPolicy};
use crate::fs::PathFilter;
use crate::utils::errors::{EngineError, Result};
use crate::utils::Clock;
use crate::verify::{verify_file, verify_tree, ChecksumAlgorithm, VerifyReport};
use crate::version::{BackupSet, Version, VersionId};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub set: BackupSet,
    /// Newest version when `None`
    pub version: Option<VersionId>,
    pub target: PathBuf,
    /// Paths relative to the version root; empty restores everything
    pub paths: Vec<PathBuf>,
    pub filter: PathFilter,
    pub threads: usize,
    pub retries: u32,
    pub wait: Duration,
    pub dry_run: bool,
    /// Re-hash restored files against the version when set
    pub verify: Option<ChecksumAlgorithm>,
}

#[derive(Debug)]
pub struct RestoreOutcome {
    pub version: Version,
    pub exit: CopyExit,
    pub files_restored: usize,
    pub bytes_restored: u64,
    pub skipped_paths: Vec<PathBuf>,
    pub verification: Option<VerifyReport>,
    /// Operation log of every copy performed
    pub copy_log: String,
}

/// Pick the requested version, or the newest one
pub fn select_version(set: &BackupSet, requested: Option<VersionId>) -> Result<Version> {
    match requested {
        Some(id) => set.find_version(id),
        None => set.latest_version()?.ok_or_else(|| EngineError::NotFound {
            entity: "Version",
            identifier: format!("any version in set '{}'", set.name()),
        }),
    }
}

/// Reject paths that could escape the version or the target
pub fn validate_restore_path(path: &Path) -> Result<()> {
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || path.as_os_str().is_empty() {
        return Err(EngineError::Validation(format!(
            "restore path must be relative and stay inside the version: {}",
            path.display()
        )));
    }
    Ok(())
}

pub async fn restore(request: &RestoreRequest, clock: &dyn Clock, ledger: &mut AuditLedger) -> Result<RestoreOutcome> {
    for path in &request.paths {
        validate_restore_path(path)?;
    }
    let version = select_version(&request.set, request.version)?;
    info!(
        "Restoring {} version {} into {}{}",
        request.set.name(),
        version.id,
        request.target.display(),
        if request.dry_run { " (dry run)" } else { "" }
    );

    let selections: Vec<PathBuf> = if request.paths.is_empty() {
        vec![PathBuf::new()]
    } else {
        request.paths.clone()
    };

    let retry = RetryPolicy {
        retries: request.retries,
        wait: request.wait,
    };
    let mut outcome = RestoreOutcome {
        version: version.clone(),
        exit: CopyExit::Success,
        files_restored: 0,
        bytes_restored: 0,
        skipped_paths: Vec::new(),
        verification: None,
        copy_log: String::new(),
    };
    let mut verification = VerifyReport::default();

    for selection in selections {
        let (source, destination) = if selection.as_os_str().is_empty() {
            (version.path.clone(), request.target.clone())
        } else {
            (version.path.join(&selection), request.target.join(&selection))
        };

        if !source.exists() {
            warn!(
                "{} is not present in version {}, skipping",
                selection.display(),
                version.id
            );
            ledger.record(
                AuditRecord::new(clock.now(), AuditAction::Restore, &source, &destination, 0, AuditStatus::Skip)
                    .with_detail("path not present in version"),
            );
            outcome.skipped_paths.push(selection);
            continue;
        }

        let (status, bytes) = if source.is_file() {
            let file = copy_single(&source, &destination, retry, request.dry_run).await?;
            outcome.copy_log.push_str(&format!(
                "  {:<22}{:>14}  {} -> {}\n",
                file.decision.label(),
                file.size,
                source.display(),
                destination.display()
            ));
            if let Some(record) = AuditRecord::from_copy(clock.now(), AuditAction::Copy, &file) {
                ledger.record(record);
            }
            match file.status {
                crate::copy::OutcomeStatus::Copied => {
                    outcome.files_restored += 1;
                    outcome.bytes_restored += file.size;
                    (AuditStatus::Ok, file.size)
                }
                crate::copy::OutcomeStatus::Failed => {
                    outcome.exit = CopyExit::PartialFailure;
                    (AuditStatus::Error, 0)
                }
                crate::copy::OutcomeStatus::Simulated => (AuditStatus::DryRun, file.size),
                _ => (AuditStatus::Ok, 0),
            }
        } else {
            let job = CopyJob {
                source: source.clone(),
                destination: destination.clone(),
                filter: request.filter.clone(),
                threads: request.threads,
                retries: request.retries,
                wait: request.wait,
                simulate: request.dry_run,
                mirror: false,
            };
            let report = run_copy(&job).await?;
            outcome.copy_log.push_str(&report.render_log());
            let now = clock.now();
            ledger.extend(
                report
                    .outcomes
                    .iter()
                    .filter_map(|o| AuditRecord::from_copy(now, AuditAction::Copy, o)),
            );
            outcome.files_restored += report.stats.copied;
            outcome.bytes_restored += report.stats.bytes_copied;

            let status = if request.dry_run {
                AuditStatus::DryRun
            } else if report.exit() == CopyExit::PartialFailure {
                outcome.exit = CopyExit::PartialFailure;
                AuditStatus::Error
            } else {
                AuditStatus::Ok
            };
            let bytes = if request.dry_run {
                report.transferred().map(|o| o.size).sum()
            } else {
                report.stats.bytes_copied
            };
            (status, bytes)
        };

        ledger.record(AuditRecord::new(
            clock.now(),
            AuditAction::Restore,
            &source,
            &destination,
            bytes,
            status,
        ));

        if let (Some(algorithm), false) = (request.verify, request.dry_run) {
            let entries = verify_selection(source, destination, algorithm, request.filter.clone()).await?;
            let now = clock.now();
            ledger.extend(entries.iter().map(|e| AuditRecord::from_verify(now, e)));
            verification.entries.extend(entries);
        }
    }

    if request.verify.is_some() && !request.dry_run {
        outcome.verification = Some(verification);
    }
    info!(
        "Restore finished: {} files ({} bytes), {} paths skipped",
        outcome.files_restored,
        outcome.bytes_restored,
        outcome.skipped_paths.len()
    );
    Ok(outcome)
}

async fn verify_selection(
    source: PathBuf,
    destination: PathBuf,
    algorithm: ChecksumAlgorithm,
    filter: PathFilter,
) -> Result<Vec<crate::verify::VerifyEntry>> {
    tokio::task::spawn_blocking(move || {
        if source.is_file() {
            Ok(vec![verify_file(&source, &destination, algorithm)])
        } else {
            verify_tree(&source, &destination, algorithm, &filter).map(|report| report.entries)
        }
    })
    .await
    .map_err(|e| EngineError::CopyEngine(format!("verification task failed: {}", e)))?
}
