//! Differential copy engine.
//!
//! Copies only files that are new or whose size or whole-second mtime differ
//! from the destination copy. Transfers fan out over a bounded pool: one
//! tokio task per file, gated by a semaphore with `threads` permits, with the
//! blocking I/O itself on `spawn_blocking`. A file that keeps failing after
//! its retries is reported as failed and the run carries on.

pub mod plan;
pub mod report;

use crate::fs::metadata::{make_writable, FileMetadata};
use crate::fs::{walk_directory, PathFilter, TreeListing, WalkOptions};
use crate::utils::errors::{EngineError, Result};
use crate::utils::format::{format_bytes, format_throughput};
use plan::{build_plan, CopyDecision, PlannedFile};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub use plan::CopyPlan;
pub use report::{CopyExit, CopyReport, CopyStats, FileOutcome, OutcomeStatus};

/// Everything the engine needs for one tree-to-tree copy
#[derive(Debug, Clone)]
pub struct CopyJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub filter: PathFilter,
    pub threads: usize,
    pub retries: u32,
    pub wait: Duration,
    /// Report decisions without writing anything
    pub simulate: bool,
    /// Delete destination entries that are absent from the source
    pub mirror: bool,
}

impl CopyJob {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            filter: PathFilter::allow_all(),
            threads: 8,
            retries: 3,
            wait: Duration::from_secs(5),
            simulate: false,
            mirror: false,
        }
    }
}

/// Retry settings shared by tree copies and single-file copies
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub wait: Duration,
}

impl From<&CopyJob> for RetryPolicy {
    fn from(job: &CopyJob) -> Self {
        Self {
            retries: job.retries,
            wait: job.wait,
        }
    }
}

/// Run a differential copy of `job.source` into `job.destination`.
///
/// Fails only when the copy cannot run at all: the source is missing or not
/// a directory, the destination cannot be created, or the worker pool
/// breaks. Per-file failures land in the report.
pub async fn run_copy(job: &CopyJob) -> Result<CopyReport> {
    let started = Instant::now();

    if !job.source.is_dir() {
        return Err(EngineError::CopyEngine(format!(
            "source is not a readable directory: {}",
            job.source.display()
        )));
    }
    if !job.simulate {
        fs::create_dir_all(&job.destination).map_err(|e| {
            EngineError::CopyEngine(format!(
                "cannot create destination {}: {}",
                job.destination.display(),
                e
            ))
        })?;
    }

    let source_listing = scan(&job.source, &job.filter).await?;
    let existing = if job.mirror && job.destination.is_dir() {
        Some(scan(&job.destination, &job.filter).await?)
    } else {
        None
    };

    let plan = {
        let destination = job.destination.clone();
        let filter = job.filter.clone();
        let source_listing = source_listing.clone();
        tokio::task::spawn_blocking(move || {
            build_plan(&source_listing, &destination, existing.as_ref(), &filter)
        })
        .await
        .map_err(|e| EngineError::CopyEngine(format!("planning task failed: {}", e)))?
    };

    info!(
        "Copy plan for {} -> {}: {} files scanned, {} to transfer ({}), {} extras",
        job.source.display(),
        job.destination.display(),
        plan.files.len(),
        plan.transfer_count(),
        format_bytes(plan.transfer_bytes()),
        plan.extra_files.len()
    );

    let mut report = CopyReport::new(
        job.source.clone(),
        job.destination.clone(),
        job.simulate,
        job.mirror,
    );
    for failure in &source_listing.failures {
        warn!("Could not read {}: {}", failure.path.display(), failure.message);
    }
    report.walk_failures = source_listing.failures;

    let CopyPlan {
        files,
        extra_files,
        extra_dirs,
    } = plan;

    let (to_copy, unchanged): (Vec<PlannedFile>, Vec<PlannedFile>) =
        files.into_iter().partition(|f| f.decision.needs_transfer());

    for file in unchanged {
        debug!("Unchanged: {}", file.relative_path.display());
        report.push(outcome(file, OutcomeStatus::Skipped, 0, None));
    }

    if job.simulate {
        for file in to_copy.into_iter().chain(extra_files) {
            debug!("Would {:?}: {}", file.decision, file.relative_path.display());
            report.push(outcome(file, OutcomeStatus::Simulated, 0, None));
        }
    } else {
        for result in transfer_all(to_copy, job.threads, RetryPolicy::from(job)).await? {
            report.push(result);
        }
        if job.mirror {
            remove_extras(&mut report, extra_files, &extra_dirs);
        }
    }

    report.stats.duration = started.elapsed();
    info!(
        "Copy finished: {} copied, {} skipped, {} deleted, {} failed, {} at {}",
        report.stats.copied,
        report.stats.skipped,
        report.stats.deleted,
        report.stats.failed,
        format_bytes(report.stats.bytes_copied),
        format_throughput(report.stats.bytes_copied, report.stats.duration)
    );

    Ok(report)
}

/// Copy a single file with the same retry semantics as a tree copy
pub async fn copy_single(
    source: &Path,
    destination: &Path,
    retry: RetryPolicy,
    simulate: bool,
) -> Result<FileOutcome> {
    let meta = fs::metadata(source).map_err(|e| {
        EngineError::CopyEngine(format!("cannot read {}: {}", source.display(), e))
    })?;
    if !meta.is_file() {
        return Err(EngineError::CopyEngine(format!(
            "not a regular file: {}",
            source.display()
        )));
    }

    let info = crate::fs::FileInfo {
        path: source.to_path_buf(),
        relative_path: PathBuf::from(source.file_name().unwrap_or_default()),
        size: meta.len(),
        modified: meta.modified()?,
        is_symlink: false,
    };
    let file = PlannedFile {
        decision: plan::decide(&info, destination),
        relative_path: info.relative_path,
        source: info.path,
        destination: destination.to_path_buf(),
        size: info.size,
    };

    if !file.decision.needs_transfer() {
        return Ok(outcome(file, OutcomeStatus::Skipped, 0, None));
    }
    if simulate {
        return Ok(outcome(file, OutcomeStatus::Simulated, 0, None));
    }
    Ok(transfer_with_retry(file, retry).await)
}

async fn scan(root: &Path, filter: &PathFilter) -> Result<TreeListing> {
    let root = root.to_path_buf();
    let options = WalkOptions::filtered(filter.clone());
    tokio::task::spawn_blocking(move || walk_directory(&root, &options))
        .await
        .map_err(|e| EngineError::CopyEngine(format!("scan task failed: {}", e)))?
        .map_err(|e| EngineError::CopyEngine(e.to_string()))
}

async fn transfer_all(files: Vec<PlannedFile>, threads: usize, retry: RetryPolicy) -> Result<Vec<FileOutcome>> {
    let semaphore = Arc::new(Semaphore::new(threads.max(1)));
    let mut handles = Vec::with_capacity(files.len());

    for file in files {
        let sem = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| EngineError::CopyEngine(format!("worker pool closed: {}", e)))?;
            Ok::<_, EngineError>(transfer_with_retry(file, retry).await)
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        let result = handle
            .await
            .map_err(|e| EngineError::CopyEngine(format!("copy worker failed: {}", e)))?;
        outcomes.push(result?);
    }
    Ok(outcomes)
}

async fn transfer_with_retry(file: PlannedFile, retry: RetryPolicy) -> FileOutcome {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let source = file.source.clone();
        let destination = file.destination.clone();
        let result = tokio::task::spawn_blocking(move || copy_preserving(&source, &destination))
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e.to_string())));

        match result {
            Ok(()) => {
                debug!("Copied {} ({:?})", file.relative_path.display(), file.decision);
                return outcome(file, OutcomeStatus::Copied, attempts, None);
            }
            Err(e) if attempts <= retry.retries => {
                warn!(
                    "Copy of {} failed (attempt {}/{}): {}; retrying in {:?}",
                    file.relative_path.display(),
                    attempts,
                    retry.retries + 1,
                    e,
                    retry.wait
                );
                tokio::time::sleep(retry.wait).await;
            }
            Err(e) => {
                warn!(
                    "Giving up on {} after {} attempt(s): {}",
                    file.relative_path.display(),
                    attempts,
                    e
                );
                return outcome(file, OutcomeStatus::Failed, attempts, Some(e.to_string()));
            }
        }
    }
}

/// Copy one file, then carry over its timestamps and attributes
fn copy_preserving(source: &Path, destination: &Path) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if destination.exists() {
        make_writable(destination)?;
    }
    let metadata = FileMetadata::from_path(source)?;
    fs::copy(source, destination)?;
    metadata.apply_to_path(destination)
}

fn remove_extras(report: &mut CopyReport, extra_files: Vec<PlannedFile>, extra_dirs: &[PathBuf]) {
    for file in extra_files {
        let removed = make_writable(&file.destination).and_then(|_| fs::remove_file(&file.destination));
        match removed {
            Ok(()) => {
                debug!("Removed extra file {}", file.destination.display());
                report.push(outcome(file, OutcomeStatus::Deleted, 1, None));
            }
            Err(e) => {
                warn!("Could not remove extra file {}: {}", file.destination.display(), e);
                report.push(outcome(file, OutcomeStatus::Failed, 1, Some(e.to_string())));
            }
        }
    }

    // Deepest first, one level at a time: a directory still holding excluded
    // entries stays where it is.
    for dir in extra_dirs {
        let holds_entries = match fs::read_dir(dir) {
            Ok(mut entries) => entries.next().is_some(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(_) => false,
        };
        if holds_entries {
            debug!("Keeping extra directory {} (holds excluded entries)", dir.display());
            continue;
        }

        let planned = PlannedFile {
            relative_path: dir.strip_prefix(&report.destination).unwrap_or(dir).to_path_buf(),
            source: PathBuf::new(),
            destination: dir.clone(),
            size: 0,
            decision: CopyDecision::Extra,
        };
        match fs::remove_dir(dir) {
            Ok(()) => {
                debug!("Removed extra directory {}", dir.display());
                report.push(outcome(planned, OutcomeStatus::Deleted, 1, None));
            }
            Err(e) => {
                warn!("Could not remove extra directory {}: {}", dir.display(), e);
                report.push(outcome(planned, OutcomeStatus::Failed, 1, Some(e.to_string())));
            }
        }
    }
}

fn outcome(file: PlannedFile, status: OutcomeStatus, attempts: u32, error: Option<String>) -> FileOutcome {
    FileOutcome {
        relative_path: file.relative_path,
        source: file.source,
        destination: file.destination,
        size: file.size,
        decision: file.decision,
        status,
        attempts,
        error,
    }
}
