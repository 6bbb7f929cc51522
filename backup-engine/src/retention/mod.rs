//! Retention garbage collection for one backup set.
//!
//! Two passes, always in this order: the age pass deletes versions whose
//! timestamp is strictly older than `now - max_age_days`, then the count pass
//! re-enumerates and deletes the oldest versions beyond `max_versions`. A
//! limit of 0 disables its pass. A version that cannot be removed is recorded
//! as an error and left where it is.

use crate::audit::{AuditAction, AuditRecord, AuditStatus};
use crate::catalog::Catalog;
use crate::fs::metadata::make_writable;
use crate::fs::{walk_directory, WalkOptions};
use crate::utils::days_before;
use crate::utils::errors::Result;
use crate::version::{BackupSet, Version, VersionId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    pub max_versions: u32,
}

impl RetentionPolicy {
    pub fn age_cutoff(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        (self.max_age_days > 0).then(|| days_before(now, self.max_age_days))
    }
}

impl From<&crate::config::RetentionConfig> for RetentionPolicy {
    fn from(config: &crate::config::RetentionConfig) -> Self {
        Self {
            max_age_days: config.max_age_days,
            max_versions: config.max_versions,
        }
    }
}

#[derive(Debug, Default)]
pub struct RetentionOutcome {
    pub records: Vec<AuditRecord>,
    /// Versions removed (or that would be removed, when simulating)
    pub removed: Vec<VersionId>,
    pub failed: Vec<VersionId>,
}

/// Removes one version from disk
pub trait VersionRemover: Send + Sync {
    fn remove(&self, set: &BackupSet, version: &Version) -> std::io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsRemover;

impl VersionRemover for FsRemover {
    fn remove(&self, set: &BackupSet, version: &Version) -> std::io::Result<()> {
        delete_version(set, version)
    }
}

/// Apply `policy` to every version of `set`
pub fn enforce(set: &BackupSet, policy: &RetentionPolicy, now: NaiveDateTime, dry_run: bool) -> Result<RetentionOutcome> {
    enforce_with(set, policy, now, dry_run, None, &FsRemover)
}

/// Like [`enforce`], with deletion going through `remover`. A simulated run
/// also counts `pending`, the version a real run would have created, so the
/// count pass reports the same deletions.
pub fn enforce_with(
    set: &BackupSet,
    policy: &RetentionPolicy,
    now: NaiveDateTime,
    dry_run: bool,
    pending: Option<&Version>,
    remover: &dyn VersionRemover,
) -> Result<RetentionOutcome> {
    let mut outcome = RetentionOutcome::default();
    // Versions a simulated age pass would have removed
    let mut planned: HashSet<VersionId> = HashSet::new();

    match policy.age_cutoff(now) {
        Some(cutoff) => {
            let expired: Vec<Version> = set
                .list_versions()?
                .into_iter()
                .filter(|v| v.id.timestamp() < cutoff)
                .collect();
            info!(
                "Retention age pass for '{}': cutoff {}, {} expired",
                set.name(),
                cutoff,
                expired.len()
            );
            for version in expired {
                planned.insert(version.id);
                remove(set, &version, AuditAction::RetentionAge, now, dry_run, remover, &mut outcome);
            }
        }
        None => debug!("Retention age pass disabled"),
    }

    if policy.max_versions == 0 {
        debug!("Retention count pass disabled");
        return Ok(outcome);
    }

    let mut remaining: Vec<Version> = set
        .list_versions()?
        .into_iter()
        .filter(|v| !(dry_run && planned.contains(&v.id)))
        .collect();
    if let Some(pending) = pending.filter(|_| dry_run) {
        if !remaining.iter().any(|v| v.id == pending.id) {
            remaining.push(pending.clone());
            remaining.sort_by_key(|v| v.id);
        }
    }
    let excess = remaining.len().saturating_sub(policy.max_versions as usize);
    info!(
        "Retention count pass for '{}': {} versions, keeping {}, {} excess",
        set.name(),
        remaining.len(),
        policy.max_versions,
        excess
    );
    for version in remaining.into_iter().take(excess) {
        remove(set, &version, AuditAction::RetentionCount, now, dry_run, remover, &mut outcome);
    }

    Ok(outcome)
}

fn remove(
    set: &BackupSet,
    version: &Version,
    action: AuditAction,
    now: NaiveDateTime,
    dry_run: bool,
    remover: &dyn VersionRemover,
    outcome: &mut RetentionOutcome,
) {
    let size = version_size(version);
    let record = |status| AuditRecord::new(now, action, &version.path, "", size, status);

    if dry_run {
        info!("Would remove version {} ({})", version.id, action);
        outcome.records.push(record(AuditStatus::DryRun));
        outcome.removed.push(version.id);
        return;
    }

    match remover.remove(set, version) {
        Ok(()) => {
            info!("Removed version {} ({})", version.id, action);
            outcome.records.push(record(AuditStatus::Ok));
            outcome.removed.push(version.id);
        }
        Err(e) => {
            warn!("Could not remove version {}: {}", version.id, e);
            outcome
                .records
                .push(record(AuditStatus::Error).with_detail(format!("deletion failed: {}", e)));
            outcome.failed.push(version.id);
        }
    }
}

/// Bytes held by a version, from its catalog when there is one
fn version_size(version: &Version) -> u64 {
    if let Ok(catalog) = Catalog::load(&version.catalog_path()) {
        return catalog.total_bytes();
    }
    walk_directory(&version.path, &WalkOptions::default())
        .map(|listing| listing.total_size())
        .unwrap_or(0)
}

/// Remove a version directory, its sibling metadata files and any day,
/// month or year directory left empty.
pub fn delete_version(set: &BackupSet, version: &Version) -> std::io::Result<()> {
    clear_readonly(&version.path);
    fs::remove_dir_all(&version.path)?;

    for sibling in [version.manifest_path(), version.catalog_path(), version.verify_path()] {
        match fs::remove_file(&sibling) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    prune_empty_parents(&version.path, &set.dir());
    Ok(())
}

fn clear_readonly(root: &Path) {
    for entry in WalkDir::new(root).into_iter().flatten() {
        if entry.file_type().is_file() {
            if let Err(e) = make_writable(entry.path()) {
                debug!("Cannot clear read-only flag on {}: {}", entry.path().display(), e);
            }
        }
    }
}

fn prune_empty_parents(removed: &Path, stop_at: &Path) {
    let mut current = removed.parent();
    while let Some(dir) = current {
        if dir == stop_at || !dir.starts_with(stop_at) {
            break;
        }
        // Fails on non-empty directories, which ends the climb
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
