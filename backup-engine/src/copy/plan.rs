//! Stat-based differencing between a source tree and its destination.

use crate::fs::metadata::unix_seconds;
use crate::fs::{FileInfo, PathFilter, TreeListing};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Why a path is (or is not) part of the transfer set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyDecision {
    /// Absent from the destination
    New,
    /// Size or whole-second modification time differs
    Changed,
    /// Identical size and modification time
    Unchanged,
    /// Present only in the destination (mirror mode)
    Extra,
}

impl CopyDecision {
    pub fn needs_transfer(self) -> bool {
        matches!(self, Self::New | Self::Changed)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::New => "New File",
            Self::Changed => "Newer",
            Self::Unchanged => "Same",
            Self::Extra => "*EXTRA File",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub relative_path: PathBuf,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size: u64,
    pub decision: CopyDecision,
}

#[derive(Debug, Clone, Default)]
pub struct CopyPlan {
    pub files: Vec<PlannedFile>,

    /// Destination files to delete in mirror mode
    pub extra_files: Vec<PlannedFile>,

    /// Destination directories to delete in mirror mode, deepest first
    pub extra_dirs: Vec<PathBuf>,
}

impl CopyPlan {
    pub fn transfer_count(&self) -> usize {
        self.files.iter().filter(|f| f.decision.needs_transfer()).count()
    }

    pub fn transfer_bytes(&self) -> u64 {
        self.files
            .iter()
            .filter(|f| f.decision.needs_transfer())
            .map(|f| f.size)
            .sum()
    }
}

/// Compare one source file against whatever sits at its destination path
pub fn decide(source: &FileInfo, destination: &Path) -> CopyDecision {
    match std::fs::metadata(destination) {
        Ok(meta) if meta.is_file() => {
            let same_size = meta.len() == source.size;
            let same_mtime = meta
                .modified()
                .map(|m| unix_seconds(m) == unix_seconds(source.modified))
                .unwrap_or(false);
            if same_size && same_mtime {
                CopyDecision::Unchanged
            } else {
                CopyDecision::Changed
            }
        }
        Ok(_) => CopyDecision::Changed,
        Err(_) => CopyDecision::New,
    }
}

/// Build the transfer plan. `existing` is the destination listing, only
/// consulted for mirror extras.
pub fn build_plan(
    source: &TreeListing,
    destination_root: &Path,
    existing: Option<&TreeListing>,
    filter: &PathFilter,
) -> CopyPlan {
    let mut plan = CopyPlan::default();

    for info in &source.files {
        let destination = destination_root.join(&info.relative_path);
        plan.files.push(PlannedFile {
            relative_path: info.relative_path.clone(),
            source: info.path.clone(),
            decision: decide(info, &destination),
            destination,
            size: info.size,
        });
    }

    let existing = match existing {
        Some(existing) => existing,
        None => return plan,
    };

    let source_files: HashSet<&Path> = source.files.iter().map(|f| f.relative_path.as_path()).collect();
    let source_dirs: HashSet<&Path> = source.dirs.iter().map(PathBuf::as_path).collect();

    for info in &existing.files {
        if source_files.contains(info.relative_path.as_path()) || !filter.allows_file(&info.relative_path) {
            continue;
        }
        plan.extra_files.push(PlannedFile {
            relative_path: info.relative_path.clone(),
            source: PathBuf::new(),
            destination: info.path.clone(),
            size: info.size,
            decision: CopyDecision::Extra,
        });
    }

    let mut extra_dirs: Vec<&PathBuf> = existing
        .dirs
        .iter()
        .filter(|dir| !source_dirs.contains(dir.as_path()))
        .collect();
    // Deepest first so children go before their parents
    extra_dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    plan.extra_dirs = extra_dirs
        .into_iter()
        .map(|dir| destination_root.join(dir))
        .collect();

    plan
}
