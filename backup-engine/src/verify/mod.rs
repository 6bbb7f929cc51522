//! Checksum verification of a copy against its reference tree.
//!
//! Every reference file admitted by the filter is hashed on both sides.
//! Outcomes are data, never errors: a mismatching or missing copy does not
//! stop verification of the remaining files.

pub mod hash;

use crate::catalog::{read_json, write_json};
use crate::fs::{to_slash, walk_directory, PathFilter, WalkOptions};
use crate::utils::errors::{EngineError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub use hash::{hash_file, ChecksumAlgorithm};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerifyStatus {
    Ok,
    Mismatch,
    Missing,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyEntry {
    pub relative_path: String,
    pub reference: PathBuf,
    pub copy: PathBuf,
    pub size: u64,
    pub status: VerifyStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub entries: Vec<VerifyEntry>,
}

impl VerifyReport {
    pub fn count(&self, status: VerifyStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|e| e.status == VerifyStatus::Ok)
    }
}

/// Hash every file of `reference_root` admitted by `filter` and compare it
/// with the file at the same relative path under `copy_root`.
pub fn verify_tree(
    reference_root: &Path,
    copy_root: &Path,
    algorithm: ChecksumAlgorithm,
    filter: &PathFilter,
) -> Result<VerifyReport> {
    if !reference_root.is_dir() {
        return Err(EngineError::Validation(format!(
            "verification reference is not a directory: {}",
            reference_root.display()
        )));
    }

    let listing = walk_directory(reference_root, &WalkOptions::filtered(filter.clone()))?;
    let mut report = VerifyReport::default();

    for failure in listing.failures {
        report.entries.push(VerifyEntry {
            relative_path: failure
                .path
                .strip_prefix(reference_root)
                .map(to_slash)
                .unwrap_or_else(|_| failure.path.display().to_string()),
            copy: PathBuf::new(),
            reference: failure.path,
            size: 0,
            status: VerifyStatus::Error,
            detail: Some(failure.message),
        });
    }

    for file in listing.files {
        let copy = copy_root.join(&file.relative_path);
        let (status, detail) = compare(&file.path, &copy, algorithm);
        match status {
            VerifyStatus::Ok => debug!("Verified {}", file.relative_path.display()),
            _ => warn!(
                "Verification {:?} for {}{}",
                status,
                file.relative_path.display(),
                detail.as_deref().map(|d| format!(": {}", d)).unwrap_or_default()
            ),
        }
        report.entries.push(VerifyEntry {
            relative_path: to_slash(&file.relative_path),
            reference: file.path,
            copy,
            size: file.size,
            status,
            detail,
        });
    }

    info!(
        "Verified {} files with {}: {} ok, {} mismatched, {} missing, {} errors",
        report.entries.len(),
        algorithm,
        report.count(VerifyStatus::Ok),
        report.count(VerifyStatus::Mismatch),
        report.count(VerifyStatus::Missing),
        report.count(VerifyStatus::Error)
    );
    Ok(report)
}

/// Verify one file copy against its reference
pub fn verify_file(reference: &Path, copy: &Path, algorithm: ChecksumAlgorithm) -> VerifyEntry {
    let (status, detail) = compare(reference, copy, algorithm);
    VerifyEntry {
        relative_path: reference
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        reference: reference.to_path_buf(),
        copy: copy.to_path_buf(),
        size: std::fs::metadata(reference).map(|m| m.len()).unwrap_or(0),
        status,
        detail,
    }
}

fn compare(reference: &Path, copy: &Path, algorithm: ChecksumAlgorithm) -> (VerifyStatus, Option<String>) {
    if !copy.is_file() {
        return (VerifyStatus::Missing, None);
    }
    let expected = match hash_file(reference, algorithm) {
        Ok(h) => h,
        Err(e) => return (VerifyStatus::Error, Some(format!("reading {}: {}", reference.display(), e))),
    };
    let actual = match hash_file(copy, algorithm) {
        Ok(h) => h,
        Err(e) => return (VerifyStatus::Error, Some(format!("reading {}: {}", copy.display(), e))),
    };
    if expected == actual {
        (VerifyStatus::Ok, None)
    } else {
        (
            VerifyStatus::Mismatch,
            Some(format!("expected {} got {}", expected, actual)),
        )
    }
}

/// Summary of one verification pass over a version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationPass {
    pub verified_at: NaiveDateTime,
    pub reference: PathBuf,
    pub algorithm: ChecksumAlgorithm,
    pub ok: usize,
    pub mismatched: usize,
    pub missing: usize,
    pub errors: usize,
    /// Non-OK entries only
    pub problems: Vec<VerifyEntry>,
}

impl VerificationPass {
    pub fn from_report(
        report: &VerifyReport,
        reference: &Path,
        algorithm: ChecksumAlgorithm,
        verified_at: NaiveDateTime,
    ) -> Self {
        Self {
            verified_at,
            reference: reference.to_path_buf(),
            algorithm,
            ok: report.count(VerifyStatus::Ok),
            mismatched: report.count(VerifyStatus::Mismatch),
            missing: report.count(VerifyStatus::Missing),
            errors: report.count(VerifyStatus::Error),
            problems: report
                .entries
                .iter()
                .filter(|e| e.status != VerifyStatus::Ok)
                .cloned()
                .collect(),
        }
    }
}

/// Appended verification results of one version (`<HHMMSS>.verify.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationHistory {
    pub passes: Vec<VerificationPass>,
}

impl VerificationHistory {
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            read_json(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Append one pass to the history file at `path`
    pub fn append(path: &Path, pass: VerificationPass) -> Result<Self> {
        let mut history = Self::load_or_default(path)?;
        history.passes.push(pass);
        write_json(path, &history)?;
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn trees(temp: &TempDir) -> std::io::Result<(PathBuf, PathBuf)> {
        let reference = temp.path().join("ref");
        let copy = temp.path().join("copy");
        for root in [&reference, &copy] {
            fs::create_dir_all(root.join("sub"))?;
            fs::write(root.join("a.txt"), b"alpha")?;
            fs::write(root.join("sub/b.txt"), b"beta")?;
        }
        Ok((reference, copy))
    }

    #[test]
    fn test_identical_trees_verify_ok() -> Result<()> {
        let temp = TempDir::new()?;
        let (reference, copy) = trees(&temp)?;

        let report = verify_tree(&reference, &copy, ChecksumAlgorithm::Sha256, &PathFilter::allow_all())?;
        assert_eq!(report.entries.len(), 2);
        assert!(report.is_clean());
        Ok(())
    }

    #[test]
    fn test_detects_mismatch_and_missing() -> Result<()> {
        let temp = TempDir::new()?;
        let (reference, copy) = trees(&temp)?;
        fs::write(copy.join("a.txt"), b"alphX")?;
        fs::remove_file(copy.join("sub/b.txt"))?;

        let report = verify_tree(&reference, &copy, ChecksumAlgorithm::Md5, &PathFilter::allow_all())?;
        assert_eq!(report.count(VerifyStatus::Mismatch), 1);
        assert_eq!(report.count(VerifyStatus::Missing), 1);
        assert!(!report.is_clean());
        Ok(())
    }

    #[test]
    fn test_filtered_files_are_not_verified() -> Result<()> {
        let temp = TempDir::new()?;
        let (reference, copy) = trees(&temp)?;
        fs::write(reference.join("lock.tmp"), b"x")?;

        let filter = PathFilter::new(&["*".into()], &["*.tmp".into()])?;
        let report = verify_tree(&reference, &copy, ChecksumAlgorithm::Sha1, &filter)?;
        assert!(report.is_clean());
        Ok(())
    }

    #[test]
    fn test_history_appends() -> Result<()> {
        let temp = TempDir::new()?;
        let (reference, copy) = trees(&temp)?;
        let report = verify_tree(&reference, &copy, ChecksumAlgorithm::Sha256, &PathFilter::allow_all())?;
        let at = chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();

        let path = temp.path().join("000000.verify.json");
        VerificationHistory::append(&path, VerificationPass::from_report(&report, &reference, ChecksumAlgorithm::Sha256, at))?;
        let history = VerificationHistory::append(
            &path,
            VerificationPass::from_report(&report, &reference, ChecksumAlgorithm::Sha256, at),
        )?;

        assert_eq!(history.passes.len(), 2);
        assert_eq!(VerificationHistory::load_or_default(&path)?.passes[1].ok, 2);
        Ok(())
    }
}
