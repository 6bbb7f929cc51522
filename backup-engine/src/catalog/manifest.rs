//! Run manifest: what was backed up, from where, and how.

use crate::catalog::{read_json, write_json};
use crate::copy::{CopyExit, CopyStats};
use crate::utils::errors::Result;
use crate::verify::ChecksumAlgorithm;
use crate::version::VersionId;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Manifest, serialized as `<HHMMSS>.manifest.json` next to the version directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub set: String,
    pub source: PathBuf,
    pub version: VersionId,
    pub version_path: PathBuf,
    pub run_timestamp: NaiveDateTime,
    pub run_id: Uuid,
    pub hostname: String,
    pub engine_version: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub copy_exit: CopyExit,
    pub dry_run: bool,
    pub verify_requested: bool,
    pub algorithm: ChecksumAlgorithm,
    pub threads: usize,
    pub retries: u32,
    pub wait_secs: u64,
    pub stats: CopyStats,
}

impl Manifest {
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

/// Name of the machine running the engine, `unknown` if it cannot be read
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
