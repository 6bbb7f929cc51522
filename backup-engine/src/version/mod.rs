//! Backup sets and their timestamp-addressed versions.
//!
//! A version lives at `root/<set>/<yyyy>/<mm>/<dd>/<HHMMSS>` with its
//! manifest, catalog and verification history stored as sibling files
//! (`<HHMMSS>.manifest.json`, ...) so they are never part of the copied tree.
//! Two runs in the same second get a `-NN` suffix; the identifier's string
//! order always equals its chronological order.

pub mod lease;

use crate::utils::errors::{EngineError, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

pub use lease::SetLease;

/// Highest collision suffix tried before allocation gives up
const MAX_SEQ: u8 = 99;

/// Identifier of one version. Field order gives chronological ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionId {
    timestamp: NaiveDateTime,
    seq: u8,
}

impl VersionId {
    /// Identifier for a run started at `timestamp` (sub-second part dropped)
    pub fn from_datetime(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
            seq: 0,
        }
    }

    pub fn with_seq(self, seq: u8) -> Self {
        Self { seq, ..self }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }

    /// Leaf directory name: `HHMMSS` or `HHMMSS-NN`
    pub fn leaf(&self) -> String {
        let time = self.timestamp.format("%H%M%S").to_string();
        if self.seq == 0 {
            time
        } else {
            format!("{}-{:02}", time, self.seq)
        }
    }

    /// Path of the version directory relative to the set directory
    pub fn relative_path(&self) -> PathBuf {
        let date = self.timestamp.date();
        PathBuf::from(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
            .join(self.leaf())
    }

    /// Rebuild an identifier from the four directory components
    pub fn from_components(year: &str, month: &str, day: &str, leaf: &str) -> Option<Self> {
        if year.len() != 4 || month.len() != 2 || day.len() != 2 {
            return None;
        }
        if ![year, month, day].iter().all(|c| c.bytes().all(|b| b.is_ascii_digit())) {
            return None;
        }

        let (time, seq) = match leaf.split_once('-') {
            Some((time, seq)) if seq.len() == 2 => match seq.parse::<u8>().ok()? {
                0 => return None,
                n => (time, n),
            },
            Some(_) => return None,
            None => (leaf, 0),
        };
        if time.len() != 6 || !time.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let date = NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)?;
        let time = NaiveTime::from_hms_opt(
            time[0..2].parse().ok()?,
            time[2..4].parse().ok()?,
            time[4..6].parse().ok()?,
        )?;

        Some(Self {
            timestamp: NaiveDateTime::new(date, time),
            seq,
        })
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.timestamp.format("%Y/%m/%d"), self.leaf())
    }
}

impl FromStr for VersionId {
    type Err = EngineError;

    /// Parse `yyyy/mm/dd/HHMMSS[-NN]` (`\` separators accepted too)
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(['/', '\\']).filter(|p| !p.is_empty()).collect();
        let parsed = match parts.as_slice() {
            [year, month, day, leaf] => Self::from_components(year, month, day, leaf),
            _ => None,
        };
        parsed.ok_or_else(|| EngineError::Validation(format!("invalid version identifier: {}", s)))
    }
}

impl Serialize for VersionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A named, independently retained collection of versions
#[derive(Debug, Clone)]
pub struct BackupSet {
    name: String,
    root: PathBuf,
}

impl BackupSet {
    /// Validate the set name (`[A-Za-z0-9_-]+`)
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let name = name.into();
        validate_set_name(&name)?;
        Ok(Self {
            name,
            root: root.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `root/<set>`
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    pub fn version(&self, id: VersionId) -> Version {
        Version {
            path: self.dir().join(id.relative_path()),
            id,
        }
    }

    /// Every version of the set, oldest first.
    ///
    /// Only `yyyy/mm/dd/HHMMSS[-NN]` directories count; anything else under
    /// the set directory (lease file, stray folders) is ignored.
    pub fn list_versions(&self) -> Result<Vec<Version>> {
        let set_dir = self.dir();
        if !set_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for year in child_dirs(&set_dir)? {
            for month in child_dirs(&set_dir.join(&year))? {
                for day in child_dirs(&set_dir.join(&year).join(&month))? {
                    let day_dir = set_dir.join(&year).join(&month).join(&day);
                    for leaf in child_dirs(&day_dir)? {
                        match VersionId::from_components(&year, &month, &day, &leaf) {
                            Some(id) => versions.push(Version {
                                path: day_dir.join(&leaf),
                                id,
                            }),
                            None => debug!(path = %day_dir.join(&leaf).display(), "Ignoring non-version directory"),
                        }
                    }
                }
            }
        }

        versions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(versions)
    }

    pub fn latest_version(&self) -> Result<Option<Version>> {
        Ok(self.list_versions()?.pop())
    }

    pub fn find_version(&self, id: VersionId) -> Result<Version> {
        let version = self.version(id);
        if version.path.is_dir() {
            Ok(version)
        } else {
            Err(EngineError::version_not_found(id.to_string()))
        }
    }
}

/// One backup run's output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub id: VersionId,
    pub path: PathBuf,
}

impl Version {
    fn sibling(&self, suffix: &str) -> PathBuf {
        self.path.with_file_name(format!("{}.{}", self.id.leaf(), suffix))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.sibling("manifest.json")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.sibling("catalog.json")
    }

    pub fn verify_path(&self) -> PathBuf {
        self.sibling("verify.json")
    }
}

/// Hands out fresh version directories for one set
#[derive(Debug)]
pub struct VersionAllocator {
    set: BackupSet,
    allocated: HashSet<VersionId>,
}

impl VersionAllocator {
    pub fn new(set: BackupSet) -> Self {
        Self {
            set,
            allocated: HashSet::new(),
        }
    }

    pub fn set(&self) -> &BackupSet {
        &self.set
    }

    /// Allocate a not-yet-existing version directory for a run at `now`.
    ///
    /// The directory is created eagerly (and empty) unless `dry_run` is set,
    /// in which case only the path is computed.
    pub fn allocate(&mut self, now: NaiveDateTime, dry_run: bool) -> Result<Version> {
        let set_dir = self.set.dir();
        if !dry_run {
            fs::create_dir_all(&set_dir).map_err(|e| {
                EngineError::Validation(format!(
                    "cannot create backup set root {}: {}",
                    set_dir.display(),
                    e
                ))
            })?;
        }

        let base = VersionId::from_datetime(now);
        for seq in 0..=MAX_SEQ {
            let id = base.with_seq(seq);
            if self.allocated.contains(&id) {
                continue;
            }

            let version = self.set.version(id);
            if version.manifest_path().exists() {
                continue;
            }

            if dry_run {
                if version.path.exists() {
                    continue;
                }
                self.allocated.insert(id);
                return Ok(version);
            }

            if let Some(parent) = version.path.parent() {
                fs::create_dir_all(parent).map_err(|e| EngineError::io_at(parent, e))?;
            }
            match fs::create_dir(&version.path) {
                Ok(()) => {
                    self.allocated.insert(id);
                    return Ok(version);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(EngineError::io_at(&version.path, e)),
            }
        }

        Err(EngineError::Validation(format!(
            "no free version slot for set '{}' at {}",
            self.set.name(),
            base
        )))
    }
}

pub fn validate_set_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EngineError::Validation("backup set name is empty".into()));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(EngineError::Validation(format!(
            "backup set name '{}' contains invalid character '{}'",
            name, bad
        )));
    }
    Ok(())
}

fn child_dirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| EngineError::io_at(dir, e))? {
        let entry = entry.map_err(|e| EngineError::io_at(dir, e))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(names)
}
