//! Per-version catalog and manifest.
//!
//! Both are written as JSON siblings of the version directory so that the
//! copied tree contains only source files.

pub mod manifest;

use crate::fs::{to_slash, walk_directory, WalkOptions};
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use manifest::Manifest;

/// One file of a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// `/`-separated path relative to the version root
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Catalog every file under `root`. A root that does not exist (a
    /// simulated run never creates its version directory) yields an empty
    /// catalog.
    pub fn build(root: &Path) -> Result<Self> {
        if !root.exists() {
            return Ok(Self::default());
        }

        let listing = walk_directory(root, &WalkOptions::default())?;
        let entries = listing
            .files
            .into_iter()
            .map(|file| CatalogEntry {
                path: to_slash(&file.relative_path),
                size: file.size,
                modified: DateTime::<Utc>::from(file.modified),
            })
            .collect();

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Sorted `(path, size)` pairs, for comparing two trees by content shape
    pub fn comparable(&self) -> Vec<(String, u64)> {
        let mut pairs: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|e| (e.path.clone(), e.size))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| EngineError::io_at(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|e| EngineError::io_at(path, e))
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| EngineError::io_at(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_catalog() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path().join("v");
        fs::create_dir_all(root.join("sub"))?;
        fs::write(root.join("a.txt"), b"12345")?;
        fs::write(root.join("sub/b.txt"), b"12")?;

        let catalog = Catalog::build(&root)?;
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.total_bytes(), 7);
        assert_eq!(
            catalog.comparable(),
            vec![("a.txt".to_string(), 5), ("sub/b.txt".to_string(), 2)]
        );
        Ok(())
    }

    #[test]
    fn test_missing_root_is_empty() -> Result<()> {
        let temp = TempDir::new()?;
        let catalog = Catalog::build(&temp.path().join("never-created"))?;
        assert!(catalog.is_empty());
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path().join("v");
        fs::create_dir_all(&root)?;
        fs::write(root.join("a.txt"), b"abc")?;

        let catalog = Catalog::build(&root)?;
        let path = temp.path().join("v.catalog.json");
        catalog.save(&path)?;

        let loaded = Catalog::load(&path)?;
        assert_eq!(loaded.entries, catalog.entries);
        Ok(())
    }
}
