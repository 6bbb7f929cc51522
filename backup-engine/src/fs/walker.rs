//! Directory traversal with metadata for copy planning and cataloging.
//!
//! Unreadable entries below the root are collected as failures and do not
//! stop the walk; an unreadable root is an error.

use crate::fs::filter::PathFilter;
use crate::utils::errors::{EngineError, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Include/exclude filter applied to files and directories
    pub filter: PathFilter,
}

impl WalkOptions {
    pub fn filtered(filter: PathFilter) -> Self {
        Self {
            follow_links: false,
            filter,
        }
    }
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Last modification time
    pub modified: SystemTime,

    /// Is this a symlink?
    pub is_symlink: bool,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// For symlinks, resolves to the target to get the real file size.
    /// Returns None if the symlink target is a directory or cannot be resolved.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let raw_metadata = entry.metadata().map_err(std::io::Error::from)?;
        let path = entry.path().to_path_buf();
        let relative_path = relative_to(&path, root);
        let is_symlink = entry.path_is_symlink();

        let metadata = if is_symlink {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_dir() => return Ok(None),
                Ok(resolved) => resolved,
                Err(_) => return Ok(None),
            }
        } else {
            raw_metadata
        };

        Ok(Some(Self {
            path,
            relative_path,
            size: metadata.len(),
            modified: metadata.modified()?,
            is_symlink,
        }))
    }
}

/// An entry that could not be read during the walk
#[derive(Debug, Clone)]
pub struct WalkFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Result of walking one tree
#[derive(Debug, Clone, Default)]
pub struct TreeListing {
    /// Files admitted by the filter, in file-name order per directory
    pub files: Vec<FileInfo>,

    /// Relative paths of every directory below the root that was descended
    pub dirs: Vec<PathBuf>,

    pub failures: Vec<WalkFailure>,
}

impl TreeListing {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Walk a directory tree and collect all files admitted by the filter
///
/// # Returns
/// * `Ok(TreeListing)` - Files, directories and per-entry failures
/// * `Err(EngineError)` - If the root itself cannot be read
///
/// # Example
/// ```no_run
/// use backup_engine::fs::walker::{walk_directory, WalkOptions};
/// use std::path::Path;
///
/// let listing = walk_directory(Path::new("/data"), &WalkOptions::default()).unwrap();
/// println!("Found {} files", listing.files.len());
/// ```
pub fn walk_directory(root: &Path, options: &WalkOptions) -> Result<TreeListing> {
    let root_meta = std::fs::metadata(root).map_err(|e| EngineError::io_at(root, e))?;
    if !root_meta.is_dir() {
        return Err(EngineError::io_at(
            root,
            std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
        ));
    }

    let mut listing = TreeListing::default();
    let filter = &options.filter;

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !filter.excludes_dir(&relative_to(entry.path(), root))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => return Err(err.into()),
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                listing.failures.push(WalkFailure {
                    path,
                    message: err.to_string(),
                });
                continue;
            }
        };

        if entry.depth() == 0 {
            continue;
        }

        if entry.file_type().is_dir() {
            listing.dirs.push(relative_to(entry.path(), root));
            continue;
        }

        let relative = relative_to(entry.path(), root);
        if !filter.allows_file(&relative) {
            continue;
        }

        match FileInfo::from_entry(&entry, root) {
            Ok(Some(info)) => listing.files.push(info),
            Ok(None) => {}
            Err(err) => listing.failures.push(WalkFailure {
                path: entry.path().to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    Ok(listing)
}

fn relative_to(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}
