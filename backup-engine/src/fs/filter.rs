//! Include/exclude glob filtering shared by copy, verify and restore.
//!
//! A pattern matches when it matches either the entry's file name or its
//! `/`-separated path relative to the tree root, so `*.tmp` excludes
//! temporaries at any depth while `logs/*.txt` only matches under `logs`.
//! Include patterns apply to files only; exclude patterns prune whole
//! directories as well.

use crate::utils::errors::{EngineError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct PathFilter {
    inner: Arc<FilterInner>,
}

#[derive(Debug)]
struct FilterInner {
    /// `None` admits every file
    include: Option<GlobSet>,
    exclude: GlobSet,
    include_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
}

impl PathFilter {
    /// Compile include and exclude patterns. An empty include list matches
    /// everything.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let matches_all = include.is_empty() || include.iter().any(|p| p == "*" || p == "*.*");
        let include_set = if matches_all {
            None
        } else {
            Some(build_set(include)?)
        };

        Ok(Self {
            inner: Arc::new(FilterInner {
                include: include_set,
                exclude: build_set(exclude)?,
                include_patterns: include.to_vec(),
                exclude_patterns: exclude.to_vec(),
            }),
        })
    }

    /// A filter that admits every path
    pub fn allow_all() -> Self {
        Self {
            inner: Arc::new(FilterInner {
                include: None,
                exclude: GlobSet::empty(),
                include_patterns: Vec::new(),
                exclude_patterns: Vec::new(),
            }),
        }
    }

    /// Returns `true` if a file at `relative` should be transferred
    pub fn allows_file(&self, relative: &Path) -> bool {
        let (name, full) = match match_keys(relative) {
            Some(keys) => keys,
            None => return false,
        };

        let included = match &self.inner.include {
            Some(set) => set.is_match(&name) || set.is_match(&full),
            None => true,
        };
        included && !self.matches_exclude(&name, &full)
    }

    /// Returns `true` if a directory at `relative` must not be descended into
    pub fn excludes_dir(&self, relative: &Path) -> bool {
        match match_keys(relative) {
            Some((name, full)) => self.matches_exclude(&name, &full),
            None => false,
        }
    }

    pub fn include_patterns(&self) -> &[String] {
        &self.inner.include_patterns
    }

    pub fn exclude_patterns(&self) -> &[String] {
        &self.inner.exclude_patterns
    }

    fn matches_exclude(&self, name: &str, full: &str) -> bool {
        self.inner.exclude.is_match(name) || self.inner.exclude.is_match(full)
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::allow_all()
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            EngineError::Validation(format!("invalid pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| EngineError::Validation(format!("invalid pattern set: {}", e)))
}

/// File name and normalized relative path of an entry
fn match_keys(relative: &Path) -> Option<(String, String)> {
    let name = relative.file_name()?.to_string_lossy().to_string();
    Some((name, to_slash(relative)))
}

/// Render a relative path with `/` separators on every platform
pub fn to_slash(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
