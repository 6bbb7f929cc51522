//! File metadata preserved across copies.
//!
//! The copy engine carries the modification time and basic attributes
//! (permission bits on Unix, the read-only flag elsewhere) from the source
//! to every copy it writes.

use filetime::FileTime;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata carried from a source file to its copy
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last modified time
    pub modified: SystemTime,

    /// Last access time
    pub accessed: SystemTime,

    /// File permissions (Unix mode bits)
    pub permissions: Option<u32>,

    pub readonly: bool,
}

impl FileMetadata {
    /// Extract metadata from a file path
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let modified = metadata.modified()?;
        let accessed = metadata.accessed().unwrap_or(modified);

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode())
        };

        #[cfg(not(unix))]
        let permissions = None;

        Ok(Self {
            size: metadata.len(),
            modified,
            accessed,
            permissions,
            readonly: metadata.permissions().readonly(),
        })
    }

    /// Apply timestamps and attributes to a freshly written copy.
    ///
    /// Attributes are applied last so a read-only source does not block the
    /// timestamp update.
    pub fn apply_to_path(&self, path: &Path) -> std::io::Result<()> {
        filetime::set_file_times(
            path,
            FileTime::from_system_time(self.accessed),
            FileTime::from_system_time(self.modified),
        )?;

        #[cfg(unix)]
        if let Some(mode) = self.permissions {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }

        #[cfg(not(unix))]
        if self.readonly {
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_readonly(true);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }
}

/// Whole seconds since the Unix epoch (negative before 1970)
pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Clear the read-only flag so an existing copy can be overwritten or removed
pub fn make_writable(path: &Path) -> std::io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    let mut perms = metadata.permissions();
    if perms.readonly() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(perms.mode() | 0o200);
        }
        #[cfg(not(unix))]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_extract_metadata() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let metadata = FileMetadata::from_path(temp_file.path())?;

        assert_eq!(metadata.size, 12);
        assert!(unix_seconds(metadata.modified) > 0);
        Ok(())
    }

    #[test]
    fn test_apply_preserves_mtime() -> std::io::Result<()> {
        let temp = TempDir::new()?;
        let source = temp.path().join("source.txt");
        let copy = temp.path().join("copy.txt");
        fs::write(&source, b"abc")?;
        fs::write(&copy, b"abc")?;

        let past = SystemTime::now() - Duration::from_secs(3 * 24 * 3600);
        filetime::set_file_mtime(&source, FileTime::from_system_time(past))?;

        let metadata = FileMetadata::from_path(&source)?;
        metadata.apply_to_path(&copy)?;

        let copied = fs::metadata(&copy)?.modified()?;
        assert_eq!(unix_seconds(copied), unix_seconds(past));
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_permissions_preservation() -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new()?;
        let source = temp.path().join("source.sh");
        let copy = temp.path().join("copy.sh");
        fs::write(&source, b"#!/bin/sh")?;
        fs::write(&copy, b"#!/bin/sh")?;
        fs::set_permissions(&source, fs::Permissions::from_mode(0o750))?;

        FileMetadata::from_path(&source)?.apply_to_path(&copy)?;

        let mode = fs::metadata(&copy)?.permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);
        Ok(())
    }

    #[test]
    fn test_unix_seconds_before_epoch() {
        let before = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(unix_seconds(before), -10);
    }
}
