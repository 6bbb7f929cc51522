//! Per-set exclusivity lease.
//!
//! Two concurrent runs against the same set would race on allocation and
//! retention. The lease is a `.lease` file created with `create_new` in the
//! set directory and removed when the guard drops.

use crate::utils::errors::{EngineError, Result};
use crate::version::BackupSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

pub const LEASE_FILE: &str = ".lease";

#[derive(Debug)]
pub struct SetLease {
    path: PathBuf,
}

impl SetLease {
    /// Take the lease for `set`, failing if another run holds it
    pub fn acquire(set: &BackupSet, run_id: &str) -> Result<Self> {
        Self::acquire_with(set, |file| writeln!(file, "{} pid={}", run_id, std::process::id()))
    }

    fn acquire_with<F>(set: &BackupSet, stamp: F) -> Result<Self>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        let dir = set.dir();
        fs::create_dir_all(&dir).map_err(|e| EngineError::io_at(&dir, e))?;

        let path = dir.join(LEASE_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                return Err(EngineError::Validation(format!(
                    "backup set '{}' is locked by another run ({}); remove {} if that run is gone",
                    set.name(),
                    holder.trim(),
                    path.display()
                )));
            }
            Err(e) => return Err(EngineError::io_at(&path, e)),
        };

        // Guard first so a failed stamp releases the file
        let lease = Self { path };
        let stamped = stamp(&mut file);
        drop(file);
        stamped.map_err(|e| EngineError::io_at(&lease.path, e))?;
        debug!(path = %lease.path.display(), "Acquired set lease");
        Ok(lease)
    }
}

impl Drop for SetLease {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release set lease");
        }
    }
}
