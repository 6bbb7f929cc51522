//! Custom error types for the backup engine.
//!
//! Only structural failures travel through [`EngineError`]. Content-level
//! problems (a single file that would not copy, a checksum mismatch, a
//! version that could not be pruned) are recorded in the audit ledger instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Copy engine error: {0}")]
    CopyEngine(String),

    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error at {path}: {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Schedule registration error: {0}")]
    ScheduleRegistration(String),
}

impl EngineError {
    /// Wrap an I/O error together with the path it happened on
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PathIo {
            path: path.into(),
            source,
        }
    }

    pub fn version_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "Version",
            identifier: identifier.into(),
        }
    }

    /// Structural failures abort the remaining pipeline steps
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::CopyEngine(_) | Self::NotFound { .. }
        )
    }
}

impl From<::config::ConfigError> for EngineError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<walkdir::Error> for EngineError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf());
        match (path, err.into_io_error()) {
            (Some(path), Some(source)) => Self::io_at(path, source),
            (_, Some(source)) => Self::Io(source),
            (path, None) => Self::Io(std::io::Error::other(format!(
                "filesystem loop detected at {}",
                path.map(|p| p.display().to_string()).unwrap_or_default()
            ))),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
