//! Backup Engine Library
//!
//! Versioned backup, verification and retention engine: timestamp-addressed
//! versions, differential copies, per-version catalogs, checksum
//! verification, age and count retention, restore, and an audit trail for
//! every run.

pub mod audit;
pub mod catalog;
pub mod config;
pub mod copy;
pub mod fs;
pub mod pipeline;
pub mod restore;
pub mod retention;
pub mod schedule;
pub mod utils;
pub mod verify;
pub mod version;

// Re-export commonly used types
pub use crate::config::Config;
pub use pipeline::{Pipeline, RunReport};
pub use utils::errors::EngineError;
pub type Result<T> = std::result::Result<T, EngineError>;
