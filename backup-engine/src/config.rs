//! Configuration management for the backup engine.
//!
//! Built-in defaults, then an optional TOML file, then environment variable
//! overrides (`BACKUP_ENGINE__SECTION__KEY`). Command line flags are applied
//! on top of the loaded value by the binary.

use crate::utils::errors::{EngineError, Result};
use crate::verify::ChecksumAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "BACKUP_ENGINE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub copy: CopyConfig,
    pub retention: RetentionConfig,
    pub verify: VerifyConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage root holding every backup set
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Where run artifacts (execution log, audit exports, summary) go.
    /// Defaults to `<root>/_logs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Take an exclusive per-set lease file for non-simulated runs
    #[serde(default = "default_use_lease")]
    pub use_lease: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Number of parallel file transfers
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Retries per file after the first failed attempt
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Wait between retries, in seconds
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,

    /// Glob patterns a file must match to be copied
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    /// Glob patterns that exclude a file from copy and verification
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Versions older than this many days are pruned (0 disables the pass)
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// Maximum number of versions kept per set (0 disables the pass)
    #[serde(default = "default_max_versions")]
    pub max_versions: u32,

    /// Run-artifact directories older than this many days are removed
    /// (0 keeps them forever)
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Verify copies by checksum after every backup
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub algorithm: ChecksumAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_root() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Backups")
    } else {
        PathBuf::from("/var/backups/backup-engine")
    }
}

fn default_use_lease() -> bool {
    true
}

fn default_threads() -> usize {
    8
}

fn default_retries() -> u32 {
    3
}

fn default_wait_secs() -> u64 {
    5
}

fn default_include() -> Vec<String> {
    vec!["*".to_string()]
}

/// Lock files, temporaries and OS thumbnail caches
pub fn default_exclude() -> Vec<String> {
    [
        "*.tmp",
        "*.lck",
        "*.lock",
        "Thumbs.db",
        "ehthumbs.db",
        "desktop.ini",
        ".DS_Store",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_max_age_days() -> u32 {
    30
}

fn default_max_versions() -> u32 {
    20
}

fn default_log_retention_days() -> u32 {
    90
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig {
                root: default_root(),
                log_dir: None,
                use_lease: default_use_lease(),
            },
            copy: CopyConfig {
                threads: default_threads(),
                retries: default_retries(),
                wait_secs: default_wait_secs(),
                include: default_include(),
                exclude: default_exclude(),
            },
            retention: RetentionConfig {
                max_age_days: default_max_age_days(),
                max_versions: default_max_versions(),
                log_retention_days: default_log_retention_days(),
            },
            verify: VerifyConfig {
                enabled: false,
                algorithm: ChecksumAlgorithm::default(),
            },
            log: LogConfig {
                level: default_log_level(),
            },
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the optional TOML file, then the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = ::config::Config::try_from(&Config::default())?;
        let mut builder = ::config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(EngineError::Config(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("copy.include")
                .with_list_parse_key("copy.exclude"),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file only (no environment overrides)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::io_at(path, e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.copy.threads == 0 {
            return Err(EngineError::Config("copy.threads must be at least 1".into()));
        }
        if self.copy.include.is_empty() {
            return Err(EngineError::Config(
                "copy.include must contain at least one pattern".into(),
            ));
        }
        Ok(())
    }

    /// Directory that receives per-run artifacts
    pub fn log_dir(&self) -> PathBuf {
        self.storage
            .log_dir
            .clone()
            .unwrap_or_else(|| self.storage.root.join("_logs"))
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.copy.wait_secs)
    }
}
