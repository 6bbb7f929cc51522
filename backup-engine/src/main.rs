//! Backup Engine - Main entry point
//!
//! Command line front end for versioned backups, sync, restore,
//! verification and retention.

use anyhow::{Context, Result};
use backup_engine::config::Config;
use backup_engine::pipeline::{BackupRequest, RestoreCommand, SyncRequest, VerifyCommand};
use backup_engine::schedule::{scheduled_arguments, ScheduledTask, Trigger};
use backup_engine::utils::format::format_bytes;
use backup_engine::verify::ChecksumAlgorithm;
use backup_engine::version::VersionId;
use backup_engine::{utils, Pipeline, RunReport};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Directory for run artifacts (overrides config)
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up a directory into a new version of a backup set
    Backup {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        set: String,
        #[command(flatten)]
        storage: StorageArgs,
        #[command(flatten)]
        copy: CopyArgs,
        #[command(flatten)]
        retention: RetentionArgs,
        #[command(flatten)]
        verify: VerifyArgs,
        #[arg(long)]
        dry_run: bool,
        /// Register this backup as a scheduled task
        #[arg(long, requires = "trigger")]
        register_schedule: bool,
        /// once@YYYY-MM-DDTHH:MM, daily@HH:MM, weekly@DAY@HH:MM or hourly
        #[arg(long)]
        trigger: Option<String>,
    },

    /// Mirror a directory into a target, deleting extras
    Sync {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        target: PathBuf,
        #[command(flatten)]
        copy: CopyArgs,
        #[command(flatten)]
        verify: VerifyArgs,
        #[arg(long)]
        dry_run: bool,
    },

    /// Restore a version (newest by default) into a target directory
    Restore {
        #[arg(long)]
        set: String,
        #[arg(long)]
        target: PathBuf,
        #[command(flatten)]
        storage: StorageArgs,
        /// Version identifier, e.g. 2026/01/31/235900
        #[arg(long = "version", value_name = "ID")]
        version_id: Option<VersionId>,
        /// Restore only this path of the version (repeatable)
        #[arg(long = "path", value_name = "PATH")]
        paths: Vec<PathBuf>,
        #[command(flatten)]
        copy: CopyArgs,
        #[command(flatten)]
        verify: VerifyArgs,
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-verify a version against a source tree
    Verify {
        #[arg(long)]
        set: String,
        #[arg(long)]
        source: PathBuf,
        #[command(flatten)]
        storage: StorageArgs,
        #[arg(long = "version", value_name = "ID")]
        version_id: Option<VersionId>,
        #[arg(long, value_enum)]
        algorithm: Option<ChecksumAlgorithm>,
        #[arg(long, value_delimiter = ',')]
        include: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
    },

    /// Apply the retention policy to a backup set
    Prune {
        #[arg(long)]
        set: String,
        #[command(flatten)]
        storage: StorageArgs,
        #[command(flatten)]
        retention: RetentionArgs,
        #[arg(long)]
        dry_run: bool,
    },

    /// List the versions of a backup set
    List {
        #[arg(long)]
        set: String,
        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[derive(ClapArgs, Debug, Default)]
struct StorageArgs {
    /// Storage root holding the backup sets (overrides config)
    #[arg(long)]
    root: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Default)]
struct CopyArgs {
    /// Parallel file transfers
    #[arg(long)]
    threads: Option<usize>,
    /// Retries per file
    #[arg(long)]
    retries: Option<u32>,
    /// Seconds between retries
    #[arg(long, value_name = "SECONDS")]
    wait: Option<u64>,
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,
}

#[derive(ClapArgs, Debug, Default)]
struct RetentionArgs {
    /// Delete versions older than this many days (0 disables)
    #[arg(long)]
    retention_days: Option<u32>,
    /// Keep at most this many versions (0 disables)
    #[arg(long)]
    retention_versions: Option<u32>,
}

#[derive(ClapArgs, Debug, Default)]
struct VerifyArgs {
    /// Verify copies by checksum
    #[arg(long)]
    verify: bool,
    #[arg(long, value_enum)]
    algorithm: Option<ChecksumAlgorithm>,
}

impl StorageArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(root) = &self.root {
            config.storage.root = root.clone();
        }
    }
}

impl CopyArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(threads) = self.threads {
            config.copy.threads = threads;
        }
        if let Some(retries) = self.retries {
            config.copy.retries = retries;
        }
        if let Some(wait) = self.wait {
            config.copy.wait_secs = wait;
        }
        if !self.include.is_empty() {
            config.copy.include = self.include.clone();
        }
        if !self.exclude.is_empty() {
            config.copy.exclude = self.exclude.clone();
        }
    }
}

impl RetentionArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(days) = self.retention_days {
            config.retention.max_age_days = days;
        }
        if let Some(versions) = self.retention_versions {
            config.retention.max_versions = versions;
        }
    }
}

impl VerifyArgs {
    /// Returns whether verification was requested
    fn apply(&self, config: &mut Config) -> bool {
        if let Some(algorithm) = self.algorithm {
            config.verify.algorithm = algorithm;
        }
        self.verify || config.verify.enabled
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(log_dir) = &args.log_dir {
        config.storage.log_dir = Some(log_dir.clone());
    }

    // Initialize logging
    let log_level = args.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    utils::logger::init(&log_level)?;

    tracing::info!("Starting backup-engine v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Backup {
            source,
            set,
            storage,
            copy,
            retention,
            verify,
            dry_run,
            register_schedule,
            trigger,
        } => {
            storage.apply(&mut config);
            copy.apply(&mut config);
            retention.apply(&mut config);
            let verify = verify.apply(&mut config);
            config.validate()?;

            let schedule = match (register_schedule, trigger) {
                (true, Some(trigger)) => {
                    let trigger: Trigger = trigger.parse()?;
                    let program = std::env::current_exe().context("cannot locate the engine executable")?;
                    let argv: Vec<String> = std::env::args().collect();
                    Some(ScheduledTask::for_set(&set, program, scheduled_arguments(&argv), trigger))
                }
                _ => None,
            };

            let report = Pipeline::new(config)
                .backup(BackupRequest {
                    set,
                    source,
                    dry_run,
                    verify,
                    schedule,
                })
                .await?;
            print_report(&report);
        }
        Command::Sync {
            source,
            target,
            copy,
            verify,
            dry_run,
        } => {
            copy.apply(&mut config);
            let verify = verify.apply(&mut config);
            config.validate()?;

            let report = Pipeline::new(config)
                .sync(SyncRequest {
                    source,
                    target,
                    dry_run,
                    verify,
                })
                .await?;
            print_report(&report);
        }
        Command::Restore {
            set,
            target,
            storage,
            version_id,
            paths,
            copy,
            verify,
            dry_run,
        } => {
            storage.apply(&mut config);
            copy.apply(&mut config);
            let verify = verify.apply(&mut config);
            config.validate()?;

            let report = Pipeline::new(config)
                .restore(RestoreCommand {
                    set,
                    version: version_id,
                    target,
                    paths,
                    dry_run,
                    verify,
                })
                .await?;
            print_report(&report);
        }
        Command::Verify {
            set,
            source,
            storage,
            version_id,
            algorithm,
            include,
            exclude,
        } => {
            storage.apply(&mut config);
            CopyArgs {
                include,
                exclude,
                ..CopyArgs::default()
            }
            .apply(&mut config);
            if let Some(algorithm) = algorithm {
                config.verify.algorithm = algorithm;
            }

            let report = Pipeline::new(config)
                .verify(VerifyCommand {
                    set,
                    version: version_id,
                    source,
                })
                .await?;
            print_report(&report);
        }
        Command::Prune {
            set,
            storage,
            retention,
            dry_run,
        } => {
            storage.apply(&mut config);
            retention.apply(&mut config);

            let report = Pipeline::new(config).prune(&set, dry_run).await?;
            print_report(&report);
        }
        Command::List { set, storage } => {
            storage.apply(&mut config);
            let listings = Pipeline::new(config).list(&set)?;
            if listings.is_empty() {
                println!("No versions in set '{}'", set);
            }
            for listing in listings {
                let status = listing
                    .manifest
                    .as_ref()
                    .map(|m| m.copy_exit.as_str())
                    .unwrap_or("-");
                println!(
                    "{:<24}{:>8} files{:>14}  {}",
                    listing.version.id.to_string(),
                    listing.files,
                    format_bytes(listing.bytes),
                    status
                );
            }
        }
        Command::ShowConfig => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("{}", report.summary);
}
