//! Run orchestration for every engine command.
//!
//! Each command is one sequential pipeline; parallelism lives only inside
//! the copy engine. A backup runs allocate, copy, catalog, verify, retain and
//! report, in that order. Whatever happens, the run's audit exports and
//! summary are flushed before the result is returned.

mod context;

use crate::audit::{AuditAction, AuditRecord, AuditStatus};
use crate::catalog::manifest::local_hostname;
use crate::catalog::{Catalog, Manifest};
use crate::config::Config;
use crate::copy::{run_copy, CopyJob, CopyReport};
use crate::fs::PathFilter;
use crate::restore::{restore, RestoreRequest};
use crate::retention::{enforce_with, FsRemover, RetentionPolicy, VersionRemover};
use crate::schedule::{ScheduleRegistrar, ScheduledTask, SchtasksRegistrar};
use crate::utils::errors::{EngineError, Result};
use crate::utils::{Clock, SystemClock};
use crate::verify::{verify_tree, VerificationHistory, VerificationPass, VerifyReport};
use crate::version::{BackupSet, SetLease, Version, VersionAllocator, VersionId};
use context::RunContext;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub use context::RunReport;

/// Artifact scope for runs that are not tied to a backup set
const SYNC_SCOPE: &str = "_sync";

#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub set: String,
    pub source: PathBuf,
    pub dry_run: bool,
    pub verify: bool,
    pub schedule: Option<ScheduledTask>,
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub source: PathBuf,
    pub target: PathBuf,
    pub dry_run: bool,
    pub verify: bool,
}

#[derive(Debug, Clone)]
pub struct RestoreCommand {
    pub set: String,
    pub version: Option<VersionId>,
    pub target: PathBuf,
    pub paths: Vec<PathBuf>,
    pub dry_run: bool,
    pub verify: bool,
}

#[derive(Debug, Clone)]
pub struct VerifyCommand {
    pub set: String,
    pub version: Option<VersionId>,
    pub source: PathBuf,
}

/// One row of a set listing
#[derive(Debug, Clone)]
pub struct VersionListing {
    pub version: Version,
    pub manifest: Option<Manifest>,
    pub files: usize,
    pub bytes: u64,
}

pub struct Pipeline {
    config: Config,
    clock: Arc<dyn Clock>,
    registrar: Arc<dyn ScheduleRegistrar>,
    remover: Arc<dyn VersionRemover>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            registrar: Arc::new(SchtasksRegistrar),
            remover: Arc::new(FsRemover),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn ScheduleRegistrar>) -> Self {
        self.registrar = registrar;
        self
    }

    pub fn with_remover(mut self, remover: Arc<dyn VersionRemover>) -> Self {
        self.remover = remover;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn set(&self, name: &str) -> Result<BackupSet> {
        BackupSet::new(name, &self.config.storage.root)
    }

    fn filter(&self) -> Result<PathFilter> {
        PathFilter::new(&self.config.copy.include, &self.config.copy.exclude)
    }

    fn copy_job(&self, source: &Path, destination: &Path, filter: PathFilter, simulate: bool, mirror: bool) -> CopyJob {
        CopyJob {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            filter,
            threads: self.config.copy.threads,
            retries: self.config.copy.retries,
            wait: self.config.retry_wait(),
            simulate,
            mirror,
        }
    }

    fn lease(&self, set: &BackupSet, ctx: &RunContext) -> Result<Option<SetLease>> {
        if ctx.dry_run || !self.config.storage.use_lease {
            return Ok(None);
        }
        SetLease::acquire(set, &ctx.run_id.to_string()).map(Some)
    }

    fn finish(&self, ctx: RunContext, result: Result<()>) -> Result<RunReport> {
        ctx.finish(
            result,
            self.clock.as_ref(),
            &self.config.log_dir(),
            self.config.retention.log_retention_days,
        )
    }

    /// Back up `source` into a new version of the set
    pub async fn backup(&self, request: BackupRequest) -> Result<RunReport> {
        let mut ctx = RunContext::new(
            "backup",
            request.set.clone(),
            Some(request.set.clone()),
            request.dry_run,
            self.clock.now(),
        );
        info!(
            "Backup of {} into set '{}' (run {}){}",
            request.source.display(),
            request.set,
            ctx.run_id,
            if request.dry_run { ", dry run" } else { "" }
        );

        let result = self.run_backup(&mut ctx, &request).await;
        self.finish(ctx, result)
    }

    async fn run_backup(&self, ctx: &mut RunContext, request: &BackupRequest) -> Result<()> {
        let clock = self.clock.as_ref();
        let root = self.config.storage.root.clone();

        let set = match self.set(&request.set) {
            Ok(set) => set,
            Err(e) => return Err(ctx.fail(clock, &request.source, &root, e)),
        };
        let filter = match self.filter() {
            Ok(filter) => filter,
            Err(e) => return Err(ctx.fail(clock, &request.source, &root, e)),
        };
        if !request.source.is_dir() {
            let err = EngineError::Validation(format!(
                "source is not a readable directory: {}",
                request.source.display()
            ));
            return Err(ctx.fail(clock, &request.source, &set.dir(), err));
        }

        let _lease = match self.lease(&set, ctx) {
            Ok(lease) => lease,
            Err(e) => return Err(ctx.fail(clock, &request.source, &set.dir(), e)),
        };

        // Allocate
        let now = clock.now();
        let version = match VersionAllocator::new(set.clone()).allocate(now, request.dry_run) {
            Ok(version) => version,
            Err(e) => return Err(ctx.fail(clock, &request.source, &set.dir(), e)),
        };
        info!("Allocated version {} at {}", version.id, version.path.display());
        ctx.version = Some(version.clone());
        ctx.ledger.record(AuditRecord::new(
            now,
            AuditAction::VersionCreated,
            &request.source,
            &version.path,
            0,
            if request.dry_run { AuditStatus::DryRun } else { AuditStatus::Ok },
        ));

        // Copy
        let job = self.copy_job(&request.source, &version.path, filter.clone(), request.dry_run, false);
        let report = match run_copy(&job).await {
            Ok(report) => report,
            Err(e) => {
                if !request.dry_run {
                    // Leave no empty version behind
                    let _ = std::fs::remove_dir(&version.path);
                }
                return Err(ctx.fail(clock, &request.source, &version.path, e));
            }
        };
        self.record_copy(ctx, &report);

        // Catalog and manifest
        let catalog = match Catalog::build(&version.path) {
            Ok(catalog) => catalog,
            Err(e) => return Err(ctx.fail(clock, &request.source, &version.path, e)),
        };
        let manifest = Manifest {
            set: set.name().to_string(),
            source: request.source.clone(),
            version: version.id,
            version_path: version.path.clone(),
            run_timestamp: ctx.started,
            run_id: ctx.run_id,
            hostname: local_hostname(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            include: filter.include_patterns().to_vec(),
            exclude: filter.exclude_patterns().to_vec(),
            copy_exit: report.exit(),
            dry_run: request.dry_run,
            verify_requested: request.verify,
            algorithm: self.config.verify.algorithm,
            threads: self.config.copy.threads,
            retries: self.config.copy.retries,
            wait_secs: self.config.copy.wait_secs,
            stats: report.stats.clone(),
        };
        if request.dry_run {
            ctx.manifest = Some(manifest);
            ctx.catalog = Some(catalog);
        } else {
            if let Err(e) = manifest
                .save(&version.manifest_path())
                .and_then(|_| catalog.save(&version.catalog_path()))
            {
                return Err(ctx.fail(clock, &request.source, &version.path, e));
            }
            info!(
                "Cataloged {} files ({} bytes) in version {}",
                catalog.len(),
                catalog.total_bytes(),
                version.id
            );
        }

        // Verify
        if request.verify && !request.dry_run {
            self.verify_into(ctx, &request.source, &version, filter).await;
        }

        // Retain
        let policy = RetentionPolicy::from(&self.config.retention);
        match enforce_with(
            &set,
            &policy,
            clock.now(),
            request.dry_run,
            Some(&version),
            self.remover.as_ref(),
        ) {
            Ok(outcome) => ctx.ledger.extend(outcome.records),
            Err(e) => {
                warn!("Retention for '{}' failed: {}", set.name(), e);
                ctx.ledger
                    .record(AuditRecord::error(clock.now(), set.dir(), "", format!("retention: {}", e)));
            }
        }

        // Schedule
        if let Some(task) = &request.schedule {
            self.register_schedule(ctx, task);
        }

        Ok(())
    }

    fn record_copy(&self, ctx: &mut RunContext, report: &CopyReport) {
        let now = self.clock.now();
        ctx.ledger.extend(
            report
                .outcomes
                .iter()
                .filter_map(|o| AuditRecord::from_copy(now, AuditAction::Copy, o)),
        );
        for failure in &report.walk_failures {
            ctx.ledger.record(
                AuditRecord::new(now, AuditAction::Copy, &failure.path, &report.destination, 0, AuditStatus::Error)
                    .with_detail(failure.message.clone()),
            );
        }
        ctx.execution_log.push_str(&report.render_log());
        ctx.copy_exit = Some(report.exit());
    }

    /// Hash `reference` against the version, record every file and append
    /// the pass to the version's verification history. Never fails the run.
    async fn verify_into(&self, ctx: &mut RunContext, reference: &Path, version: &Version, filter: PathFilter) -> Option<VerifyReport> {
        let clock = self.clock.as_ref();
        let algorithm = self.config.verify.algorithm;
        let (reference_root, copy_root) = (reference.to_path_buf(), version.path.clone());

        let verified = tokio::task::spawn_blocking(move || verify_tree(&reference_root, &copy_root, algorithm, &filter))
            .await
            .map_err(|e| EngineError::CopyEngine(format!("verification task failed: {}", e)))
            .and_then(|r| r);

        match verified {
            Ok(report) => {
                let now = clock.now();
                ctx.ledger
                    .extend(report.entries.iter().map(|e| AuditRecord::from_verify(now, e)));
                let pass = VerificationPass::from_report(&report, reference, algorithm, now);
                if let Err(e) = VerificationHistory::append(&version.verify_path(), pass) {
                    warn!("Could not append verification history for {}: {}", version.id, e);
                }
                Some(report)
            }
            Err(e) => {
                warn!("Verification of {} failed: {}", version.id, e);
                ctx.ledger.record(AuditRecord::error(
                    clock.now(),
                    reference,
                    &version.path,
                    format!("verification: {}", e),
                ));
                None
            }
        }
    }

    fn register_schedule(&self, ctx: &mut RunContext, task: &ScheduledTask) {
        let now = self.clock.now();
        let record = |status| AuditRecord::new(now, AuditAction::ScheduleRegister, &task.program, &task.name, 0, status);
        match self.registrar.register(task) {
            Ok(()) => ctx
                .ledger
                .record(record(AuditStatus::Ok).with_detail(task.trigger.to_string())),
            Err(e) => {
                warn!("Schedule registration of {} failed: {}", task.name, e);
                ctx.ledger.record(record(AuditStatus::Error).with_detail(e.to_string()));
            }
        }
    }

    /// Mirror `source` into `target`
    pub async fn sync(&self, request: SyncRequest) -> Result<RunReport> {
        let mut ctx = RunContext::new("sync", SYNC_SCOPE, None, request.dry_run, self.clock.now());
        info!(
            "Sync {} -> {}{}",
            request.source.display(),
            request.target.display(),
            if request.dry_run { " (dry run)" } else { "" }
        );

        let result = self.run_sync(&mut ctx, &request).await;
        self.finish(ctx, result)
    }

    async fn run_sync(&self, ctx: &mut RunContext, request: &SyncRequest) -> Result<()> {
        let clock = self.clock.as_ref();
        let filter = match self.filter() {
            Ok(filter) => filter,
            Err(e) => return Err(ctx.fail(clock, &request.source, &request.target, e)),
        };
        if !request.source.is_dir() {
            let err = EngineError::Validation(format!(
                "source is not a readable directory: {}",
                request.source.display()
            ));
            return Err(ctx.fail(clock, &request.source, &request.target, err));
        }

        let job = self.copy_job(&request.source, &request.target, filter.clone(), request.dry_run, true);
        let report = match run_copy(&job).await {
            Ok(report) => report,
            Err(e) => return Err(ctx.fail(clock, &request.source, &request.target, e)),
        };
        self.record_copy(ctx, &report);

        if request.verify && !request.dry_run {
            let algorithm = self.config.verify.algorithm;
            let (source, target) = (request.source.clone(), request.target.clone());
            let verified = tokio::task::spawn_blocking(move || verify_tree(&source, &target, algorithm, &filter))
                .await
                .map_err(|e| EngineError::CopyEngine(format!("verification task failed: {}", e)))
                .and_then(|r| r);
            match verified {
                Ok(report) => {
                    let now = clock.now();
                    ctx.ledger
                        .extend(report.entries.iter().map(|e| AuditRecord::from_verify(now, e)));
                }
                Err(e) => ctx.ledger.record(AuditRecord::error(
                    clock.now(),
                    &request.source,
                    &request.target,
                    format!("verification: {}", e),
                )),
            }
        }
        Ok(())
    }

    /// Restore a version (newest by default) into a target directory
    pub async fn restore(&self, command: RestoreCommand) -> Result<RunReport> {
        let mut ctx = RunContext::new(
            "restore",
            command.set.clone(),
            Some(command.set.clone()),
            command.dry_run,
            self.clock.now(),
        );

        let result = self.run_restore(&mut ctx, &command).await;
        self.finish(ctx, result)
    }

    async fn run_restore(&self, ctx: &mut RunContext, command: &RestoreCommand) -> Result<()> {
        let clock = self.clock.as_ref();
        let root = self.config.storage.root.clone();
        let prepared = self.set(&command.set).and_then(|set| Ok((set, self.filter()?)));
        let (set, filter) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Err(ctx.fail(clock, &root, &command.target, e)),
        };

        let request = RestoreRequest {
            set: set.clone(),
            version: command.version,
            target: command.target.clone(),
            paths: command.paths.clone(),
            filter,
            threads: self.config.copy.threads,
            retries: self.config.copy.retries,
            wait: self.config.retry_wait(),
            dry_run: command.dry_run,
            verify: command.verify.then_some(self.config.verify.algorithm),
        };

        match restore(&request, clock, &mut ctx.ledger).await {
            Ok(outcome) => {
                ctx.execution_log.push_str(&outcome.copy_log);
                ctx.copy_exit = Some(outcome.exit);
                ctx.version = Some(outcome.version);
                Ok(())
            }
            Err(e) => Err(ctx.fail(clock, &set.dir(), &command.target, e)),
        }
    }

    /// Re-verify an existing version against a source tree
    pub async fn verify(&self, command: VerifyCommand) -> Result<RunReport> {
        let mut ctx = RunContext::new(
            "verify",
            command.set.clone(),
            Some(command.set.clone()),
            false,
            self.clock.now(),
        );

        let result = self.run_verify(&mut ctx, &command).await;
        self.finish(ctx, result)
    }

    async fn run_verify(&self, ctx: &mut RunContext, command: &VerifyCommand) -> Result<()> {
        let clock = self.clock.as_ref();
        let root = self.config.storage.root.clone();
        let prepared = self.set(&command.set).and_then(|set| {
            let version = crate::restore::select_version(&set, command.version)?;
            Ok((version, self.filter()?))
        });
        let (version, filter) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Err(ctx.fail(clock, &command.source, &root, e)),
        };
        if !command.source.is_dir() {
            let err = EngineError::Validation(format!(
                "verification source is not a directory: {}",
                command.source.display()
            ));
            return Err(ctx.fail(clock, &command.source, &version.path, err));
        }

        ctx.version = Some(version.clone());
        self.verify_into(ctx, &command.source, &version, filter).await;
        Ok(())
    }

    /// Apply the retention policy to a set without backing anything up
    pub async fn prune(&self, set: &str, dry_run: bool) -> Result<RunReport> {
        let mut ctx = RunContext::new("prune", set, Some(set.to_string()), dry_run, self.clock.now());
        let result = self.run_prune(&mut ctx, set);
        self.finish(ctx, result)
    }

    fn run_prune(&self, ctx: &mut RunContext, name: &str) -> Result<()> {
        let clock = self.clock.as_ref();
        let root = self.config.storage.root.clone();
        let set = match self.set(name) {
            Ok(set) => set,
            Err(e) => return Err(ctx.fail(clock, &root, "", e)),
        };
        let _lease = match self.lease(&set, ctx) {
            Ok(lease) => lease,
            Err(e) => return Err(ctx.fail(clock, &set.dir(), "", e)),
        };

        let policy = RetentionPolicy::from(&self.config.retention);
        match enforce_with(&set, &policy, clock.now(), ctx.dry_run, None, self.remover.as_ref()) {
            Ok(outcome) => {
                info!(
                    "Pruned {} version(s) of '{}', {} could not be removed",
                    outcome.removed.len(),
                    set.name(),
                    outcome.failed.len()
                );
                ctx.ledger.extend(outcome.records);
                Ok(())
            }
            Err(e) => Err(ctx.fail(clock, &set.dir(), "", e)),
        }
    }

    /// Versions of a set, oldest first, with their manifests when readable
    pub fn list(&self, set: &str) -> Result<Vec<VersionListing>> {
        let set = self.set(set)?;
        let mut listings = Vec::new();
        for version in set.list_versions()? {
            let manifest = Manifest::load(&version.manifest_path()).ok();
            let catalog = match Catalog::load(&version.catalog_path()) {
                Ok(catalog) => catalog,
                Err(_) => Catalog::build(&version.path)?,
            };
            listings.push(VersionListing {
                files: catalog.len(),
                bytes: catalog.total_bytes(),
                manifest,
                version,
            });
        }
        Ok(listings)
    }
}
