//! End-to-end runs of the engine against temporary directories.

use backup_engine::audit::{AuditAction, AuditStatus};
use backup_engine::catalog::{Catalog, Manifest};
use backup_engine::retention::VersionRemover;
use backup_engine::pipeline::{BackupRequest, RestoreCommand, SyncRequest, VerifyCommand};
use backup_engine::schedule::{ScheduleRegistrar, ScheduledTask, Trigger};
use backup_engine::utils::FixedClock;
use backup_engine::verify::VerificationHistory;
use backup_engine::version::{BackupSet, Version};
use backup_engine::{Config, EngineError, Pipeline, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tempfile::TempDir;
use walkdir::WalkDir;

struct Fixture {
    _temp: TempDir,
    source: PathBuf,
    root: PathBuf,
    logs: PathBuf,
    clock: Arc<FixedClock>,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        fs::create_dir_all(source.join("reports/2026")).unwrap();
        fs::write(source.join("readme.txt"), b"read me first").unwrap();
        fs::write(source.join("reports/2026/q1.csv"), b"quarter,revenue\nq1,100\n").unwrap();
        fs::write(source.join("reports/summary.md"), b"# Summary").unwrap();
        fs::write(source.join("~$draft.tmp"), b"lock").unwrap();

        Self {
            root: temp.path().join("store"),
            logs: temp.path().join("logs"),
            source,
            clock: Arc::new(FixedClock::new(start())),
            _temp: temp,
        }
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.storage.root = self.root.clone();
        config.storage.log_dir = Some(self.logs.clone());
        config.copy.threads = 4;
        config.copy.retries = 0;
        config.copy.wait_secs = 0;
        config
    }

    fn pipeline(&self, config: Config) -> Pipeline {
        Pipeline::new(config).with_clock(self.clock.clone())
    }

    fn set(&self) -> BackupSet {
        BackupSet::new("docs", &self.root).unwrap()
    }
}

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 1)
        .and_then(|d| d.and_hms_opt(10, 0, 0))
        .unwrap()
}

fn backup(source: &Path, dry_run: bool, verify: bool) -> BackupRequest {
    BackupRequest {
        set: "docs".into(),
        source: source.to_path_buf(),
        dry_run,
        verify,
        schedule: None,
    }
}

/// Path -> (size, mtime) of every entry under `root`
fn snapshot(root: &Path) -> BTreeMap<PathBuf, (u64, Option<SystemTime>)> {
    if !root.exists() {
        return BTreeMap::new();
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| {
            let meta = e.metadata().unwrap();
            let mtime = if meta.is_file() { meta.modified().ok() } else { None };
            (e.path().to_path_buf(), (meta.len(), mtime))
        })
        .collect()
}

#[tokio::test]
async fn three_runs_keep_two_versions() -> Result<()> {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.retention.max_versions = 2;
    let pipeline = fx.pipeline(config);

    let mut created = Vec::new();
    for run in 0..3 {
        fs::write(fx.source.join("readme.txt"), format!("edition {}", run))?;
        let report = pipeline.backup(backup(&fx.source, false, false)).await?;
        created.push(report.version.clone().unwrap());

        if run == 2 {
            assert_eq!(report.ledger.count(AuditAction::RetentionCount, AuditStatus::Ok), 1);
        }
        fx.clock.advance(Duration::hours(1));
    }

    let remaining: Vec<_> = fx.set().list_versions()?.into_iter().map(|v| v.id).collect();
    assert_eq!(remaining, vec![created[1].id, created[2].id]);
    assert!(!created[0].path.exists());
    assert!(!created[0].manifest_path().exists());

    let manifest = Manifest::load(&created[2].manifest_path())?;
    assert_eq!(manifest.set, "docs");
    assert!(!manifest.dry_run);
    assert_eq!(manifest.stats.copied, 3);
    Ok(())
}

#[tokio::test]
async fn backup_copies_filtered_tree_and_catalogs_it() -> Result<()> {
    let fx = Fixture::new();
    let report = fx.pipeline(fx.config()).backup(backup(&fx.source, false, true)).await?;
    let version = report.version.clone().unwrap();

    assert!(version.path.join("reports/2026/q1.csv").is_file());
    assert!(!version.path.join("~$draft.tmp").exists());

    let catalog = Catalog::load(&version.catalog_path())?;
    assert_eq!(catalog.len(), 3);
    assert_eq!(report.ledger.count(AuditAction::Copy, AuditStatus::Ok), 3);
    assert_eq!(report.ledger.count(AuditAction::Verify, AuditStatus::Ok), 3);
    assert_eq!(report.ledger.count(AuditAction::VersionCreated, AuditStatus::Ok), 1);

    let artifacts = report.artifacts.clone().unwrap();
    assert!(artifacts.dir.starts_with(fx.logs.join("docs")));
    let csv = fs::read_to_string(&artifacts.audit_csv)?;
    assert!(csv.starts_with("timestamp,action,source,target,size,status,detail"));
    assert!(fs::read_to_string(&artifacts.execution_log)?.contains("New File"));
    assert!(fs::read_to_string(&artifacts.summary)?.contains("VersionCreated"));
    Ok(())
}

#[tokio::test]
async fn corrupted_copy_is_reported_once() -> Result<()> {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(fx.config());
    let report = pipeline.backup(backup(&fx.source, false, true)).await?;
    let version = report.version.unwrap();

    // Same size, different content
    fs::write(version.path.join("reports/summary.md"), b"# Summarx")?;

    fx.clock.advance(Duration::minutes(5));
    let check = pipeline
        .verify(VerifyCommand {
            set: "docs".into(),
            version: None,
            source: fx.source.clone(),
        })
        .await?;

    let verify: Vec<_> = check.ledger.with_action(AuditAction::Verify).collect();
    assert_eq!(verify.len(), 3);
    assert_eq!(check.ledger.count(AuditAction::Verify, AuditStatus::Mismatch), 1);
    assert_eq!(check.ledger.count(AuditAction::Verify, AuditStatus::Ok), 2);

    let history = VerificationHistory::load_or_default(&version.verify_path())?;
    assert_eq!(history.passes.len(), 2);
    assert_eq!(history.passes[1].mismatched, 1);
    Ok(())
}

#[tokio::test]
async fn dry_run_changes_nothing() -> Result<()> {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.retention.max_versions = 1;
    let pipeline = fx.pipeline(config);

    // One real version so retention has something it would delete
    pipeline.backup(backup(&fx.source, false, false)).await?;
    fx.clock.advance(Duration::hours(1));

    let store_before = snapshot(&fx.root);
    let source_before = snapshot(&fx.source);

    let report = pipeline.backup(backup(&fx.source, true, true)).await?;

    assert_eq!(snapshot(&fx.root), store_before);
    assert_eq!(snapshot(&fx.source), source_before);
    assert!(!report.version.as_ref().unwrap().path.exists());
    assert_eq!(report.ledger.count(AuditAction::VersionCreated, AuditStatus::DryRun), 1);
    assert_eq!(report.ledger.count(AuditAction::Copy, AuditStatus::DryRun), 3);
    assert_eq!(report.ledger.count(AuditAction::RetentionCount, AuditStatus::DryRun), 1);
    assert_eq!(report.ledger.with_action(AuditAction::Verify).count(), 0);

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report.artifacts.unwrap().audit_json)?)?;
    assert_eq!(json["manifest"]["dry_run"], true);
    assert!(json["catalog"]["entries"].as_array().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn restore_round_trip() -> Result<()> {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(fx.config());
    let report = pipeline.backup(backup(&fx.source, false, false)).await?;
    let version = report.version.unwrap();

    let target = fx.root.parent().unwrap().join("restored");
    let restored = pipeline
        .restore(RestoreCommand {
            set: "docs".into(),
            version: Some(version.id),
            target: target.clone(),
            paths: Vec::new(),
            dry_run: false,
            verify: true,
        })
        .await?;

    assert_eq!(
        Catalog::build(&target)?.comparable(),
        Catalog::load(&version.catalog_path())?.comparable()
    );
    assert_eq!(restored.ledger.count(AuditAction::Verify, AuditStatus::Ok), 3);
    assert_eq!(restored.ledger.count(AuditAction::Restore, AuditStatus::Ok), 1);
    Ok(())
}

#[tokio::test]
async fn missing_source_fails_but_flushes_audit() -> Result<()> {
    let fx = Fixture::new();
    let missing = fx.source.join("does-not-exist");

    let err = fx
        .pipeline(fx.config())
        .backup(backup(&missing, false, false))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(err.is_structural());
    assert!(fx.set().list_versions()?.is_empty());

    let run_dir = fs::read_dir(fx.logs.join("docs"))?.next().unwrap()?.path();
    let csv = fs::read_to_string(run_dir.join("audit.csv"))?;
    assert!(csv.lines().any(|line| line.contains(",Error,") && line.contains(",ERROR,")));
    assert!(fs::read_to_string(run_dir.join("summary.txt"))?.contains("FAILED"));
    Ok(())
}

#[tokio::test]
async fn held_lease_blocks_backup() -> Result<()> {
    let fx = Fixture::new();
    fs::create_dir_all(fx.set().dir())?;
    fs::write(fx.set().dir().join(".lease"), b"other-run")?;

    let err = fx
        .pipeline(fx.config())
        .backup(backup(&fx.source, false, false))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(fx.set().list_versions()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn invalid_set_name_is_rejected() {
    let fx = Fixture::new();
    let mut request = backup(&fx.source, false, false);
    request.set = "my docs".into();

    let err = fx.pipeline(fx.config()).backup(request).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn sync_mirrors_and_removes_extras() -> Result<()> {
    let fx = Fixture::new();
    let target = fx.root.parent().unwrap().join("mirror");
    fs::create_dir_all(&target)?;
    fs::write(target.join("obsolete.txt"), b"gone soon")?;
    fs::create_dir_all(target.join("cache"))?;
    fs::write(target.join("cache/session.lock"), b"held")?;
    fs::create_dir_all(target.join("retired/2025"))?;
    fs::write(target.join("retired/2025/old.csv"), b"old")?;

    let report = fx
        .pipeline(fx.config())
        .sync(SyncRequest {
            source: fx.source.clone(),
            target: target.clone(),
            dry_run: false,
            verify: true,
        })
        .await?;

    assert!(!target.join("obsolete.txt").exists());
    assert!(!target.join("retired").exists());
    // Excluded entries are outside the mirror's reach
    assert!(target.join("cache/session.lock").is_file());
    assert!(target.join("reports/2026/q1.csv").is_file());
    // obsolete.txt, retired/2025/old.csv, retired/2025 and retired
    assert_eq!(report.ledger.count(AuditAction::Delete, AuditStatus::Ok), 4);
    assert_eq!(report.ledger.count(AuditAction::Verify, AuditStatus::Ok), 3);
    Ok(())
}

#[tokio::test]
async fn sync_rejects_missing_source() -> Result<()> {
    let fx = Fixture::new();
    let target = fx.root.parent().unwrap().join("mirror");
    fs::create_dir_all(&target)?;
    fs::write(target.join("keep.txt"), b"untouched")?;

    let err = fx
        .pipeline(fx.config())
        .sync(SyncRequest {
            source: fx.source.join("does-not-exist"),
            target: target.clone(),
            dry_run: false,
            verify: false,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)));
    assert!(target.join("keep.txt").is_file());
    Ok(())
}

struct RecordingRegistrar {
    fail: bool,
    seen: Mutex<Vec<ScheduledTask>>,
}

impl ScheduleRegistrar for RecordingRegistrar {
    fn register(&self, task: &ScheduledTask) -> Result<()> {
        self.seen.lock().unwrap().push(task.clone());
        if self.fail {
            Err(EngineError::ScheduleRegistration("access denied".into()))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn schedule_registration_failure_does_not_fail_backup() -> Result<()> {
    let fx = Fixture::new();
    let registrar = Arc::new(RecordingRegistrar {
        fail: true,
        seen: Mutex::new(Vec::new()),
    });
    let trigger: Trigger = "daily@02:30".parse()?;
    let mut request = backup(&fx.source, false, false);
    request.schedule = Some(ScheduledTask::for_set(
        "docs",
        PathBuf::from("/usr/local/bin/backup-engine"),
        vec!["backup".into(), "--set".into(), "docs".into()],
        trigger,
    ));

    let report = fx
        .pipeline(fx.config())
        .with_registrar(registrar.clone())
        .backup(request)
        .await?;

    assert_eq!(registrar.seen.lock().unwrap().len(), 1);
    assert_eq!(report.ledger.count(AuditAction::ScheduleRegister, AuditStatus::Error), 1);
    assert_eq!(fx.set().list_versions()?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn prune_applies_age_policy() -> Result<()> {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.retention.max_age_days = 7;
    let pipeline = fx.pipeline(config);

    pipeline.backup(backup(&fx.source, false, false)).await?;
    fx.clock.advance(Duration::days(10));
    pipeline.backup(backup(&fx.source, false, false)).await?;
    assert_eq!(fx.set().list_versions()?.len(), 1);

    // Nothing else is old enough
    let report = pipeline.prune("docs", false).await?;
    assert_eq!(report.ledger.with_action(AuditAction::RetentionAge).count(), 0);
    assert_eq!(fx.set().list_versions()?.len(), 1);
    Ok(())
}

/// Refuses every deletion, as a locked version directory would
struct LockedRemover;

impl VersionRemover for LockedRemover {
    fn remove(&self, _set: &BackupSet, _version: &Version) -> std::io::Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked by another process"))
    }
}

#[tokio::test]
async fn failed_version_deletion_is_audited() -> Result<()> {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.retention.max_versions = 1;
    let pipeline = fx.pipeline(config).with_remover(Arc::new(LockedRemover));

    pipeline.backup(backup(&fx.source, false, false)).await?;
    fx.clock.advance(Duration::hours(1));
    let report = pipeline.backup(backup(&fx.source, false, false)).await?;

    assert_eq!(report.ledger.count(AuditAction::RetentionCount, AuditStatus::Error), 1);
    assert_eq!(fx.set().list_versions()?.len(), 2);

    let run_dir = report.artifacts.as_ref().unwrap().dir.clone();
    let csv = fs::read_to_string(run_dir.join("audit.csv"))?;
    assert!(csv
        .lines()
        .any(|line| line.contains(",RetentionCount,") && line.contains(",ERROR,")));

    // A later prune with the default remover clears the backlog
    let versions = fx.set().list_versions()?;
    let mut config = fx.config();
    config.retention.max_versions = 1;
    let report = fx.pipeline(config).prune("docs", false).await?;
    assert_eq!(report.ledger.count(AuditAction::RetentionCount, AuditStatus::Ok), 1);
    assert!(!versions[0].path.exists());
    assert!(versions[1].path.exists());
    Ok(())
}

#[tokio::test]
async fn huge_age_limit_keeps_every_version() -> Result<()> {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.retention.max_age_days = u32::MAX;
    config.retention.log_retention_days = u32::MAX;
    let pipeline = fx.pipeline(config);

    let report = pipeline.backup(backup(&fx.source, false, false)).await?;
    assert!(report.artifacts.as_ref().unwrap().dir.exists());
    fx.clock.advance(Duration::days(400));
    pipeline.backup(backup(&fx.source, false, false)).await?;

    assert_eq!(fx.set().list_versions()?.len(), 2);
    assert_eq!(fs::read_dir(fx.logs.join("docs"))?.count(), 2);
    Ok(())
}
