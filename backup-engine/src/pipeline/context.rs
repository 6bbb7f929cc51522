//! Per-run bookkeeping: ledger, timing and the artifacts flushed at the end.

use crate::audit::{
    export_csv, export_json, render_summary, rotate_logs, AuditLedger, AuditRecord, RunArtifacts,
    RunHeader, RunOutcome,
};
use crate::catalog::{Catalog, Manifest};
use crate::copy::CopyExit;
use crate::utils::errors::{EngineError, Result};
use crate::utils::Clock;
use crate::version::Version;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use uuid::Uuid;

/// Everything a finished run leaves behind
#[derive(Debug)]
pub struct RunReport {
    pub header: RunHeader,
    pub ledger: AuditLedger,
    pub version: Option<Version>,
    pub copy_exit: Option<CopyExit>,
    /// `None` when the artifact directory could not be created
    pub artifacts: Option<RunArtifacts>,
    pub summary: String,
}

pub(crate) struct RunContext {
    pub run_id: Uuid,
    pub command: &'static str,
    pub scope: String,
    pub set: Option<String>,
    pub started: NaiveDateTime,
    pub dry_run: bool,
    pub ledger: AuditLedger,
    pub version: Option<Version>,
    pub copy_exit: Option<CopyExit>,
    pub execution_log: String,
    /// Embedded in the JSON export for simulated runs
    pub manifest: Option<Manifest>,
    pub catalog: Option<Catalog>,
}

impl RunContext {
    pub fn new(command: &'static str, scope: impl Into<String>, set: Option<String>, dry_run: bool, started: NaiveDateTime) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            command,
            scope: scope.into(),
            set,
            started,
            dry_run,
            ledger: AuditLedger::new(),
            version: None,
            copy_exit: None,
            execution_log: String::new(),
            manifest: None,
            catalog: None,
        }
    }

    /// Record a stage failure in the ledger and hand the error back
    pub fn fail(
        &mut self,
        clock: &dyn Clock,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
        err: EngineError,
    ) -> EngineError {
        error!("{} failed: {}", self.command, err);
        self.ledger
            .record(AuditRecord::error(clock.now(), source, target, err.to_string()));
        err
    }

    /// Write execution log, audit exports and summary, then rotate old run
    /// artifacts. Flush problems are logged and never replace `result`.
    pub fn finish(
        self,
        result: Result<()>,
        clock: &dyn Clock,
        log_dir: &Path,
        log_retention_days: u32,
    ) -> Result<RunReport> {
        let finished = clock.now();
        let header = RunHeader {
            run_id: self.run_id,
            command: self.command.to_string(),
            set: self.set.clone(),
            version: self.version.as_ref().map(|v| v.id),
            version_path: self.version.as_ref().map(|v| v.path.clone()),
            started: self.started,
            finished,
            dry_run: self.dry_run,
            outcome: match &result {
                Ok(()) => RunOutcome::Success,
                Err(e) => RunOutcome::Failed { error: e.to_string() },
            },
        };

        let artifacts = match RunArtifacts::create(log_dir, &self.scope, self.started, self.run_id) {
            Ok(artifacts) => Some(artifacts),
            Err(e) => {
                error!("Cannot create run artifact directory under {}: {}", log_dir.display(), e);
                None
            }
        };

        let summary = render_summary(&header, &self.ledger, artifacts.as_ref());
        if let Some(artifacts) = &artifacts {
            let writes: [(&PathBuf, Result<()>); 4] = [
                (
                    &artifacts.execution_log,
                    std::fs::write(&artifacts.execution_log, &self.execution_log)
                        .map_err(|e| EngineError::io_at(&artifacts.execution_log, e)),
                ),
                (&artifacts.audit_csv, export_csv(&self.ledger, &artifacts.audit_csv)),
                (
                    &artifacts.audit_json,
                    export_json(
                        &self.ledger,
                        &header,
                        self.manifest.as_ref(),
                        self.catalog.as_ref(),
                        &artifacts.audit_json,
                    ),
                ),
                (
                    &artifacts.summary,
                    std::fs::write(&artifacts.summary, &summary)
                        .map_err(|e| EngineError::io_at(&artifacts.summary, e)),
                ),
            ];
            for (path, written) in writes {
                if let Err(e) = written {
                    error!("Failed to write {}: {}", path.display(), e);
                }
            }
            info!("Run artifacts written to {}", artifacts.dir.display());
        }

        rotate_logs(&log_dir.join(&self.scope), log_retention_days, finished);

        result.map(|()| RunReport {
            header,
            ledger: self.ledger,
            version: self.version,
            copy_exit: self.copy_exit,
            artifacts,
            summary,
        })
    }
}
