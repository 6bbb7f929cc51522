//! Tabular (CSV) and structured (JSON) audit exports.

use crate::audit::ledger::{AuditLedger, SummaryGroup};
use crate::audit::record::AuditRecord;
use crate::catalog::{Catalog, Manifest};
use crate::utils::errors::{EngineError, Result};
use crate::version::VersionId;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const CSV_HEADER: [&str; 7] = ["timestamp", "action", "source", "target", "size", "status", "detail"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Failed { error: String },
}

/// Identity and timing of the run that produced a ledger
#[derive(Debug, Clone, Serialize)]
pub struct RunHeader {
    pub run_id: Uuid,
    pub command: String,
    pub set: Option<String>,
    pub version: Option<VersionId>,
    pub version_path: Option<PathBuf>,
    pub started: NaiveDateTime,
    pub finished: NaiveDateTime,
    pub dry_run: bool,
    pub outcome: RunOutcome,
}

#[derive(Serialize)]
struct AuditDocument<'a> {
    run: &'a RunHeader,
    summary: Vec<SummaryGroup>,
    records: &'a [AuditRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest: Option<&'a Manifest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    catalog: Option<&'a Catalog>,
}

/// Write every record as one CSV row
pub fn write_csv<W: Write>(records: &[AuditRecord], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_HEADER)?;
    for record in records {
        csv.write_record([
            record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            record.action.to_string(),
            record.source.clone(),
            record.target.clone(),
            record.size.to_string(),
            record.status.to_string(),
            record.detail.clone().unwrap_or_default(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

pub fn export_csv(ledger: &AuditLedger, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| EngineError::io_at(path, e))?;
    write_csv(ledger.records(), BufWriter::new(file))
}

/// Structured export. Simulated runs embed their manifest and catalog here
/// since nothing is persisted next to the (never created) version.
pub fn export_json(
    ledger: &AuditLedger,
    header: &RunHeader,
    manifest: Option<&Manifest>,
    catalog: Option<&Catalog>,
    path: &Path,
) -> Result<()> {
    let document = AuditDocument {
        run: header,
        summary: ledger.summary(),
        records: ledger.records(),
        manifest,
        catalog,
    };
    let file = File::create(path).map_err(|e| EngineError::io_at(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &document)?;
    writer.flush().map_err(|e| EngineError::io_at(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::record::{AuditAction, AuditStatus};
    use tempfile::TempDir;

    fn at() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2026, 6, 1)
            .and_then(|d| d.and_hms_opt(8, 30, 0))
            .unwrap()
    }

    #[test]
    fn test_csv_rows() -> Result<()> {
        let records = vec![
            AuditRecord::new(at(), AuditAction::Copy, "/src/a, b.txt", "/dst/a, b.txt", 12, AuditStatus::Ok),
            AuditRecord::error(at(), "/src", "", "copy tool failed"),
        ];
        let mut out = Vec::new();
        write_csv(&records, &mut out)?;

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,action,source,target,size,status,detail");
        assert_eq!(lines[1], "2026-06-01 08:30:00,Copy,\"/src/a, b.txt\",\"/dst/a, b.txt\",12,OK,");
        assert_eq!(lines[2], "2026-06-01 08:30:00,Error,/src,,0,ERROR,copy tool failed");
        Ok(())
    }

    #[test]
    fn test_json_document() -> Result<()> {
        let temp = TempDir::new()?;
        let mut ledger = AuditLedger::new();
        ledger.record(AuditRecord::new(at(), AuditAction::Copy, "/a", "/b", 3, AuditStatus::DryRun));
        let header = RunHeader {
            run_id: Uuid::new_v4(),
            command: "backup".into(),
            set: Some("docs".into()),
            version: None,
            version_path: None,
            started: at(),
            finished: at(),
            dry_run: true,
            outcome: RunOutcome::Success,
        };

        let path = temp.path().join("audit.json");
        export_json(&ledger, &header, None, Some(&Catalog::default()), &path)?;

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(value["run"]["outcome"]["status"], "success");
        assert_eq!(value["summary"][0]["action"], "Copy");
        assert_eq!(value["records"][0]["status"], "DRYRUN");
        assert!(value.get("manifest").is_none());
        assert!(value["catalog"]["entries"].as_array().unwrap().is_empty());
        Ok(())
    }
}
