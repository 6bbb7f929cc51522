//! Audit trail for backup, restore and retention runs.
//!
//! Every action a run takes is appended to an in-memory [`AuditLedger`]. At
//! the end of the run the ledger is exported as CSV and JSON and summarized,
//! grouped by action tag.

pub mod export;
pub mod ledger;
pub mod record;
pub mod report;

pub use export::{export_csv, export_json, RunHeader, RunOutcome};
pub use ledger::{AuditLedger, SummaryGroup};
pub use record::{AuditAction, AuditRecord, AuditStatus};
pub use report::{render_summary, rotate_logs, RunArtifacts};
