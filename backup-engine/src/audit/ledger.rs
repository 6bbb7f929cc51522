//! In-memory, append-only audit ledger for one run.

use crate::audit::record::{AuditAction, AuditRecord, AuditStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// Record count and summed size for one action tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryGroup {
    pub action: AuditAction,
    pub count: usize,
    pub total_size: u64,
}

#[derive(Debug, Default)]
pub struct AuditLedger {
    records: Vec<AuditRecord>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: AuditRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = AuditRecord>) {
        self.records.extend(records);
    }

    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count(&self, action: AuditAction, status: AuditStatus) -> usize {
        self.records
            .iter()
            .filter(|r| r.action == action && r.status == status)
            .count()
    }

    pub fn with_action(&self, action: AuditAction) -> impl Iterator<Item = &AuditRecord> {
        self.records.iter().filter(move |r| r.action == action)
    }

    /// Records grouped by action tag, in tag order
    pub fn summary(&self) -> Vec<SummaryGroup> {
        let mut groups: BTreeMap<AuditAction, (usize, u64)> = BTreeMap::new();
        for record in &self.records {
            let entry = groups.entry(record.action).or_default();
            entry.0 += 1;
            entry.1 += record.size;
        }
        groups
            .into_iter()
            .map(|(action, (count, total_size))| SummaryGroup {
                action,
                count,
                total_size,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn record(action: AuditAction, status: AuditStatus, size: u64) -> AuditRecord {
        AuditRecord::new(NaiveDateTime::default(), action, "/src", "/dst", size, status)
    }

    #[test]
    fn test_summary_groups_by_action() {
        let mut ledger = AuditLedger::new();
        ledger.record(record(AuditAction::Copy, AuditStatus::Ok, 10));
        ledger.record(record(AuditAction::Copy, AuditStatus::Ok, 5));
        ledger.record(record(AuditAction::VersionCreated, AuditStatus::Ok, 0));
        ledger.record(record(AuditAction::RetentionCount, AuditStatus::DryRun, 3));

        let summary = ledger.summary();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[0].action, AuditAction::VersionCreated);
        assert_eq!(
            summary[1],
            SummaryGroup {
                action: AuditAction::Copy,
                count: 2,
                total_size: 15
            }
        );
        assert_eq!(ledger.count(AuditAction::RetentionCount, AuditStatus::DryRun), 1);
    }
}
