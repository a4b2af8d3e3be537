//! Append-only persistence boundary for execution outputs.
//!
//! The engine never overwrites a row. Executions are versioned per (deal, payment
//! date); coverage rows per (deal, tier, kind, period) keep every version and expose
//! the latest one as history.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::compliance::engine::ComplianceTestResult;
use crate::coverage::cure::CoverageHistory;
use crate::coverage::trigger::{CoverageKind, CoverageTrigger};
use crate::deal::account::AccountRow;
use crate::error::CloEngineError;
use crate::waterfall::execution::WaterfallExecution;
use crate::CloEngineResult;

pub trait ExecutionStore {
    /// Highest version for (deal, date).
    fn latest_execution(&self, deal_id: &str, payment_date: NaiveDate) -> Option<&WaterfallExecution>;

    /// Append an execution. A completed execution may only be followed by one that
    /// explicitly supersedes it.
    fn append_execution(&mut self, execution: WaterfallExecution) -> CloEngineResult<()>;

    fn executions(&self, deal_id: &str) -> Vec<&WaterfallExecution>;

    fn append_compliance(&mut self, results: &[ComplianceTestResult]);

    fn compliance_results(&self, deal_id: &str) -> Vec<&ComplianceTestResult>;

    fn append_coverage(&mut self, rows: &[CoverageTrigger]);

    /// Latest version of every coverage row of the deal.
    fn coverage_history(&self, deal_id: &str) -> CloEngineResult<CoverageHistory>;

    fn append_account_rows(&mut self, rows: &[AccountRow]);

    fn account_rows(&self, deal_id: &str) -> Vec<&AccountRow>;
}

type CoverageKey = (String, String, CoverageKind, u32);

/// In-process store, mainly for tests and the CLI.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    executions: BTreeMap<(String, NaiveDate), Vec<WaterfallExecution>>,
    compliance: Vec<ComplianceTestResult>,
    coverage: BTreeMap<CoverageKey, Vec<CoverageTrigger>>,
    accounts: Vec<AccountRow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored version for (deal, date), oldest first.
    pub fn versions(&self, deal_id: &str, payment_date: NaiveDate) -> &[WaterfallExecution] {
        self.executions
            .get(&(deal_id.to_string(), payment_date))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl ExecutionStore for MemoryStore {
    fn latest_execution(&self, deal_id: &str, payment_date: NaiveDate) -> Option<&WaterfallExecution> {
        self.versions(deal_id, payment_date).last()
    }

    fn append_execution(&mut self, execution: WaterfallExecution) -> CloEngineResult<()> {
        let key = (execution.deal_id.clone(), execution.payment_date);
        let versions = self.executions.entry(key).or_default();
        if let Some(latest) = versions.last() {
            if latest.is_completed() && execution.supersedes != Some(latest.version) {
                return Err(CloEngineError::ExecutionAlreadyCompleted {
                    deal_id: execution.deal_id,
                    payment_date: execution.payment_date,
                });
            }
            if execution.version <= latest.version {
                return Err(CloEngineError::InvariantViolation {
                    context: format!(
                        "execution version {} for deal {} on {} does not follow {}",
                        execution.version, execution.deal_id, execution.payment_date, latest.version
                    ),
                });
            }
        }
        versions.push(execution);
        Ok(())
    }

    fn executions(&self, deal_id: &str) -> Vec<&WaterfallExecution> {
        self.executions
            .iter()
            .filter(|((d, _), _)| d == deal_id)
            .flat_map(|(_, v)| v.iter())
            .collect()
    }

    fn append_compliance(&mut self, results: &[ComplianceTestResult]) {
        self.compliance.extend_from_slice(results);
    }

    fn compliance_results(&self, deal_id: &str) -> Vec<&ComplianceTestResult> {
        self.compliance.iter().filter(|r| r.deal_id == deal_id).collect()
    }

    fn append_coverage(&mut self, rows: &[CoverageTrigger]) {
        for row in rows {
            let key = (row.deal_id.clone(), row.tier.clone(), row.kind, row.period);
            self.coverage.entry(key).or_default().push(row.clone());
        }
    }

    fn coverage_history(&self, deal_id: &str) -> CloEngineResult<CoverageHistory> {
        CoverageHistory::from_rows(
            self.coverage
                .iter()
                .filter(|((d, ..), _)| d == deal_id)
                .filter_map(|(_, versions)| versions.last().cloned()),
        )
    }

    fn append_account_rows(&mut self, rows: &[AccountRow]) {
        self.accounts.extend_from_slice(rows);
    }

    fn account_rows(&self, deal_id: &str) -> Vec<&AccountRow> {
        self.accounts.iter().filter(|r| r.deal_id == deal_id).collect()
    }
}
