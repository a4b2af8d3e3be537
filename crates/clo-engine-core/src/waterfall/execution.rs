//! The record of one waterfall run.
//!
//! A [`WaterfallExecution`] is produced once per (deal, payment date, version). Once
//! `Completed` it is never modified; a re-run produces a new version that supersedes it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::config::PriorityClass;
use crate::coverage::trigger::CoverageTrigger;
use crate::deal::account::AccountRow;
use crate::deal::tranche::Tranche;
use crate::error::CloEngineError;
use crate::types::{Money, TrancheId};
use crate::CloEngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

/// Why a step paid less than, or something other than, its nominal amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepNote {
    /// Cure step skipped because its coverage test passed.
    CoverageTestPassed,
    /// Step not eligible on this date.
    Gated { reason: String },
    /// Non-deferrable amount not met in full.
    Shortfall,
    /// Unpaid interest capitalised into the deferred balance.
    Deferred,
}

/// Cash sent to one tranche or account by a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub target: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub step_sequence: u32,
    pub step_name: String,
    pub priority_class: PriorityClass,
    pub kind: String,
    pub amount_due: Money,
    pub amount_paid: Money,
    pub amount_deferred: Money,
    pub shortfall: Money,
    pub cash_before: Money,
    /// Running cash after this step.
    pub remaining_cash: Money,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allocations: Vec<PaymentAllocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<StepNote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrancheBalance {
    pub tranche_id: TrancheId,
    pub beginning_balance: Money,
    pub ending_balance: Money,
    pub beginning_deferred: Money,
    pub ending_deferred: Money,
    pub interest_paid: Money,
    pub principal_paid: Money,
    pub distributions: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTotals {
    pub fees_paid: Money,
    pub interest_paid: Money,
    pub cure_paid: Money,
    pub principal_paid: Money,
    pub reserve_deposits: Money,
    pub reinvested: Money,
    pub incentive_fees: Money,
    pub residual_paid: Money,
    pub total_paid: Money,
    pub total_deferred: Money,
    pub total_shortfall: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallExecution {
    pub deal_id: String,
    pub payment_date: NaiveDate,
    pub period: u32,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<u32>,
    pub configuration_version: u32,
    pub status: ExecutionStatus,
    pub collection_amount: Money,
    pub beginning_cash: Money,
    pub reserve_draws: Money,
    pub total_available: Money,
    pub records: Vec<PaymentRecord>,
    pub remaining_cash: Money,
    pub totals: ExecutionTotals,
    /// Coverage rows used to gate this run, with cure payments filled in.
    pub coverage_snapshot: Vec<CoverageTrigger>,
    pub compliance_failures: usize,
    pub tranche_balances: Vec<TrancheBalance>,
    pub account_rows: Vec<AccountRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl WaterfallExecution {
    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn record(&self, step_name: &str) -> Option<&PaymentRecord> {
        self.records.iter().find(|r| r.step_name == step_name)
    }

    pub fn tranche(&self, id: &str) -> Option<&TrancheBalance> {
        self.tranche_balances.iter().find(|t| t.tranche_id == id)
    }

    pub fn total_paid(&self) -> Money {
        self.records.iter().map(|r| r.amount_paid).sum()
    }

    /// `sum(amount_paid) + remaining_cash == total_available`, exactly.
    pub fn check_conservation(&self) -> CloEngineResult<()> {
        let accounted = self.total_paid() + self.remaining_cash;
        if accounted != self.total_available || self.remaining_cash < Money::ZERO {
            return Err(CloEngineError::InvariantViolation {
                context: format!(
                    "deal {} on {}: paid {} + remaining {} != available {}",
                    self.deal_id,
                    self.payment_date,
                    self.total_paid(),
                    self.remaining_cash,
                    self.total_available
                ),
            });
        }
        Ok(())
    }

    /// Tranches with this run's ending balances, as next period's beginning state.
    pub fn next_tranches(&self, tranches: &[Tranche]) -> Vec<Tranche> {
        tranches
            .iter()
            .map(|t| {
                let mut next = t.clone();
                if let Some(b) = self.tranche(&t.id) {
                    next.current_balance = b.ending_balance;
                    next.deferred_balance = b.ending_deferred;
                }
                next
            })
            .collect()
    }
}
