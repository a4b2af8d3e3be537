//! Running state of one waterfall execution.
//!
//! The context owns copies of everything a step may change: running cash, tranche
//! balances, account movements and the coverage rows being cured. Steps are applied
//! strictly in order; nothing here is shared across executions.

use std::collections::HashMap;

use super::execution::{ExecutionTotals, PaymentAllocation, PaymentRecord, TrancheBalance};
use crate::coverage::cure::record_cure_payment;
use crate::coverage::trigger::{CoverageKind, CoverageTrigger, CureTrack};
use crate::deal::account::{AccountKind, AccountLedger};
use crate::deal::tranche::{by_seniority, Tranche};
use crate::types::Money;

#[derive(Debug, Clone)]
struct TrancheState {
    tranche: Tranche,
    beginning_balance: Money,
    beginning_deferred: Money,
    /// Current-period interest not yet paid.
    interest_due: Money,
    interest_paid: Money,
    principal_paid: Money,
    distributions: Money,
}

/// Attempted debit that would break the cash invariant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CashViolation {
    pub attempted: Money,
    pub remaining_after: Money,
}

pub(crate) struct ContextOutput {
    pub remaining: Money,
    pub records: Vec<PaymentRecord>,
    pub totals: ExecutionTotals,
    pub balances: Vec<TrancheBalance>,
    pub ledger: AccountLedger,
    pub coverage: Vec<CoverageTrigger>,
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    total_available: Money,
    remaining: Money,
    principal_proceeds_left: Money,
    tranches: Vec<TrancheState>,
    pub(crate) ledger: AccountLedger,
    coverage: Vec<CoverageTrigger>,
    pub(crate) records: Vec<PaymentRecord>,
    pub(crate) totals: ExecutionTotals,
}

impl ExecutionContext {
    /// `interest_due` maps tranche id to this period's accrued interest.
    pub fn new(
        total_available: Money,
        principal_proceeds: Money,
        tranches: &[Tranche],
        interest_due: &HashMap<String, Money>,
        ledger: AccountLedger,
        coverage: Vec<CoverageTrigger>,
    ) -> Self {
        let tranches = by_seniority(tranches)
            .into_iter()
            .map(|t| TrancheState {
                beginning_balance: t.current_balance,
                beginning_deferred: t.deferred_balance,
                interest_due: interest_due.get(&t.id).copied().unwrap_or(Money::ZERO),
                interest_paid: Money::ZERO,
                principal_paid: Money::ZERO,
                distributions: Money::ZERO,
                tranche: t,
            })
            .collect();
        Self {
            total_available,
            remaining: total_available,
            principal_proceeds_left: principal_proceeds,
            tranches,
            ledger,
            coverage,
            records: Vec::new(),
            totals: ExecutionTotals::default(),
        }
    }

    pub fn total_available(&self) -> Money {
        self.total_available
    }

    pub fn remaining(&self) -> Money {
        self.remaining
    }

    pub fn principal_proceeds_left(&self) -> Money {
        self.principal_proceeds_left
    }

    pub(crate) fn consume_principal_proceeds(&mut self, amount: Money) {
        self.principal_proceeds_left = (self.principal_proceeds_left - amount).max(Money::ZERO);
    }

    /// Take `amount` out of running cash. Refuses anything that would make cash
    /// negative or that is itself negative; the caller treats that as a logic fault.
    pub fn debit(&mut self, amount: Money) -> Result<(), CashViolation> {
        let after = self.remaining - amount;
        if amount < Money::ZERO || after < Money::ZERO {
            return Err(CashViolation {
                attempted: amount,
                remaining_after: after,
            });
        }
        self.remaining = after;
        Ok(())
    }

    pub fn tranche(&self, id: &str) -> Option<&Tranche> {
        self.state(id).map(|s| &s.tranche)
    }

    fn state(&self, id: &str) -> Option<&TrancheState> {
        self.tranches.iter().find(|s| s.tranche.id == id)
    }

    fn state_mut(&mut self, id: &str) -> Option<&mut TrancheState> {
        self.tranches.iter_mut().find(|s| s.tranche.id == id)
    }

    /// Ids in seniority order, restricted to `ids`.
    fn ordered<'a>(&'a self, ids: &'a [String]) -> impl Iterator<Item = &'a TrancheState> + 'a {
        self.tranches.iter().filter(move |s| ids.contains(&s.tranche.id))
    }

    /// Non-equity tranche ids at or senior to `seniority`.
    pub fn senior_ids(&self, seniority: u32) -> Vec<String> {
        self.tranches
            .iter()
            .filter(|s| !s.tranche.is_equity && s.tranche.seniority_level <= seniority)
            .map(|s| s.tranche.id.clone())
            .collect()
    }

    pub fn interest_due(&self, ids: &[String]) -> Money {
        self.ordered(ids).map(|s| s.interest_due).sum()
    }

    pub fn outstanding_principal(&self, ids: &[String]) -> Money {
        self.ordered(ids).map(|s| s.tranche.current_balance).sum()
    }

    pub fn deferred_balance(&self, id: &str) -> Money {
        self.state(id).map(|s| s.tranche.deferred_balance).unwrap_or(Money::ZERO)
    }

    /// Split `amount` across `ids` in seniority order, each capped by `capacity`.
    fn sequential<F>(&self, ids: &[String], amount: Money, capacity: F) -> Vec<(String, Money)>
    where
        F: Fn(&TrancheState) -> Money,
    {
        let mut left = amount;
        let mut out = Vec::new();
        for s in self.ordered(ids) {
            if left <= Money::ZERO {
                break;
            }
            let take = left.min(capacity(s)).max(Money::ZERO);
            if take > Money::ZERO {
                out.push((s.tranche.id.clone(), take));
                left -= take;
            }
        }
        out
    }

    /// Pay current interest in seniority order. With `defer`, each tranche's unpaid
    /// interest is capitalised into its deferred balance. Returns allocations and the
    /// amount deferred.
    pub fn pay_interest(&mut self, ids: &[String], amount: Money, defer: bool) -> (Vec<PaymentAllocation>, Money) {
        let split = self.sequential(ids, amount, |s| s.interest_due);
        let mut allocations = Vec::with_capacity(split.len());
        for (id, paid) in split {
            if let Some(s) = self.state_mut(&id) {
                s.interest_due -= paid;
                s.interest_paid += paid;
            }
            allocations.push(PaymentAllocation { target: id, amount: paid });
        }
        let mut deferred = Money::ZERO;
        if defer {
            for id in ids {
                if let Some(s) = self.state_mut(id) {
                    let unpaid = s.interest_due;
                    s.tranche.deferred_balance += unpaid;
                    s.interest_due = Money::ZERO;
                    deferred += unpaid;
                }
            }
        }
        (allocations, deferred)
    }

    pub fn repay_deferred(&mut self, id: &str, amount: Money) -> Vec<PaymentAllocation> {
        let Some(s) = self.state_mut(id) else {
            return Vec::new();
        };
        let paid = amount.min(s.tranche.deferred_balance).max(Money::ZERO);
        s.tranche.deferred_balance -= paid;
        s.interest_paid += paid;
        vec![PaymentAllocation {
            target: id.to_string(),
            amount: paid,
        }]
    }

    /// Reduce principal balances in seniority order.
    pub fn pay_principal(&mut self, ids: &[String], amount: Money) -> Vec<PaymentAllocation> {
        let split = self.sequential(ids, amount, |s| s.tranche.current_balance);
        let mut allocations = Vec::with_capacity(split.len());
        for (id, paid) in split {
            if let Some(s) = self.state_mut(&id) {
                s.tranche.current_balance -= paid;
                s.principal_paid += paid;
            }
            allocations.push(PaymentAllocation { target: id, amount: paid });
        }
        allocations
    }

    pub fn distribute(&mut self, id: &str, amount: Money) -> Vec<PaymentAllocation> {
        if let Some(s) = self.state_mut(id) {
            s.distributions += amount;
        }
        vec![PaymentAllocation {
            target: id.to_string(),
            amount,
        }]
    }

    pub fn deposit(&mut self, account: AccountKind, amount: Money) -> Vec<PaymentAllocation> {
        self.ledger.deposit(account, amount);
        vec![PaymentAllocation {
            target: account.to_string(),
            amount,
        }]
    }

    pub fn coverage(&self, tier: &str, kind: CoverageKind) -> Option<&CoverageTrigger> {
        self.coverage.iter().find(|t| t.tier == tier && t.kind == kind)
    }

    pub fn record_cure(&mut self, tier: &str, kind: CoverageKind, track: CureTrack, amount: Money) -> Money {
        match self.coverage.iter_mut().find(|t| t.tier == tier && t.kind == kind) {
            Some(row) => record_cure_payment(row, track, amount),
            None => Money::ZERO,
        }
    }

    /// Consume the context into its output parts.
    pub(crate) fn finish(self) -> ContextOutput {
        let balances = self
            .tranches
            .into_iter()
            .map(|s| TrancheBalance {
                tranche_id: s.tranche.id,
                beginning_balance: s.beginning_balance,
                ending_balance: s.tranche.current_balance,
                beginning_deferred: s.beginning_deferred,
                ending_deferred: s.tranche.deferred_balance,
                interest_paid: s.interest_paid,
                principal_paid: s.principal_paid,
                distributions: s.distributions,
            })
            .collect();
        ContextOutput {
            remaining: self.remaining,
            records: self.records,
            totals: self.totals,
            balances,
            ledger: self.ledger,
            coverage: self.coverage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_tranches;
    use rust_decimal_macros::dec;

    fn ctx(cash: Money) -> ExecutionContext {
        let due: HashMap<String, Money> = [("A".to_string(), dec!(120_000)), ("B".to_string(), dec!(40_000))]
            .into_iter()
            .collect();
        ExecutionContext::new(cash, dec!(0), &sample_tranches(), &due, AccountLedger::default(), Vec::new())
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let mut c = ctx(dec!(100));
        c.debit(dec!(60)).unwrap();
        let v = c.debit(dec!(50)).unwrap_err();
        assert_eq!(v.remaining_after, dec!(-10));
        assert_eq!(c.remaining(), dec!(40));
        assert!(c.debit(dec!(-1)).is_err());
    }

    #[test]
    fn test_interest_paid_in_seniority_order() {
        let mut c = ctx(dec!(1_000_000));
        let ids = vec!["B".to_string(), "A".to_string()];
        let (alloc, deferred) = c.pay_interest(&ids, dec!(130_000), false);
        assert_eq!(alloc[0], PaymentAllocation { target: "A".into(), amount: dec!(120_000) });
        assert_eq!(alloc[1], PaymentAllocation { target: "B".into(), amount: dec!(10_000) });
        assert_eq!(deferred, dec!(0));
        assert_eq!(c.interest_due(&ids), dec!(30_000));
    }

    #[test]
    fn test_deferral_capitalises_unpaid_interest() {
        let mut c = ctx(dec!(1_000_000));
        let ids = vec!["B".to_string()];
        let (_, deferred) = c.pay_interest(&ids, dec!(15_000), true);
        assert_eq!(deferred, dec!(25_000));
        assert_eq!(c.deferred_balance("B"), dec!(25_000));
        assert_eq!(c.repay_deferred("B", dec!(40_000))[0].amount, dec!(25_000));
        assert_eq!(c.deferred_balance("B"), dec!(0));
    }

    #[test]
    fn test_principal_capped_by_balance() {
        let mut c = ctx(dec!(0));
        let ids = c.senior_ids(2);
        assert_eq!(ids, vec!["A".to_string(), "B".to_string()]);
        let alloc = c.pay_principal(&ids, dec!(7_000_000));
        assert_eq!(alloc[0].amount, dec!(6_000_000));
        assert_eq!(alloc[1].amount, dec!(1_000_000));
        assert_eq!(c.outstanding_principal(&ids), dec!(1_000_000));
    }
}
