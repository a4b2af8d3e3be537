//! Named cash accounts and their per-date balance rows.
//!
//! Every `AccountRow` satisfies `ending = beginning + deposits - withdrawals`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CloEngineError;
use crate::types::Money;
use crate::CloEngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccountKind {
    Collection,
    InterestReserve,
    PrincipalReserve,
    Payable,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountKind::Collection => "Collection",
            AccountKind::InterestReserve => "InterestReserve",
            AccountKind::PrincipalReserve => "PrincipalReserve",
            AccountKind::Payable => "Payable",
        };
        f.write_str(s)
    }
}

/// Opening state of an account for a payment date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub kind: AccountKind,
    pub beginning_balance: Money,
    /// Maximum amount that may be drawn into the waterfall on this date.
    /// `None` means the account is not a source of available funds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw_limit: Option<Money>,
}

/// Balance movement of one account on one payment date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRow {
    pub deal_id: String,
    pub date: NaiveDate,
    pub kind: AccountKind,
    pub beginning_balance: Money,
    pub deposits: Money,
    pub withdrawals: Money,
    pub ending_balance: Money,
}

impl AccountRow {
    pub fn check_identity(&self) -> CloEngineResult<()> {
        let expected = self.beginning_balance + self.deposits - self.withdrawals;
        if expected != self.ending_balance {
            return Err(CloEngineError::InvariantViolation {
                context: format!(
                    "account {} on {} for deal {}: ending {} != beginning {} + deposits {} - withdrawals {}",
                    self.kind,
                    self.date,
                    self.deal_id,
                    self.ending_balance,
                    self.beginning_balance,
                    self.deposits,
                    self.withdrawals
                ),
            });
        }
        if self.ending_balance < Money::ZERO {
            return Err(CloEngineError::InvariantViolation {
                context: format!("account {} on {} overdrawn", self.kind, self.date),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct Movement {
    beginning: Money,
    deposits: Money,
    withdrawals: Money,
}

impl Movement {
    fn balance(&self) -> Money {
        self.beginning + self.deposits - self.withdrawals
    }
}

/// Working ledger of account movements during one execution.
#[derive(Debug, Clone, Default)]
pub struct AccountLedger {
    accounts: BTreeMap<AccountKind, Movement>,
}

impl AccountLedger {
    pub fn open(balances: &[AccountBalance]) -> CloEngineResult<Self> {
        let mut accounts = BTreeMap::new();
        for b in balances {
            if b.beginning_balance < Money::ZERO {
                return Err(CloEngineError::invalid(
                    format!("account.{}.beginning_balance", b.kind),
                    "Account balance cannot be negative.",
                ));
            }
            let previous = accounts.insert(
                b.kind,
                Movement {
                    beginning: b.beginning_balance,
                    ..Movement::default()
                },
            );
            if previous.is_some() {
                return Err(CloEngineError::invalid(
                    format!("account.{}", b.kind),
                    "Account listed twice.",
                ));
            }
        }
        Ok(Self { accounts })
    }

    pub fn balance(&self, kind: AccountKind) -> Money {
        self.accounts
            .get(&kind)
            .map(Movement::balance)
            .unwrap_or(Money::ZERO)
    }

    /// Deposit into an account, opening it at zero if it was not supplied.
    pub fn deposit(&mut self, kind: AccountKind, amount: Money) {
        self.accounts.entry(kind).or_default().deposits += amount;
    }

    pub fn withdraw(&mut self, kind: AccountKind, amount: Money) -> CloEngineResult<()> {
        let movement = self.accounts.entry(kind).or_default();
        if amount > movement.balance() {
            return Err(CloEngineError::InvariantViolation {
                context: format!(
                    "withdrawal of {} from {} exceeds balance {}",
                    amount,
                    kind,
                    movement.balance()
                ),
            });
        }
        movement.withdrawals += amount;
        Ok(())
    }

    pub fn into_rows(self, deal_id: &str, date: NaiveDate) -> Vec<AccountRow> {
        self.accounts
            .into_iter()
            .map(|(kind, m)| AccountRow {
                deal_id: deal_id.to_string(),
                date,
                kind,
                beginning_balance: m.beginning,
                deposits: m.deposits,
                withdrawals: m.withdrawals,
                ending_balance: m.balance(),
            })
            .collect()
    }
}
