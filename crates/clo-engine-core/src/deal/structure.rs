//! Deal-level terms.
//!
//! A deal is immutable after closing except for its status, which only moves
//! forward through `Active -> Amortizing -> Called | Matured`.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::CloEngineError;
use crate::types::{DealId, Money};
use crate::CloEngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentFrequency {
    Monthly,
    Quarterly,
    SemiAnnual,
    Annual,
}

impl PaymentFrequency {
    pub fn months(&self) -> u32 {
        match self {
            PaymentFrequency::Monthly => 1,
            PaymentFrequency::Quarterly => 3,
            PaymentFrequency::SemiAnnual => 6,
            PaymentFrequency::Annual => 12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealStatus {
    /// Reinvesting or post-reinvestment but performing.
    Active,
    /// Reinvestment has ended, collateral proceeds amortize the notes.
    Amortizing,
    /// Optionally redeemed.
    Called,
    /// Stated maturity reached.
    Matured,
}

impl DealStatus {
    fn can_transition_to(&self, next: DealStatus) -> bool {
        matches!(
            (self, next),
            (DealStatus::Active, DealStatus::Amortizing)
                | (DealStatus::Active, DealStatus::Called)
                | (DealStatus::Active, DealStatus::Matured)
                | (DealStatus::Amortizing, DealStatus::Called)
                | (DealStatus::Amortizing, DealStatus::Matured)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DealStatus::Called | DealStatus::Matured)
    }
}

/// A CLO deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub name: String,
    pub closing_date: NaiveDate,
    pub reinvestment_end_date: NaiveDate,
    pub maturity_date: NaiveDate,
    /// Target initial par of the collateral pool.
    pub target_par: Money,
    pub payment_frequency: PaymentFrequency,
    pub status: DealStatus,
}

impl Deal {
    pub fn validate(&self) -> CloEngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(CloEngineError::invalid("deal.id", "Deal id cannot be empty."));
        }
        if self.reinvestment_end_date < self.closing_date {
            return Err(CloEngineError::invalid(
                "deal.reinvestment_end_date",
                "Reinvestment end date precedes closing date.",
            ));
        }
        if self.maturity_date <= self.closing_date {
            return Err(CloEngineError::invalid(
                "deal.maturity_date",
                "Maturity date must follow closing date.",
            ));
        }
        if self.target_par <= Money::ZERO {
            return Err(CloEngineError::invalid(
                "deal.target_par",
                "Target par must be positive.",
            ));
        }
        Ok(())
    }

    /// Whether principal proceeds may still be reinvested on `date`.
    pub fn in_reinvestment_period(&self, date: NaiveDate) -> bool {
        self.status == DealStatus::Active && date <= self.reinvestment_end_date
    }

    /// Accrual start for a payment date when the caller does not supply one:
    /// one payment period before `payment_date`, never before closing.
    pub fn default_accrual_start(&self, payment_date: NaiveDate) -> CloEngineResult<NaiveDate> {
        let start = payment_date
            .checked_sub_months(Months::new(self.payment_frequency.months()))
            .ok_or_else(|| {
                CloEngineError::invalid("payment_date", "Payment date out of calendar range.")
            })?;
        Ok(start.max(self.closing_date))
    }

    pub fn transition_status(&mut self, next: DealStatus) -> CloEngineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CloEngineError::invalid(
                "deal.status",
                format!("Cannot move deal from {:?} to {:?}.", self.status, next),
            ));
        }
        self.status = next;
        Ok(())
    }
}
