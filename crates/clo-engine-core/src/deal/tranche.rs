//! Tranches of the CLO capital structure.
//!
//! Seniority level 1 is the most senior class. Balances mutate only through the
//! waterfall: principal and cure steps reduce `current_balance`, deferred interest
//! accrues into `deferred_balance` (PIK) and deferred-interest steps repay it.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::CloEngineError;
use crate::types::{round_money, Money, Rate, Ratio, TrancheId};
use crate::CloEngineResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayCount {
    #[default]
    Actual360,
    Thirty360,
}

impl DayCount {
    /// Year fraction between `start` (inclusive) and `end` (exclusive).
    pub fn year_fraction(&self, start: NaiveDate, end: NaiveDate) -> Decimal {
        if end <= start {
            return Decimal::ZERO;
        }
        match self {
            DayCount::Actual360 => Decimal::from((end - start).num_days()) / dec!(360),
            DayCount::Thirty360 => {
                // US 30/360 (bond basis)
                let d1 = start.day().min(30) as i64;
                let d2 = if d1 == 30 {
                    end.day().min(30) as i64
                } else {
                    end.day() as i64
                };
                let days = 360 * (end.year() as i64 - start.year() as i64)
                    + 30 * (end.month() as i64 - start.month() as i64)
                    + (d2 - d1);
                Decimal::from(days) / dec!(360)
            }
        }
    }
}

/// Coupon terms of a tranche.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CouponTerms {
    /// Reference rate (floored at zero) plus spread.
    Floating { spread: Rate },
    Fixed { rate: Rate },
}

/// A class of notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tranche {
    pub id: TrancheId,
    /// 1 = most senior.
    pub seniority_level: u32,
    pub current_balance: Money,
    /// Capitalised (PIK) interest owed.
    #[serde(default)]
    pub deferred_balance: Money,
    pub coupon: CouponTerms,
    #[serde(default)]
    pub day_count: DayCount,
    #[serde(default)]
    pub is_deferrable: bool,
    #[serde(default)]
    pub is_equity: bool,
    /// OC trigger for the tier ending at this class (1.25 = 125%).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oc_threshold: Option<Ratio>,
    /// IC trigger for the tier ending at this class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ic_threshold: Option<Ratio>,
}

impl Tranche {
    pub fn coupon_rate(&self, reference_rate: Rate) -> Rate {
        match &self.coupon {
            CouponTerms::Floating { spread } => reference_rate.max(Decimal::ZERO) + *spread,
            CouponTerms::Fixed { rate } => *rate,
        }
    }

    /// Balance on which interest accrues: principal plus capitalised interest.
    pub fn interest_bearing_balance(&self) -> Money {
        self.current_balance + self.deferred_balance
    }

    /// Interest accrued over the accrual period, rounded to cents.
    /// Equity earns no coupon; it receives the residual.
    pub fn accrued_interest(&self, reference_rate: Rate, start: NaiveDate, end: NaiveDate) -> Money {
        if self.is_equity {
            return Money::ZERO;
        }
        let yf = self.day_count.year_fraction(start, end);
        round_money(self.interest_bearing_balance() * self.coupon_rate(reference_rate) * yf)
    }

    /// Total owed to the class: principal plus deferred interest.
    pub fn total_owed(&self) -> Money {
        self.current_balance + self.deferred_balance
    }

    pub fn validate(&self) -> CloEngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(CloEngineError::invalid("tranche.id", "Tranche id cannot be empty."));
        }
        if self.seniority_level == 0 {
            return Err(CloEngineError::invalid(
                format!("tranche.{}.seniority_level", self.id),
                "Seniority level starts at 1.",
            ));
        }
        if self.current_balance < Money::ZERO || self.deferred_balance < Money::ZERO {
            return Err(CloEngineError::invalid(
                format!("tranche.{}.balance", self.id),
                "Tranche balances cannot be negative.",
            ));
        }
        for (name, threshold) in [("oc_threshold", self.oc_threshold), ("ic_threshold", self.ic_threshold)] {
            if let Some(t) = threshold {
                if t <= Decimal::ZERO {
                    return Err(CloEngineError::invalid(
                        format!("tranche.{}.{}", self.id, name),
                        "Coverage threshold must be positive.",
                    ));
                }
                if self.is_equity {
                    return Err(CloEngineError::invalid(
                        format!("tranche.{}.{}", self.id, name),
                        "Equity cannot define a coverage tier.",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Validate a capital structure: unique ids, unique seniority levels.
pub fn validate_capital_structure(tranches: &[Tranche]) -> CloEngineResult<()> {
    if tranches.is_empty() {
        return Err(CloEngineError::InsufficientData(
            "At least one tranche is required.".into(),
        ));
    }
    let mut seen_ids = std::collections::HashSet::new();
    let mut seen_levels = std::collections::HashSet::new();
    for t in tranches {
        t.validate()?;
        if !seen_ids.insert(t.id.as_str()) {
            return Err(CloEngineError::invalid(
                format!("tranche.{}", t.id),
                "Duplicate tranche id.",
            ));
        }
        if !seen_levels.insert(t.seniority_level) {
            return Err(CloEngineError::invalid(
                format!("tranche.{}.seniority_level", t.id),
                format!("Seniority level {} used twice.", t.seniority_level),
            ));
        }
    }
    Ok(())
}

/// Clone of the tranches ordered most senior first.
pub fn by_seniority(tranches: &[Tranche]) -> Vec<Tranche> {
    let mut sorted = tranches.to_vec();
    sorted.sort_by_key(|t| t.seniority_level);
    sorted
}
