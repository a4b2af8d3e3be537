//! Interest coverage: net interest collections over interest due on the tier and all
//! senior tranches.

use chrono::NaiveDate;

use super::oc::TierMeasurement;
use crate::deal::tranche::Tranche;
use crate::types::{Money, Rate, Ratio};

/// Accrual window and reference rate for the payment date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccrualPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub reference_rate: Rate,
}

/// Interest accrued this period on every non-equity tranche at or senior to the tier.
pub fn tier_interest_due(tranches: &[Tranche], tier_seniority: u32, accrual: &AccrualPeriod) -> Money {
    tranches
        .iter()
        .filter(|t| !t.is_equity && t.seniority_level <= tier_seniority)
        .map(|t| t.accrued_interest(accrual.reference_rate, accrual.start, accrual.end))
        .sum()
}

/// Interest available after senior expenses, never negative.
pub fn net_interest(interest_collections: Money, senior_expenses: Money) -> Money {
    (interest_collections - senior_expenses).max(Money::ZERO)
}

pub fn measure_ic(
    interest_collections: Money,
    senior_expenses: Money,
    interest_due: Money,
    threshold: Ratio,
) -> TierMeasurement {
    TierMeasurement::compare(net_interest(interest_collections, senior_expenses), interest_due, threshold)
}
