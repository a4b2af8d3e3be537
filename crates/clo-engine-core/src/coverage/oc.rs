//! Overcollateralization: collateral balance with deal-convention haircuts.
//!
//! - Excess CCC above `ccc_excess_limit` (fraction of performing par) is carried at
//!   market value, lowest-priced obligations first.
//! - Defaulted obligations are carried per [`DefaultedCarrying`].
//! - Principal account cash is added when `include_principal_cash` is set.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::cure::{CureMeasurement, CureSplitPolicy};
use crate::cash_flow::aggregator::{AssetPosition, AssetSnapshot};
use crate::deal::rating::is_ccc_or_below;
use crate::deal::tranche::Tranche;
use crate::types::{Money, Rate, Ratio};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultedCarrying {
    /// Par times the lower of recovery rate and market price.
    #[default]
    LowerOfRecoveryAndPrice,
    Zero,
    Par,
}

fn default_ccc_limit() -> Option<Rate> {
    Some(dec!(0.075))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageConventions {
    /// `None` disables the CCC haircut.
    #[serde(default = "default_ccc_limit")]
    pub ccc_excess_limit: Option<Rate>,
    #[serde(default)]
    pub defaulted_carrying: DefaultedCarrying,
    #[serde(default)]
    pub cure_split: CureSplitPolicy,
    #[serde(default)]
    pub cure_measurement: CureMeasurement,
    #[serde(default)]
    pub include_principal_cash: bool,
    /// Count deferred (PIK) balances in the OC liability.
    #[serde(default = "default_true")]
    pub include_deferred_in_liability: bool,
}

impl Default for CoverageConventions {
    fn default() -> Self {
        Self {
            ccc_excess_limit: default_ccc_limit(),
            defaulted_carrying: DefaultedCarrying::default(),
            cure_split: CureSplitPolicy::default(),
            cure_measurement: CureMeasurement::default(),
            include_principal_cash: false,
            include_deferred_in_liability: true,
        }
    }
}

/// How the OC numerator was built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollateralBreakdown {
    pub performing_par: Money,
    pub ccc_par: Money,
    pub ccc_excess_par: Money,
    pub ccc_haircut: Money,
    pub defaulted_par: Money,
    pub defaulted_carrying_value: Money,
    pub principal_cash: Money,
    pub collateral_balance: Money,
}

fn defaulted_value(position: &AssetPosition, carrying: DefaultedCarrying) -> Money {
    match carrying {
        DefaultedCarrying::LowerOfRecoveryAndPrice => {
            position.par_balance * position.asset.recovery_rate.min(position.asset.price)
        }
        DefaultedCarrying::Zero => Money::ZERO,
        DefaultedCarrying::Par => position.par_balance,
    }
}

pub fn collateral_balance(
    snapshot: &AssetSnapshot,
    conventions: &CoverageConventions,
    principal_cash: Money,
) -> CollateralBreakdown {
    let mut b = CollateralBreakdown::default();
    let mut ccc: Vec<&AssetPosition> = Vec::new();

    for p in snapshot.iter() {
        if p.asset.is_defaulted {
            b.defaulted_par += p.par_balance;
            b.defaulted_carrying_value += defaulted_value(p, conventions.defaulted_carrying);
        } else {
            b.performing_par += p.par_balance;
            if is_ccc_or_below(&p.asset.rating) {
                b.ccc_par += p.par_balance;
                ccc.push(p);
            }
        }
    }

    if let Some(limit) = conventions.ccc_excess_limit {
        b.ccc_excess_par = (b.ccc_par - limit * b.performing_par).max(Money::ZERO);
        ccc.sort_by(|x, y| x.asset.price.cmp(&y.asset.price));
        let mut left = b.ccc_excess_par;
        for p in ccc {
            if left <= Money::ZERO {
                break;
            }
            let take = left.min(p.par_balance);
            b.ccc_haircut += take * (Decimal::ONE - p.asset.price).max(Decimal::ZERO);
            left -= take;
        }
    }

    if conventions.include_principal_cash {
        b.principal_cash = principal_cash.max(Money::ZERO);
    }
    b.collateral_balance = b.performing_par - b.ccc_haircut + b.defaulted_carrying_value + b.principal_cash;
    b
}

/// Result of comparing a tier against its threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierMeasurement {
    pub numerator: Money,
    pub denominator: Money,
    pub ratio: Ratio,
    pub passed: bool,
    pub deficiency: Money,
    pub denominator_zero: bool,
}

impl TierMeasurement {
    /// Shared pass/fail rule. A tier with nothing owed passes.
    pub(crate) fn compare(numerator: Money, denominator: Money, threshold: Ratio) -> Self {
        if denominator.is_zero() {
            return Self {
                numerator,
                denominator,
                ratio: Decimal::ZERO,
                passed: true,
                deficiency: Money::ZERO,
                denominator_zero: true,
            };
        }
        let ratio = numerator / denominator;
        let passed = ratio >= threshold;
        let deficiency = if passed {
            Money::ZERO
        } else {
            (denominator * threshold - numerator).max(Money::ZERO)
        };
        Self {
            numerator,
            denominator,
            ratio,
            passed,
            deficiency,
            denominator_zero: false,
        }
    }
}

/// Liability of the tier ending at `tier_seniority`: every non-equity tranche at or
/// senior to it.
pub fn tier_liability(tranches: &[Tranche], tier_seniority: u32, include_deferred: bool) -> Money {
    tranches
        .iter()
        .filter(|t| !t.is_equity && t.seniority_level <= tier_seniority)
        .map(|t| {
            if include_deferred {
                t.interest_bearing_balance()
            } else {
                t.current_balance
            }
        })
        .sum()
}

pub fn measure_oc(
    collateral: &CollateralBreakdown,
    tranches: &[Tranche],
    tier_seniority: u32,
    threshold: Ratio,
    conventions: &CoverageConventions,
) -> TierMeasurement {
    let liability = tier_liability(tranches, tier_seniority, conventions.include_deferred_in_liability);
    TierMeasurement::compare(collateral.collateral_balance, liability, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_snapshot, sample_tranches};

    #[test]
    fn test_collateral_with_ccc_haircut() {
        let snapshot = sample_snapshot();
        let b = collateral_balance(&snapshot, &CoverageConventions::default(), dec!(0));
        // 1mm CCC vs 7.5% of 10mm performing par: 250k excess at 0.70.
        assert_eq!(b.performing_par, dec!(10_000_000));
        assert_eq!(b.ccc_excess_par, dec!(250_000));
        assert_eq!(b.ccc_haircut, dec!(75_000));
        assert_eq!(b.collateral_balance, dec!(9_925_000));
    }

    #[test]
    fn test_defaulted_carrying_and_principal_cash() {
        let mut snapshot = sample_snapshot();
        snapshot.positions[0].asset.is_defaulted = true;
        snapshot.positions[0].asset.price = dec!(0.40);
        let conv = CoverageConventions {
            ccc_excess_limit: None,
            include_principal_cash: true,
            ..CoverageConventions::default()
        };
        let b = collateral_balance(&snapshot, &conv, dec!(500_000));
        assert_eq!(b.defaulted_par, dec!(4_000_000));
        assert_eq!(b.defaulted_carrying_value, dec!(1_600_000));
        assert_eq!(b.collateral_balance, dec!(6_000_000) + dec!(1_600_000) + dec!(500_000));

        let zero = CoverageConventions {
            defaulted_carrying: DefaultedCarrying::Zero,
            ..conv
        };
        assert_eq!(collateral_balance(&snapshot, &zero, dec!(0)).collateral_balance, dec!(6_000_000));
    }

    #[test]
    fn test_liability_includes_senior_tranches() {
        let mut tranches = sample_tranches();
        tranches[1].deferred_balance = dec!(100_000);
        assert_eq!(tier_liability(&tranches, 1, true), dec!(6_000_000));
        assert_eq!(tier_liability(&tranches, 2, true), dec!(8_100_000));
        assert_eq!(tier_liability(&tranches, 2, false), dec!(8_000_000));
        assert_eq!(tier_liability(&tranches, 3, true), dec!(8_100_000));
    }

    #[test]
    fn test_deficiency_on_fail() {
        let m = TierMeasurement::compare(dec!(7_120_000), dec!(6_000_000), dec!(1.20));
        assert!(!m.passed);
        assert_eq!(m.deficiency, dec!(80_000));
        let ok = TierMeasurement::compare(dec!(7_200_000), dec!(6_000_000), dec!(1.20));
        assert!(ok.passed);
        assert_eq!(ok.deficiency, dec!(0));
    }

    #[test]
    fn test_zero_liability_passes() {
        let m = TierMeasurement::compare(dec!(100), dec!(0), dec!(1.2));
        assert!(m.passed && m.denominator_zero);
    }
}
