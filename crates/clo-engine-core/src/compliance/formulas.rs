//! Numerator / denominator computation for compliance formulas.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::definition::{DerivedStatistic, Formula, GroupField};
use crate::cash_flow::aggregator::{AssetPosition, AssetSnapshot};
use crate::cash_flow::filter::{AssetField, AssetFilter};
use crate::deal::rating::rating_factor;

/// Raw result of a formula before threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormulaValue {
    pub numerator: Decimal,
    pub denominator: Decimal,
    pub matched_count: usize,
}

pub fn evaluate_formula(formula: &Formula, filter: &AssetFilter, snapshot: &AssetSnapshot) -> FormulaValue {
    let matched: Vec<&AssetPosition> = snapshot.filter(filter).collect();
    let matched_count = matched.len();
    let par_of = |items: &[&AssetPosition]| -> Decimal { items.iter().map(|p| p.par_balance).sum() };

    let (numerator, denominator) = match formula {
        Formula::WeightedAverage { field } => weighted_average(&matched, |p| p.numeric(*field)),
        Formula::ParPercentage { denominator_filter } => {
            let denominator = match denominator_filter {
                Some(f) => snapshot.par_matching(f),
                None => snapshot.total_par(),
            };
            (par_of(&matched), denominator)
        }
        Formula::CountPercentage => (
            Decimal::from(matched_count as u64),
            Decimal::from(snapshot.len() as u64),
        ),
        Formula::Derived(stat) => match stat {
            DerivedStatistic::Warf => weighted_average(&matched, |p| Some(rating_factor(&p.asset.rating))),
            DerivedStatistic::WeightedAverageLife => {
                weighted_average(&matched, |p| p.numeric(AssetField::RemainingLife))
            }
            DerivedStatistic::DiversityScore => {
                let denominator = if matched.is_empty() {
                    Decimal::ZERO
                } else {
                    Decimal::ONE
                };
                (diversity_score(&matched), denominator)
            }
            DerivedStatistic::LargestGroupPercentage { group, rank } => {
                (nth_largest_group_par(&matched, *group, *rank), snapshot.total_par())
            }
        },
    };

    FormulaValue {
        numerator,
        denominator,
        matched_count,
    }
}

/// (sum of par x value, sum of par) over positions with a value.
fn weighted_average<F>(positions: &[&AssetPosition], value: F) -> (Decimal, Decimal)
where
    F: Fn(&AssetPosition) -> Option<Decimal>,
{
    positions
        .iter()
        .filter_map(|p| value(p).map(|v| (p.par_balance * v, p.par_balance)))
        .fold((Decimal::ZERO, Decimal::ZERO), |(n, d), (pn, pd)| (n + pn, d + pd))
}

fn group_key(position: &AssetPosition, group: GroupField) -> String {
    let raw = match group {
        GroupField::Obligor => &position.asset.obligor,
        GroupField::Industry => &position.asset.industry,
        GroupField::Country => &position.asset.country,
    };
    raw.trim().to_ascii_lowercase()
}

fn nth_largest_group_par(positions: &[&AssetPosition], group: GroupField, rank: usize) -> Decimal {
    let mut groups: HashMap<String, Decimal> = HashMap::new();
    for p in positions {
        *groups.entry(group_key(p, group)).or_default() += p.par_balance;
    }
    let mut pars: Vec<Decimal> = groups.into_values().collect();
    pars.sort_by(|a, b| b.cmp(a));
    rank.checked_sub(1)
        .and_then(|i| pars.get(i).copied())
        .unwrap_or(Decimal::ZERO)
}

/// Moody's industry diversity curve: aggregate industry equivalent units to
/// industry diversity score, linearly interpolated.
const DIVERSITY_CURVE: [(Decimal, Decimal); 11] = [
    (dec!(0), dec!(0)),
    (dec!(1), dec!(1)),
    (dec!(2), dec!(1.5)),
    (dec!(3), dec!(2)),
    (dec!(4), dec!(2.3333)),
    (dec!(5), dec!(2.6667)),
    (dec!(6), dec!(3)),
    (dec!(7), dec!(3.25)),
    (dec!(8), dec!(3.5)),
    (dec!(9), dec!(3.75)),
    (dec!(10), dec!(4)),
];

fn industry_diversity(units: Decimal) -> Decimal {
    for window in DIVERSITY_CURVE.windows(2) {
        let (u0, s0) = window[0];
        let (u1, s1) = window[1];
        if units <= u1 {
            return s0 + (units - u0) * (s1 - s0) / (u1 - u0);
        }
    }
    DIVERSITY_CURVE[DIVERSITY_CURVE.len() - 1].1
}

/// Moody's diversity score.
///
/// Each obligor contributes `min(1, obligor_par / average_obligor_par)` equivalent
/// units to its industry; each industry's units map through the diversity curve and
/// the industry scores are summed. Defaulted positions are excluded.
pub fn diversity_score(positions: &[&AssetPosition]) -> Decimal {
    let mut obligors: HashMap<String, (String, Decimal)> = HashMap::new();
    for p in positions.iter().filter(|p| !p.asset.is_defaulted) {
        let entry = obligors
            .entry(group_key(p, GroupField::Obligor))
            .or_insert_with(|| (group_key(p, GroupField::Industry), Decimal::ZERO));
        entry.1 += p.par_balance;
    }
    if obligors.is_empty() {
        return Decimal::ZERO;
    }
    let total: Decimal = obligors.values().map(|(_, par)| *par).sum();
    if total.is_zero() {
        return Decimal::ZERO;
    }
    let average = total / Decimal::from(obligors.len() as u64);

    let mut industry_units: HashMap<&str, Decimal> = HashMap::new();
    for (industry, par) in obligors.values() {
        *industry_units.entry(industry.as_str()).or_default() += (*par / average).min(Decimal::ONE);
    }
    industry_units.values().map(|u| industry_diversity(*u)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deal::asset::{Asset, AssetType, CashFlowPeriod, CouponType, Seniority};
    use chrono::NaiveDate;

    fn pos(obligor: &str, industry: &str, rating: &str, par: Decimal) -> AssetPosition {
        AssetPosition {
            asset: Asset {
                id: format!("{}-{}", obligor, par),
                obligor: obligor.into(),
                industry: industry.into(),
                country: "US".into(),
                rating: rating.into(),
                seniority: Seniority::SeniorSecured,
                asset_type: AssetType::Loan,
                coupon_type: CouponType::Floating,
                coupon_rate: dec!(0.09),
                spread: dec!(0.04),
                maturity_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
                price: Decimal::ONE,
                recovery_rate: dec!(0.45),
                is_defaulted: false,
            },
            par_balance: par,
            market_value: par,
            remaining_life: dec!(4),
            cash_flow: CashFlowPeriod {
                asset_id: obligor.into(),
                period: 1,
                beginning_balance: par,
                ending_balance: par,
                interest: Decimal::ZERO,
                scheduled_principal: Decimal::ZERO,
                unscheduled_principal: Decimal::ZERO,
                default_amount: Decimal::ZERO,
                recoveries: Decimal::ZERO,
                purchases: Decimal::ZERO,
                sales: Decimal::ZERO,
            },
        }
    }

    fn snapshot(positions: Vec<AssetPosition>) -> AssetSnapshot {
        AssetSnapshot {
            as_of: None,
            positions,
        }
    }

    #[test]
    fn test_curve_endpoints() {
        assert_eq!(industry_diversity(dec!(1)), dec!(1));
        assert_eq!(industry_diversity(dec!(2.5)), dec!(1.75));
        assert_eq!(industry_diversity(dec!(25)), dec!(4));
    }

    #[test]
    fn test_equal_obligors_distinct_industries() {
        let s = snapshot(vec![
            pos("A", "Tech", "B2", dec!(100)),
            pos("B", "Health", "B2", dec!(100)),
            pos("C", "Retail", "B2", dec!(100)),
        ]);
        let refs: Vec<&AssetPosition> = s.iter().collect();
        assert_eq!(diversity_score(&refs), dec!(3));
    }

    #[test]
    fn test_same_industry_diversifies_less() {
        let s = snapshot(vec![
            pos("A", "Tech", "B2", dec!(100)),
            pos("B", "Tech", "B2", dec!(100)),
        ]);
        let refs: Vec<&AssetPosition> = s.iter().collect();
        assert_eq!(diversity_score(&refs), dec!(1.5));
    }

    #[test]
    fn test_warf_weighted_by_par() {
        let s = snapshot(vec![
            pos("A", "Tech", "B2", dec!(300)),
            pos("B", "Tech", "B1", dec!(100)),
        ]);
        let v = evaluate_formula(&Formula::Derived(DerivedStatistic::Warf), &AssetFilter::everything(), &s);
        assert_eq!(v.numerator / v.denominator, (dec!(300) * dec!(2720) + dec!(100) * dec!(2220)) / dec!(400));
    }

    #[test]
    fn test_second_largest_industry() {
        let s = snapshot(vec![
            pos("A", "Tech", "B2", dec!(50)),
            pos("B", "tech ", "B2", dec!(20)),
            pos("C", "Health", "B2", dec!(25)),
            pos("D", "Retail", "B2", dec!(5)),
        ]);
        let formula = Formula::Derived(DerivedStatistic::LargestGroupPercentage {
            group: GroupField::Industry,
            rank: 2,
        });
        let v = evaluate_formula(&formula, &AssetFilter::everything(), &s);
        assert_eq!(v.numerator, dec!(25));
        assert_eq!(v.denominator, dec!(100));
    }

    #[test]
    fn test_rank_beyond_groups_is_zero() {
        let s = snapshot(vec![pos("A", "Tech", "B2", dec!(50))]);
        let formula = Formula::Derived(DerivedStatistic::LargestGroupPercentage {
            group: GroupField::Obligor,
            rank: 3,
        });
        assert_eq!(evaluate_formula(&formula, &AssetFilter::everything(), &s).numerator, Decimal::ZERO);
    }

    #[test]
    fn test_count_percentage() {
        let s = snapshot(vec![
            pos("A", "Tech", "Caa1", dec!(50)),
            pos("B", "Tech", "B2", dec!(50)),
        ]);
        let v = evaluate_formula(
            &Formula::CountPercentage,
            &AssetFilter::flag(AssetField::IsCcc, true),
            &s,
        );
        assert_eq!((v.numerator, v.denominator, v.matched_count), (dec!(1), dec!(2), 1));
    }

    #[test]
    fn test_empty_filter_result_zero_denominator() {
        let s = snapshot(vec![pos("A", "Tech", "B2", dec!(50))]);
        let v = evaluate_formula(
            &Formula::WeightedAverage { field: AssetField::Spread },
            &AssetFilter::text_eq(AssetField::Country, "FR"),
            &s,
        );
        assert_eq!(v.denominator, Decimal::ZERO);
        assert_eq!(v.matched_count, 0);
    }
}
