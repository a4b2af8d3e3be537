//! Customary CLO concentration and collateral quality tests.

use rust_decimal_macros::dec;

use super::definition::{
    ComparisonKind, ComplianceTest, DerivedStatistic, Formula, GroupField, TestCategory,
};
use crate::cash_flow::filter::{AssetField, AssetFilter, FilterOp};

fn test(
    name: &str,
    category: TestCategory,
    filter: AssetFilter,
    formula: Formula,
    threshold: rust_decimal::Decimal,
    comparison: ComparisonKind,
) -> ComplianceTest {
    ComplianceTest {
        name: name.to_string(),
        category,
        filter,
        formula,
        threshold_value: threshold,
        comparison,
        active: true,
    }
}

fn pct_of_par() -> Formula {
    Formula::ParPercentage {
        denominator_filter: None,
    }
}

fn largest(group: GroupField, rank: usize) -> Formula {
    Formula::Derived(DerivedStatistic::LargestGroupPercentage { group, rank })
}

/// A representative indenture test set. Deals override thresholds through their own
/// definitions; this set is the default when none are supplied.
pub fn standard_test_library() -> Vec<ComplianceTest> {
    use ComparisonKind::{Max, Min};
    use TestCategory::{CollateralQuality, Concentration, PortfolioProfile};

    let performing = AssetFilter::flag(AssetField::IsDefaulted, false);

    vec![
        test(
            "Minimum Senior Secured Loans",
            Concentration,
            AssetFilter::text_eq(AssetField::Seniority, "SeniorSecured")
                .and(AssetFilter::text_eq(AssetField::AssetType, "Loan")),
            pct_of_par(),
            dec!(0.90),
            Min,
        ),
        test(
            "Maximum Second Lien and Unsecured",
            Concentration,
            AssetFilter::text_in(AssetField::Seniority, &["SecondLien", "SeniorUnsecured", "Subordinated"]),
            pct_of_par(),
            dec!(0.10),
            Max,
        ),
        test(
            "Maximum CCC Obligations",
            Concentration,
            AssetFilter::flag(AssetField::IsCcc, true).and(performing.clone()),
            pct_of_par(),
            dec!(0.075),
            Max,
        ),
        test(
            "Maximum Defaulted Obligations",
            Concentration,
            AssetFilter::flag(AssetField::IsDefaulted, true),
            pct_of_par(),
            dec!(0.05),
            Max,
        ),
        test(
            "Maximum Single Obligor",
            Concentration,
            AssetFilter::everything(),
            largest(GroupField::Obligor, 1),
            dec!(0.02),
            Max,
        ),
        test(
            "Maximum Largest Industry",
            Concentration,
            AssetFilter::everything(),
            largest(GroupField::Industry, 1),
            dec!(0.15),
            Max,
        ),
        test(
            "Maximum Second Largest Industry",
            Concentration,
            AssetFilter::everything(),
            largest(GroupField::Industry, 2),
            dec!(0.12),
            Max,
        ),
        test(
            "Maximum Non-US Obligors",
            Concentration,
            AssetFilter::text_ne(AssetField::Country, "US"),
            pct_of_par(),
            dec!(0.20),
            Max,
        ),
        test(
            "Maximum Fixed Rate Obligations",
            Concentration,
            AssetFilter::text_eq(AssetField::CouponType, "Fixed"),
            pct_of_par(),
            dec!(0.05),
            Max,
        ),
        test(
            "Maximum Bonds",
            Concentration,
            AssetFilter::text_eq(AssetField::AssetType, "Bond"),
            pct_of_par(),
            dec!(0.05),
            Max,
        ),
        test(
            "Maximum Discount Obligations",
            Concentration,
            AssetFilter::number(AssetField::Price, FilterOp::Lt, dec!(0.80)).and(performing.clone()),
            pct_of_par(),
            dec!(0.10),
            Max,
        ),
        test(
            "Maximum Weighted Average Rating Factor",
            CollateralQuality,
            performing.clone(),
            Formula::Derived(DerivedStatistic::Warf),
            dec!(3000),
            Max,
        ),
        test(
            "Minimum Weighted Average Spread",
            CollateralQuality,
            performing.clone().and(AssetFilter::text_eq(AssetField::CouponType, "Floating")),
            Formula::WeightedAverage { field: AssetField::Spread },
            dec!(0.035),
            Min,
        ),
        test(
            "Minimum Weighted Average Recovery Rate",
            CollateralQuality,
            performing.clone(),
            Formula::WeightedAverage {
                field: AssetField::RecoveryRate,
            },
            dec!(0.44),
            Min,
        ),
        test(
            "Minimum Diversity Score",
            CollateralQuality,
            performing.clone(),
            Formula::Derived(DerivedStatistic::DiversityScore),
            dec!(60),
            Min,
        ),
        test(
            "Maximum Weighted Average Life",
            PortfolioProfile,
            performing,
            Formula::Derived(DerivedStatistic::WeightedAverageLife),
            dec!(6.0),
            Max,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::definition::validate_test_set;

    #[test]
    fn test_library_is_well_formed() {
        let lib = standard_test_library();
        assert_eq!(lib.len(), 16);
        validate_test_set("CLO-1", &lib).unwrap();
    }

    #[test]
    fn test_library_serializes_as_data() {
        let lib = standard_test_library();
        let json = serde_json::to_string(&lib).unwrap();
        let back: Vec<ComplianceTest> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lib);
    }
}
