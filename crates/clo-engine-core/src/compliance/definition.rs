//! Static compliance test definitions.

use std::collections::HashSet;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::cash_flow::filter::{AssetField, AssetFilter, FieldKind};
use crate::error::CloEngineError;
use crate::CloEngineResult;

/// Tolerance for `EXACT` comparisons.
pub const EXACT_TOLERANCE: Decimal = dec!(0.000001);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestCategory {
    Concentration,
    CollateralQuality,
    PortfolioProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComparisonKind {
    Min,
    Max,
    Exact,
}

impl ComparisonKind {
    pub fn passes(&self, calculated: Decimal, threshold: Decimal) -> bool {
        match self {
            ComparisonKind::Min => calculated >= threshold,
            ComparisonKind::Max => calculated <= threshold,
            ComparisonKind::Exact => (calculated - threshold).abs() <= EXACT_TOLERANCE,
        }
    }

    /// Signed headroom: non-negative when passing (EXACT is within tolerance).
    pub fn margin(&self, calculated: Decimal, threshold: Decimal) -> Decimal {
        match self {
            ComparisonKind::Min => calculated - threshold,
            ComparisonKind::Max => threshold - calculated,
            ComparisonKind::Exact => EXACT_TOLERANCE - (calculated - threshold).abs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupField {
    Obligor,
    Industry,
    Country,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedStatistic {
    /// Moody's industry diversity score of the filtered assets.
    DiversityScore,
    /// Par-weighted Moody's rating factor.
    Warf,
    /// Par-weighted remaining life in years.
    WeightedAverageLife,
    /// Par of the `rank`-th largest group (1 = largest) over total pool par.
    LargestGroupPercentage { group: GroupField, rank: usize },
}

/// How a test's numerator and denominator are computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formula {
    /// Par-weighted average of a numeric field over the filtered assets.
    WeightedAverage { field: AssetField },
    /// Filtered par over total par (or over par matching `denominator_filter`).
    ParPercentage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        denominator_filter: Option<AssetFilter>,
    },
    /// Filtered asset count over total asset count.
    CountPercentage,
    Derived(DerivedStatistic),
}

fn default_active() -> bool {
    true
}

/// A named portfolio test: filter, formula, threshold and comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceTest {
    pub name: String,
    pub category: TestCategory,
    #[serde(default)]
    pub filter: AssetFilter,
    pub formula: Formula,
    pub threshold_value: Decimal,
    pub comparison: ComparisonKind,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl ComplianceTest {
    pub fn validate(&self) -> CloEngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(CloEngineError::invalid("compliance_test.name", "Test name cannot be empty."));
        }
        self.filter.validate()?;
        match &self.formula {
            Formula::WeightedAverage { field } if field.kind() != FieldKind::Numeric => {
                Err(CloEngineError::invalid(
                    format!("compliance_test.{}.formula", self.name),
                    format!("Weighted average requires a numeric field, got {:?}.", field),
                ))
            }
            Formula::ParPercentage {
                denominator_filter: Some(f),
            } => f.validate(),
            Formula::Derived(DerivedStatistic::LargestGroupPercentage { rank, .. }) if *rank == 0 => {
                Err(CloEngineError::invalid(
                    format!("compliance_test.{}.formula", self.name),
                    "Group rank starts at 1.",
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Validate a set of definitions: each well-formed, names unique.
pub fn validate_test_set(deal_id: &str, tests: &[ComplianceTest]) -> CloEngineResult<()> {
    let mut names = HashSet::new();
    for t in tests {
        t.validate()?;
        if !names.insert(t.name.as_str()) {
            return Err(CloEngineError::config(
                deal_id,
                format!("duplicate compliance test name '{}'", t.name),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_passes_on_equality() {
        assert!(ComparisonKind::Max.passes(dec!(0.075), dec!(0.075)));
        assert!(!ComparisonKind::Max.passes(dec!(0.0751), dec!(0.075)));
    }

    #[test]
    fn test_min_passes_on_equality() {
        assert!(ComparisonKind::Min.passes(dec!(0.90), dec!(0.90)));
        assert!(!ComparisonKind::Min.passes(dec!(0.8999), dec!(0.90)));
    }

    #[test]
    fn test_exact_within_tolerance() {
        assert!(ComparisonKind::Exact.passes(dec!(1.0000005), dec!(1)));
        assert!(!ComparisonKind::Exact.passes(dec!(1.00001), dec!(1)));
    }

    #[test]
    fn test_margin_sign_matches_pass() {
        for kind in [ComparisonKind::Min, ComparisonKind::Max, ComparisonKind::Exact] {
            for (calc, thr) in [(dec!(1), dec!(2)), (dec!(2), dec!(1)), (dec!(1), dec!(1))] {
                assert_eq!(kind.passes(calc, thr), kind.margin(calc, thr) >= Decimal::ZERO);
            }
        }
    }

    #[test]
    fn test_weighted_average_of_text_rejected() {
        let t = ComplianceTest {
            name: "bad".into(),
            category: TestCategory::CollateralQuality,
            filter: AssetFilter::everything(),
            formula: Formula::WeightedAverage {
                field: AssetField::Country,
            },
            threshold_value: dec!(1),
            comparison: ComparisonKind::Min,
            active: true,
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_duplicate_names_are_configuration_errors() {
        let t = ComplianceTest {
            name: "Max CCC".into(),
            category: TestCategory::Concentration,
            filter: AssetFilter::everything(),
            formula: Formula::CountPercentage,
            threshold_value: dec!(0.075),
            comparison: ComparisonKind::Max,
            active: true,
        };
        let err = validate_test_set("D1", &[t.clone(), t]).unwrap_err();
        assert!(matches!(err, CloEngineError::ConfigurationError { .. }));
    }

    #[test]
    fn test_definition_from_json() {
        let t: ComplianceTest = serde_json::from_value(serde_json::json!({
            "name": "Max Top Industry",
            "category": "Concentration",
            "formula": { "derived": { "largest_group_percentage": { "group": "industry", "rank": 1 } } },
            "threshold_value": "0.15",
            "comparison": "MAX"
        }))
        .unwrap();
        assert!(t.active);
        assert_eq!(t.filter, AssetFilter::everything());
        t.validate().unwrap();
    }
}
