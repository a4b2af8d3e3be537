//! Compliance / concentration test evaluation.
//!
//! Every active test yields exactly one [`ComplianceTestResult`]. A zero denominator is
//! recovered locally: `calculated_value = 0`, `denominator_zero = true`, and pass/fail
//! is still decided by the comparison against the threshold.

use std::time::Instant;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::definition::{validate_test_set, ComparisonKind, ComplianceTest, TestCategory};
use super::formulas::evaluate_formula;
use super::library::standard_test_library;
use crate::cash_flow::aggregator::{aggregate_pool, AggregationRequest, AssetSnapshot};
use crate::deal::asset::{Asset, CashFlowPeriod};
use crate::types::{with_metadata, ComputationOutput};
use crate::CloEngineResult;

// ---------------------------------------------------------------------------
// Input / Output types
// ---------------------------------------------------------------------------

/// One row per test per deal per date. Append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceTestResult {
    pub deal_id: String,
    pub test_name: String,
    pub category: TestCategory,
    pub as_of: Option<NaiveDate>,
    pub period: u32,
    pub numerator: Decimal,
    pub denominator: Decimal,
    pub calculated_value: Decimal,
    pub threshold_value: Decimal,
    pub comparison: ComparisonKind,
    pub pass_fail: bool,
    /// Signed headroom, positive when passing.
    pub margin: Decimal,
    pub denominator_zero: bool,
    pub matched_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSummary {
    pub deal_id: String,
    pub period: u32,
    pub as_of: Option<NaiveDate>,
    pub results: Vec<ComplianceTestResult>,
    pub passed: usize,
    pub failed: usize,
    pub failing_tests: Vec<String>,
}

impl ComplianceSummary {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn result(&self, test_name: &str) -> Option<&ComplianceTestResult> {
        self.results.iter().find(|r| r.test_name == test_name)
    }
}

/// Tests to evaluate against an already aggregated snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ComplianceRequest<'a> {
    pub deal_id: &'a str,
    pub period: u32,
    pub snapshot: &'a AssetSnapshot,
    pub tests: &'a [ComplianceTest],
}

/// Self-contained input: raw positions and cash flows plus test definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceInput {
    pub deal_id: String,
    pub period: u32,
    pub as_of: NaiveDate,
    pub positions: Vec<Asset>,
    pub cash_flows: Vec<CashFlowPeriod>,
    /// Defaults to the standard library when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<Vec<ComplianceTest>>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Evaluate one test against a snapshot. Never fails.
pub fn evaluate_test(
    deal_id: &str,
    period: u32,
    snapshot: &AssetSnapshot,
    test: &ComplianceTest,
) -> ComplianceTestResult {
    let value = evaluate_formula(&test.formula, &test.filter, snapshot);
    let denominator_zero = value.denominator.is_zero();
    let calculated_value = if denominator_zero {
        Decimal::ZERO
    } else {
        value.numerator / value.denominator
    };
    let pass_fail = test.comparison.passes(calculated_value, test.threshold_value);

    tracing::debug!(
        deal_id,
        period,
        test = %test.name,
        calculated = %calculated_value,
        threshold = %test.threshold_value,
        pass_fail,
        denominator_zero,
        "compliance test evaluated"
    );

    ComplianceTestResult {
        deal_id: deal_id.to_string(),
        test_name: test.name.clone(),
        category: test.category,
        as_of: snapshot.as_of,
        period,
        numerator: value.numerator,
        denominator: value.denominator,
        calculated_value,
        threshold_value: test.threshold_value,
        comparison: test.comparison,
        pass_fail,
        margin: test.comparison.margin(calculated_value, test.threshold_value),
        denominator_zero,
        matched_count: value.matched_count,
    }
}

/// Evaluate every active test in definition order.
///
/// Malformed definitions (bad filter, duplicate names) fail the whole request before
/// any test is evaluated.
pub fn evaluate_compliance(request: &ComplianceRequest<'_>) -> CloEngineResult<ComplianceSummary> {
    validate_test_set(request.deal_id, request.tests)?;

    let results: Vec<ComplianceTestResult> = request
        .tests
        .iter()
        .filter(|t| t.active)
        .map(|t| evaluate_test(request.deal_id, request.period, request.snapshot, t))
        .collect();

    let failing_tests: Vec<String> = results
        .iter()
        .filter(|r| !r.pass_fail)
        .map(|r| r.test_name.clone())
        .collect();
    let failed = failing_tests.len();
    if failed > 0 {
        tracing::info!(
            deal_id = request.deal_id,
            period = request.period,
            failed,
            "compliance tests failing"
        );
    }

    Ok(ComplianceSummary {
        deal_id: request.deal_id.to_string(),
        period: request.period,
        as_of: request.snapshot.as_of,
        passed: results.len() - failed,
        failed,
        failing_tests,
        results,
    })
}

/// Aggregate the pool and evaluate compliance, wrapped in the output envelope.
pub fn run_compliance(input: &ComplianceInput) -> CloEngineResult<ComputationOutput<ComplianceSummary>> {
    let start = Instant::now();

    let aggregate = aggregate_pool(&AggregationRequest {
        deal_id: &input.deal_id,
        period: input.period,
        as_of: input.as_of,
        positions: &input.positions,
        cash_flows: &input.cash_flows,
    })?;
    let library;
    let tests: &[ComplianceTest] = match &input.tests {
        Some(t) => t,
        None => {
            library = standard_test_library();
            &library
        }
    };

    let summary = evaluate_compliance(&ComplianceRequest {
        deal_id: &input.deal_id,
        period: input.period,
        snapshot: &aggregate.snapshot,
        tests,
    })?;

    let mut warnings = aggregate.warnings;
    warnings.extend(
        summary
            .results
            .iter()
            .filter(|r| r.denominator_zero)
            .map(|r| format!("Test '{}' has a zero denominator; reported as 0.", r.test_name)),
    );

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "CLO Compliance / Concentration Tests",
        &serde_json::json!({
            "deal_id": input.deal_id,
            "period": input.period,
            "as_of": input.as_of,
            "test_count": tests.len(),
            "standard_library": input.tests.is_none(),
        }),
        warnings,
        elapsed,
        summary,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
